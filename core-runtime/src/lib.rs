//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the offline core:
//! - Logging and tracing bootstrap
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every component crate depends on this one. It fixes the conventions the
//! rest of the workspace follows: how capabilities are injected
//! ([`config::CoreConfig`]), how state transitions are announced
//! ([`events::EventBus`]) and where log events end up ([`logging`]).

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, RetryPolicy};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
