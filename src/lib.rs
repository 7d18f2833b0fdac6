//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service` and, through it, the connectivity, cache,
//! resilience, sync and offline crates). Host applications can depend on
//! `offline-core-workspace` and enable `desktop-shims` without wiring each
//! crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
