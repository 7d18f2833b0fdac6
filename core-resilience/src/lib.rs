//! # Resilience Controller
//!
//! Wraps remote calls with bounded exponential-backoff retry and derives a
//! process-wide [`HealthState`] from two drivers:
//!
//! - connectivity (offline whenever the device has no path), and
//! - consecutive failures (degraded once a threshold is reached).
//!
//! Errors are classified by [`ApiError`]. Only connectivity, timeout and 5xx
//! failures are retried.
//!
//! ```ignore
//! let events: Vec<Event> = controller
//!     .execute_with_retry("load events", || async {
//!         let response = http.execute(HttpRequest::get(&url)).await?;
//!         ApiError::decode_response(response)
//!     })
//!     .await?;
//! ```

pub mod controller;
pub mod error;
pub mod state;

pub use controller::ResilienceController;
pub use error::{ApiError, ClientErrorKind, Result};
pub use state::{HealthState, RetryState};
