//! Shared foundations for the Scribeflow crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error taxonomy, the error classifier, serde helpers
//! - `runtime`: clock abstraction and the resilience primitives (retry
//!   coordinator, circuit breaker, rate limiter)
//! - `observability`: tracing (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{
    classify, Classify, ErrorCategory, ErrorClassification, ErrorSeverity, RetryStrategy,
    ServiceError, ServiceResult,
};
#[cfg(feature = "runtime")]
pub use resilience::{Clock, MockClock, SystemClock};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, option_duration_millis};
