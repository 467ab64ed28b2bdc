//! Common utility helpers
//!
//! - **[`serde`]**: serialization helpers for durations

pub mod serde;

pub use self::serde::{duration_millis, option_duration_millis};
