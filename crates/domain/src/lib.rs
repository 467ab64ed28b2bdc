//! # Scribeflow Domain
//!
//! Domain types and models for transcription job orchestration.
//!
//! This crate contains:
//! - The managed job model and its lifecycle transitions
//! - Transcription requests and normalized results
//! - Failed-job records, statistics snapshots and remote status views
//! - Configuration structures for every orchestration component
//! - Domain error types and Result definitions
//!
//! ## Architecture
//! - Depends only on `scribeflow-common` for the error taxonomy and the
//!   resilience configuration types
//! - Pure data and state-transition functions; no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
