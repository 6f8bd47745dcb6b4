//! Utilities
//!
//! Common utilities used throughout the orchestrator.

pub mod error;

pub use error::*;
