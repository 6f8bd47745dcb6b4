//! Storage Layer
//!
//! Reading and writing orchestrator config files.

pub mod config;

pub use config::{ConfigFormat, ConfigLoader};
