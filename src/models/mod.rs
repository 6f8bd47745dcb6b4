//! Data Models
//!
//! Configuration types shared across the services.

pub mod config;

pub use config::OrchestratorConfig;
