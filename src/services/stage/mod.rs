//! Stage Module
//!
//! Conversation stages and the providers each stage consults.

mod controller;

pub use controller::{StageConfig, StageController, StageDecision, StageProviders};
