//! Turn Orchestrator
//!
//! Ties the fast-path router, stage controller, planner and executor
//! together into a single `handle_turn` entry point.

mod service;

pub use service::{TurnOrchestrator, TurnOrchestratorBuilder, TurnOutcome};
