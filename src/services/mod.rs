//! Services
//!
//! Orchestration services. Each module owns one concern and its config
//! section; `orchestrator` composes them into the per-turn pipeline.

pub mod analytics;
pub mod cache;
pub mod cost;
pub mod dependency;
pub mod events;
pub mod executor;
pub mod fast_path;
pub mod orchestrator;
pub mod stage;

pub use events::{ChannelEventSink, TracingEventSink};
pub use orchestrator::{TurnOrchestrator, TurnOrchestratorBuilder, TurnOutcome};
