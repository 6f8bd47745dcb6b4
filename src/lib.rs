//! Cascade Orchestrator
//!
//! Orchestration core for multi-agent conversational turns. It includes:
//! - Dependency planning of providers into parallel phases
//! - A bounded parallel executor with cache, model-tier and profiling layers
//! - Exact and semantic response caching with graceful degradation
//! - Cost-aware model selection against a daily budget
//! - Stage-aware orchestration and a fast path with speculation
//! - TOML/JSON configuration loading

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export the core vocabulary so callers need a single dependency
pub use cascade_core::{
    BudgetLevel, CapabilityProvider, ConvContext, ConversationStage, CoreError, CoreResult,
    ErrorKind, EventSink, LookupMode, ModelTier, NoopEventSink, OrchestrationEvent,
    ProviderOutput, ProviderRegistry, ProviderRequest, ProviderResponse, RecordingEventSink,
    TokenUsage,
};

pub use models::OrchestratorConfig;
pub use services::orchestrator::{TurnOrchestrator, TurnOrchestratorBuilder, TurnOutcome};
pub use storage::{ConfigFormat, ConfigLoader};
pub use utils::error::{AppError, AppResult};
