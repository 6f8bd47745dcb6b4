//! Cascade Core
//!
//! Foundational traits, error types, and shared vocabulary for the Cascade
//! orchestration workspace. This crate has zero dependencies on the
//! orchestration services (cache, planner, executor, router).
//!
//! ## Module Organization
//!
//! - `error` - Error taxonomy (`CoreError`, `ErrorKind`, `CoreResult`)
//! - `provider` - Capability provider trait, request/response types, registry
//! - `context` - Per-turn conversation context (`ConvContext`)
//! - `types` - Shared enums (`ConversationStage`, `ModelTier`, `LookupMode`)
//! - `events` - Fire-and-forget orchestration events and sinks
//!
//! ## Design Principles
//!
//! 1. **Zero external dependencies beyond serde/async-trait/thiserror** - keeps build times minimal
//! 2. **Trait-based abstractions** - enables mocking, testing, and swapping providers
//! 3. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod context;
pub mod error;
pub mod events;
pub mod provider;
pub mod types;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult, ErrorKind};

// ── Providers ──────────────────────────────────────────────────────────
pub use provider::{
    CapabilityProvider, ProviderOutput, ProviderRegistry, ProviderRequest, ProviderResponse,
    TokenUsage,
};

// ── Conversation Context ───────────────────────────────────────────────
pub use context::{ConvContext, DEFAULT_CALLER};

// ── Shared Vocabulary ──────────────────────────────────────────────────
pub use types::{ConversationStage, LookupMode, ModelTier};

// ── Events ─────────────────────────────────────────────────────────────
pub use events::{
    BudgetLevel, EventSink, FanoutEventSink, NoopEventSink, OrchestrationEvent,
    RecordingEventSink,
};
