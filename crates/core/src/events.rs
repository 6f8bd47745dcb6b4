//! Orchestration Events
//!
//! Fire-and-forget notifications emitted by the orchestration core for an
//! observability collaborator. Emitting never blocks and never fails: a sink
//! that cannot deliver an event drops it.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::types::{ConversationStage, LookupMode, ModelTier};

/// Severity of a budget threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetLevel {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for BudgetLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetLevel::Info => write!(f, "info"),
            BudgetLevel::Warning => write!(f, "warning"),
            BudgetLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Event emitted by the orchestration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    /// A conversation moved to a new stage
    StageTransition {
        conversation_id: String,
        from: ConversationStage,
        to: ConversationStage,
        reason: String,
    },

    /// A phase of an execution plan started
    PhaseStarted {
        phase_index: usize,
        providers: Vec<String>,
    },

    /// A phase of an execution plan drained
    PhaseCompleted {
        phase_index: usize,
        wall_clock_ms: u64,
        sequential_ms: u64,
        succeeded: usize,
        failed: usize,
    },

    /// A cache lookup finished
    CacheLookup {
        namespace: String,
        mode: LookupMode,
        hit: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        similarity: Option<f32>,
    },

    /// The cache switched to disabled mode
    CacheDisabled { reason: String },

    /// A health check brought the cache back
    CacheRecovered,

    /// A model tier was chosen for a call
    ModelSelected {
        caller: String,
        tier: ModelTier,
        reasoning: String,
    },

    /// Daily spend crossed a configured threshold
    BudgetThreshold {
        level: BudgetLevel,
        spent_fraction: f64,
        spent_usd: f64,
    },

    /// A call ran past the daily or a caller limit. Critical calls are
    /// charged in full, others are capped at the limit.
    BudgetOverride {
        caller: String,
        spent_usd: f64,
        limit_usd: f64,
    },

    /// Speculation for a pattern was switched on or off
    SpeculationToggled {
        pattern: String,
        enabled: bool,
        hit_rate: f64,
    },

    /// A turn was answered without the slow path
    FastPathServed { pattern: String, precomputed: bool },
}

impl OrchestrationEvent {
    /// Short event name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            OrchestrationEvent::StageTransition { .. } => "stage_transition",
            OrchestrationEvent::PhaseStarted { .. } => "phase_started",
            OrchestrationEvent::PhaseCompleted { .. } => "phase_completed",
            OrchestrationEvent::CacheLookup { .. } => "cache_lookup",
            OrchestrationEvent::CacheDisabled { .. } => "cache_disabled",
            OrchestrationEvent::CacheRecovered => "cache_recovered",
            OrchestrationEvent::ModelSelected { .. } => "model_selected",
            OrchestrationEvent::BudgetThreshold { .. } => "budget_threshold",
            OrchestrationEvent::BudgetOverride { .. } => "budget_override",
            OrchestrationEvent::SpeculationToggled { .. } => "speculation_toggled",
            OrchestrationEvent::FastPathServed { .. } => "fast_path_served",
        }
    }
}

/// Receiver of orchestration events.
///
/// Implementations must return promptly; the core calls `emit` inline on
/// its hot path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OrchestrationEvent);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: OrchestrationEvent) {}
}

/// Sink that keeps every event in memory. Used by tests and debugging tools.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<OrchestrationEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<OrchestrationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Recorded events with the given name.
    pub fn named(&self, name: &str) -> Vec<OrchestrationEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: OrchestrationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Sink that forwards every event to several sinks.
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: OrchestrationEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
