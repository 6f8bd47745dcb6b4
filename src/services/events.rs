//! Event Sinks
//!
//! Sinks for orchestration events that need the root crate's stack:
//! [`TracingEventSink`] forwards events to `tracing`, [`ChannelEventSink`]
//! hands them to an async consumer over an unbounded channel.

use tokio::sync::mpsc;

use cascade_core::{BudgetLevel, EventSink, OrchestrationEvent};

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: OrchestrationEvent) {
        match &event {
            OrchestrationEvent::CacheDisabled { reason } => {
                tracing::warn!(event = event.name(), reason = %reason, "orchestration event");
            }
            OrchestrationEvent::BudgetThreshold { level, spent_usd, .. } => match level {
                BudgetLevel::Info => {
                    tracing::info!(event = event.name(), level = %level, spent_usd = spent_usd, "orchestration event")
                }
                BudgetLevel::Warning | BudgetLevel::Critical => {
                    tracing::warn!(event = event.name(), level = %level, spent_usd = spent_usd, "orchestration event")
                }
            },
            OrchestrationEvent::BudgetOverride { caller, spent_usd, limit_usd } => {
                tracing::warn!(
                    event = event.name(),
                    caller = %caller,
                    spent_usd = spent_usd,
                    limit_usd = limit_usd,
                    "orchestration event"
                );
            }
            OrchestrationEvent::CacheLookup { .. } | OrchestrationEvent::ModelSelected { .. } => {
                tracing::trace!(event = event.name(), payload = ?event, "orchestration event");
            }
            _ => {
                tracing::debug!(event = event.name(), payload = ?event, "orchestration event");
            }
        }
    }
}

/// Forwards events to an unbounded channel. Never blocks; events sent after
/// the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<OrchestrationEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OrchestrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: OrchestrationEvent) {
        let _ = self.tx.send(event);
    }
}
