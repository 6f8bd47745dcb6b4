//! Turn Pipeline Integration Tests
//!
//! Whole conversations through `TurnOrchestrator`: stage progression,
//! cached provider calls and their scoping, partial failures, budget
//! refusals and phase fallbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_orchestrator::services::dependency::Phase;
use cascade_orchestrator::services::executor::PhaseFallback;
use cascade_orchestrator::services::fast_path::PathKind;
use cascade_orchestrator::services::ChannelEventSink;
use cascade_orchestrator::{
    CapabilityProvider, ConvContext, ConversationStage, CoreResult, ErrorKind, OrchestratorConfig,
    ProviderOutput, ProviderRequest, ProviderResponse, RecordingEventSink, TurnOrchestrator,
};
use tokio_util::sync::CancellationToken;

use crate::common::MockProvider;

/// Reports which earlier results it was handed, as `name=ok|failed`.
struct ResultsEcho {
    name: &'static str,
}

#[async_trait]
impl CapabilityProvider for ResultsEcho {
    fn name(&self) -> &str {
        self.name
    }

    async fn invoke(&self, request: &ProviderRequest) -> CoreResult<ProviderOutput> {
        let mut seen: Vec<String> = request
            .context
            .get("results")
            .and_then(|r| r.as_object())
            .map(|results| {
                results
                    .iter()
                    .map(|(name, result)| {
                        let ok = result["success"].as_bool().unwrap_or(false);
                        format!("{}={}", name, if ok { "ok" } else { "failed" })
                    })
                    .collect()
            })
            .unwrap_or_default();
        seen.sort();
        Ok(ProviderOutput::text(seen.join(",")))
    }

    fn cacheable(&self) -> bool {
        false
    }
}

/// Answers with the note kept for the request's conversation.
struct NotesProvider {
    notes: HashMap<&'static str, &'static str>,
}

#[async_trait]
impl CapabilityProvider for NotesProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn invoke(&self, request: &ProviderRequest) -> CoreResult<ProviderOutput> {
        let conversation = request.context_str("conversation_id").unwrap_or_default();
        let note = self.notes.get(conversation).copied().unwrap_or("nothing noted");
        Ok(ProviderOutput::text(note))
    }
}

/// Cacheable synthesizer that repeats the memory result it was handed.
#[derive(Default)]
struct MemoryEcho {
    calls: AtomicUsize,
}

#[async_trait]
impl CapabilityProvider for MemoryEcho {
    fn name(&self) -> &str {
        "synthesize"
    }

    async fn invoke(&self, request: &ProviderRequest) -> CoreResult<ProviderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let memory = request
            .context
            .get("results")
            .and_then(|r| r["memory"]["content"].as_str())
            .unwrap_or_default();
        Ok(ProviderOutput::text(format!("noted: {}", memory)))
    }
}

struct Fixture {
    orchestrator: TurnOrchestrator,
    memory: Arc<MockProvider>,
    sink: Arc<RecordingEventSink>,
}

async fn fixture(config: OrchestratorConfig, research: MockProvider) -> Fixture {
    let sink = Arc::new(RecordingEventSink::new());
    let memory = Arc::new(MockProvider::new("memory"));
    let orchestrator = TurnOrchestrator::builder(config)
        .events(sink.clone())
        .provider(memory.clone())
        .provider(Arc::new(MockProvider::new("profileLookup")))
        .provider(Arc::new(research))
        .provider(Arc::new(ResultsEcho { name: "synthesize" }))
        .provider(Arc::new(ResultsEcho { name: "report" }))
        .provider(Arc::new(MockProvider::new("responder")))
        .build()
        .await
        .unwrap();
    Fixture {
        orchestrator,
        memory,
        sink,
    }
}

#[tokio::test]
async fn test_conversation_progresses_through_every_stage() {
    let f = fixture(OrchestratorConfig::default(), MockProvider::new("research")).await;
    let cancel = CancellationToken::new();

    let greeting = f
        .orchestrator
        .handle_turn("hello", &ConvContext::new("c1", 0), &cancel)
        .await
        .unwrap();
    assert_eq!(greeting.path, PathKind::FastTemplate);

    let exploring = f
        .orchestrator
        .handle_turn("tell me about the importer", &ConvContext::new("c1", 1), &cancel)
        .await
        .unwrap();
    assert_eq!(exploring.stage, ConversationStage::Exploration);
    assert_eq!(exploring.responses().len(), 1);

    let gathering = f
        .orchestrator
        .handle_turn("the importer is broken since monday", &ConvContext::new("c1", 3), &cancel)
        .await
        .unwrap();
    assert_eq!(gathering.stage, ConversationStage::OrchestratedGathering);
    assert_eq!(gathering.responses().len(), 4);
    assert_eq!(
        gathering.response("synthesize").unwrap().content,
        "memory=ok,profileLookup=ok,research=ok"
    );

    f.orchestrator.request_synthesis("c1").unwrap();
    let synthesis = f
        .orchestrator
        .handle_turn("summarize what we found", &ConvContext::new("c1", 4), &cancel)
        .await
        .unwrap();
    assert_eq!(synthesis.stage, ConversationStage::Synthesis);
    assert_eq!(synthesis.response("report").unwrap().content, "memory=ok");

    let transitions = f.sink.named("stage_transition");
    assert_eq!(transitions.len(), 2);
}

#[tokio::test]
async fn test_repeated_query_is_served_from_cache_without_charge() {
    let f = fixture(OrchestratorConfig::default(), MockProvider::new("research")).await;
    let cancel = CancellationToken::new();
    let ctx = ConvContext::new("c1", 1);

    let first = f
        .orchestrator
        .handle_turn("list the open invoices", &ctx, &cancel)
        .await
        .unwrap();
    let memory = first.response("memory").unwrap();
    assert_eq!(memory.metadata["cache"], "miss");
    assert!(memory.metadata.contains_key("cost_micros"));
    let spent = f.orchestrator.budget().snapshot().spent_today;

    let second = f
        .orchestrator
        .handle_turn("List the open  invoices", &ctx, &cancel)
        .await
        .unwrap();
    let memory = second.response("memory").unwrap();
    assert_ne!(memory.metadata["cache"], "miss");
    assert!(!memory.metadata.contains_key("model_tier"));
    assert_eq!(memory.content, first.response("memory").unwrap().content);

    assert_eq!(f.memory.calls(), 1);
    assert_eq!(f.orchestrator.budget().snapshot().spent_today, spent);
    assert_eq!(f.orchestrator.cache().stats().puts, 1);
}

#[tokio::test]
async fn test_cached_answers_follow_upstream_results() {
    let synthesize = Arc::new(MemoryEcho::default());
    let orchestrator = TurnOrchestrator::builder(OrchestratorConfig::default())
        .provider(Arc::new(NotesProvider {
            notes: HashMap::from([("a", "user is anxious"), ("b", "user is thrilled")]),
        }))
        .provider(Arc::new(MockProvider::new("profileLookup")))
        .provider(Arc::new(MockProvider::new("research")))
        .provider(synthesize.clone())
        .build()
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let query = "how is the user feeling about the launch";
    let in_conversation = |id: &str| ConvContext::new(id, 3).with_problem_identified(true);

    let first = orchestrator
        .handle_turn(query, &in_conversation("a"), &cancel)
        .await
        .unwrap();
    let answer = first.response("synthesize").unwrap();
    assert_eq!(answer.content, "noted: user is anxious");
    assert_eq!(answer.metadata["cache"], "miss");

    // Same query, different upstream results: never the other conversation's answer
    let other = orchestrator
        .handle_turn(query, &in_conversation("b"), &cancel)
        .await
        .unwrap();
    let answer = other.response("synthesize").unwrap();
    assert_eq!(answer.content, "noted: user is thrilled");
    assert_eq!(answer.metadata["cache"], "miss");

    // Same query and same inputs in the first conversation: served from cache
    let repeat = orchestrator
        .handle_turn(query, &in_conversation("a"), &cancel)
        .await
        .unwrap();
    let answer = repeat.response("synthesize").unwrap();
    assert_eq!(answer.content, "noted: user is anxious");
    assert_ne!(answer.metadata["cache"], "miss");
    assert_eq!(synthesize.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_uncacheable_provider_is_called_every_turn() {
    let memory = Arc::new(MockProvider::new("memory").uncacheable());
    let orchestrator = TurnOrchestrator::builder(OrchestratorConfig::default())
        .provider(memory.clone())
        .build()
        .await
        .unwrap();
    let ctx = ConvContext::new("c1", 1);

    for _ in 0..2 {
        let outcome = orchestrator
            .handle_turn("list the open invoices", &ctx, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.response("memory").unwrap().metadata["cache"], "bypass");
    }
    assert_eq!(memory.calls(), 2);
    assert_eq!(orchestrator.cache().stats().puts, 0);
}

#[tokio::test]
async fn test_failed_provider_is_reported_to_synthesis() {
    let f = fixture(
        OrchestratorConfig::default(),
        MockProvider::new("research").failing(),
    )
    .await;
    let ctx = ConvContext::new("c1", 3).with_problem_identified(true);

    let outcome = f
        .orchestrator
        .handle_turn("orders are stuck in pending", &ctx, &CancellationToken::new())
        .await
        .unwrap();

    let research = outcome.response("research").unwrap();
    assert!(!research.success);
    assert_eq!(research.error_kind, Some(ErrorKind::ProviderFailure));
    assert_eq!(
        outcome.response("synthesize").unwrap().content,
        "memory=ok,profileLookup=ok,research=failed"
    );
}

#[tokio::test]
async fn test_exhausted_budget_fails_calls_not_the_turn() {
    let mut config = OrchestratorConfig::default();
    config.budget.daily_limit_usd = 0.0001;
    config.budget.per_caller_limit_usd = None;
    let f = fixture(config, MockProvider::new("research")).await;

    let outcome = f
        .orchestrator
        .handle_turn("list the open invoices", &ConvContext::new("c1", 1), &CancellationToken::new())
        .await
        .unwrap();

    let memory = outcome.response("memory").unwrap();
    assert_eq!(memory.error_kind, Some(ErrorKind::BudgetExceeded));
    assert_eq!(f.memory.calls(), 0);

    // Critical turns bypass the limit
    let critical = ConvContext::new("c1", 1).with_critical(true);
    let outcome = f
        .orchestrator
        .handle_turn("list the overdue invoices", &critical, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.response("memory").unwrap().success);
    assert_eq!(f.sink.named("budget_override").len(), 1);
}

#[tokio::test]
async fn test_all_failed_phase_uses_fallback() {
    let mut config = OrchestratorConfig::default();
    config.executor.enable_fallback = true;

    let fallback: PhaseFallback = Arc::new(|_: &Phase, failed: &[ProviderResponse]| {
        failed
            .iter()
            .map(|r| {
                ProviderResponse::from_output(
                    r.provider_name.clone(),
                    ProviderOutput::text("no memory available"),
                    Duration::ZERO,
                )
            })
            .collect()
    });

    let orchestrator = TurnOrchestrator::builder(config)
        .provider(Arc::new(MockProvider::new("memory").failing()))
        .fallback(fallback)
        .build()
        .await
        .unwrap();

    let outcome = orchestrator
        .handle_turn("list the open invoices", &ConvContext::new("c1", 1), &CancellationToken::new())
        .await
        .unwrap();

    let memory = outcome.response("memory").unwrap();
    assert!(memory.success);
    assert_eq!(memory.content, "no memory available");
    assert_eq!(memory.metadata["fallback"], true);
    assert!(outcome.report.as_ref().unwrap().phases[0].fallback_applied);
}

#[tokio::test]
async fn test_cyclic_stage_config_is_rejected() {
    let mut config = OrchestratorConfig::default();
    config.stage.synthesis = config
        .stage
        .synthesis
        .clone()
        .with_dependency("memory", "report");

    assert!(TurnOrchestrator::builder(config).build().await.is_err());
}

#[tokio::test]
async fn test_missing_stage_provider_fails_at_execution() {
    let orchestrator = TurnOrchestrator::builder(OrchestratorConfig::default())
        .build()
        .await
        .unwrap();
    let err = orchestrator
        .handle_turn("list the open invoices", &ConvContext::new("c1", 1), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownProvider);
}

#[tokio::test]
async fn test_events_stream_to_channel() {
    let (channel, mut rx) = ChannelEventSink::new();
    let orchestrator = TurnOrchestrator::builder(OrchestratorConfig::default())
        .events(Arc::new(channel))
        .provider(Arc::new(MockProvider::new("memory")))
        .build()
        .await
        .unwrap();

    orchestrator
        .handle_turn("list the open invoices", &ConvContext::new("c1", 1), &CancellationToken::new())
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    assert!(names.contains(&"phase_started"));
    assert!(names.contains(&"model_selected"));
    assert!(names.contains(&"phase_completed"));
}
