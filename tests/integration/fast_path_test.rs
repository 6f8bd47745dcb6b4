//! Fast Path Integration Tests
//!
//! Template answers, deep-mode overrides, speculative pre-computation and
//! the adaptive disabling of speculation.

use std::sync::Arc;

use cascade_orchestrator::services::cache::{CacheConfig, CacheManager};
use cascade_orchestrator::services::fast_path::{PathKind, SpeculationConfig, SpeculationEngine};
use cascade_orchestrator::{
    ConvContext, OrchestrationEvent, OrchestratorConfig, RecordingEventSink, TurnOrchestrator,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::common::MockProvider;

async fn orchestrator(
    config: OrchestratorConfig,
    sink: Arc<RecordingEventSink>,
) -> (TurnOrchestrator, Arc<MockProvider>) {
    let responder = Arc::new(MockProvider::new("responder"));
    let mut builder = TurnOrchestrator::builder(config)
        .events(sink)
        .provider(responder.clone());
    for name in ["memory", "profileLookup", "research", "synthesize", "report"] {
        builder = builder.provider(Arc::new(MockProvider::new(name)));
    }
    (builder.build().await.unwrap(), responder)
}

#[tokio::test]
async fn test_greeting_is_answered_from_template() {
    let sink = Arc::new(RecordingEventSink::new());
    let (orchestrator, _) = orchestrator(OrchestratorConfig::default(), sink.clone()).await;

    let mut ctx = ConvContext::new("c1", 0);
    ctx.extra.insert("name".to_string(), json!("Ada"));
    let outcome = orchestrator
        .handle_turn("Hello!", &ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.path, PathKind::FastTemplate);
    assert_eq!(
        outcome.fast_response.as_deref(),
        Some("Hello Ada! How can I help you today?")
    );
    assert!(outcome.report.is_none());
    assert_eq!(sink.named("fast_path_served").len(), 1);
    assert!(sink.named("phase_started").is_empty());
}

#[tokio::test]
async fn test_missing_template_parameter_is_dropped() {
    let (orchestrator, _) =
        orchestrator(OrchestratorConfig::default(), Arc::new(RecordingEventSink::new())).await;
    let outcome = orchestrator
        .handle_turn("hi", &ConvContext::new("c1", 1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome.fast_response.as_deref(),
        Some("Hi! What would you like to work on?")
    );
}

#[tokio::test]
async fn test_deep_mode_forces_slow_path() {
    let (orchestrator, _) =
        orchestrator(OrchestratorConfig::default(), Arc::new(RecordingEventSink::new())).await;
    let ctx = ConvContext::new("c1", 1).with_mode("deep");
    let outcome = orchestrator
        .handle_turn("hello", &ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.path, PathKind::SlowPath);
    assert!(outcome.fast_response.is_none());
    assert!(outcome.response("memory").unwrap().success);
}

#[tokio::test]
async fn test_complex_marker_forces_slow_path() {
    let (orchestrator, _) =
        orchestrator(OrchestratorConfig::default(), Arc::new(RecordingEventSink::new())).await;
    let outcome = orchestrator
        .handle_turn("why is the build slow?", &ConvContext::new("c1", 1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.path, PathKind::SlowPath);
    assert!(outcome.decision.reason.contains("complexity marker"));
}

#[tokio::test]
async fn test_speculated_follow_up_is_served_precomputed() {
    let sink = Arc::new(RecordingEventSink::new());
    let (orchestrator, responder) = orchestrator(OrchestratorConfig::default(), sink.clone()).await;
    let cancel = CancellationToken::new();

    let greeting = orchestrator
        .handle_turn("hey", &ConvContext::new("c1", 0), &cancel)
        .await
        .unwrap();
    assert_eq!(greeting.speculative_tasks.len(), 2);
    for task in greeting.speculative_tasks {
        task.await.unwrap();
    }
    assert_eq!(responder.calls(), 2);

    let follow_up = orchestrator
        .handle_turn("What can you do", &ConvContext::new("c1", 1), &cancel)
        .await
        .unwrap();

    assert_eq!(follow_up.path, PathKind::FastPrecomputed);
    assert_eq!(follow_up.speculation_hit, Some(true));
    assert_eq!(
        follow_up.fast_response.as_deref(),
        Some("responder: what can you do")
    );
    assert_eq!(responder.calls(), 2);

    let stats = orchestrator.router().speculation().stats("greeting").unwrap();
    assert_eq!((stats.trials, stats.hits), (1, 1));
}

#[tokio::test]
async fn test_speculated_answers_stay_in_their_conversation() {
    let (orchestrator, responder) =
        orchestrator(OrchestratorConfig::default(), Arc::new(RecordingEventSink::new())).await;
    let cancel = CancellationToken::new();

    let greeting = orchestrator
        .handle_turn("hey", &ConvContext::new("alice-chat", 0), &cancel)
        .await
        .unwrap();
    for task in greeting.speculative_tasks {
        task.await.unwrap();
    }

    // Another conversation asks the predicted question first
    let other = orchestrator
        .handle_turn("What can you do", &ConvContext::new("bob-chat", 1), &cancel)
        .await
        .unwrap();
    assert_eq!(other.path, PathKind::SlowPath);
    assert_eq!(other.speculation_hit, None);
    assert!(other.fast_response.is_none());

    let own = orchestrator
        .handle_turn("What can you do", &ConvContext::new("alice-chat", 1), &cancel)
        .await
        .unwrap();
    assert_eq!(own.path, PathKind::FastPrecomputed);
    assert_eq!(responder.calls(), 2);
}

#[tokio::test]
async fn test_mispredicted_follow_up_counts_as_miss() {
    let (orchestrator, _) =
        orchestrator(OrchestratorConfig::default(), Arc::new(RecordingEventSink::new())).await;
    let cancel = CancellationToken::new();

    orchestrator
        .handle_turn("hello", &ConvContext::new("c1", 0), &cancel)
        .await
        .unwrap();
    let outcome = orchestrator
        .handle_turn("draft the quarterly summary", &ConvContext::new("c1", 1), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.speculation_hit, Some(false));
    assert_eq!(outcome.path, PathKind::SlowPath);
}

#[tokio::test]
async fn test_disabled_fast_path_routes_everything_slow() {
    let mut config = OrchestratorConfig::default();
    config.fast_path.enabled = false;
    let (orchestrator, responder) = orchestrator(config, Arc::new(RecordingEventSink::new())).await;

    let outcome = orchestrator
        .handle_turn("hello", &ConvContext::new("c1", 0), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.path, PathKind::SlowPath);
    assert!(outcome.speculative_tasks.is_empty());
    assert_eq!(responder.calls(), 0);
}

/// Three hits in ten trials: the pattern is switched off once its hit rate
/// drops under the floor and stays off.
#[tokio::test]
async fn test_low_hit_rate_disables_speculation() {
    let sink = Arc::new(RecordingEventSink::new());
    let cache = Arc::new(CacheManager::in_memory(CacheConfig::default(), sink.clone()));
    let engine = SpeculationEngine::new(SpeculationConfig::default(), cache, sink.clone());

    let outcomes = [true, true, true, false, false, false, false, false, false, false];
    let mut disabled_at = None;
    for (i, hit) in outcomes.iter().enumerate() {
        engine.record_outcome("greeting", *hit);
        if disabled_at.is_none() && !engine.is_enabled("greeting") {
            disabled_at = Some(i + 1);
        }
    }

    let stats = engine.stats("greeting").unwrap();
    assert_eq!((stats.trials, stats.hits), (10, 3));
    assert!((stats.hit_rate() - 0.3).abs() < 1e-9);
    assert_eq!(disabled_at, Some(7));
    assert!(!engine.is_enabled("greeting"));
    assert!(engine.is_enabled("acknowledgement"));

    let toggles = sink.named("speculation_toggled");
    assert_eq!(toggles.len(), 1);
    assert!(matches!(
        &toggles[0],
        OrchestrationEvent::SpeculationToggled { enabled: false, .. }
    ));

    engine.reenable("greeting");
    assert!(engine.is_enabled("greeting"));
    assert_eq!(sink.named("speculation_toggled").len(), 2);
}
