//! Parallel Executor Integration Tests
//!
//! Timing, isolation and cancellation behavior of phase-by-phase execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cascade_orchestrator::services::dependency::DependencyGraph;
use cascade_orchestrator::services::executor::{ExecutorConfig, ParallelExecutor};
use cascade_orchestrator::{
    ErrorKind, NoopEventSink, ProviderRequest, ProviderResponse, RecordingEventSink,
};
use tokio_util::sync::CancellationToken;

use crate::common::{registry_of, MockProvider};

fn request(name: &str, prior: &[ProviderResponse]) -> ProviderRequest {
    let query = format!("after {}", prior.len());
    ProviderRequest::new("tester", name, query, format!("req-{name}"))
}

/// memory (500ms) and profileLookup (300ms) run together, then synthesize
/// (1000ms) runs alone: wall clock near 1500ms against 1800ms sequential.
#[tokio::test]
async fn test_two_phase_turn_runs_in_parallel() {
    let providers = [
        Arc::new(MockProvider::new("memory").delayed(500)),
        Arc::new(MockProvider::new("profileLookup").delayed(300)),
        Arc::new(MockProvider::new("synthesize").delayed(1000)),
    ];
    let registry = Arc::new(registry_of(&providers));
    let plan = DependencyGraph::from_edges(
        ["memory", "profileLookup", "synthesize"],
        &[("synthesize", "memory"), ("synthesize", "profileLookup")],
    )
    .build_plan()
    .unwrap();

    let sink = Arc::new(RecordingEventSink::new());
    let executor = ParallelExecutor::new(registry, sink.clone());
    let started = Instant::now();
    let report = executor
        .execute(&plan, request, &ExecutorConfig::default(), &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(report.all_succeeded());
    assert!(elapsed >= Duration::from_millis(1500), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1750), "elapsed {elapsed:?}");
    assert!(report.sequential() >= Duration::from_millis(1800));
    assert!(report.speedup() > 1.1);
    assert_eq!(report.response("synthesize").unwrap().content, "synthesize: after 2");
    assert_eq!(sink.named("phase_started").len(), 2);
    assert_eq!(sink.named("phase_completed").len(), 2);
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_provider() {
    let providers = [
        Arc::new(MockProvider::new("memory")),
        Arc::new(MockProvider::new("research").failing()),
        Arc::new(MockProvider::new("synthesize")),
    ];
    let registry = Arc::new(registry_of(&providers));
    let plan = DependencyGraph::from_edges(
        ["memory", "research", "synthesize"],
        &[("synthesize", "memory"), ("synthesize", "research")],
    )
    .build_plan()
    .unwrap();

    let report = ParallelExecutor::new(registry, Arc::new(NoopEventSink))
        .execute(&plan, request, &ExecutorConfig::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    let failed = report.response("research").unwrap();
    assert_eq!(failed.error_kind, Some(ErrorKind::ProviderFailure));
    assert!(report.response("synthesize").unwrap().success);
    assert_eq!(providers[2].calls(), 1);
}

#[tokio::test]
async fn test_slow_provider_times_out_without_blocking_others() {
    let providers = [
        Arc::new(MockProvider::new("fast").delayed(20)),
        Arc::new(MockProvider::new("slow").delayed(2_000)),
    ];
    let registry = Arc::new(registry_of(&providers));
    let plan = DependencyGraph::from_edges(["fast", "slow"], &[] as &[(&str, &str)])
        .build_plan()
        .unwrap();
    let config = ExecutorConfig {
        per_provider_timeout_ms: 200,
        ..ExecutorConfig::default()
    };

    let started = Instant::now();
    let report = ParallelExecutor::new(registry, Arc::new(NoopEventSink))
        .execute(&plan, request, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(1_000));
    assert!(report.response("fast").unwrap().success);
    assert!(report.response("slow").unwrap().is_timeout());
}

#[tokio::test]
async fn test_concurrency_limit_serializes_excess_providers() {
    let names = ["a", "b", "c", "d"];
    let providers: Vec<_> = names
        .iter()
        .map(|n| Arc::new(MockProvider::new(n).delayed(200)))
        .collect();
    let registry = Arc::new(registry_of(&providers));
    let plan = DependencyGraph::from_edges(names, &[] as &[(&str, &str)])
        .build_plan()
        .unwrap();
    let config = ExecutorConfig {
        max_concurrent: 2,
        ..ExecutorConfig::default()
    };

    let started = Instant::now();
    let report = ParallelExecutor::new(registry, Arc::new(NoopEventSink))
        .execute(&plan, request, &config, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.all_succeeded());
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn test_cancellation_marks_later_phases() {
    let providers = [
        Arc::new(MockProvider::new("first").delayed(1_000)),
        Arc::new(MockProvider::new("second")),
    ];
    let registry = Arc::new(registry_of(&providers));
    let plan = DependencyGraph::from_edges(["first", "second"], &[("second", "first")])
        .build_plan()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = ParallelExecutor::new(registry, Arc::new(NoopEventSink))
        .execute(&plan, request, &ExecutorConfig::default(), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.response("first").unwrap().error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(report.response("second").unwrap().error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(providers[1].calls(), 0);
}

#[tokio::test]
async fn test_unregistered_provider_fails_before_running() {
    let providers = [Arc::new(MockProvider::new("memory"))];
    let registry = Arc::new(registry_of(&providers));
    let plan = DependencyGraph::from_edges(["memory", "ghost"], &[] as &[(&str, &str)])
        .build_plan()
        .unwrap();

    let err = ParallelExecutor::new(registry, Arc::new(NoopEventSink))
        .execute(&plan, request, &ExecutorConfig::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnknownProvider);
    assert_eq!(providers[0].calls(), 0);
}
