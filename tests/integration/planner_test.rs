//! Dependency Planner Integration Tests
//!
//! Covers phase layering of the stage graphs, transitive selection,
//! cycle detection and unknown providers.

use cascade_orchestrator::services::dependency::DependencyGraph;
use cascade_orchestrator::services::stage::StageConfig;
use cascade_orchestrator::{ConversationStage, CoreError, ErrorKind};

// ============================================================================
// Phase layering
// ============================================================================

#[test]
fn test_gathering_stage_plans_two_phases() {
    let config = StageConfig::default();
    let plan = config
        .providers(ConversationStage::OrchestratedGathering)
        .plan()
        .unwrap();

    assert_eq!(plan.len(), 2);
    assert_eq!(plan.phases[0].providers, vec!["memory", "profileLookup", "research"]);
    assert_eq!(plan.phases[1].providers, vec!["synthesize"]);
    assert_eq!(plan.max_parallel(), 3);
}

#[test]
fn test_diamond_graph() {
    let graph = DependencyGraph::from_edges(
        ["a", "b", "c", "d"],
        &[("b", "a"), ("c", "a"), ("d", "b"), ("d", "c")],
    );
    let plan = graph.build_plan().unwrap();

    assert_eq!(plan.len(), 3);
    assert_eq!(plan.phase_of("a"), Some(0));
    assert_eq!(plan.phase_of("b"), Some(1));
    assert_eq!(plan.phase_of("c"), Some(1));
    assert_eq!(plan.phase_of("d"), Some(2));
    assert_eq!(plan.provider_count(), 4);
}

#[test]
fn test_every_dependency_runs_in_an_earlier_phase() {
    let graph = DependencyGraph::from_edges(
        ["fetch", "parse", "index", "rank", "answer", "audit"],
        &[
            ("parse", "fetch"),
            ("index", "parse"),
            ("rank", "index"),
            ("answer", "rank"),
            ("answer", "parse"),
        ],
    );
    let plan = graph.build_plan().unwrap();

    for provider in plan.providers() {
        let phase = plan.phase_of(provider).unwrap();
        for dep in plan.dependencies_of(provider) {
            assert!(plan.phase_of(dep).unwrap() < phase, "{dep} must precede {provider}");
        }
    }
    assert_eq!(plan.phase_of("audit"), Some(0));
}

#[test]
fn test_plan_for_pulls_in_transitive_dependencies() {
    let graph = DependencyGraph::from_edges(
        ["memory", "research", "synthesize", "report"],
        &[("synthesize", "research"), ("research", "memory")],
    );
    let plan = graph.plan_for(&["synthesize"]).unwrap();

    assert_eq!(plan.provider_count(), 3);
    assert!(plan.phase_of("report").is_none());
    assert_eq!(plan.phase_of("synthesize"), Some(2));
}

#[test]
fn test_empty_graph_has_no_phases() {
    let plan = DependencyGraph::new().build_plan().unwrap();
    assert!(plan.is_empty());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_cycle_is_reported_with_its_path() {
    let graph = DependencyGraph::from_edges(["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
    let err = graph.build_plan().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CyclicDependency);
    match err {
        CoreError::CyclicDependency(path) => {
            assert_eq!(path.first(), path.last());
            for name in ["a", "b", "c"] {
                assert!(path.iter().any(|p| p == name));
            }
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let graph = DependencyGraph::from_edges(["a"], &[("a", "a")]);
    assert_eq!(graph.build_plan().unwrap_err().kind(), ErrorKind::CyclicDependency);
}

#[test]
fn test_edge_to_unknown_provider() {
    let graph = DependencyGraph::from_edges(["a"], &[("a", "ghost")]);
    assert_eq!(graph.build_plan().unwrap_err().kind(), ErrorKind::UnknownProvider);
}

#[test]
fn test_describe_lists_phases() {
    let graph = DependencyGraph::from_edges(["a", "b"], &[("b", "a")]);
    let plan = graph.build_plan().unwrap();
    let text = graph.describe(&plan);
    assert!(text.contains("Execution Plan"));
    assert!(text.contains('a'));
    assert!(text.contains('b'));
}
