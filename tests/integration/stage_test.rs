//! Stage Controller Integration Tests
//!
//! Forward-only transitions, requested synthesis, the minimum-turn rule,
//! keyword analysis and concurrent evaluation of one conversation.

use std::sync::Arc;

use cascade_orchestrator::services::stage::{StageConfig, StageController};
use cascade_orchestrator::{ConvContext, ConversationStage, OrchestrationEvent, RecordingEventSink};

fn controller() -> (StageController, Arc<RecordingEventSink>) {
    let sink = Arc::new(RecordingEventSink::new());
    (StageController::new(StageConfig::default(), sink.clone()), sink)
}

#[test]
fn test_early_turns_skip_analysis_even_with_keywords() {
    let (stages, _) = controller();
    let ctx = ConvContext::new("c1", 1).with_problem_identified(true);
    let decision = stages.evaluate_turn("there is a bug in checkout", &ctx);

    assert_eq!(decision.stage, ConversationStage::Exploration);
    assert!(!decision.analyzed);
    assert_eq!(stages.analysis_count(), 0);
}

#[test]
fn test_keyword_moves_conversation_to_gathering() {
    let (stages, sink) = controller();
    let quiet = stages.evaluate_turn("tell me about the roadmap", &ConvContext::new("c1", 3));
    assert_eq!(quiet.stage, ConversationStage::Exploration);
    assert!(quiet.analyzed);

    let decision = stages.evaluate_turn(
        "can you investigate why the sync keeps dropping rows",
        &ConvContext::new("c1", 4),
    );
    assert!(decision.transitioned());
    assert_eq!(decision.previous, ConversationStage::Exploration);
    assert_eq!(decision.stage, ConversationStage::OrchestratedGathering);
    assert_eq!(stages.analysis_count(), 2);

    let events = sink.named("stage_transition");
    assert_eq!(events.len(), 1);
    match &events[0] {
        OrchestrationEvent::StageTransition { conversation_id, from, to, .. } => {
            assert_eq!(conversation_id, "c1");
            assert_eq!(*from, ConversationStage::Exploration);
            assert_eq!(*to, ConversationStage::OrchestratedGathering);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn test_synthesis_can_be_requested_straight_from_exploration() {
    let (stages, sink) = controller();
    assert_eq!(stages.stage("c1"), ConversationStage::Exploration);

    let decision = stages.request_synthesis("c1").unwrap();
    assert!(decision.transitioned());
    assert_eq!(decision.previous, ConversationStage::Exploration);
    assert_eq!(decision.stage, ConversationStage::Synthesis);
    assert_eq!(stages.stage("c1"), ConversationStage::Synthesis);

    let transitions = sink.named("stage_transition");
    assert_eq!(transitions.len(), 1);
    assert!(matches!(
        &transitions[0],
        OrchestrationEvent::StageTransition {
            from: ConversationStage::Exploration,
            to: ConversationStage::Synthesis,
            ..
        }
    ));
}

#[test]
fn test_stages_never_move_backwards() {
    let (stages, _) = controller();
    stages.request_synthesis("c1").unwrap();

    for turn in 3..8 {
        let decision = stages.evaluate_turn(
            "debug the failing import",
            &ConvContext::new("c1", turn).with_problem_identified(true),
        );
        assert_eq!(decision.stage, ConversationStage::Synthesis);
        assert!(!decision.transitioned());
    }
    assert!(stages.request_synthesis("c1").is_none());
}

#[test]
fn test_conversations_are_independent() {
    let (stages, _) = controller();
    stages.evaluate_turn("root cause please", &ConvContext::new("a", 5));
    stages.evaluate_turn("hello again", &ConvContext::new("b", 5));

    assert_eq!(stages.stage("a"), ConversationStage::OrchestratedGathering);
    assert_eq!(stages.stage("b"), ConversationStage::Exploration);
    assert_eq!(stages.stage("never-seen"), ConversationStage::Exploration);
}

#[tokio::test]
async fn test_concurrent_turns_transition_once() {
    let sink = Arc::new(RecordingEventSink::new());
    let stages = Arc::new(StageController::new(StageConfig::default(), sink.clone()));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let stages = stages.clone();
            tokio::spawn(async move {
                let ctx = ConvContext::new("shared", 3 + i).with_problem_identified(true);
                stages.evaluate_turn("the export is broken", &ctx)
            })
        })
        .collect();

    let mut transitions = 0;
    for handle in handles {
        let decision = handle.await.unwrap();
        assert_eq!(decision.stage, ConversationStage::OrchestratedGathering);
        if decision.transitioned() {
            transitions += 1;
        }
    }

    assert_eq!(transitions, 1);
    assert_eq!(sink.named("stage_transition").len(), 1);
}

#[test]
fn test_reset_returns_to_exploration() {
    let (stages, _) = controller();
    stages.request_synthesis("c1");
    assert!(stages.reset("c1"));
    assert!(!stages.reset("c1"));
    assert_eq!(stages.stage("c1"), ConversationStage::Exploration);
}
