//! Budget and Model Selection Integration Tests
//!
//! Tier decisions against a live ledger: premium reserve, budget
//! protection, refusal, critical overrides, capped charges, per-caller
//! limits and the daily rollover.

use std::sync::{Arc, Mutex};

use cascade_orchestrator::services::cost::{
    BudgetClock, BudgetConfig, BudgetTracker, ModelSelector, SelectorConfig,
};
use cascade_orchestrator::services::executor::CallLayers;
use cascade_orchestrator::{
    ConvContext, ErrorKind, ModelTier, OrchestrationEvent, ProviderRequest, RecordingEventSink,
    TokenUsage,
};
use chrono::NaiveDate;

use crate::common::MockProvider;

const COMPLEX_QUERY: &str =
    "analyze the migration trade-offs and then plan a comprehensive roadmap";

fn single_limit_config() -> BudgetConfig {
    BudgetConfig {
        per_caller_limit_usd: None,
        ..BudgetConfig::default()
    }
}

fn selector_over(budget: Arc<BudgetTracker>, sink: Arc<RecordingEventSink>) -> ModelSelector {
    ModelSelector::new(SelectorConfig::default(), budget, sink)
}

/// Premium output costs 75 micros per token.
fn premium_output(tokens: u64) -> TokenUsage {
    TokenUsage::new(0, tokens)
}

#[test]
fn test_complex_query_gets_premium_with_fresh_budget() {
    let sink = Arc::new(RecordingEventSink::new());
    let budget = Arc::new(BudgetTracker::new(single_limit_config(), sink.clone()));
    let selector = selector_over(budget, sink.clone());

    let choice = selector.choose(COMPLEX_QUERY, &ConvContext::new("c1", 4)).unwrap();
    assert_eq!(choice.tier, ModelTier::Premium);
    assert_eq!(sink.named("model_selected").len(), 1);

    let simple = selector.choose("thanks", &ConvContext::new("c1", 4)).unwrap();
    assert_eq!(simple.tier, ModelTier::Cheap);
}

#[test]
fn test_premium_reserve_degrades_complex_query() {
    let sink = Arc::new(RecordingEventSink::new());
    let budget = Arc::new(BudgetTracker::new(single_limit_config(), sink.clone()));
    // $8.25 of $10 spent, 17.5% left
    budget.record_usage("worker", ModelTier::Premium, premium_output(110_000), false);

    let selector = selector_over(budget, sink.clone());
    let choice = selector.choose(COMPLEX_QUERY, &ConvContext::new("c1", 4)).unwrap();
    assert_eq!(choice.tier, ModelTier::Standard);
    assert!(choice.reasoning.contains("degraded"));

    let levels: Vec<_> = sink
        .named("budget_threshold")
        .into_iter()
        .filter_map(|e| match e {
            OrchestrationEvent::BudgetThreshold { level, .. } => Some(level.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(levels.len(), 2);
}

#[test]
fn test_budget_protection_forces_cheap() {
    let sink = Arc::new(RecordingEventSink::new());
    let budget = Arc::new(BudgetTracker::new(single_limit_config(), sink.clone()));
    // $9.86 of $10 spent
    budget.record_usage("worker", ModelTier::Premium, premium_output(131_500), false);

    let selector = selector_over(budget, sink);
    let ctx = ConvContext::new("c1", 4).with_mode("routine");
    let choice = selector.choose(COMPLEX_QUERY, &ctx).unwrap();
    assert_eq!(choice.tier, ModelTier::Cheap);
    assert!(choice.reasoning.starts_with("budget protection"));
}

#[test]
fn test_exhausted_budget_refuses_non_critical_calls() {
    let sink = Arc::new(RecordingEventSink::new());
    let budget = Arc::new(BudgetTracker::new(single_limit_config(), sink.clone()));
    // $10 less a few micros
    budget.record_usage("worker", ModelTier::Standard, TokenUsage::new(0, 666_666), false);
    budget.record_usage("worker", ModelTier::Cheap, TokenUsage::new(10, 0), false);

    let selector = selector_over(budget.clone(), sink.clone());
    let err = selector.choose("hello", &ConvContext::new("c1", 4)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BudgetExceeded);

    // Critical calls still run at premium and are charged with an override
    let critical = ConvContext::new("c1", 4).with_critical(true);
    let choice = selector.choose("hello", &critical).unwrap();
    assert_eq!(choice.tier, ModelTier::Premium);
    let record =
        budget.record_usage(critical.caller(), choice.tier, TokenUsage::new(100, 100), true);
    assert!(record.over_limit);
    assert_eq!(record.charged, record.cost);
    assert_eq!(sink.named("budget_override").len(), 1);
}

#[test]
fn test_caller_charge_is_capped_at_its_limit() {
    let sink = Arc::new(RecordingEventSink::new());
    let budget = BudgetTracker::new(BudgetConfig::default(), sink.clone());

    // $4.50 charged to alice against a $5 per-caller limit
    budget.record_usage("alice", ModelTier::Premium, premium_output(60_000), false);

    // The call already ran, so it is charged up to the limit
    let record = budget.record_usage("alice", ModelTier::Premium, premium_output(10_000), false);
    assert!(record.over_limit);
    assert_eq!(record.cost, 750_000);
    assert_eq!(record.charged, 500_000);
    assert_eq!(budget.snapshot().spent_by("alice"), 5_000_000);
    assert_eq!(sink.named("budget_override").len(), 1);

    // Alice is refused from now on; other callers keep their own allowance
    let selector = selector_over(Arc::new(budget), sink);
    let alice = ConvContext::new("c1", 4).with_caller("alice");
    let err = selector.choose("hello", &alice).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
    let bob = ConvContext::new("c2", 4).with_caller("bob");
    assert!(selector.choose("hello", &bob).is_ok());
}

#[tokio::test]
async fn test_calls_past_their_estimate_never_overrun_the_daily_limit() {
    let sink = Arc::new(RecordingEventSink::new());
    let budget = Arc::new(BudgetTracker::new(
        BudgetConfig {
            daily_limit_usd: 1.0,
            ..single_limit_config()
        },
        sink.clone(),
    ));
    let selector = Arc::new(selector_over(budget.clone(), sink.clone()));
    // Each call reports ~1000x the output tokens it was authorized for
    let provider = Arc::new(MockProvider::new("memory").with_usage(0, 700_000));
    let wrapped = CallLayers::new()
        .with_selector(selector)
        .wrap(provider.clone(), &ConvContext::new("c1", 2));

    let mut refused = 0;
    for i in 0..6 {
        let request = ProviderRequest::new("c1", "memory", format!("recall fact {}", i), "r1");
        match wrapped.invoke(&request).await {
            Ok(_) => assert_eq!(refused, 0, "a call ran after the budget was exhausted"),
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::BudgetExceeded);
                refused += 1;
            }
        }
        assert!(budget.snapshot().spent_today <= 1_000_000);
    }

    assert!(refused > 0);
    assert_eq!(provider.calls(), 6 - refused);
    assert_eq!(budget.snapshot().spent_today, 1_000_000);
    assert_eq!(sink.named("budget_override").len(), 1);
}

#[test]
fn test_ledger_resets_when_the_day_changes() {
    let day = Arc::new(Mutex::new(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()));
    let current = day.clone();
    let clock: BudgetClock = Arc::new(move || *current.lock().unwrap());
    let budget = BudgetTracker::with_clock(
        single_limit_config(),
        Arc::new(RecordingEventSink::new()),
        clock,
    );

    budget.record_usage("worker", ModelTier::Premium, premium_output(100_000), false);
    assert_eq!(budget.snapshot().spent_today, 7_500_000);

    *day.lock().unwrap() = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let state = budget.snapshot();
    assert_eq!(state.spent_today, 0);
    assert!(state.spent_by_caller.is_empty());
}
