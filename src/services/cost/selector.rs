//! Model Selector
//!
//! Picks a model tier for each provider call. The decision order is fixed
//! and the first matching rule wins:
//!
//! 1. critical context -> premium, regardless of budget
//! 2. deep reflection requested -> premium
//! 3. less than the protection fraction of the budget left -> cheap
//! 4. routine mode -> standard
//! 5. query complexity -> cheap / standard / premium, with premium only while
//!    the remaining budget is above the premium reserve
//!
//! `choose` then asks the budget tracker to authorize the choice, which may
//! degrade the tier further.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cascade_core::{ConvContext, CoreResult, EventSink, ModelTier, OrchestrationEvent, TokenUsage};

use super::budget::{BudgetState, BudgetTracker};
use super::complexity::{Complexity, ComplexityClassifier, ComplexityConfig};
use super::pricing::estimate_tokens;

/// Tier decision with its justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChoice {
    pub tier: ModelTier,
    pub reasoning: String,
}

impl ModelChoice {
    fn new(tier: ModelTier, reasoning: impl Into<String>) -> Self {
        Self {
            tier,
            reasoning: reasoning.into(),
        }
    }
}

/// Selector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Premium is only chosen for complex queries while at least this
    /// fraction of the daily budget remains
    #[serde(default = "default_premium_reserve")]
    pub premium_reserve: f64,
    /// Below this remaining fraction every call goes to the cheap tier
    #[serde(default = "default_protection_fraction")]
    pub budget_protection_fraction: f64,
    /// Conversation mode that pins the standard tier
    #[serde(default = "default_routine_mode")]
    pub routine_mode: String,
    /// Output tokens assumed when estimating a call's cost
    #[serde(default = "default_expected_output_tokens")]
    pub expected_output_tokens: u64,
    #[serde(default)]
    pub complexity: ComplexityConfig,
}

fn default_premium_reserve() -> f64 {
    0.25
}

fn default_protection_fraction() -> f64 {
    0.02
}

fn default_routine_mode() -> String {
    "routine".to_string()
}

fn default_expected_output_tokens() -> u64 {
    600
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            premium_reserve: default_premium_reserve(),
            budget_protection_fraction: default_protection_fraction(),
            routine_mode: default_routine_mode(),
            expected_output_tokens: default_expected_output_tokens(),
            complexity: ComplexityConfig::default(),
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.premium_reserve) {
            return Err("premium_reserve must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.budget_protection_fraction) {
            return Err("budget_protection_fraction must be between 0.0 and 1.0".to_string());
        }
        self.complexity.validate()
    }
}

/// Cost-aware model tier selector.
pub struct ModelSelector {
    config: SelectorConfig,
    classifier: ComplexityClassifier,
    budget: Arc<BudgetTracker>,
    events: Arc<dyn EventSink>,
}

impl ModelSelector {
    pub fn new(config: SelectorConfig, budget: Arc<BudgetTracker>, events: Arc<dyn EventSink>) -> Self {
        Self {
            classifier: ComplexityClassifier::new(config.complexity.clone()),
            config,
            budget,
            events,
        }
    }

    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.budget
    }

    pub fn classifier(&self) -> &ComplexityClassifier {
        &self.classifier
    }

    /// Pure tier decision for a query under a given budget state.
    pub fn select_model(&self, query: &str, ctx: &ConvContext, budget: &BudgetState) -> ModelChoice {
        if ctx.critical {
            return ModelChoice::new(ModelTier::Premium, "critical context requires premium");
        }
        if ctx.deep_reflection {
            return ModelChoice::new(ModelTier::Premium, "deep reflection requested");
        }

        let remaining = budget.remaining_fraction();
        if remaining < self.config.budget_protection_fraction {
            return ModelChoice::new(
                ModelTier::Cheap,
                format!(
                    "budget protection: {:.1}% of daily budget left",
                    remaining * 100.0
                ),
            );
        }

        if ctx.mode_is(&self.config.routine_mode) {
            return ModelChoice::new(ModelTier::Standard, "routine mode");
        }

        let assessment = self.classifier.classify(query, &ctx.complexity_hints);
        match assessment.level {
            Complexity::Simple => ModelChoice::new(ModelTier::Cheap, "simple query"),
            Complexity::Medium => ModelChoice::new(ModelTier::Standard, "medium complexity query"),
            Complexity::Complex if remaining >= self.config.premium_reserve => {
                ModelChoice::new(ModelTier::Premium, "complex query")
            }
            Complexity::Complex => ModelChoice::new(
                ModelTier::Standard,
                format!(
                    "complex query, degraded to standard with {:.0}% budget left (reserve {:.0}%)",
                    remaining * 100.0,
                    self.config.premium_reserve * 100.0
                ),
            ),
        }
    }

    /// Token estimate for a call carrying `query`.
    pub fn estimate_usage(&self, query: &str) -> TokenUsage {
        TokenUsage::new(estimate_tokens(query), self.config.expected_output_tokens)
    }

    /// Select and authorize a tier for one call, emitting a selection event.
    pub fn choose(&self, query: &str, ctx: &ConvContext) -> CoreResult<ModelChoice> {
        let state = self.budget.snapshot();
        let selected = self.select_model(query, ctx, &state);
        let choice = self.budget.authorize(
            selected,
            ctx.caller(),
            self.estimate_usage(query),
            ctx.critical,
        )?;

        tracing::debug!(
            caller = %ctx.caller(),
            tier = %choice.tier,
            reasoning = %choice.reasoning,
            "Model tier selected"
        );
        self.events.emit(OrchestrationEvent::ModelSelected {
            caller: ctx.caller().to_string(),
            tier: choice.tier,
            reasoning: choice.reasoning.clone(),
        });
        Ok(choice)
    }
}
