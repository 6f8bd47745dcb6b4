//! Budget Tracker
//!
//! Process-wide spend ledger. One tracker is shared via `Arc` by every
//! provider call. The ledger lives behind a single `std::sync::Mutex` that is
//! held only for the arithmetic of one update; it is never held across an
//! await point or a provider call.
//!
//! Money is tracked in integer microdollars. The ledger resets when the UTC
//! calendar day changes; the clock is injectable so tests can move time.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use cascade_core::{
    BudgetLevel, CoreError, CoreResult, EventSink, ModelTier, OrchestrationEvent, TokenUsage,
};

use super::pricing::{format_usd, micros_to_usd, usd_to_micros, TierPriceTable};
use super::selector::ModelChoice;

// ============================================================================
// Configuration
// ============================================================================

/// Budget limits and alert thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Daily spend limit in USD
    #[serde(default = "default_daily_limit")]
    pub daily_limit_usd: f64,
    /// Per-caller daily limit in USD (`None` = only the daily limit applies)
    #[serde(default = "default_per_caller_limit")]
    pub per_caller_limit_usd: Option<f64>,
    /// Fraction of the daily limit that raises an info event
    #[serde(default = "default_info_threshold")]
    pub info_threshold: f64,
    /// Fraction of the daily limit that raises a warning event
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    /// Fraction of the daily limit that raises a critical event
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    /// Tier prices
    #[serde(default)]
    pub pricing: TierPriceTable,
}

fn default_daily_limit() -> f64 {
    10.0
}

fn default_per_caller_limit() -> Option<f64> {
    Some(5.0)
}

fn default_info_threshold() -> f64 {
    0.5
}

fn default_warning_threshold() -> f64 {
    0.8
}

fn default_critical_threshold() -> f64 {
    0.95
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit_usd: default_daily_limit(),
            per_caller_limit_usd: default_per_caller_limit(),
            info_threshold: default_info_threshold(),
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            pricing: TierPriceTable::default(),
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.daily_limit_usd.is_finite() && self.daily_limit_usd > 0.0) {
            return Err("daily_limit_usd must be a positive number".to_string());
        }
        if let Some(per_caller) = self.per_caller_limit_usd {
            if !(per_caller.is_finite() && per_caller > 0.0) {
                return Err("per_caller_limit_usd must be a positive number".to_string());
            }
        }
        let thresholds = [
            self.info_threshold,
            self.warning_threshold,
            self.critical_threshold,
        ];
        if thresholds.iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err("budget thresholds must be between 0.0 and 1.0".to_string());
        }
        if !(self.info_threshold <= self.warning_threshold
            && self.warning_threshold <= self.critical_threshold)
        {
            return Err("budget thresholds must be ordered info <= warning <= critical".to_string());
        }
        self.pricing.validate()
    }

    fn levels(&self) -> [(BudgetLevel, f64); 3] {
        [
            (BudgetLevel::Info, self.info_threshold),
            (BudgetLevel::Warning, self.warning_threshold),
            (BudgetLevel::Critical, self.critical_threshold),
        ]
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetState {
    pub day: NaiveDate,
    /// Microdollars
    pub daily_limit: u64,
    /// Microdollars
    pub per_caller_limit: Option<u64>,
    /// Microdollars
    pub spent_today: u64,
    /// Microdollars per caller
    pub spent_by_caller: HashMap<String, u64>,
}

impl BudgetState {
    /// Fraction of the daily limit still available, in `[0, 1]`.
    pub fn remaining_fraction(&self) -> f64 {
        if self.daily_limit == 0 {
            return 0.0;
        }
        let remaining = self.daily_limit.saturating_sub(self.spent_today);
        remaining as f64 / self.daily_limit as f64
    }

    pub fn remaining(&self) -> u64 {
        self.daily_limit.saturating_sub(self.spent_today)
    }

    /// Spend of one caller today, in microdollars.
    pub fn spent_by(&self, caller: &str) -> u64 {
        self.spent_by_caller.get(caller).copied().unwrap_or(0)
    }

    /// Whether `cost` fits both the daily and the caller's limit.
    pub fn fits(&self, caller: &str, cost: u64) -> bool {
        let daily_ok = self.spent_today.saturating_add(cost) <= self.daily_limit;
        let caller_ok = self
            .per_caller_limit
            .map_or(true, |limit| self.spent_by(caller).saturating_add(cost) <= limit);
        daily_ok && caller_ok
    }

    pub fn spent_today_usd(&self) -> f64 {
        micros_to_usd(self.spent_today)
    }

    pub fn daily_limit_usd(&self) -> f64 {
        micros_to_usd(self.daily_limit)
    }

    /// A fresh state with `fraction` of a $1 limit remaining.
    pub fn with_remaining_fraction(fraction: f64) -> Self {
        let limit = 1_000_000u64;
        let remaining = (fraction.clamp(0.0, 1.0) * limit as f64).round() as u64;
        Self {
            day: Utc::now().date_naive(),
            daily_limit: limit,
            per_caller_limit: None,
            spent_today: limit - remaining,
            spent_by_caller: HashMap::new(),
        }
    }
}

/// Result of a recorded usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub caller: String,
    pub tier: ModelTier,
    /// Microdollars the call cost
    pub cost: u64,
    /// Microdollars added to the ledger; below `cost` only when capped
    pub charged: u64,
    /// Daily spend after this record, in microdollars
    pub spent_today: u64,
    /// Whether the call ran past the daily or the caller's limit
    pub over_limit: bool,
}

// ============================================================================
// Tracker
// ============================================================================

/// Source of "today" for the ledger.
pub type BudgetClock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

#[derive(Debug)]
struct Ledger {
    day: NaiveDate,
    spent_today: u64,
    by_caller: HashMap<String, u64>,
    crossed: BTreeSet<BudgetLevel>,
}

impl Ledger {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            spent_today: 0,
            by_caller: HashMap::new(),
            crossed: BTreeSet::new(),
        }
    }
}

/// Shared daily budget ledger.
pub struct BudgetTracker {
    config: BudgetConfig,
    daily_limit: u64,
    per_caller_limit: Option<u64>,
    ledger: Mutex<Ledger>,
    clock: BudgetClock,
    events: Arc<dyn EventSink>,
}

impl BudgetTracker {
    /// Create a tracker using the UTC wall clock.
    pub fn new(config: BudgetConfig, events: Arc<dyn EventSink>) -> Self {
        Self::with_clock(config, events, Arc::new(|| Utc::now().date_naive()))
    }

    /// Create a tracker with an injected clock.
    pub fn with_clock(config: BudgetConfig, events: Arc<dyn EventSink>, clock: BudgetClock) -> Self {
        let today = clock();
        Self {
            daily_limit: usd_to_micros(config.daily_limit_usd),
            per_caller_limit: config.per_caller_limit_usd.map(usd_to_micros),
            config,
            ledger: Mutex::new(Ledger::new(today)),
            clock,
            events,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn pricing(&self) -> &TierPriceTable {
        &self.config.pricing
    }

    /// Lock the ledger, rolling it over if the day changed.
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        let today = (self.clock)();
        if ledger.day != today {
            tracing::info!(
                previous_day = %ledger.day,
                day = %today,
                spent = %format_usd(ledger.spent_today),
                "Budget day rolled over, resetting ledger"
            );
            *ledger = Ledger::new(today);
        }
        ledger
    }

    /// Current state of the ledger.
    pub fn snapshot(&self) -> BudgetState {
        let ledger = self.ledger();
        BudgetState {
            day: ledger.day,
            daily_limit: self.daily_limit,
            per_caller_limit: self.per_caller_limit,
            spent_today: ledger.spent_today,
            spent_by_caller: ledger.by_caller.clone(),
        }
    }

    /// Degrade `choice` until its estimated cost fits the remaining budget.
    ///
    /// Critical calls are returned unchanged. Fails with `BudgetExceeded`
    /// only when even the cheap tier does not fit.
    pub fn authorize(
        &self,
        choice: ModelChoice,
        caller: &str,
        estimate: TokenUsage,
        critical: bool,
    ) -> CoreResult<ModelChoice> {
        if critical {
            return Ok(choice);
        }

        let state = self.snapshot();
        let mut tier = Some(choice.tier);
        while let Some(candidate) = tier {
            let cost = self.config.pricing.cost(candidate, estimate);
            if state.fits(caller, cost) {
                if candidate == choice.tier {
                    return Ok(choice);
                }
                tracing::info!(
                    caller = %caller,
                    from = %choice.tier,
                    to = %candidate,
                    "Degraded model tier to fit remaining budget"
                );
                return Ok(ModelChoice {
                    tier: candidate,
                    reasoning: format!(
                        "{}; degraded from {} to fit remaining budget",
                        choice.reasoning, choice.tier
                    ),
                });
            }
            tier = candidate.degrade();
        }

        tracing::warn!(
            caller = %caller,
            spent = %format_usd(state.spent_today),
            limit = %format_usd(state.daily_limit),
            "Budget exhausted, refusing call"
        );
        Err(CoreError::budget_exceeded(format!(
            "caller '{}' cannot afford even the cheap tier (spent {} of {})",
            caller,
            format_usd(state.spent_today),
            format_usd(state.daily_limit)
        )))
    }

    /// Charge `usage` on `tier` to `caller`.
    ///
    /// A call that has run is always charged. The daily and per-caller totals
    /// are updated together under one lock. A non-critical charge is capped
    /// so neither total passes its limit; a critical one is applied in full.
    /// Either way, running past a limit raises a `BudgetOverride` event.
    pub fn record_usage(
        &self,
        caller: &str,
        tier: ModelTier,
        usage: TokenUsage,
        critical: bool,
    ) -> UsageRecord {
        let cost = self.config.pricing.cost(tier, usage);
        let mut pending_events = Vec::new();

        let record = {
            let mut ledger = self.ledger();
            let caller_spent = ledger.by_caller.get(caller).copied().unwrap_or(0);
            let over_daily = ledger.spent_today.saturating_add(cost) > self.daily_limit;
            let over_caller = self
                .per_caller_limit
                .is_some_and(|l| caller_spent.saturating_add(cost) > l);
            let over_limit = over_daily || over_caller;

            let charged = if critical || !over_limit {
                cost
            } else {
                let daily_room = self.daily_limit.saturating_sub(ledger.spent_today);
                let caller_room = self
                    .per_caller_limit
                    .map_or(u64::MAX, |l| l.saturating_sub(caller_spent));
                cost.min(daily_room).min(caller_room)
            };

            let before = ledger.spent_today;
            let new_total = before.saturating_add(charged);
            let new_caller = caller_spent.saturating_add(charged);
            ledger.spent_today = new_total;
            ledger.by_caller.insert(caller.to_string(), new_caller);

            if self.daily_limit > 0 {
                let after_fraction = new_total as f64 / self.daily_limit as f64;
                let before_fraction = before as f64 / self.daily_limit as f64;
                for (level, threshold) in self.config.levels() {
                    if before_fraction < threshold
                        && after_fraction >= threshold
                        && ledger.crossed.insert(level)
                    {
                        pending_events.push(OrchestrationEvent::BudgetThreshold {
                            level,
                            spent_fraction: after_fraction,
                            spent_usd: micros_to_usd(new_total),
                        });
                    }
                }
            }

            if over_limit {
                let (spent, limit) = match self.per_caller_limit {
                    Some(limit) if !over_daily => (new_caller, limit),
                    _ => (new_total, self.daily_limit),
                };
                pending_events.push(OrchestrationEvent::BudgetOverride {
                    caller: caller.to_string(),
                    spent_usd: micros_to_usd(spent),
                    limit_usd: micros_to_usd(limit),
                });
            }

            UsageRecord {
                caller: caller.to_string(),
                tier,
                cost,
                charged,
                spent_today: new_total,
                over_limit,
            }
        };

        if record.over_limit {
            if critical {
                tracing::warn!(
                    caller = %caller,
                    spent = %format_usd(record.spent_today),
                    limit = %format_usd(self.daily_limit),
                    "Critical call applied past budget limit"
                );
            } else {
                tracing::warn!(
                    caller = %caller,
                    tier = %tier,
                    cost = %format_usd(cost),
                    charged = %format_usd(record.charged),
                    "Call ran past budget limit, charge capped at the limit"
                );
            }
        }
        for event in pending_events {
            if let OrchestrationEvent::BudgetThreshold { level, .. } = &event {
                tracing::info!(level = %level, spent = %format_usd(record.spent_today), "Budget threshold crossed");
            }
            self.events.emit(event);
        }

        tracing::debug!(
            caller = %caller,
            tier = %tier,
            cost = %format_usd(cost),
            "Recorded usage"
        );
        record
    }

    /// Clear today's spend.
    pub fn reset(&self) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        *ledger = Ledger::new((self.clock)());
    }
}

// ============================================================================
// Tests
// ============================================================================
