//! Cost Module
//!
//! Model tier selection under a daily budget:
//! - `pricing` - Per-tier token prices in microdollars
//! - `budget` - Shared spend ledger with per-caller limits and day rollover
//! - `complexity` - Rule-based query complexity scoring
//! - `selector` - Tier decision order and budget authorization

pub mod budget;
pub mod complexity;
pub mod pricing;
pub mod selector;

pub use budget::{BudgetClock, BudgetConfig, BudgetState, BudgetTracker, UsageRecord};
pub use complexity::{Complexity, ComplexityAssessment, ComplexityClassifier, ComplexityConfig};
pub use pricing::{TierPrice, TierPriceTable};
pub use selector::{ModelChoice, ModelSelector, SelectorConfig};
