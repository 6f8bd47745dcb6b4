//! Fast Path
//!
//! Answers trivial turns without the planner and executor.
//! - `patterns` - Pattern families and the `PatternMatcher` trait
//! - `templates` - Parameterized template responses
//! - `speculation` - Background pre-computation of predicted follow-ups
//! - `router` - Classification and routing of incoming turns

pub mod patterns;
pub mod router;
pub mod speculation;
pub mod templates;

pub use patterns::{PatternConfig, PatternFamily, PatternMatch, PatternMatcher, RegexPatternMatcher};
pub use router::{FastPathConfig, FastPathRouter, PathDecision, PathKind, RouteOutcome};
pub use speculation::{PatternStats, Prediction, SpeculationConfig, SpeculationEngine};
pub use templates::TemplateSet;
