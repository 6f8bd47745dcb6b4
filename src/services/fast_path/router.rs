//! Fast-Path Router
//!
//! Pre-filter in front of the stage controller. `classify` applies, in
//! order: the decision cache for the normalized query, the deep-mode
//! override, then pattern detection. Only the detected pattern is cached, so
//! a deep-mode turn is never answered from an earlier fast decision.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use cascade_core::{CapabilityProvider, ConvContext, EventSink, OrchestrationEvent};

use super::patterns::{PatternConfig, PatternFamily, PatternMatch, PatternMatcher, RegexPatternMatcher};
use super::speculation::SpeculationEngine;
use super::templates::{default_templates, TemplateSet};
use crate::services::cache::normalize_key;

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastPathConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// TTL of cached pattern detections
    #[serde(default = "default_decision_ttl_secs")]
    pub decision_ttl_secs: u64,
    #[serde(default = "default_decision_cache_entries")]
    pub decision_cache_entries: u64,
    /// Conversation modes that always take the slow path
    #[serde(default = "default_deep_modes")]
    pub deep_modes: Vec<String>,
    #[serde(default)]
    pub patterns: PatternConfig,
    /// Pattern id -> template variants
    #[serde(default = "default_templates")]
    pub templates: BTreeMap<String, Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

fn default_decision_ttl_secs() -> u64 {
    600
}

fn default_decision_cache_entries() -> u64 {
    10_000
}

fn default_deep_modes() -> Vec<String> {
    vec!["deep".to_string()]
}

impl Default for FastPathConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            decision_ttl_secs: default_decision_ttl_secs(),
            decision_cache_entries: default_decision_cache_entries(),
            deep_modes: default_deep_modes(),
            patterns: PatternConfig::default(),
            templates: default_templates(),
        }
    }
}

impl FastPathConfig {
    pub fn decision_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.decision_ttl_secs == 0 {
            return Err("decision_ttl_secs must be greater than 0".to_string());
        }
        self.patterns.validate()
    }
}

/// How a turn will be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    FastTemplate,
    FastPrecomputed,
    SlowPath,
}

impl std::fmt::Display for PathKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathKind::FastTemplate => write!(f, "fast_template"),
            PathKind::FastPrecomputed => write!(f, "fast_precomputed"),
            PathKind::SlowPath => write!(f, "slow_path"),
        }
    }
}

/// Classification of one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathDecision {
    pub kind: PathKind,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<PatternMatch>,
    pub reason: String,
    /// Whether the pattern detection came from the decision cache
    pub cached: bool,
    /// Speculative answer found during classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precomputed: Option<String>,
}

impl PathDecision {
    fn slow(query: &str, pattern: Option<PatternMatch>, reason: impl Into<String>, cached: bool) -> Self {
        Self {
            kind: PathKind::SlowPath,
            query: query.to_string(),
            pattern,
            reason: reason.into(),
            cached,
            precomputed: None,
        }
    }

    pub fn is_fast(&self) -> bool {
        self.kind != PathKind::SlowPath
    }

    pub fn pattern_id(&self) -> Option<&str> {
        self.pattern.as_ref().map(|p| p.pattern.as_str())
    }
}

/// Result of routing a decision.
#[derive(Debug)]
pub struct RouteOutcome {
    pub decision: PathDecision,
    pub response: Option<String>,
    pub used_fast_path: bool,
    /// Background speculation launched after a fast answer
    pub speculative_tasks: Vec<JoinHandle<()>>,
}

/// Fast-path router.
pub struct FastPathRouter {
    config: FastPathConfig,
    matcher: Arc<dyn PatternMatcher>,
    templates: TemplateSet,
    decisions: Cache<String, Option<PatternMatch>>,
    speculation: Arc<SpeculationEngine>,
    events: Arc<dyn EventSink>,
}

impl FastPathRouter {
    pub fn new(config: FastPathConfig, speculation: Arc<SpeculationEngine>, events: Arc<dyn EventSink>) -> Self {
        let matcher: Arc<dyn PatternMatcher> = Arc::new(RegexPatternMatcher::new(&config.patterns));
        let decisions = Cache::builder()
            .max_capacity(config.decision_cache_entries.max(1))
            .time_to_live(config.decision_ttl().max(Duration::from_secs(1)))
            .build();
        Self {
            templates: TemplateSet::new(config.templates.clone()),
            config,
            matcher,
            decisions,
            speculation,
            events,
        }
    }

    /// Replace the default regex matcher.
    pub fn with_matcher(mut self, matcher: Arc<dyn PatternMatcher>) -> Self {
        self.matcher = matcher;
        self.decisions.invalidate_all();
        self
    }

    pub fn config(&self) -> &FastPathConfig {
        &self.config
    }

    pub fn speculation(&self) -> &Arc<SpeculationEngine> {
        &self.speculation
    }

    fn is_deep(&self, ctx: &ConvContext) -> bool {
        ctx.is_deep() || self.config.deep_modes.iter().any(|m| ctx.mode_is(m))
    }

    fn detect(&self, query: &str) -> (Option<PatternMatch>, bool) {
        let key = normalize_key(query, 256);
        if let Some(cached) = self.decisions.get(&key) {
            return (cached, true);
        }
        let detected = self.matcher.detect(query);
        self.decisions.insert(key, detected.clone());
        (detected, false)
    }

    /// Score the previous turn's speculation against this query.
    pub async fn observe_turn(&self, conversation_id: &str, query: &str) -> Option<bool> {
        self.speculation.score_turn(conversation_id, query).await
    }

    /// Decide how a turn should be answered.
    pub async fn classify(&self, query: &str, ctx: &ConvContext) -> PathDecision {
        if !self.config.enabled {
            return PathDecision::slow(query, None, "fast path disabled", false);
        }

        let (detected, cached) = self.detect(query);

        if self.is_deep(ctx) {
            return PathDecision::slow(query, detected, "deep mode forces the slow path", cached);
        }

        if let Some(pattern) = &detected {
            if pattern.family == PatternFamily::Complex {
                let reason = format!("complexity marker '{}'", pattern.matched);
                return PathDecision::slow(query, detected, reason, cached);
            }
            if self.templates.has(&pattern.pattern) {
                return PathDecision {
                    kind: PathKind::FastTemplate,
                    query: query.to_string(),
                    reason: format!("{} template", pattern.pattern),
                    pattern: detected,
                    cached,
                    precomputed: None,
                };
            }
        }

        if let Some(hit) = self
            .speculation
            .precomputed(&ctx.conversation_id, query)
            .await
        {
            return PathDecision {
                kind: PathKind::FastPrecomputed,
                query: query.to_string(),
                pattern: detected,
                reason: format!("speculative result ({} match)", hit.mode),
                cached,
                precomputed: Some(hit.value),
            };
        }

        let reason = match &detected {
            Some(pattern) => format!("no fast answer for {}", pattern.pattern),
            None => "no fast-path pattern".to_string(),
        };
        PathDecision::slow(query, detected, reason, cached)
    }

    /// Answer a fast decision and launch speculation for its pattern.
    ///
    /// `runner` answers speculative follow-ups; without one nothing is
    /// speculated. Slow decisions come back without a response.
    pub fn route(
        &self,
        decision: PathDecision,
        ctx: &ConvContext,
        runner: Option<Arc<dyn CapabilityProvider>>,
    ) -> RouteOutcome {
        let response = match decision.kind {
            PathKind::SlowPath => None,
            PathKind::FastTemplate => decision
                .pattern_id()
                .and_then(|id| self.templates.render(id, ctx.turn_count as usize, &template_params(ctx))),
            PathKind::FastPrecomputed => decision.precomputed.clone(),
        };

        let Some(response) = response else {
            return RouteOutcome {
                decision,
                response: None,
                used_fast_path: false,
                speculative_tasks: Vec::new(),
            };
        };

        let pattern_name = decision.pattern_id().unwrap_or("precomputed").to_string();
        tracing::info!(
            conversation = %ctx.conversation_id,
            path = %decision.kind,
            pattern = %pattern_name,
            "Turn served by fast path"
        );
        self.events.emit(OrchestrationEvent::FastPathServed {
            pattern: pattern_name,
            precomputed: decision.kind == PathKind::FastPrecomputed,
        });

        let speculative_tasks = match (decision.pattern_id(), runner) {
            (Some(pattern), Some(runner)) => {
                self.speculation
                    .speculate(&ctx.conversation_id, pattern, runner, ctx.caller())
            }
            _ => Vec::new(),
        };

        RouteOutcome {
            decision,
            response: Some(response),
            used_fast_path: true,
            speculative_tasks,
        }
    }
}

/// String values of the context's extra map, used as template parameters.
fn template_params(ctx: &ConvContext) -> HashMap<String, String> {
    ctx.extra
        .iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            _ => None,
        })
        .collect()
}
