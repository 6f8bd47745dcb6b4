//! Speculative Execution
//!
//! After a fast-path answer the engine predicts likely follow-up queries for
//! the matched pattern and runs them in the background, caching results in
//! a `speculative.{conversation}` namespace. Only the same conversation can
//! be served those results, and its next turn scores the prediction. A pattern whose hit rate stays below the floor
//! after `min_trials` outcomes stops speculating.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use cascade_core::{CapabilityProvider, EventSink, OrchestrationEvent, ProviderRequest};

use crate::services::cache::key::digest_key;
use crate::services::cache::{namespaces, normalize_key, CacheHit, CacheManager};

/// A predicted follow-up query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub query: String,
    pub probability: f64,
}

impl Prediction {
    pub fn new(query: impl Into<String>, probability: f64) -> Self {
        Self {
            query: query.into(),
            probability,
        }
    }
}

/// Speculation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeculationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Predictions launched per fast-path turn
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum probability for a prediction to be launched
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Hit rate under which a pattern stops speculating
    #[serde(default = "default_hit_rate_floor")]
    pub hit_rate_floor: f64,
    /// Outcomes needed before the floor applies
    #[serde(default = "default_min_trials")]
    pub min_trials: u32,
    /// Provider that answers speculative queries
    #[serde(default = "default_runner_provider")]
    pub runner_provider: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Similarity at which an actual query counts as the predicted one
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    /// Pattern id -> predicted follow-ups
    #[serde(default = "default_predictions")]
    pub predictions: BTreeMap<String, Vec<Prediction>>,
}

fn default_enabled() -> bool {
    true
}

fn default_top_k() -> usize {
    2
}

fn default_confidence() -> f64 {
    0.3
}

fn default_hit_rate_floor() -> f64 {
    0.5
}

fn default_min_trials() -> u32 {
    5
}

fn default_runner_provider() -> String {
    "responder".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_match_threshold() -> f32 {
    0.85
}

fn default_predictions() -> BTreeMap<String, Vec<Prediction>> {
    let mut predictions = BTreeMap::new();
    predictions.insert(
        "greeting".to_string(),
        vec![
            Prediction::new("what can you do", 0.5),
            Prediction::new("how can you help me", 0.35),
            Prediction::new("who are you", 0.15),
        ],
    );
    predictions.insert(
        "acknowledgement".to_string(),
        vec![Prediction::new("what should i do next", 0.4)],
    );
    predictions
}

impl Default for SpeculationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            top_k: default_top_k(),
            confidence: default_confidence(),
            hit_rate_floor: default_hit_rate_floor(),
            min_trials: default_min_trials(),
            runner_provider: default_runner_provider(),
            timeout_ms: default_timeout_ms(),
            match_threshold: default_match_threshold(),
            predictions: default_predictions(),
        }
    }
}

impl SpeculationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err("speculation confidence must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.hit_rate_floor) {
            return Err("hit_rate_floor must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err("match_threshold must be between 0.0 and 1.0".to_string());
        }
        if self.enabled && self.runner_provider.trim().is_empty() {
            return Err("runner_provider is required when speculation is enabled".to_string());
        }
        for (pattern, predictions) in &self.predictions {
            if predictions
                .iter()
                .any(|p| !(0.0..=1.0).contains(&p.probability))
            {
                return Err(format!("prediction probabilities for '{}' must be within 0.0..=1.0", pattern));
            }
        }
        Ok(())
    }
}

/// Prediction accuracy of one pattern.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternStats {
    pub trials: u32,
    pub hits: u32,
    pub enabled: bool,
}

impl Default for PatternStats {
    fn default() -> Self {
        Self {
            trials: 0,
            hits: 0,
            enabled: true,
        }
    }
}

impl PatternStats {
    pub fn hit_rate(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.hits as f64 / self.trials as f64
        }
    }
}

/// Namespace holding one conversation's speculative results.
pub fn conversation_namespace(conversation_id: &str) -> String {
    format!("{}.{}", namespaces::SPECULATIVE, digest_key(conversation_id))
}

#[derive(Debug, Clone)]
struct PendingPrediction {
    pattern: String,
    queries: Vec<String>,
}

/// Adaptive speculation engine.
pub struct SpeculationEngine {
    config: SpeculationConfig,
    cache: Arc<CacheManager>,
    stats: DashMap<String, PatternStats>,
    pending: DashMap<String, PendingPrediction>,
    events: Arc<dyn EventSink>,
}

impl SpeculationEngine {
    pub fn new(config: SpeculationConfig, cache: Arc<CacheManager>, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            cache,
            stats: DashMap::new(),
            pending: DashMap::new(),
            events,
        }
    }

    pub fn config(&self) -> &SpeculationConfig {
        &self.config
    }

    /// Whether speculation runs for `pattern`.
    pub fn is_enabled(&self, pattern: &str) -> bool {
        self.config.enabled
            && self
                .stats
                .get(pattern)
                .map(|s| s.enabled)
                .unwrap_or(true)
    }

    pub fn stats(&self, pattern: &str) -> Option<PatternStats> {
        self.stats.get(pattern).map(|s| *s.value())
    }

    /// Predictions above the confidence bar, most likely first, at most
    /// `top_k`.
    pub fn predictions(&self, pattern: &str) -> Vec<Prediction> {
        let mut predictions: Vec<Prediction> = self
            .config
            .predictions
            .get(pattern)
            .map(|p| {
                p.iter()
                    .filter(|p| p.probability >= self.config.confidence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        predictions.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        predictions.truncate(self.config.top_k);
        predictions
    }

    /// Record whether a prediction for `pattern` came true.
    ///
    /// Disables the pattern once it has enough trials and its hit rate is
    /// under the floor.
    pub fn record_outcome(&self, pattern: &str, hit: bool) -> PatternStats {
        let (stats, disabled_now) = {
            let mut stats = self.stats.entry(pattern.to_string()).or_default();
            stats.trials += 1;
            if hit {
                stats.hits += 1;
            }
            let disable = stats.enabled
                && stats.trials >= self.config.min_trials
                && stats.hit_rate() < self.config.hit_rate_floor;
            if disable {
                stats.enabled = false;
            }
            (*stats, disable)
        };

        if disabled_now {
            tracing::warn!(
                pattern = %pattern,
                trials = stats.trials,
                hit_rate = stats.hit_rate(),
                floor = self.config.hit_rate_floor,
                "Disabling speculation for pattern"
            );
            self.events.emit(OrchestrationEvent::SpeculationToggled {
                pattern: pattern.to_string(),
                enabled: false,
                hit_rate: stats.hit_rate(),
            });
        }
        stats
    }

    /// Clear a pattern's statistics and switch speculation back on.
    pub fn reenable(&self, pattern: &str) {
        if let Some((_, previous)) = self.stats.remove(pattern) {
            if !previous.enabled {
                tracing::info!(pattern = %pattern, "Re-enabling speculation for pattern");
                self.events.emit(OrchestrationEvent::SpeculationToggled {
                    pattern: pattern.to_string(),
                    enabled: true,
                    hit_rate: previous.hit_rate(),
                });
            }
        }
    }

    /// Score the conversation's outstanding prediction against the query
    /// that actually arrived. `None` when nothing was predicted.
    pub async fn score_turn(&self, conversation_id: &str, query: &str) -> Option<bool> {
        let (_, pending) = self.pending.remove(conversation_id)?;
        let max_key = self.cache.config().max_key_bytes;
        let actual = normalize_key(query, max_key);

        let mut hit = pending
            .queries
            .iter()
            .any(|predicted| normalize_key(predicted, max_key) == actual);
        if !hit {
            for predicted in &pending.queries {
                if let Some(similarity) = self.cache.text_similarity(predicted, query).await {
                    if similarity >= self.config.match_threshold {
                        hit = true;
                        break;
                    }
                }
            }
        }

        tracing::debug!(
            conversation = %conversation_id,
            pattern = %pending.pattern,
            hit = hit,
            "Scored speculative prediction"
        );
        self.record_outcome(&pending.pattern, hit);
        Some(hit)
    }

    /// Completed speculative result for a query in this conversation, if any.
    pub async fn precomputed(&self, conversation_id: &str, query: &str) -> Option<CacheHit> {
        self.cache
            .get_semantic(
                &conversation_namespace(conversation_id),
                query,
                Some(self.config.match_threshold),
            )
            .await
    }

    /// Drop a conversation's outstanding prediction and speculative results.
    pub async fn forget(&self, conversation_id: &str) -> usize {
        self.pending.remove(conversation_id);
        self.cache
            .invalidate_namespace(&conversation_namespace(conversation_id))
            .await
    }

    /// Launch background work for the predicted follow-ups of `pattern`.
    ///
    /// Returns the spawned tasks; dropping them does not cancel the work.
    pub fn speculate(
        &self,
        conversation_id: &str,
        pattern: &str,
        runner: Arc<dyn CapabilityProvider>,
        caller: &str,
    ) -> Vec<JoinHandle<()>> {
        if !self.is_enabled(pattern) {
            self.pending.remove(conversation_id);
            return Vec::new();
        }
        let predictions = self.predictions(pattern);
        if predictions.is_empty() {
            self.pending.remove(conversation_id);
            return Vec::new();
        }

        self.pending.insert(
            conversation_id.to_string(),
            PendingPrediction {
                pattern: pattern.to_string(),
                queries: predictions.iter().map(|p| p.query.clone()).collect(),
            },
        );

        tracing::debug!(
            conversation = %conversation_id,
            pattern = %pattern,
            count = predictions.len(),
            "Launching speculative follow-ups"
        );

        let namespace = conversation_namespace(conversation_id);
        predictions
            .into_iter()
            .map(|prediction| {
                let cache = self.cache.clone();
                let namespace = namespace.clone();
                let runner = runner.clone();
                let timeout = self.config.timeout();
                let request = ProviderRequest::new(
                    caller,
                    runner.name(),
                    prediction.query.clone(),
                    uuid::Uuid::new_v4().to_string(),
                )
                .with_context("conversation_id", json!(conversation_id))
                .with_context("speculative", Value::Bool(true))
                .with_context("pattern", json!(pattern))
                .with_context("probability", json!(prediction.probability));

                tokio::spawn(async move {
                    run_prediction(cache, &namespace, runner, request, timeout).await;
                })
            })
            .collect()
    }
}

async fn run_prediction(
    cache: Arc<CacheManager>,
    namespace: &str,
    runner: Arc<dyn CapabilityProvider>,
    request: ProviderRequest,
    timeout: Duration,
) {
    if cache.contains(namespace, &request.query).await {
        return;
    }
    match tokio::time::timeout(timeout, runner.invoke(&request)).await {
        Ok(Ok(output)) if !output.content.trim().is_empty() => {
            if let Err(e) = cache
                .put(namespace, &request.query, output.content)
                .await
            {
                tracing::debug!(query = %request.query, error = %e, "Speculative result not cached");
            }
        }
        Ok(Ok(_)) => {
            tracing::debug!(query = %request.query, "Speculative call returned no content");
        }
        Ok(Err(e)) => {
            tracing::debug!(query = %request.query, error = %e, "Speculative call failed");
        }
        Err(_) => {
            tracing::debug!(query = %request.query, "Speculative call timed out");
        }
    }
}
