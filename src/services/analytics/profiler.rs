//! Provider Profiler
//!
//! Per-provider latency and failure counters fed by the call path. Counters
//! live in a concurrent map so recording never serializes provider calls.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default)]
struct Timings {
    calls: u64,
    failures: u64,
    total: Duration,
    max: Duration,
    last: Duration,
}

/// Aggregated timings of one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    pub provider: String,
    pub calls: u64,
    pub failures: u64,
    pub mean_ms: f64,
    pub max_ms: u64,
    pub last_ms: u64,
}

impl ProviderProfile {
    pub fn failure_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.failures as f64 / self.calls as f64
        }
    }
}

/// Latency recorder shared by all provider calls.
#[derive(Debug, Default)]
pub struct Profiler {
    enabled: bool,
    timings: DashMap<String, Timings>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            timings: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one call. No-op when profiling is disabled.
    pub fn record(&self, provider: &str, latency: Duration, success: bool) {
        if !self.enabled {
            return;
        }
        let mut entry = self.timings.entry(provider.to_string()).or_default();
        entry.calls += 1;
        if !success {
            entry.failures += 1;
        }
        entry.total += latency;
        entry.max = entry.max.max(latency);
        entry.last = latency;
    }

    /// Profile of one provider.
    pub fn profile(&self, provider: &str) -> Option<ProviderProfile> {
        self.timings
            .get(provider)
            .map(|t| Self::to_profile(provider, &t))
    }

    /// Profiles of every recorded provider, sorted by name.
    pub fn snapshot(&self) -> Vec<ProviderProfile> {
        let mut profiles: Vec<ProviderProfile> = self
            .timings
            .iter()
            .map(|entry| Self::to_profile(entry.key(), entry.value()))
            .collect();
        profiles.sort_by(|a, b| a.provider.cmp(&b.provider));
        profiles
    }

    pub fn clear(&self) {
        self.timings.clear();
    }

    fn to_profile(provider: &str, t: &Timings) -> ProviderProfile {
        let mean_ms = if t.calls == 0 {
            0.0
        } else {
            t.total.as_secs_f64() * 1000.0 / t.calls as f64
        };
        ProviderProfile {
            provider: provider.to_string(),
            calls: t.calls,
            failures: t.failures,
            mean_ms,
            max_ms: t.max.as_millis() as u64,
            last_ms: t.last.as_millis() as u64,
        }
    }
}
