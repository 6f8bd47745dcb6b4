//! Parallel Phase Executor
//!
//! Runs an [`ExecutionPlan`] one phase at a time. Inside a phase every
//! provider gets its own tokio task, bounded by a counting semaphore and
//! wrapped in a per-provider timeout. A provider that errors, panics, or
//! times out becomes a failed [`ProviderResponse`]; siblings and later
//! phases keep running.
//!
//! Later phases see every earlier response through the request factory, so
//! dependents can embed prior results in their request context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use cascade_core::{
    CapabilityProvider, CoreResult, ErrorKind, EventSink, OrchestrationEvent, ProviderRegistry,
    ProviderRequest, ProviderResponse,
};

use crate::services::dependency::{ExecutionPlan, Phase};

// ============================================================================
// Configuration
// ============================================================================

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum providers running at once within a phase
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-provider timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub per_provider_timeout_ms: u64,
    /// Replace an all-failed phase with the fallback's responses
    #[serde(default)]
    pub enable_fallback: bool,
    /// Fixed delay between launches within a phase, in milliseconds
    #[serde(default)]
    pub rate_limit_delay_ms: u64,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            per_provider_timeout_ms: default_timeout_ms(),
            enable_fallback: false,
            rate_limit_delay_ms: 0,
        }
    }
}

impl ExecutorConfig {
    pub fn per_provider_timeout(&self) -> Duration {
        Duration::from_millis(self.per_provider_timeout_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }
        if self.per_provider_timeout_ms == 0 {
            return Err("per_provider_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Degraded responses for a phase in which every provider failed.
pub type PhaseFallback =
    Arc<dyn Fn(&Phase, &[ProviderResponse]) -> Vec<ProviderResponse> + Send + Sync>;

// ============================================================================
// Reports
// ============================================================================

/// Timing of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub index: usize,
    pub providers: Vec<String>,
    /// Time from first launch until the phase drained
    pub wall_clock: Duration,
    /// Sum of provider latencies
    pub sequential: Duration,
    pub succeeded: usize,
    pub failed: usize,
    pub fallback_applied: bool,
}

impl PhaseReport {
    /// Sequential time over wall-clock time.
    pub fn speedup(&self) -> f64 {
        ratio(self.sequential, self.wall_clock)
    }
}

/// Outcome of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// One response per planned provider, in plan order
    pub responses: Vec<ProviderResponse>,
    pub phases: Vec<PhaseReport>,
    pub wall_clock: Duration,
    /// Whether the caller cancelled the run
    pub cancelled: bool,
}

impl ExecutionReport {
    /// Response of a provider by name.
    pub fn response(&self, provider: &str) -> Option<&ProviderResponse> {
        self.responses.iter().find(|r| r.provider_name == provider)
    }

    pub fn succeeded(&self) -> usize {
        self.responses.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.responses.iter().filter(|r| !r.success).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.responses.iter().all(|r| r.success)
    }

    /// Failed responses, labeled with their error kind.
    pub fn failures(&self) -> impl Iterator<Item = &ProviderResponse> {
        self.responses.iter().filter(|r| !r.success)
    }

    /// Sum of every provider's latency.
    pub fn sequential(&self) -> Duration {
        self.phases.iter().map(|p| p.sequential).sum()
    }

    /// Overall speedup against running every provider one after another.
    pub fn speedup(&self) -> f64 {
        let phases_wall: Duration = self.phases.iter().map(|p| p.wall_clock).sum();
        ratio(self.sequential(), phases_wall)
    }
}

fn ratio(sequential: Duration, wall: Duration) -> f64 {
    if wall.is_zero() {
        1.0
    } else {
        sequential.as_secs_f64() / wall.as_secs_f64()
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Dependency-aware parallel executor.
pub struct ParallelExecutor {
    registry: Arc<ProviderRegistry>,
    events: Arc<dyn EventSink>,
    fallback: Option<PhaseFallback>,
}

impl ParallelExecutor {
    pub fn new(registry: Arc<ProviderRegistry>, events: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            events,
            fallback: None,
        }
    }

    /// Install the function used for all-failed phases when
    /// `enable_fallback` is set.
    pub fn with_fallback(mut self, fallback: PhaseFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Execute `plan`.
    ///
    /// `request_factory` is called once per provider with the provider name
    /// and every response collected so far. Fails only when the plan names
    /// a provider missing from the registry, before anything runs.
    pub async fn execute<F>(
        &self,
        plan: &ExecutionPlan,
        request_factory: F,
        config: &ExecutorConfig,
        cancel: &CancellationToken,
    ) -> CoreResult<ExecutionReport>
    where
        F: Fn(&str, &[ProviderResponse]) -> ProviderRequest,
    {
        for name in plan.providers() {
            self.registry.require(name)?;
        }

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let mut report = ExecutionReport::default();

        for phase in &plan.phases {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.responses.extend(
                    phase
                        .providers
                        .iter()
                        .map(|name| ProviderResponse::cancelled(name.as_str(), Duration::ZERO)),
                );
                report.phases.push(PhaseReport {
                    index: phase.index,
                    providers: phase.providers.clone(),
                    wall_clock: Duration::ZERO,
                    sequential: Duration::ZERO,
                    succeeded: 0,
                    failed: phase.len(),
                    fallback_applied: false,
                });
                continue;
            }

            tracing::info!(
                phase = phase.index,
                providers = %phase.providers.join(", "),
                "Starting execution phase"
            );
            self.events.emit(OrchestrationEvent::PhaseStarted {
                phase_index: phase.index,
                providers: phase.providers.clone(),
            });

            let phase_started = Instant::now();
            let mut responses = self
                .run_phase(phase, &request_factory, &report.responses, config, cancel, &semaphore)
                .await;
            let wall_clock = phase_started.elapsed();

            let mut fallback_applied = false;
            if config.enable_fallback
                && !cancel.is_cancelled()
                && !responses.is_empty()
                && responses.iter().all(|r| !r.success)
            {
                if let Some(fallback) = &self.fallback {
                    let degraded = fallback(phase, &responses);
                    if !degraded.is_empty() {
                        tracing::warn!(
                            phase = phase.index,
                            "Every provider in phase failed, using fallback responses"
                        );
                        responses = degraded
                            .into_iter()
                            .map(|r| r.with_metadata("fallback", Value::Bool(true)))
                            .collect();
                        fallback_applied = true;
                    }
                }
            }

            let sequential: Duration = responses.iter().map(|r| r.latency).sum();
            let succeeded = responses.iter().filter(|r| r.success).count();
            let failed = responses.len() - succeeded;

            tracing::info!(
                phase = phase.index,
                wall_clock_ms = wall_clock.as_millis() as u64,
                sequential_ms = sequential.as_millis() as u64,
                succeeded = succeeded,
                failed = failed,
                "Execution phase completed"
            );
            self.events.emit(OrchestrationEvent::PhaseCompleted {
                phase_index: phase.index,
                wall_clock_ms: wall_clock.as_millis() as u64,
                sequential_ms: sequential.as_millis() as u64,
                succeeded,
                failed,
            });

            if cancel.is_cancelled() {
                report.cancelled = true;
            }
            report.responses.extend(responses);
            report.phases.push(PhaseReport {
                index: phase.index,
                providers: phase.providers.clone(),
                wall_clock,
                sequential,
                succeeded,
                failed,
                fallback_applied,
            });
        }

        report.wall_clock = started.elapsed();
        Ok(report)
    }

    async fn run_phase<F>(
        &self,
        phase: &Phase,
        request_factory: &F,
        prior: &[ProviderResponse],
        config: &ExecutorConfig,
        cancel: &CancellationToken,
        semaphore: &Arc<Semaphore>,
    ) -> Vec<ProviderResponse>
    where
        F: Fn(&str, &[ProviderResponse]) -> ProviderRequest,
    {
        let timeout = config.per_provider_timeout();
        let delay = config.rate_limit_delay();
        let mut handles = Vec::with_capacity(phase.len());

        for (i, name) in phase.providers.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let request = request_factory(name, prior);
            let provider = self.registry.get(name);
            let name = name.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                match provider {
                    Some(provider) => {
                        invoke_provider(provider, request, name, timeout, semaphore, cancel).await
                    }
                    None => ProviderResponse::failure(
                        name.as_str(),
                        ErrorKind::UnknownProvider,
                        format!("Unknown provider: {}", name),
                        Duration::ZERO,
                    ),
                }
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(phase.providers.iter())
            .map(|(joined, name)| match joined {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(provider = %name, error = %e, "Provider task panicked");
                    ProviderResponse::failure(
                        name.as_str(),
                        ErrorKind::ProviderFailure,
                        format!("provider task failed: {}", e),
                        Duration::ZERO,
                    )
                }
            })
            .collect()
    }
}

/// Invoke one provider under the semaphore, timeout and cancellation token.
async fn invoke_provider(
    provider: Arc<dyn CapabilityProvider>,
    request: ProviderRequest,
    name: String,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> ProviderResponse {
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return ProviderResponse::cancelled(name.as_str(), Duration::ZERO),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                return ProviderResponse::failure(
                    name.as_str(),
                    ErrorKind::Internal,
                    "executor semaphore closed",
                    Duration::ZERO,
                )
            }
        },
    };

    let started = Instant::now();
    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(provider = %name, "Provider call cancelled");
            ProviderResponse::cancelled(name.as_str(), started.elapsed())
        }
        result = tokio::time::timeout(timeout, provider.invoke(&request)) => match result {
            Ok(Ok(output)) => ProviderResponse::from_output(name.as_str(), output, started.elapsed()),
            Ok(Err(e)) => {
                tracing::warn!(provider = %name, error = %e, "Provider call failed");
                ProviderResponse::from_error(name.as_str(), &e, started.elapsed())
            }
            Err(_) => {
                tracing::warn!(
                    provider = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Provider call timed out"
                );
                ProviderResponse::timeout(name.as_str(), timeout)
            }
        },
    }
}

// ============================================================================
// Tests
// ============================================================================
