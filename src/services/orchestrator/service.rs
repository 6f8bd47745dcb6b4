//! Turn Orchestrator
//!
//! Entry point for one conversational turn. A turn is first offered to the
//! fast-path router; when no fast answer exists the stage controller picks
//! the stage, the stage's providers are planned, and the executor runs the
//! plan with cache, tier selection, budget and profiling around every call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cascade_core::{
    CapabilityProvider, ConvContext, ConversationStage, CoreError, CoreResult, EventSink,
    NoopEventSink, ProviderRegistry, ProviderRequest, ProviderResponse,
};

use crate::models::config::OrchestratorConfig;
use crate::services::analytics::Profiler;
use crate::services::cache::{CacheBackend, CacheManager, Embedder, InMemoryBackend};
use crate::services::cost::{BudgetClock, BudgetTracker, ModelSelector};
use crate::services::executor::{CallLayers, ExecutionReport, ParallelExecutor, PhaseFallback};
use crate::services::fast_path::{
    FastPathRouter, PathDecision, PathKind, PatternMatcher, SpeculationEngine,
};
use crate::services::stage::{StageController, StageDecision};
use crate::utils::error::{AppError, AppResult};

/// Everything produced while handling one turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub path: PathKind,
    /// Conversation stage after the turn
    pub stage: ConversationStage,
    pub decision: PathDecision,
    /// Present when the turn took the slow path
    pub stage_decision: Option<StageDecision>,
    /// Present when the turn was answered by the fast path
    pub fast_response: Option<String>,
    /// Present when providers were executed
    pub report: Option<ExecutionReport>,
    /// Whether the previous turn's speculation predicted this query
    pub speculation_hit: Option<bool>,
    /// Background speculation started by this turn
    pub speculative_tasks: Vec<JoinHandle<()>>,
    pub elapsed: Duration,
}

impl TurnOutcome {
    pub fn used_fast_path(&self) -> bool {
        self.fast_response.is_some()
    }

    /// Provider responses in plan order; empty for fast-path turns.
    pub fn responses(&self) -> &[ProviderResponse] {
        self.report
            .as_ref()
            .map(|r| r.responses.as_slice())
            .unwrap_or(&[])
    }

    pub fn response(&self, provider: &str) -> Option<&ProviderResponse> {
        self.report.as_ref().and_then(|r| r.response(provider))
    }
}

/// Builder for [`TurnOrchestrator`].
pub struct TurnOrchestratorBuilder {
    config: OrchestratorConfig,
    registry: ProviderRegistry,
    events: Arc<dyn EventSink>,
    cache_backend: Option<Arc<dyn CacheBackend>>,
    embedder: Option<Arc<dyn Embedder>>,
    budget_clock: Option<BudgetClock>,
    matcher: Option<Arc<dyn PatternMatcher>>,
    fallback: Option<PhaseFallback>,
}

impl TurnOrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            registry: ProviderRegistry::new(),
            events: Arc::new(NoopEventSink),
            cache_backend: None,
            embedder: None,
            budget_clock: None,
            matcher: None,
            fallback: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.registry.register(provider);
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache_backend = Some(backend);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn budget_clock(mut self, clock: BudgetClock) -> Self {
        self.budget_clock = Some(clock);
        self
    }

    pub fn pattern_matcher(mut self, matcher: Arc<dyn PatternMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn fallback(mut self, fallback: PhaseFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Validate the configuration, probe the cache backend and wire the
    /// services together.
    pub async fn build(self) -> AppResult<TurnOrchestrator> {
        self.config.validate().map_err(AppError::validation)?;

        for stage in [
            ConversationStage::Exploration,
            ConversationStage::OrchestratedGathering,
            ConversationStage::Synthesis,
        ] {
            for name in &self.config.stage.providers(stage).providers {
                if !self.registry.contains(name) {
                    tracing::warn!(
                        stage = %stage,
                        provider = %name,
                        "Stage references a provider that is not registered"
                    );
                }
            }
        }

        let events = self.events;
        let backend: Arc<dyn CacheBackend> = match self.cache_backend {
            Some(backend) => backend,
            None => Arc::new(InMemoryBackend::new(self.config.cache.max_entries_per_namespace)),
        };
        let mut cache = CacheManager::connect(self.config.cache.clone(), backend, events.clone()).await;
        if let Some(embedder) = self.embedder {
            cache = cache.with_embedder(embedder);
        }
        let cache = Arc::new(cache);

        let budget = Arc::new(match self.budget_clock {
            Some(clock) => BudgetTracker::with_clock(self.config.budget.clone(), events.clone(), clock),
            None => BudgetTracker::new(self.config.budget.clone(), events.clone()),
        });
        let selector = Arc::new(ModelSelector::new(
            self.config.selector.clone(),
            budget.clone(),
            events.clone(),
        ));
        let profiler = Arc::new(Profiler::new(self.config.profiling_enabled));

        let speculation = Arc::new(SpeculationEngine::new(
            self.config.speculation.clone(),
            cache.clone(),
            events.clone(),
        ));
        let mut router = FastPathRouter::new(self.config.fast_path.clone(), speculation, events.clone());
        if let Some(matcher) = self.matcher {
            router = router.with_matcher(matcher);
        }

        let stages = StageController::new(self.config.stage.clone(), events.clone());
        let layers = CallLayers::new()
            .with_cache(cache.clone())
            .with_selector(selector.clone())
            .with_profiler(profiler.clone());

        tracing::info!(
            providers = self.registry.len(),
            semantic_cache = cache.semantic_available(),
            cache_disabled = cache.is_disabled(),
            "Turn orchestrator ready"
        );

        Ok(TurnOrchestrator {
            config: self.config,
            registry: Arc::new(self.registry),
            cache,
            budget,
            selector,
            profiler,
            stages,
            router,
            layers,
            events,
            fallback: self.fallback,
        })
    }
}

/// Orchestrates conversational turns.
pub struct TurnOrchestrator {
    config: OrchestratorConfig,
    registry: Arc<ProviderRegistry>,
    cache: Arc<CacheManager>,
    budget: Arc<BudgetTracker>,
    selector: Arc<ModelSelector>,
    profiler: Arc<Profiler>,
    stages: StageController,
    router: FastPathRouter,
    layers: CallLayers,
    events: Arc<dyn EventSink>,
    fallback: Option<PhaseFallback>,
}

impl TurnOrchestrator {
    pub fn builder(config: OrchestratorConfig) -> TurnOrchestratorBuilder {
        TurnOrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn budget(&self) -> &Arc<BudgetTracker> {
        &self.budget
    }

    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    pub fn stages(&self) -> &StageController {
        &self.stages
    }

    pub fn router(&self) -> &FastPathRouter {
        &self.router
    }

    /// Handle one turn.
    ///
    /// Fails only when the turn cannot be planned (cyclic or unknown
    /// providers) or was cancelled before it started. Provider failures are
    /// reported inside the outcome.
    pub async fn handle_turn(
        &self,
        query: &str,
        ctx: &ConvContext,
        cancel: &CancellationToken,
    ) -> CoreResult<TurnOutcome> {
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let started = Instant::now();
        let turn_id = uuid::Uuid::new_v4().to_string();
        let speculation_hit = self.router.observe_turn(&ctx.conversation_id, query).await;

        let mut decision = self.router.classify(query, ctx).await;
        if decision.is_fast() {
            let outcome = self.router.route(decision, ctx, self.speculation_runner(ctx));
            if let Some(response) = outcome.response {
                return Ok(TurnOutcome {
                    turn_id,
                    path: outcome.decision.kind,
                    stage: self.stages.stage(&ctx.conversation_id),
                    decision: outcome.decision,
                    stage_decision: None,
                    fast_response: Some(response),
                    report: None,
                    speculation_hit,
                    speculative_tasks: outcome.speculative_tasks,
                    elapsed: started.elapsed(),
                });
            }
            decision = outcome.decision;
        }

        let stage_decision = self.stages.evaluate_turn(query, ctx);
        let plan = self.stages.plan_for(stage_decision.stage)?;

        tracing::info!(
            turn = %turn_id,
            conversation = %ctx.conversation_id,
            stage = %stage_decision.stage,
            phases = plan.len(),
            providers = plan.provider_count(),
            "Executing turn on the slow path"
        );

        let registry = Arc::new(self.layers.wrap_registry(&self.registry, ctx));
        let mut executor = ParallelExecutor::new(registry, self.events.clone());
        if let Some(fallback) = &self.fallback {
            executor = executor.with_fallback(fallback.clone());
        }

        let stage = stage_decision.stage;
        let factory = |provider: &str, prior: &[ProviderResponse]| {
            build_request(&turn_id, provider, query, ctx, stage, prior)
        };
        let report = executor
            .execute(&plan, factory, &self.config.executor, cancel)
            .await?;

        Ok(TurnOutcome {
            turn_id,
            path: PathKind::SlowPath,
            stage,
            decision,
            stage_decision: Some(stage_decision),
            fast_response: None,
            report: Some(report),
            speculation_hit,
            speculative_tasks: Vec::new(),
            elapsed: started.elapsed(),
        })
    }

    /// Move a conversation to Synthesis.
    pub fn request_synthesis(&self, conversation_id: &str) -> Option<StageDecision> {
        self.stages.request_synthesis(conversation_id)
    }

    /// Start a conversation over in Exploration, dropping its speculative
    /// results.
    pub async fn reset_conversation(&self, conversation_id: &str) -> bool {
        self.router.speculation().forget(conversation_id).await;
        self.stages.reset(conversation_id)
    }

    /// Probe the cache backend, re-enabling the cache when it answers.
    pub async fn cache_health_check(&self) -> bool {
        self.cache.health_check().await
    }

    /// Drop expired cache entries.
    pub async fn sweep_cache(&self) -> usize {
        self.cache.sweep_expired().await
    }

    fn speculation_runner(&self, ctx: &ConvContext) -> Option<Arc<dyn CapabilityProvider>> {
        let name = &self.config.speculation.runner_provider;
        match self.registry.get(name) {
            Some(provider) => Some(self.layers.wrap(provider, ctx)),
            None => {
                tracing::debug!(runner = %name, "Speculation runner not registered");
                None
            }
        }
    }
}

/// Request for one provider, carrying the turn context and every earlier
/// response.
fn build_request(
    turn_id: &str,
    provider: &str,
    query: &str,
    ctx: &ConvContext,
    stage: ConversationStage,
    prior: &[ProviderResponse],
) -> ProviderRequest {
    let results: Map<String, Value> = prior
        .iter()
        .map(|r| {
            (
                r.provider_name.clone(),
                json!({
                    "success": r.success,
                    "content": r.content,
                    "errorKind": r.error_kind,
                }),
            )
        })
        .collect();

    let mut request = ProviderRequest::new(
        ctx.caller(),
        provider,
        query,
        format!("{}:{}", turn_id, provider),
    )
    .with_context("conversation_id", json!(ctx.conversation_id))
    .with_context("turn_count", json!(ctx.turn_count))
    .with_context("stage", json!(stage))
    .with_context("results", Value::Object(results));
    if let Some(mode) = &ctx.mode {
        request = request.with_context("mode", json!(mode));
    }
    for (key, value) in &ctx.extra {
        if !request.context.contains_key(key) {
            request = request.with_context(key.clone(), value.clone());
        }
    }
    request
}
