//! Provider Call Layers
//!
//! Every provider call made by the executor passes through the same stack of
//! wrappers, outermost first:
//!
//! - [`ProfiledProvider`] times the call for the profiler
//! - [`CachedProvider`] serves repeated queries from `provider.{name}.{scope}`
//! - [`TieredProvider`] picks a model tier, then charges the budget for
//!   every call that ran
//!
//! A cache hit therefore never consumes budget. The wrappers are built per
//! turn because tier selection depends on the conversation context.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use cascade_core::{
    CapabilityProvider, ConvContext, CoreResult, ProviderOutput, ProviderRegistry,
    ProviderRequest,
};

use crate::services::analytics::Profiler;
use crate::services::cache::key::digest_key;
use crate::services::cache::{namespaces, CacheManager};
use crate::services::cost::ModelSelector;

/// Shared services wrapped around provider calls. Any layer may be absent.
#[derive(Clone, Default)]
pub struct CallLayers {
    cache: Option<Arc<CacheManager>>,
    selector: Option<Arc<ModelSelector>>,
    profiler: Option<Arc<Profiler>>,
}

impl CallLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_selector(mut self, selector: Arc<ModelSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Wrap one provider for a turn in `ctx`.
    pub fn wrap(
        &self,
        provider: Arc<dyn CapabilityProvider>,
        ctx: &ConvContext,
    ) -> Arc<dyn CapabilityProvider> {
        let mut wrapped = provider;
        if let Some(selector) = &self.selector {
            wrapped = Arc::new(TieredProvider {
                inner: wrapped,
                selector: selector.clone(),
                ctx: ctx.clone(),
            });
        }
        if let Some(cache) = &self.cache {
            wrapped = Arc::new(CachedProvider {
                inner: wrapped,
                cache: cache.clone(),
            });
        }
        if let Some(profiler) = self.profiler.as_ref().filter(|p| p.is_enabled()) {
            wrapped = Arc::new(ProfiledProvider {
                inner: wrapped,
                profiler: profiler.clone(),
            });
        }
        wrapped
    }

    /// Copy of `registry` with every provider wrapped for `ctx`.
    pub fn wrap_registry(&self, registry: &ProviderRegistry, ctx: &ConvContext) -> ProviderRegistry {
        let mut wrapped = ProviderRegistry::new();
        for name in registry.names() {
            if let Some(provider) = registry.get(&name) {
                wrapped.register(self.wrap(provider, ctx));
            }
        }
        wrapped
    }
}

// ============================================================================
// Cache layer
// ============================================================================

/// Context entries that change what a provider answers for the same query.
const SCOPED_CONTEXT_KEYS: [&str; 3] = ["conversation_id", "mode", "results"];

/// Serves cacheable providers from the `provider.{name}.{scope}` namespace.
///
/// The scope is a digest of the request's conversation, mode and earlier
/// phase results, so an answer is only reused for the same query asked with
/// the same inputs.
pub struct CachedProvider {
    inner: Arc<dyn CapabilityProvider>,
    cache: Arc<CacheManager>,
}

impl CachedProvider {
    fn namespace(&self, request: &ProviderRequest) -> String {
        format!(
            "{}.{}.{}",
            namespaces::PROVIDER,
            self.inner.name(),
            context_scope(request)
        )
    }
}

/// Digest of the scoped context entries. `serde_json` maps serialize with
/// sorted keys, so equal contexts give equal digests.
pub fn context_scope(request: &ProviderRequest) -> String {
    let scoped: Map<String, Value> = SCOPED_CONTEXT_KEYS
        .iter()
        .map(|key| {
            let value = request.context.get(*key).cloned().unwrap_or(Value::Null);
            (key.to_string(), value)
        })
        .collect();
    digest_key(&Value::Object(scoped).to_string())
}

#[async_trait]
impl CapabilityProvider for CachedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, request: &ProviderRequest) -> CoreResult<ProviderOutput> {
        if !self.inner.cacheable() {
            let output = self.inner.invoke(request).await?;
            return Ok(output.with_metadata("cache", json!("bypass")));
        }

        let namespace = self.namespace(request);
        let hit = if self.cache.config().is_semantic(&namespace) {
            self.cache.get_semantic(&namespace, &request.query, None).await
        } else {
            self.cache.get(&namespace, &request.query).await
        };

        if let Some(hit) = hit {
            tracing::debug!(
                provider = %self.inner.name(),
                mode = %hit.mode,
                "Serving provider call from cache"
            );
            let mut output = ProviderOutput::text(hit.value)
                .with_metadata("cache", json!(hit.mode.to_string()));
            if let Some(similarity) = hit.similarity {
                output = output.with_metadata("cache_similarity", json!(similarity));
            }
            return Ok(output);
        }

        let output = self.inner.invoke(request).await?;
        if !output.content.is_empty() {
            if let Err(e) = self
                .cache
                .put(&namespace, &request.query, output.content.clone())
                .await
            {
                tracing::debug!(
                    provider = %self.inner.name(),
                    error = %e,
                    "Provider output not cached"
                );
            }
        }
        Ok(output.with_metadata("cache", json!("miss")))
    }

    fn cacheable(&self) -> bool {
        self.inner.cacheable()
    }
}

// ============================================================================
// Tier + budget layer
// ============================================================================

/// Chooses a model tier before the call and charges its usage after.
pub struct TieredProvider {
    inner: Arc<dyn CapabilityProvider>,
    selector: Arc<ModelSelector>,
    ctx: ConvContext,
}

#[async_trait]
impl CapabilityProvider for TieredProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, request: &ProviderRequest) -> CoreResult<ProviderOutput> {
        let choice = self.selector.choose(&request.query, &self.ctx)?;
        let tier = choice.tier;

        let request = request
            .clone()
            .with_context("model_tier", json!(tier))
            .with_context("model_reasoning", Value::String(choice.reasoning));
        let mut output = self
            .inner
            .invoke(&request)
            .await?
            .with_metadata("model_tier", json!(tier));

        if let Some(usage) = output.usage {
            let record = self.selector.budget().record_usage(
                self.ctx.caller(),
                tier,
                usage,
                self.ctx.critical,
            );
            output = output.with_metadata("cost_micros", json!(record.cost));
            if record.over_limit {
                output = output.with_metadata("budget_over_limit", Value::Bool(true));
            }
        }
        Ok(output)
    }

    fn cacheable(&self) -> bool {
        self.inner.cacheable()
    }
}

// ============================================================================
// Profiling layer
// ============================================================================

/// Feeds call latency and outcome to the profiler.
pub struct ProfiledProvider {
    inner: Arc<dyn CapabilityProvider>,
    profiler: Arc<Profiler>,
}

#[async_trait]
impl CapabilityProvider for ProfiledProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, request: &ProviderRequest) -> CoreResult<ProviderOutput> {
        let started = Instant::now();
        let result = self.inner.invoke(request).await;
        self.profiler
            .record(self.inner.name(), started.elapsed(), result.is_ok());
        result
    }

    fn cacheable(&self) -> bool {
        self.inner.cacheable()
    }
}
