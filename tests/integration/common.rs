//! Mock providers shared by the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_orchestrator::{
    CapabilityProvider, CoreError, CoreResult, ProviderOutput, ProviderRegistry, ProviderRequest,
};

/// Sleeps, then answers `"{name}: {query}"` or fails.
///
/// Reports 100 input and 200 output tokens unless told otherwise.
pub struct MockProvider {
    name: String,
    delay: Duration,
    fail: bool,
    cacheable: bool,
    usage: (u64, u64),
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            fail: false,
            cacheable: true,
            usage: (100, 200),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn delayed(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn uncacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = (input_tokens, output_tokens);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &ProviderRequest) -> CoreResult<ProviderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(CoreError::provider_failure(format!("{} is down", self.name)));
        }
        Ok(ProviderOutput::text(format!("{}: {}", self.name, request.query)).with_usage(self.usage.0, self.usage.1))
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }
}

/// Registry holding the given providers.
pub fn registry_of(providers: &[Arc<MockProvider>]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider.clone());
    }
    registry
}
