//! Capability Provider Abstraction
//!
//! Defines the contract between the orchestration core and the remote
//! capabilities it coordinates:
//!
//! - `ProviderRequest` - Immutable input for a single provider invocation
//! - `ProviderOutput` - What a provider hands back on success
//! - `ProviderResponse` - The labeled result the executor aggregates (success or not)
//! - `CapabilityProvider` - The async trait every provider implements
//! - `ProviderRegistry` - O(1) lookup by name with deterministic iteration
//!
//! The core requires nothing else from a provider. Providers may be slow,
//! flaky, or return empty content; the executor copes with all three.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult, ErrorKind};

// ============================================================================
// Request / Output / Response
// ============================================================================

/// Input for a single provider invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    /// Logical caller (used for per-caller budget accounting)
    pub from_caller: String,
    /// Target provider name
    pub to_provider: String,
    /// The query text
    pub query: String,
    /// Free-form context (earlier phase results, model tier, flags, ...)
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Unique request identifier
    pub request_id: String,
}

impl ProviderRequest {
    /// Create a new request with an empty context.
    pub fn new(
        from_caller: impl Into<String>,
        to_provider: impl Into<String>,
        query: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            from_caller: from_caller.into(),
            to_provider: to_provider.into(),
            query: query.into(),
            context: HashMap::new(),
            request_id: request_id.into(),
        }
    }

    /// Add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Read a string context entry.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }
}

/// Token usage reported by a provider, used for budget accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// Successful output of a provider call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOutput {
    /// Text content
    pub content: String,
    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Token usage, if the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ProviderOutput {
    /// Create an output with content only.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Attach token usage.
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(TokenUsage::new(input_tokens, output_tokens));
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Labeled result of one provider invocation.
///
/// Produced from a provider's output, or synthesized on timeout, failure, or
/// cancellation. A failed response always carries an `error_kind`, so the
/// downstream synthesis step can tell a missing provider from an empty one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub provider_name: String,
    pub content: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human-readable error message when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub latency: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    /// Build a successful response from a provider output.
    pub fn from_output(provider_name: impl Into<String>, output: ProviderOutput, latency: Duration) -> Self {
        Self {
            provider_name: provider_name.into(),
            content: output.content,
            success: true,
            error_kind: None,
            error: None,
            metadata: output.metadata,
            latency,
            usage: output.usage,
        }
    }

    /// Synthesize a failed response.
    pub fn failure(
        provider_name: impl Into<String>,
        kind: ErrorKind,
        error: impl Into<String>,
        latency: Duration,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            content: String::new(),
            success: false,
            error_kind: Some(kind),
            error: Some(error.into()),
            metadata: HashMap::new(),
            latency,
            usage: None,
        }
    }

    /// Synthesize a failed response from a core error.
    pub fn from_error(provider_name: impl Into<String>, err: &CoreError, latency: Duration) -> Self {
        Self::failure(provider_name, err.kind(), err.to_string(), latency)
    }

    /// Synthesize a timeout response.
    pub fn timeout(provider_name: impl Into<String>, timeout: Duration) -> Self {
        let name = provider_name.into();
        let err = CoreError::Timeout {
            provider: name.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };
        Self::from_error(name, &err, timeout)
    }

    /// Synthesize a cancelled response.
    pub fn cancelled(provider_name: impl Into<String>, latency: Duration) -> Self {
        Self::from_error(provider_name, &CoreError::Cancelled, latency)
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this response timed out.
    pub fn is_timeout(&self) -> bool {
        self.error_kind == Some(ErrorKind::Timeout)
    }
}

// ============================================================================
// CapabilityProvider Trait
// ============================================================================

/// A remote capability the orchestrator can consult.
///
/// Cancellation is cooperative through future drop: the executor abandons the
/// `invoke` future on timeout or caller cancellation, so implementations must
/// not rely on running to completion.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Unique provider name (e.g., "memory", "profileLookup", "synthesize").
    fn name(&self) -> &str;

    /// Execute the capability.
    async fn invoke(&self, request: &ProviderRequest) -> CoreResult<ProviderOutput>;

    /// Whether successful outputs may be served from the cache.
    ///
    /// Providers whose answers depend on earlier phases (synthesis steps)
    /// should return false.
    fn cacheable(&self) -> bool {
        true
    }
}

// ============================================================================
// ProviderRegistry
// ============================================================================

/// Registry of capability providers.
///
/// O(1) lookup by name and insertion-ordered iteration.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CapabilityProvider>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a provider. Replaces any existing provider with the same name.
    pub fn register(&mut self, provider: Arc<dyn CapabilityProvider>) {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Unregister a provider by name.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.order.retain(|n| n != name);
        self.providers.remove(name)
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.providers.get(name).cloned()
    }

    /// Look up a provider, failing with `UnknownProvider`.
    pub fn require(&self, name: &str) -> CoreResult<Arc<dyn CapabilityProvider>> {
        self.get(name).ok_or_else(|| CoreError::unknown_provider(name))
    }

    /// Check if a provider is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
