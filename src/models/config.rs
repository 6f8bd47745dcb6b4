//! Orchestrator Configuration
//!
//! One struct carrying every tunable of the orchestration core. Sections
//! are owned by the services they configure; this type composes them and
//! validates the whole.

use serde::{Deserialize, Serialize};

use crate::services::cache::CacheConfig;
use crate::services::cost::{BudgetConfig, SelectorConfig};
use crate::services::executor::ExecutorConfig;
use crate::services::fast_path::{FastPathConfig, SpeculationConfig};
use crate::services::stage::StageConfig;

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Record per-provider latency
    #[serde(default = "default_profiling_enabled")]
    pub profiling_enabled: bool,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub stage: StageConfig,
    #[serde(default)]
    pub fast_path: FastPathConfig,
    #[serde(default)]
    pub speculation: SpeculationConfig,
}

fn default_profiling_enabled() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            profiling_enabled: default_profiling_enabled(),
            executor: ExecutorConfig::default(),
            cache: CacheConfig::default(),
            budget: BudgetConfig::default(),
            selector: SelectorConfig::default(),
            stage: StageConfig::default(),
            fast_path: FastPathConfig::default(),
            speculation: SpeculationConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate every section, prefixing errors with the section name.
    pub fn validate(&self) -> Result<(), String> {
        self.executor
            .validate()
            .map_err(|e| format!("executor: {}", e))?;
        self.cache.validate().map_err(|e| format!("cache: {}", e))?;
        self.budget.validate().map_err(|e| format!("budget: {}", e))?;
        self.selector
            .validate()
            .map_err(|e| format!("selector: {}", e))?;
        self.stage.validate().map_err(|e| format!("stage: {}", e))?;
        self.fast_path
            .validate()
            .map_err(|e| format!("fast_path: {}", e))?;
        self.speculation
            .validate()
            .map_err(|e| format!("speculation: {}", e))?;
        Ok(())
    }
}
