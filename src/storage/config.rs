//! Configuration Files
//!
//! Reads and writes `OrchestratorConfig` as TOML or JSON, chosen by file
//! extension. Every load and save validates the configuration.

use std::fs;
use std::path::Path;

use crate::models::config::OrchestratorConfig;
use crate::utils::error::{AppError, AppResult};

/// Supported config file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Format implied by a path's extension.
    pub fn from_path(path: &Path) -> AppResult<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(AppError::config(format!(
                "unsupported config file '{}': expected .toml or .json",
                path.display()
            ))),
        }
    }
}

/// Loader for orchestrator config files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<OrchestratorConfig> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)?;
        let config = match format {
            ConfigFormat::Toml => Self::from_toml_str(&content)?,
            ConfigFormat::Json => Self::from_json_str(&content)?,
        };
        tracing::info!(path = %path.display(), "Loaded orchestrator config");
        Ok(config)
    }

    /// Load a config file, or the defaults when it does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> AppResult<OrchestratorConfig> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "Config file missing, using defaults");
            Ok(OrchestratorConfig::default())
        }
    }

    pub fn from_toml_str(content: &str) -> AppResult<OrchestratorConfig> {
        let config: OrchestratorConfig = toml::from_str(content)?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> AppResult<OrchestratorConfig> {
        let config: OrchestratorConfig = serde_json::from_str(content)?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    /// Validate and write a config file in the format its extension names.
    pub fn save(path: impl AsRef<Path>, config: &OrchestratorConfig) -> AppResult<()> {
        let path = path.as_ref();
        config.validate().map_err(AppError::validation)?;
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::to_string_pretty(config)?,
            ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}
