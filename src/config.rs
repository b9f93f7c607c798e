use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::orchestration::retry::{
    RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES,
};
use crate::{Error, Result};

/// Execution settings for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub enable_retries: bool,
    /// Retries after the first attempt. Defaults to 3 when retries are
    /// enabled and is ignored otherwise.
    pub max_retries: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Maximum tasks in flight within one pass. `None` is unbounded.
    pub concurrency_limit: Option<usize>,
    pub conditional_execution: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_retries: false,
            max_retries: None,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            concurrency_limit: None,
            conditional_execution: false,
        }
    }
}

impl EngineConfig {
    pub fn effective_max_retries(&self) -> u32 {
        if self.enable_retries {
            self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
        } else {
            0
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.effective_max_retries(),
            self.base_delay_ms,
            self.max_delay_ms,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == Some(0) {
            return Err(Error::Validation(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Validation(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    pub fn tracewise_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or(Error::NoHomeDir)?
            .join(".tracewise"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::tracewise_dir()?.join("tracewise.toml"))
    }

    /// Load `~/.tracewise/tracewise.toml`, or defaults if it does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.engine.validate()?;
        tracing::debug!(engine = ?config.engine, "Config loaded");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                tracing::debug!(dir = %dir.display(), "Creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "Config saved");
        Ok(())
    }
}
