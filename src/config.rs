//! Configuration loading and validation.
//!
//! Configuration is a TOML file with every table and key optional; absent
//! keys fall back to the defaults in [`crate::defaults`]. A few settings
//! can additionally be overridden through `SEGSCRIBE_*` environment
//! variables, which win over the file.

use crate::defaults;
use crate::error::{Result, SegscribeError};
use crate::merge::MergeConfig;
use crate::scheduler::SchedulerConfig;
use crate::segmenter::SegmenterConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Remote backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// URL of the transcription endpoint.
    pub endpoint: String,
    /// Language code sent with each request; "auto" lets the server detect.
    pub language: String,
    /// Model name sent with each request.
    pub model: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            model: defaults::DEFAULT_MODEL.to_string(),
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(SegscribeError::ConfigInvalidValue {
                key: "backend.endpoint".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.language.trim().is_empty() {
            return Err(SegscribeError::ConfigInvalidValue {
                key: "backend.language".to_string(),
                message: "must not be empty (use \"auto\" for detection)".to_string(),
            });
        }
        Ok(())
    }
}

/// Complete configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub segmenting: SegmenterConfig,
    pub scheduler: SchedulerConfig,
    pub backend: BackendConfig,
    pub merge: MergeConfig,
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SegscribeError::ConfigFileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Loads the config file if it exists, otherwise returns defaults.
    /// Environment overrides apply either way.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Conventional config file location under the user config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("segscribe").join("config.toml"))
    }

    /// Applies `SEGSCRIBE_ENDPOINT`, `SEGSCRIBE_LANGUAGE` and
    /// `SEGSCRIBE_MODEL` on top of whatever the file provided.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("SEGSCRIBE_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.backend.endpoint = endpoint;
        }
        if let Ok(language) = std::env::var("SEGSCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.backend.language = language;
        }
        if let Ok(model) = std::env::var("SEGSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.backend.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.segmenting.validate()?;
        self.scheduler.validate()?;
        self.backend.validate()?;
        Ok(())
    }
}
