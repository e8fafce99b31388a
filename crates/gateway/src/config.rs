//! YAML configuration with environment overrides.
//!
//! The config path comes from `--config` or `CONFIG_PATH`; a handful of
//! environment variables override individual file values. The database URL
//! is supplied separately through `DATABASE_URL`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

/// Deployment environment; selects the logging format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Local,
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub env: Env,
    pub websocket: WebsocketConfig,
    pub neuralclient: NeuralClientConfig,
}

/// Front-side listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketConfig {
    /// Bind address, e.g. `0.0.0.0:8080`.
    pub urlws: String,
    /// Request timeout applied to the REST routes.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Upstream neural backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NeuralClientConfig {
    #[serde(rename = "URLNeural")]
    pub url: String,
    /// Per-request submit deadline.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config path is empty: pass --config or set CONFIG_PATH")]
    MissingPath,
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl Config {
    /// Load from an explicit path, falling back to `CONFIG_PATH`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path: PathBuf = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var("CONFIG_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .ok_or(ConfigError::MissingPath)?,
        };
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(config.apply_env_overrides())
    }

    /// Environment variables win over file values where present.
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(bind) = std::env::var("NEURELAY_BIND")
            && !bind.is_empty()
        {
            self.websocket.urlws = bind;
        }
        if let Ok(url) = std::env::var("NEURAL_URL")
            && !url.is_empty()
        {
            self.neuralclient.url = url;
        }
        self
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
