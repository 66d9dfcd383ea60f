//! Pipeline configuration loaded from YAML
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default database path (`<data dir>/fmea-graph/fmea.db`)
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("fmea-graph").join("fmea.db")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: PathBuf,
    pub orchestrator: OrchestratorSettings,
    pub retrieval: RetrievalSettings,
    pub generation: GenerationSettings,
    pub audit: AuditSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: default_db_path(),
            orchestrator: OrchestratorSettings::default(),
            retrieval: RetrievalSettings::default(),
            generation: GenerationSettings::default(),
            audit: AuditSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Units allowed in flight at once
    pub concurrency: usize,
    /// Units per sequential outer chunk; unset runs one chunk
    pub chunk_size: Option<usize>,
    /// Blocking retrieval lookups allowed at once
    pub retrieval_workers: usize,
    pub batch_timeout_secs: Option<u64>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            concurrency: 20,
            chunk_size: None,
            retrieval_workers: 6,
            batch_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: crate::retrieval::DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Base URL of an OpenAI-compatible API, e.g. `http://localhost:11434/v1`
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub temperature: Option<f32>,
    /// Further attempts after a timeout, 429 or 5xx response
    pub max_retries: u32,
    /// First retry delay; doubles on each further attempt
    pub retry_backoff_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            api_key_env: "FMEA_LLM_API_KEY".to_string(),
            request_timeout_secs: 30,
            temperature: None,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub dir: PathBuf,
    pub enabled: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            enabled: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml(text: &str) -> ConfigResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Load from `path` when given, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
