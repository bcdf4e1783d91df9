use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::ai::client::DEFAULT_API_URL;
use crate::error::ConfigError;
use crate::pipeline::{Stage, StageConfig, StageTable};
use crate::reconcile::DEFAULT_AUTO_APPLY_THRESHOLD;
use crate::secrets::{resolve_secret, SecretError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub version: String,
    /// Defaults to `~/.lexflow/data/lexflow.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_blob_root")]
    pub blob_root: String,
    #[serde(default)]
    pub taxonomy_directory: Option<String>,
    #[serde(default)]
    pub default_taxonomy_pack: Option<String>,
    #[serde(default = "default_taxonomy_cache_ttl_secs")]
    pub taxonomy_cache_ttl_secs: u64,
    #[serde(default)]
    pub ai: AiSettings,
    #[serde(default)]
    pub classification: ClassificationSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub reconciliation: ReconciliationSettings,
    #[serde(default)]
    pub dlq: DlqSettings,
    /// Per-stage overrides of the built-in queue table, keyed by stage name.
    #[serde(default)]
    pub stages: BTreeMap<String, StageOverride>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn default_blob_root() -> String {
    "./blobs".to_string()
}

fn default_taxonomy_cache_ttl_secs() -> u64 {
    300
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            blob_root: default_blob_root(),
            taxonomy_directory: None,
            default_taxonomy_pack: None,
            taxonomy_cache_ttl_secs: default_taxonomy_cache_ttl_secs(),
            ai: AiSettings::default(),
            classification: ClassificationSettings::default(),
            extraction: ExtractionSettings::default(),
            reconciliation: ReconciliationSettings::default(),
            dlq: DlqSettings::default(),
            stages: BTreeMap::new(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PipelineSettings {
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn taxonomy_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.taxonomy_cache_ttl_secs)
    }

    /// The built-in stage table with configured overrides applied.
    pub fn stage_table(&self) -> Result<StageTable, ConfigError> {
        let mut overrides = HashMap::new();
        for (name, stage_override) in &self.stages {
            let stage: Stage = name.parse().map_err(|reason| ConfigError::InvalidStage {
                stage: name.clone(),
                reason,
            })?;
            overrides.insert(stage, stage_override.apply(StageConfig::default_for(stage)));
        }
        Ok(StageTable::with_overrides(&overrides))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOverride {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl StageOverride {
    pub fn apply(&self, base: StageConfig) -> StageConfig {
        StageConfig {
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            attempts: self.attempts.unwrap_or(base.attempts),
            backoff_delay: self
                .backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(base.backoff_delay),
            timeout: self
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.timeout),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub classification_model: String,
    #[serde(default = "default_model")]
    pub extraction_model: String,
    #[serde(default = "default_model")]
    pub vision_model: String,
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ai_max_retries")]
    pub max_retries: u32,
    /// Direct value; prefer `api_key_file` or `api_key_env_var` outside local testing.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_ai_timeout_secs() -> u64 {
    60
}

fn default_ai_max_retries() -> u32 {
    2
}

fn default_api_key_env_var() -> Option<String> {
    Some("ANTHROPIC_API_KEY".to_string())
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            classification_model: default_model(),
            extraction_model: default_model(),
            vision_model: default_model(),
            timeout_secs: default_ai_timeout_secs(),
            max_retries: default_ai_max_retries(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env_var(),
        }
    }
}

impl AiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn resolve_api_key(&self) -> Result<SecretString, SecretError> {
        resolve_secret(
            self.api_key.as_deref(),
            self.api_key_file.as_deref(),
            self.api_key_env_var.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationSettings {
    /// Leading characters of the document sent to the classifier.
    #[serde(default = "default_sample_chars")]
    pub sample_chars: usize,
    /// Below this confidence a human review task is raised.
    #[serde(default = "default_low_confidence_threshold")]
    pub low_confidence_threshold: f64,
    #[serde(default = "default_classification_max_tokens")]
    pub max_tokens: u32,
}

fn default_sample_chars() -> usize {
    8000
}

fn default_low_confidence_threshold() -> f64 {
    0.6
}

fn default_classification_max_tokens() -> u32 {
    512
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            sample_chars: default_sample_chars(),
            low_confidence_threshold: default_low_confidence_threshold(),
            max_tokens: default_classification_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Retries per chunk call; smaller than the classifier's budget.
    #[serde(default = "default_chunk_max_retries")]
    pub chunk_max_retries: u32,
    #[serde(default = "default_extraction_max_tokens")]
    pub max_tokens: u32,
}

fn default_chunk_size() -> usize {
    6000
}

fn default_chunk_overlap() -> usize {
    500
}

fn default_chunk_max_retries() -> u32 {
    1
}

fn default_extraction_max_tokens() -> u32 {
    4096
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            chunk_max_retries: default_chunk_max_retries(),
            max_tokens: default_extraction_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    #[serde(default = "default_auto_apply_threshold")]
    pub auto_apply_threshold: f64,
}

fn default_auto_apply_threshold() -> f64 {
    DEFAULT_AUTO_APPLY_THRESHOLD
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            auto_apply_threshold: default_auto_apply_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqSettings {
    #[serde(default = "default_dlq_capacity")]
    pub capacity: usize,
}

fn default_dlq_capacity() -> usize {
    crate::dlq::DEFAULT_DLQ_CAPACITY
}

impl Default for DlqSettings {
    fn default() -> Self {
        Self {
            capacity: default_dlq_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
