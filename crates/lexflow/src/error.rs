use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LexflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("Taxonomy error: {0}")]
    Taxonomy(#[from] crate::taxonomy::TaxonomyError),

    #[error("AI client error: {0}")]
    Ai(#[from] crate::ai::AiError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Run '{run_id}' cannot be recovered from status '{status}'")]
    NotRecoverable { run_id: String, status: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid stage override '{stage}': {reason}")]
    InvalidStage { stage: String, reason: String },
}

pub type Result<T> = std::result::Result<T, LexflowError>;
