use thiserror::Error;

use super::policy::FailureKind;
use crate::ai::{AiError, DecodeError};
use crate::blob::BlobError;
use crate::db::DatabaseError;
use crate::extractor::ExtractionError;
use crate::queue::QueueError;
use crate::taxonomy::TaxonomyError;

/// Anything a stage worker can fail with.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Pipeline run '{0}' not found")]
    RunNotFound(String),

    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Unsupported MIME type: {0}")]
    UnsupportedMimeType(String),

    #[error("Duplicate document: already processed by run '{0}'")]
    Duplicate(String),

    #[error("No text could be extracted from document '{0}'")]
    NoText(String),

    #[error("Blob download failed: {0}")]
    Blob(#[from] BlobError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Taxonomy error: {0}")]
    Taxonomy(#[from] TaxonomyError),

    #[error("AI call failed: {0}")]
    Ai(#[from] AiError),

    #[error("Malformed AI response: {0}")]
    Decode(#[from] DecodeError),

    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("All {0} extraction chunks failed")]
    AllChunksFailed(usize),

    #[error("Worker task failed: {0}")]
    Task(String),
}

impl StageError {
    /// Classifies the error for the policy table.
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::RunNotFound(_) | StageError::DocumentNotFound(_) => {
                FailureKind::MissingInput
            }
            StageError::UnsupportedMimeType(_) | StageError::Extraction(_) => {
                FailureKind::UnsupportedInput
            }
            StageError::Duplicate(_) => FailureKind::Duplicate,
            StageError::NoText(_) | StageError::AllChunksFailed(_) => FailureKind::EmptyOutput,
            StageError::Blob(_)
            | StageError::Database(_)
            | StageError::Queue(_)
            | StageError::Taxonomy(_)
            | StageError::Task(_) => FailureKind::Transient,
            StageError::Ai(e) if e.is_retryable() => FailureKind::AiRetryable,
            StageError::Ai(_) => FailureKind::AiNonRetryable,
            StageError::Decode(_) => FailureKind::MalformedResponse,
        }
    }
}
