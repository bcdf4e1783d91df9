pub mod loader;
pub mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use loader::{FileTaxonomyLoader, StaticTaxonomyLoader, TaxonomyLoader};
pub use schema::{
    ActionTemplate, ActionTrigger, Category, ConditionValue, ConflictDetectionMode, DataType,
    DocumentType, FieldDef, FieldEntry, LoadedPack, PromptTemplates, ReconciliationRule,
    TaxonomyPack, TriggerOperator,
};

#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("Failed to read taxonomy file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse taxonomy file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid taxonomy pack '{id}': {message}")]
    InvalidPack { id: String, message: String },

    #[error("Duplicate taxonomy pack id '{id}' in '{path}'")]
    DuplicatePack { id: String, path: PathBuf },

    #[error("Taxonomy directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Taxonomy lookup failed: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Taxonomy loader task failed: {0}")]
    Task(String),
}
