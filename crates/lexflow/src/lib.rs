pub mod ai;
pub mod blob;
pub mod chunker;
pub mod config;
pub mod db;
pub mod dlq;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod risk;
pub mod sanitize;
pub mod secrets;
pub mod sinks;
pub mod taxonomy;
pub mod triggers;
pub mod worker;

pub use ai::{AiClient, AiError, AiRequest, AiResponse, HttpAiClient};
pub use blob::{BlobStore, FsBlobStore};
pub use config::{load_settings, load_settings_from_str, PipelineSettings};
pub use db::Database;
pub use dlq::{DlqEntry, DlqMonitor, DlqStore, RingBufferDlq};
pub use error::{ConfigError, LexflowError, Result};
pub use pipeline::{Orchestrator, Stage, StageJob, StageTable, WorkerContext};
pub use queue::{InProcessQueue, JobEvent, JobQueue};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use taxonomy::{FileTaxonomyLoader, StaticTaxonomyLoader, TaxonomyLoader};
pub use worker::{all_workers, StageWorker, WorkerPool};
