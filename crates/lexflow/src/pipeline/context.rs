use std::sync::Arc;

use crate::ai::AiClient;
use crate::blob::BlobStore;
use crate::config::PipelineSettings;
use crate::db::Database;
use crate::extractor::TextExtractor;
use crate::sinks::{ReviewTaskSink, TimelineSink};
use crate::taxonomy::TaxonomyLoader;

use super::orchestrator::Orchestrator;

/// Collaborators shared by every stage worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: Database,
    pub orchestrator: Arc<Orchestrator>,
    pub ai: Arc<dyn AiClient>,
    pub blobs: Arc<dyn BlobStore>,
    pub taxonomy: Arc<dyn TaxonomyLoader>,
    pub extractor: Arc<dyn TextExtractor>,
    pub timeline: Arc<dyn TimelineSink>,
    pub review_tasks: Arc<dyn ReviewTaskSink>,
    pub settings: Arc<PipelineSettings>,
}
