pub mod context;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod policy;
pub mod stage;

pub use context::WorkerContext;
pub use error::StageError;
pub use job::{JobOptions, QueuedJob, StageJob, KEEP_COMPLETED_JOBS, KEEP_FAILED_JOBS};
pub use orchestrator::Orchestrator;
pub use policy::{decide, FailureKind, PolicyDecision};
pub use stage::{advance, RunState, Stage, StageConfig, StageTable, Transition};
