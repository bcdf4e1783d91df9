//! Per-stage failure policy.
//!
//! Every error a worker can hit is first classified into a [`FailureKind`];
//! [`decide`] then maps `(stage, kind)` to what the worker does about it.

use super::stage::Stage;

/// Classification of a failure, independent of where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Required input is absent (document, run, text).
    MissingInput,
    /// Input exists but can never be processed (e.g. unsupported MIME type).
    UnsupportedInput,
    /// Content already ingested by a completed run of the same matter.
    Duplicate,
    /// A collaborator produced nothing usable (e.g. no text after OCR).
    EmptyOutput,
    /// Infrastructure hiccup: blob download, database, queue.
    Transient,
    /// LLM gateway error that may succeed on retry.
    AiRetryable,
    /// LLM gateway error that will not succeed on retry.
    AiNonRetryable,
    /// LLM answered but not in the expected JSON contract.
    MalformedResponse,
}

/// What a worker does with a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Propagate the error so the queue retries the whole job.
    Retry,
    /// Drop the current chunk and keep going.
    SkipChunk,
    /// Record the stage as skipped and advance.
    SkipStage,
    /// Mark the run failed; the job itself finishes normally.
    FailRun,
}

/// Looks up the policy for a failure in a given stage.
pub fn decide(stage: Stage, kind: FailureKind) -> PolicyDecision {
    use FailureKind::*;
    use PolicyDecision::*;

    match (stage, kind) {
        (_, MissingInput | UnsupportedInput | Duplicate | EmptyOutput) => FailRun,
        (_, Transient) => Retry,

        (Stage::Classify, AiRetryable) => SkipStage,
        (Stage::Classify, AiNonRetryable | MalformedResponse) => FailRun,

        (Stage::Extract, AiRetryable | AiNonRetryable | MalformedResponse) => SkipChunk,

        (_, AiRetryable) => Retry,
        (_, AiNonRetryable | MalformedResponse) => FailRun,
    }
}
