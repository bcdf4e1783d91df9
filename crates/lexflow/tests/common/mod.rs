//! Shared utilities for lexflow integration tests.
//!
//! This module provides:
//! - `TestHarness`: a migrated database, blob store and running worker pool
//!   in a temp directory
//! - `ScriptedAi`: an AI client that replays canned responses per model
//! - Builders for taxonomy packs and model responses
//! - Sink doubles for an unavailable timeline or task service

pub mod ai;
pub mod builders;
pub mod harness;
pub mod sinks;

pub use ai::ScriptedAi;
pub use builders::*;
pub use harness::{TestHarness, FIRM};
