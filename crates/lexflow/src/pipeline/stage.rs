//! Stage order, run states and the static per-stage queue table.
//!
//! The pipeline is a strict per-run state machine. The queue only carries
//! jobs between stages; the persisted run row is the source of truth.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One of the six pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Ocr,
    Classify,
    Extract,
    Reconcile,
    Actions,
}

impl Stage {
    /// All stages in their fixed execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Intake,
        Stage::Ocr,
        Stage::Classify,
        Stage::Extract,
        Stage::Reconcile,
        Stage::Actions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Ocr => "ocr",
            Stage::Classify => "classify",
            Stage::Extract => "extract",
            Stage::Reconcile => "reconcile",
            Stage::Actions => "actions",
        }
    }

    /// Position of this stage in [`Stage::ALL`].
    pub fn index(&self) -> usize {
        Stage::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }

    /// Queue name used for this stage's jobs, e.g. `pipeline:ocr`.
    pub fn queue_name(&self) -> String {
        format!("pipeline:{}", self.as_str())
    }

    /// The stage after this one, or `None` for the final stage.
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stage = s.strip_prefix("pipeline:").unwrap_or(s);
        Stage::ALL
            .iter()
            .find(|st| st.as_str() == stage)
            .copied()
            .ok_or_else(|| format!("unknown pipeline stage '{}'", s))
    }
}

/// Where a run sits in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stage(Stage),
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Stage(_))
    }
}

/// Outcome of [`advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(Stage),
    Terminal,
}

/// Pure transition function: the stage that follows `stage`, or terminal
/// once the actions stage has run.
pub fn advance(stage: Stage) -> Transition {
    match stage.next() {
        Some(next) => Transition::Next(next),
        None => Transition::Terminal,
    }
}

/// Per-stage queue behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConfig {
    /// Maximum jobs of this stage processed at once.
    pub concurrency: usize,
    /// Total attempts per job, first try included.
    pub attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_delay: Duration,
    /// Upper bound on a single attempt.
    pub timeout: Duration,
}

impl StageConfig {
    pub const fn new(concurrency: usize, attempts: u32, backoff_ms: u64, timeout_ms: u64) -> Self {
        Self {
            concurrency,
            attempts,
            backoff_delay: Duration::from_millis(backoff_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Built-in defaults for `stage`.
    pub const fn default_for(stage: Stage) -> Self {
        match stage {
            Stage::Intake => Self::new(10, 3, 2_000, 60_000),
            Stage::Ocr => Self::new(3, 3, 5_000, 180_000),
            Stage::Classify => Self::new(5, 3, 3_000, 60_000),
            Stage::Extract => Self::new(3, 2, 5_000, 300_000),
            Stage::Reconcile => Self::new(5, 3, 2_000, 30_000),
            Stage::Actions => Self::new(5, 3, 2_000, 30_000),
        }
    }
}

/// Read-only stage configuration for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTable {
    configs: HashMap<Stage, StageConfig>,
}

impl StageTable {
    /// Table with an override applied on top of the defaults for some stages.
    pub fn with_overrides(overrides: &HashMap<Stage, StageConfig>) -> Self {
        let configs = Stage::ALL
            .iter()
            .map(|stage| {
                let config = overrides
                    .get(stage)
                    .copied()
                    .unwrap_or_else(|| StageConfig::default_for(*stage));
                (*stage, config)
            })
            .collect();
        Self { configs }
    }

    pub fn get(&self, stage: Stage) -> StageConfig {
        self.configs
            .get(&stage)
            .copied()
            .unwrap_or_else(|| StageConfig::default_for(stage))
    }
}

impl Default for StageTable {
    fn default() -> Self {
        Self::with_overrides(&HashMap::new())
    }
}
