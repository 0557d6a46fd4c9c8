//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between the registry, the planner, the
//! execution engine and the state store. They carry no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a per-stage failure, recorded in `failed[].errorKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The process exceeded its wall-clock timeout and was killed.
    ExecutionTimeout,
    /// The process exited with a non-zero status.
    ExecutionError,
    /// The orchestrator could not run the stage (bad template, spawn failure).
    InternalError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ExecutionTimeout => "ExecutionTimeout",
            FailureKind::ExecutionError => "ExecutionError",
            FailureKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which edge set the planner follows after a stage finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Result classification of a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure { kind: FailureKind, detail: String },
}

impl StageOutcome {
    pub fn edge(&self) -> Outcome {
        match self {
            StageOutcome::Success => Outcome::Success,
            StageOutcome::Failure { .. } => Outcome::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success)
    }
}

/// Process-level details of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, when the process ran to completion.
    pub code: Option<i32>,
    pub timed_out: bool,
}

/// Outcome of running one stage through the execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub outcome: StageOutcome,
    pub duration_ms: u64,
    pub exit: ExitInfo,
}

impl ExecutionResult {
    /// Engine-side fault before or while spawning the stage.
    pub fn internal(detail: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            outcome: StageOutcome::Failure {
                kind: FailureKind::InternalError,
                detail: detail.into(),
            },
            duration_ms,
            exit: ExitInfo::default(),
        }
    }
}

/// Per-stage lifecycle. No transitions leave `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl StageState {
    pub fn is_settled(self) -> bool {
        matches!(self, StageState::Completed | StageState::Failed)
    }
}

/// Pipeline-level lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    /// At least one runnable stage remains.
    Active,
    /// No further stage satisfies its prerequisites; only the terminal stage is left.
    Draining,
    /// Terminal stage dispatched and final state written.
    Terminated,
}

/// Why the main loop stopped, recorded in `stopReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// No stage in the next wave was executable.
    Drained,
    /// The dispatch ceiling was reached.
    Exhausted,
}
