//! In-memory model of one pipeline run (`state.json`).
//!
//! The orchestrator is the only writer. Mutators here are pure; persisting
//! after each transition is the job of [`crate::store::StateStore`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{FailureKind, StageState, StopReason};

/// Output name -> resolved path, for one stage.
pub type StageOutputs = BTreeMap<String, String>;

/// A successfully finished stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedStage {
    pub stage: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// A stage that finished with a classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedStage {
    pub stage: String,
    pub error_kind: FailureKind,
    pub error_detail: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

/// Persisted record of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: String,
    #[serde(default)]
    pub goal: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Most recently dispatched stage still running.
    #[serde(default)]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub completed: Vec<CompletedStage>,
    #[serde(default)]
    pub failed: Vec<FailedStage>,
    #[serde(default)]
    pub outputs: BTreeMap<String, StageOutputs>,
    #[serde(default)]
    pub pipeline_succeeded: bool,
    #[serde(default)]
    pub dispatch_count: u32,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub total_duration_ms: Option<u64>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, goal: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            goal,
            start_time: now,
            end_time: None,
            current_stage: None,
            completed: Vec::new(),
            failed: Vec::new(),
            outputs: BTreeMap::new(),
            pipeline_succeeded: false,
            dispatch_count: 0,
            stop_reason: None,
            total_duration_ms: None,
        }
    }

    pub fn is_completed(&self, stage: &str) -> bool {
        self.completed.iter().any(|c| c.stage == stage)
    }

    pub fn is_failed(&self, stage: &str) -> bool {
        self.failed.iter().any(|f| f.stage == stage)
    }

    /// Completed or failed; no further dispatch is allowed.
    pub fn is_settled(&self, stage: &str) -> bool {
        self.is_completed(stage) || self.is_failed(stage)
    }

    pub fn stage_state(&self, stage: &str) -> StageState {
        if self.is_completed(stage) {
            StageState::Completed
        } else if self.is_failed(stage) {
            StageState::Failed
        } else if self.current_stage.as_deref() == Some(stage) {
            StageState::Running
        } else {
            StageState::NotStarted
        }
    }

    /// Whether any completed stage recorded an output called `name`.
    pub fn has_recorded_output(&self, name: &str) -> bool {
        self.outputs
            .iter()
            .filter(|(stage, _)| self.is_completed(stage))
            .any(|(_, outputs)| outputs.contains_key(name))
    }

    /// Path of the output `name` recorded by any completed stage.
    pub fn recorded_output(&self, name: &str) -> Option<&str> {
        self.outputs
            .iter()
            .filter(|(stage, _)| self.is_completed(stage))
            .find_map(|(_, outputs)| outputs.get(name).map(String::as_str))
    }

    pub fn mark_running(&mut self, stage: &str) {
        self.current_stage = Some(stage.to_string());
        self.dispatch_count += 1;
    }

    /// Record a success. The stage goes into `completed` before its outputs
    /// are attached.
    pub fn mark_completed(
        &mut self,
        stage: &str,
        duration_ms: u64,
        outputs: StageOutputs,
        now: DateTime<Utc>,
    ) {
        if self.is_settled(stage) {
            return;
        }
        self.completed.push(CompletedStage {
            stage: stage.to_string(),
            duration_ms,
            timestamp: now,
        });
        self.outputs.insert(stage.to_string(), outputs);
        self.clear_current(stage);
    }

    pub fn mark_failed(
        &mut self,
        stage: &str,
        kind: FailureKind,
        detail: String,
        exit_code: Option<i32>,
        now: DateTime<Utc>,
    ) {
        if self.is_settled(stage) {
            return;
        }
        self.failed.push(FailedStage {
            stage: stage.to_string(),
            error_kind: kind,
            error_detail: detail,
            exit_code,
            timestamp: now,
        });
        self.clear_current(stage);
    }

    /// Close the run. Success requires an empty `failed` list and a loop that
    /// drained on its own.
    pub fn finish(&mut self, stop: StopReason, now: DateTime<Utc>) {
        self.current_stage = None;
        self.stop_reason = Some(stop);
        self.end_time = Some(now);
        let elapsed = now.signed_duration_since(self.start_time).num_milliseconds();
        self.total_duration_ms = Some(u64::try_from(elapsed).unwrap_or(0));
        self.pipeline_succeeded = self.failed.is_empty() && stop == StopReason::Drained;
    }

    /// Undo `finish` and drop the in-flight marker so a resumed run can
    /// continue. Settled stages stay settled.
    pub fn reopen(&mut self) {
        self.current_stage = None;
        self.stop_reason = None;
        self.end_time = None;
        self.total_duration_ms = None;
        self.pipeline_succeeded = false;
    }

    /// Names of completed stages, in completion order.
    pub fn completed_names(&self) -> Vec<&str> {
        self.completed.iter().map(|c| c.stage.as_str()).collect()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.stage.as_str()).collect()
    }

    fn clear_current(&mut self, stage: &str) {
        if self.current_stage.as_deref() == Some(stage) {
            self.current_stage = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("timestamp")
    }

    #[test]
    fn stage_moves_through_running_to_completed() {
        let mut state = RunState::new("run-1", None, at(0));
        assert_eq!(state.stage_state("a"), StageState::NotStarted);

        state.mark_running("a");
        assert_eq!(state.stage_state("a"), StageState::Running);
        assert_eq!(state.dispatch_count, 1);

        let mut outputs = StageOutputs::new();
        outputs.insert("zones".to_string(), "/out/zones.geojson".to_string());
        state.mark_completed("a", 12, outputs, at(1));
        assert_eq!(state.stage_state("a"), StageState::Completed);
        assert_eq!(state.current_stage, None);
        assert_eq!(state.recorded_output("zones"), Some("/out/zones.geojson"));
    }

    #[test]
    fn settled_stage_cannot_change_list() {
        let mut state = RunState::new("run-1", None, at(0));
        state.mark_failed(
            "a",
            FailureKind::ExecutionError,
            "exit 2".to_string(),
            Some(2),
            at(1),
        );
        state.mark_completed("a", 1, StageOutputs::new(), at(2));
        assert!(state.completed.is_empty());
        assert_eq!(state.failed_names(), vec!["a"]);
        assert!(!state.outputs.contains_key("a"));
    }

    #[test]
    fn finish_fails_when_any_stage_failed() {
        let mut state = RunState::new("run-1", None, at(0));
        state.mark_completed("a", 1, StageOutputs::new(), at(1));
        state.mark_failed(
            "b",
            FailureKind::ExecutionTimeout,
            "timed out".to_string(),
            None,
            at(2),
        );
        state.finish(StopReason::Drained, at(3));
        assert!(!state.pipeline_succeeded);
        assert_eq!(state.total_duration_ms, Some(3000));
    }

    #[test]
    fn finish_fails_on_exhaustion() {
        let mut state = RunState::new("run-1", None, at(0));
        state.mark_completed("a", 1, StageOutputs::new(), at(1));
        state.finish(StopReason::Exhausted, at(2));
        assert!(!state.pipeline_succeeded);

        let mut clean = RunState::new("run-2", None, at(0));
        clean.finish(StopReason::Drained, at(1));
        assert!(clean.pipeline_succeeded);
    }

    #[test]
    fn reopen_keeps_settled_stages() {
        let mut state = RunState::new("run-1", None, at(0));
        state.mark_completed("a", 1, StageOutputs::new(), at(1));
        state.mark_running("b");
        state.finish(StopReason::Exhausted, at(2));

        state.reopen();
        assert_eq!(state.end_time, None);
        assert_eq!(state.stop_reason, None);
        assert!(!state.pipeline_succeeded);
        assert!(state.is_completed("a"));
        assert_eq!(state.stage_state("b"), StageState::NotStarted);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let state = RunState::new("run-1", Some("demo".to_string()), at(0));
        let value = serde_json::to_value(&state).expect("serialize");
        for key in [
            "runId",
            "startTime",
            "endTime",
            "currentStage",
            "completed",
            "failed",
            "outputs",
            "pipelineSucceeded",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
    }
}
