//! Semantic invariants for a run-state document.

use std::collections::BTreeSet;

use crate::core::run_state::RunState;

/// Validate run-state invariants, returning human-readable violations.
pub fn validate_invariants(state: &RunState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.run_id.trim().is_empty() {
        errors.push("runId must not be empty".to_string());
    }

    let mut completed = BTreeSet::new();
    for entry in &state.completed {
        if !completed.insert(entry.stage.as_str()) {
            errors.push(format!("stage '{}' completed more than once", entry.stage));
        }
    }
    let mut failed = BTreeSet::new();
    for entry in &state.failed {
        if !failed.insert(entry.stage.as_str()) {
            errors.push(format!("stage '{}' failed more than once", entry.stage));
        }
    }
    for stage in completed.intersection(&failed) {
        errors.push(format!("stage '{stage}' is both completed and failed"));
    }

    // Every settled stage was dispatched at least once; retries after a
    // resume may push the count higher.
    let settled = state.completed.len() + state.failed.len();
    if (state.dispatch_count as usize) < settled {
        errors.push(format!(
            "dispatchCount {} is lower than the {settled} settled stages",
            state.dispatch_count
        ));
    }

    for stage in state.outputs.keys() {
        if !completed.contains(stage.as_str()) {
            errors.push(format!("outputs recorded for stage '{stage}' which is not completed"));
        }
    }

    if let Some(end) = state.end_time {
        if end < state.start_time {
            errors.push("endTime precedes startTime".to_string());
        }
    } else if state.pipeline_succeeded {
        errors.push("pipelineSucceeded set before endTime".to_string());
    }

    if state.pipeline_succeeded && !state.failed.is_empty() {
        errors.push("pipelineSucceeded is true but failed is not empty".to_string());
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_state::{CompletedStage, StageOutputs};
    use crate::core::types::{FailureKind, StopReason};
    use chrono::Utc;

    #[test]
    fn clean_state_has_no_violations() {
        let mut state = RunState::new("run-1", None, Utc::now());
        state.mark_running("a");
        state.mark_completed("a", 1, StageOutputs::new(), Utc::now());
        state.finish(StopReason::Drained, Utc::now());
        assert!(validate_invariants(&state).is_empty());
    }

    #[test]
    fn reports_settled_stages_that_were_never_dispatched() {
        let mut state = RunState::new("run-1", None, Utc::now());
        state.mark_running("a");
        state.mark_completed("a", 1, StageOutputs::new(), Utc::now());
        state.mark_completed("reporter", 1, StageOutputs::new(), Utc::now());

        let errors = validate_invariants(&state);
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("dispatchCount 1"));
    }

    #[test]
    fn terminal_stage_settles_at_most_once() {
        let mut state = RunState::new("run-1", None, Utc::now());
        state.mark_running("reporter");
        state.mark_completed("reporter", 1, StageOutputs::new(), Utc::now());
        state.mark_running("reporter");
        state.completed.push(CompletedStage {
            stage: "reporter".to_string(),
            duration_ms: 1,
            timestamp: Utc::now(),
        });

        let errors = validate_invariants(&state);
        assert!(errors.iter().any(|e| e.contains("'reporter' completed more than once")));
    }

    #[test]
    fn reports_stage_in_both_lists_and_orphan_outputs() {
        let mut state = RunState::new("run-1", None, Utc::now());
        state.mark_failed(
            "a",
            FailureKind::ExecutionError,
            "boom".to_string(),
            Some(1),
            Utc::now(),
        );
        // Bypass the mutators to build an inconsistent document.
        state.completed.push(CompletedStage {
            stage: "a".to_string(),
            duration_ms: 1,
            timestamp: Utc::now(),
        });
        state.outputs.insert("ghost".to_string(), StageOutputs::new());
        state.pipeline_succeeded = true;

        let errors = validate_invariants(&state);
        assert!(errors.iter().any(|e| e.contains("both completed and failed")));
        assert!(errors.iter().any(|e| e.contains("'ghost'")));
        assert!(errors.iter().any(|e| e.contains("before endTime")));
        assert!(errors.iter().any(|e| e.contains("failed is not empty")));
    }
}
