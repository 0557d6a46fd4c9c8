//! Run state storage (`<out_dir>/state.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::core::run_state::RunState;

pub const RUN_STATE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/run_state/v1.schema.json"
));

/// Load run state from disk, checking schema and invariants.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state = parse_run_state(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(
        run_id = %state.run_id,
        completed = state.completed.len(),
        failed = state.failed.len(),
        "run state loaded"
    );
    Ok(state)
}

/// Parse a run-state document: JSON Schema conformance, then semantic invariants.
pub fn parse_run_state(contents: &str) -> Result<RunState> {
    let value: Value = serde_json::from_str(contents).context("parse run state json")?;
    validate_schema(&value)?;
    let state: RunState =
        serde_json::from_value(value).context("deserialize run state document")?;
    let errors = validate_invariants(&state);
    if !errors.is_empty() {
        return Err(anyhow!(
            "run state invariants failed:\n- {}",
            errors.join("\n- ")
        ));
    }
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(
        path = %path.display(),
        run_id = %state.run_id,
        current = ?state.current_stage,
        "writing run state"
    );
    let mut buf = serde_json::to_string_pretty(state).context("serialize run state")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(instance: &Value) -> Result<()> {
    let schema: Value =
        serde_json::from_str(RUN_STATE_SCHEMA).context("parse run state schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile run state schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "run state schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_state::StageOutputs;
    use crate::core::types::{FailureKind, StopReason};
    use chrono::Utc;

    /// Writes a fully populated RunState, reads it back, and asserts equality.
    #[test]
    fn run_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");

        let mut state = RunState::new("run-123", Some("tract_eval".to_string()), Utc::now());
        state.mark_running("geowiz");
        let mut outputs = StageOutputs::new();
        outputs.insert("zones".to_string(), "/out/zones.geojson".to_string());
        state.mark_completed("geowiz", 1200, outputs, Utc::now());
        state.mark_running("drillcast");
        state.mark_failed(
            "drillcast",
            FailureKind::ExecutionTimeout,
            "timed out after 1s".to_string(),
            None,
            Utc::now(),
        );
        state.finish(StopReason::Drained, Utc::now());

        write_run_state(&path, &state).expect("write");
        let loaded = load_run_state(&path).expect("load");
        assert_eq!(loaded, state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn in_flight_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("state.json");

        let mut state = RunState::new("run-1", None, Utc::now());
        state.mark_running("geowiz");

        write_run_state(&path, &state).expect("write");
        let loaded = load_run_state(&path).expect("load");
        assert_eq!(loaded, state);
        assert_eq!(loaded.current_stage.as_deref(), Some("geowiz"));
    }

    #[test]
    fn rejects_unknown_error_kind() {
        let doc = r#"{
  "runId": "r",
  "startTime": "2024-01-01T00:00:00Z",
  "endTime": null,
  "currentStage": null,
  "completed": [],
  "failed": [{"stage": "a", "errorKind": "Oops", "errorDetail": "", "timestamp": "2024-01-01T00:00:01Z"}],
  "outputs": {},
  "pipelineSucceeded": false
}"#;
        let err = parse_run_state(doc).unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn rejects_invariant_violations() {
        let doc = r#"{
  "runId": "r",
  "startTime": "2024-01-01T00:00:00Z",
  "endTime": null,
  "currentStage": null,
  "completed": [],
  "failed": [],
  "outputs": {"ghost": {"x": "/tmp/x"}},
  "pipelineSucceeded": false
}"#;
        let err = parse_run_state(doc).unwrap_err();
        assert!(format!("{err:#}").contains("not completed"));
    }
}
