//! Execution summary written after a run terminates.
//!
//! `execution_summary.json` is the machine-readable artifact; the text form
//! printed to stdout is rendered from `templates/summary.txt`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::run_state::RunState;
use crate::core::types::StopReason;
use crate::io::artifacts::{
    GeneratedFile, SUMMARY_FILE, list_generated_files, missing_expected_outputs,
};

const SUMMARY_TEMPLATE: &str = include_str!("templates/summary.txt");
/// Longest failure detail shown in the text summary.
const DETAIL_PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub goal: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub output_directory: String,
    pub generated_files: Vec<GeneratedFile>,
    pub missing_outputs: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FailedView {
    stage: String,
    kind: String,
    detail: String,
}

/// Build the summary from the final run state and the output directory.
pub fn build_summary(
    state: &RunState,
    goal: &str,
    out_dir: &Path,
    expected_outputs: &[String],
) -> Result<ExecutionSummary> {
    let generated_files = list_generated_files(out_dir)?;
    let missing_outputs = missing_expected_outputs(&generated_files, expected_outputs);
    if !missing_outputs.is_empty() {
        warn!(missing = ?missing_outputs, "expected outputs missing");
    }
    Ok(ExecutionSummary {
        goal: goal.to_string(),
        run_id: state.run_id.clone(),
        timestamp: Utc::now(),
        success: state.pipeline_succeeded,
        output_directory: out_dir.display().to_string(),
        generated_files,
        missing_outputs,
    })
}

/// Write `execution_summary.json` into `out_dir`.
pub fn write_summary(out_dir: &Path, summary: &ExecutionSummary) -> Result<PathBuf> {
    let path = out_dir.join(SUMMARY_FILE);
    let mut buf = serde_json::to_string_pretty(summary).context("serialize summary")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "execution summary saved");
    Ok(path)
}

/// Render the human-readable summary.
pub fn render_summary(
    summary: &ExecutionSummary,
    state: &RunState,
    state_path: &Path,
) -> Result<String> {
    let failed: Vec<FailedView> = state
        .failed
        .iter()
        .map(|f| FailedView {
            stage: f.stage.clone(),
            kind: f.error_kind.to_string(),
            detail: preview(&f.error_detail),
        })
        .collect();
    let env = Environment::new();
    let rendered = env
        .render_str(
            SUMMARY_TEMPLATE,
            context! {
                goal => &summary.goal,
                run_id => &summary.run_id,
                success => summary.success,
                output_directory => &summary.output_directory,
                file_count => summary.generated_files.len(),
                completed => state.completed_names(),
                failed => failed,
                exhausted => state.stop_reason == Some(StopReason::Exhausted),
                missing_outputs => &summary.missing_outputs,
                state_path => state_path.display().to_string(),
            },
        )
        .context("render execution summary")?;
    Ok(rendered)
}

fn preview(detail: &str) -> String {
    let line = detail.lines().next().unwrap_or("").trim();
    if line.chars().count() <= DETAIL_PREVIEW_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(DETAIL_PREVIEW_CHARS).collect();
    format!("{cut}...")
}
