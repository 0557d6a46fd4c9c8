//! Stage runner abstraction.
//!
//! The [`StageRunner`] trait decouples the execution engine from how a stage
//! actually runs. [`ProcessRunner`] spawns an external process; tests use
//! scripted runners that never spawn anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// A fully rendered stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: String,
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child only.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    /// Where captured stdout/stderr is written.
    pub log_path: PathBuf,
}

/// What the runner observed. Classification happens in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerReport {
    /// `None` when the process was killed or terminated by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Executes one rendered stage invocation.
///
/// `Err` means the runner could not run the stage at all (e.g. spawn
/// failure) and is classified as an internal error.
pub trait StageRunner: Sync {
    fn run(&self, invocation: &StageInvocation) -> Result<RunnerReport>;
}

/// Runs stages as local child processes.
pub struct ProcessRunner;

impl StageRunner for ProcessRunner {
    #[instrument(skip_all, fields(stage = %invocation.stage, timeout_secs = invocation.timeout.as_secs()))]
    fn run(&self, invocation: &StageInvocation) -> Result<RunnerReport> {
        info!(program = %invocation.program, args = ?invocation.args, "starting stage process");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let output = run_command_with_timeout(
            cmd,
            invocation.timeout,
            invocation.output_limit_bytes,
        )
        .with_context(|| format!("run stage {}", invocation.stage))?;

        if let Err(err) = write_stage_log(&invocation.log_path, &output) {
            warn!(err = %format!("{err:#}"), "failed to write stage log");
        }

        if output.timed_out {
            warn!(
                timeout_secs = invocation.timeout.as_secs(),
                "stage process timed out"
            );
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "stage process failed");
        } else {
            debug!("stage process completed successfully");
        }

        Ok(RunnerReport {
            exit_code: if output.timed_out {
                None
            } else {
                output.status.code()
            },
            timed_out: output.timed_out,
            stderr: output.stderr_lossy(),
            elapsed: output.elapsed,
        })
    }
}

fn write_stage_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create stage log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.truncated_notice());
    if output.timed_out {
        buf.push_str("\n[stage timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write stage log {}", path.display()))
}
