//! Execution engine: render one stage's command, run it, classify the result.
//!
//! Classified failures are data ([`StageOutcome::Failure`]), never `Err`.
//! Nothing here touches the run state; recording is the state store's job.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, instrument, warn};

use crate::context::RunContext;
use crate::core::descriptor::StageDescriptor;
use crate::core::run_state::{RunState, StageOutputs};
use crate::core::template::render;
use crate::core::types::{ExecutionResult, ExitInfo, FailureKind, StageOutcome};
use crate::io::artifacts::collect_declared_outputs;
use crate::io::stage_runner::{RunnerReport, StageInvocation, StageRunner};

/// Result of one dispatch plus the outputs recorded on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRun {
    pub result: ExecutionResult,
    pub outputs: StageOutputs,
}

impl StageRun {
    pub fn internal(detail: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            result: ExecutionResult::internal(detail, duration_ms),
            outputs: StageOutputs::new(),
        }
    }
}

/// Render the stage's entrypoint and arguments against the current state.
pub fn build_invocation(
    ctx: &RunContext,
    stage: &StageDescriptor,
    state: &RunState,
) -> Result<StageInvocation> {
    let vars = ctx.template_vars();
    let input = |name: &str| ctx.input_value(&stage.name, name, state);

    // Split before substituting so values are never re-tokenised.
    let mut words = Vec::new();
    for word in shell_words::split(&stage.entrypoint)
        .with_context(|| format!("split entrypoint '{}'", stage.entrypoint))?
    {
        let rendered = render(&word, vars, input)
            .with_context(|| format!("render entrypoint of {}", stage.name))?;
        words.push(rendered);
    }
    if words.is_empty() {
        return Err(anyhow!("stage {} has an empty entrypoint", stage.name));
    }
    let program = words.remove(0);
    for arg in &stage.args {
        let rendered = render(arg, vars, input)
            .with_context(|| format!("render argument of {}", stage.name))?;
        words.push(rendered);
    }

    Ok(StageInvocation {
        stage: stage.name.clone(),
        program,
        args: words,
        env: ctx.child_env(),
        timeout: stage.timeout,
        output_limit_bytes: ctx.config.output_limit_bytes,
        log_path: ctx.log_path(&stage.name),
    })
}

/// Run `stage` to completion and classify what happened.
#[instrument(skip_all, fields(stage = %stage.name))]
pub fn execute_stage<R: StageRunner + ?Sized>(
    ctx: &RunContext,
    runner: &R,
    stage: &StageDescriptor,
    state: &RunState,
) -> StageRun {
    let started = Instant::now();
    let invocation = match build_invocation(ctx, stage, state) {
        Ok(invocation) => invocation,
        Err(err) => {
            let detail = format!("{err:#}");
            error!(err = %detail, "could not build stage command");
            return StageRun::internal(detail, millis(started.elapsed()));
        }
    };

    let report = match runner.run(&invocation) {
        Ok(report) => report,
        Err(err) => {
            let detail = format!("{err:#}");
            error!(err = %detail, "stage could not be run");
            return StageRun::internal(detail, millis(started.elapsed()));
        }
    };

    let mut result = classify(&report, stage.timeout);
    let mut outputs = StageOutputs::new();
    if result.outcome.is_success() {
        match collect_declared_outputs(stage, ctx.template_vars(), &ctx.out_dir) {
            Ok(collected) => outputs = collected,
            Err(err) => {
                result.outcome = StageOutcome::Failure {
                    kind: FailureKind::InternalError,
                    detail: format!("{err:#}"),
                };
            }
        }
    }

    match &result.outcome {
        StageOutcome::Success => {
            info!(duration_ms = result.duration_ms, outputs = outputs.len(), "stage completed");
        }
        StageOutcome::Failure { kind, .. } => {
            warn!(duration_ms = result.duration_ms, kind = %kind, "stage failed");
        }
    }
    StageRun { result, outputs }
}

/// Map a runner report onto an outcome.
pub fn classify(report: &RunnerReport, timeout: Duration) -> ExecutionResult {
    let duration_ms = millis(report.elapsed);
    let exit = ExitInfo {
        code: report.exit_code,
        timed_out: report.timed_out,
    };
    let outcome = if report.timed_out {
        StageOutcome::Failure {
            kind: FailureKind::ExecutionTimeout,
            detail: format!("killed after exceeding {}s timeout", timeout.as_secs_f64()),
        }
    } else {
        match report.exit_code {
            Some(0) => StageOutcome::Success,
            code => {
                let detail = if report.stderr.is_empty() {
                    match code {
                        Some(code) => format!("exited with code {code}"),
                        None => "terminated by signal".to_string(),
                    }
                } else {
                    report.stderr.clone()
                };
                StageOutcome::Failure {
                    kind: FailureKind::ExecutionError,
                    detail,
                }
            }
        }
    };
    ExecutionResult {
        outcome,
        duration_ms,
        exit,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::io::config::OrchestratorConfig;
    use crate::test_support::{ScriptedRunner, ScriptedStage, stage};

    fn ctx(out_dir: &std::path::Path) -> RunContext {
        let mut config = OrchestratorConfig::default();
        config.default_inputs.clear();
        RunContext::new(
            "run-5",
            "demo",
            out_dir,
            BTreeMap::from([("region".to_string(), "Permian Basin".to_string())]),
            config,
        )
    }

    fn report(exit_code: Option<i32>, timed_out: bool, stderr: &str) -> RunnerReport {
        RunnerReport {
            exit_code,
            timed_out,
            stderr: stderr.to_string(),
            elapsed: Duration::from_millis(42),
        }
    }

    #[test]
    fn renders_entrypoint_words_and_args() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = ctx(temp.path());
        let descriptor = stage("geowiz")
            .entrypoint("python -m 'tools.geowiz agent' --run ${RUN_ID}")
            .args(&["--region", "${input.region}", "--out", "${OUT_DIR}/g.md"])
            .build();
        let state = RunState::new("run-5", None, Utc::now());

        let inv = build_invocation(&ctx, &descriptor, &state).expect("invocation");
        assert_eq!(inv.program, "python");
        let out = format!("{}/g.md", temp.path().display());
        assert_eq!(
            inv.args,
            vec![
                "-m",
                "tools.geowiz agent",
                "--run",
                "run-5",
                "--region",
                "Permian Basin",
                "--out",
                out.as_str(),
            ]
        );
        assert_eq!(inv.log_path, temp.path().join("logs").join("geowiz.log"));
        assert!(inv.env.contains(&("REGION".to_string(), "Permian Basin".to_string())));
    }

    #[test]
    fn substituted_entrypoint_values_stay_single_words() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out_dir = temp.path().join("my runs");
        let mut ctx = ctx(&out_dir);
        ctx.explicit_inputs.insert("owner".to_string(), "O'Brien".to_string());
        let descriptor = stage("titletracker")
            .entrypoint("python ${OUT_DIR}/agent.py --owner ${input.owner}")
            .build();
        let state = RunState::new("run-5", None, Utc::now());

        let inv = build_invocation(&ctx, &descriptor, &state).expect("invocation");
        assert_eq!(inv.program, "python");
        let script = format!("{}/agent.py", out_dir.display());
        assert_eq!(inv.args, vec![script.as_str(), "--owner", "O'Brien"]);
    }

    #[test]
    fn classification_covers_every_exit_shape() {
        let timeout = Duration::from_secs(1);
        assert_eq!(
            classify(&report(Some(0), false, ""), timeout).outcome,
            StageOutcome::Success
        );
        assert_eq!(
            classify(&report(Some(2), false, "bad input"), timeout).outcome,
            StageOutcome::Failure {
                kind: FailureKind::ExecutionError,
                detail: "bad input".to_string()
            }
        );
        assert_eq!(
            classify(&report(Some(3), false, ""), timeout).outcome,
            StageOutcome::Failure {
                kind: FailureKind::ExecutionError,
                detail: "exited with code 3".to_string()
            }
        );
        let timed_out = classify(&report(None, true, ""), timeout);
        assert!(matches!(
            timed_out.outcome,
            StageOutcome::Failure {
                kind: FailureKind::ExecutionTimeout,
                ..
            }
        ));
        assert!(timed_out.exit.timed_out);
        assert_eq!(timed_out.duration_ms, 42);
    }

    #[test]
    fn malformed_template_is_internal_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = ctx(temp.path());
        let runner = ScriptedRunner::new();
        let descriptor = stage("x").args(&["${NOPE}"]).build();
        let state = RunState::new("run-5", None, Utc::now());

        let run = execute_stage(&ctx, &runner, &descriptor, &state);
        assert!(matches!(
            run.result.outcome,
            StageOutcome::Failure {
                kind: FailureKind::InternalError,
                ..
            }
        ));
        assert!(runner.dispatched().is_empty());
    }

    #[test]
    fn runner_error_is_internal_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = ctx(temp.path());
        let runner = ScriptedRunner::new().script("x", ScriptedStage::spawn_error());
        let descriptor = stage("x").build();
        let state = RunState::new("run-5", None, Utc::now());

        let run = execute_stage(&ctx, &runner, &descriptor, &state);
        match run.result.outcome {
            StageOutcome::Failure { kind, detail } => {
                assert_eq!(kind, FailureKind::InternalError);
                assert!(detail.contains("spawn"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn success_records_existing_outputs_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ctx = ctx(temp.path());
        let runner = ScriptedRunner::new().script(
            "geowiz",
            ScriptedStage::success().writes(&["zones.geojson"]),
        );
        let descriptor = stage("geowiz")
            .output("zones", "${OUT_DIR}/zones.geojson")
            .output("summary", "${OUT_DIR}/geology_summary.md")
            .build();
        let state = RunState::new("run-5", None, Utc::now());

        let run = execute_stage(&ctx, &runner, &descriptor, &state);
        assert_eq!(run.result.outcome, StageOutcome::Success);
        assert_eq!(run.outputs.len(), 1);
        assert!(run.outputs["zones"].ends_with("zones.geojson"));
        assert!(temp.path().join("zones.geojson").exists());
        assert!(!temp.path().join("geology_summary.md").exists());
    }
}
