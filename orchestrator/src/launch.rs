//! Orchestration for `orchestrator run`.
//!
//! Loads configuration and the stage registry, resolves the goal, opens the
//! state store (fresh or resumed), drives the pipeline and writes the
//! execution summary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::context::{RunContext, default_out_dir};
use crate::core::descriptor::Registry;
use crate::core::run_state::RunState;
use crate::goals::GoalPlan;
use crate::io::config::load_config;
use crate::io::registry::load_registry;
use crate::io::stage_runner::StageRunner;
use crate::io::summary::{build_summary, render_summary, write_summary};
use crate::pipeline::{PipelineOutcome, run_pipeline};
use crate::store::StateStore;

/// Parameters of `orchestrator run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub goal: String,
    pub run_id: String,
    pub out_dir: Option<PathBuf>,
    /// Initial stages overriding the goal's.
    pub stages: Vec<String>,
    pub inputs: BTreeMap<String, String>,
    pub config_path: PathBuf,
    pub stages_dir: Option<PathBuf>,
    pub resume: bool,
    pub dry_run: bool,
}

/// Everything resolved before the first dispatch.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub ctx: RunContext,
    pub registry: Registry,
    pub plan: GoalPlan,
}

#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    /// Nothing was dispatched.
    DryRun { prepared: Box<Prepared> },
    Finished {
        pipeline: Box<PipelineOutcome>,
        /// Rendered execution summary for stdout.
        summary: String,
    },
}

/// Validate a run id: `[A-Za-z0-9._-]`, non-empty.
pub fn validate_run_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("run id must not be empty"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("run id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    if id == "." || id == ".." {
        return Err(anyhow!("run id must not be '{id}'"));
    }
    Ok(())
}

/// Parse a `name=value` input flag.
pub fn parse_input(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("input '{raw}' must look like name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("input '{raw}' has an empty name"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Resolve configuration, registry and goal without touching the output directory.
pub fn prepare(request: &RunRequest) -> Result<Prepared> {
    validate_run_id(&request.run_id)?;
    let mut config = load_config(&request.config_path)
        .with_context(|| format!("load config {}", request.config_path.display()))?;
    if let Some(dir) = &request.stages_dir {
        config.stages_dir = dir.clone();
    }
    debug!(stages_dir = %config.stages_dir.display(), "loading stage registry");

    let load = load_registry(&config.stages_dir, &config.descriptor_defaults())?;
    for skipped in &load.skipped {
        warn!(error = %skipped, "stage descriptor skipped");
    }
    if !load.stages.contains_key(&config.terminal_stage) {
        return Err(anyhow!(
            "terminal stage '{}' is not defined in {}",
            config.terminal_stage,
            config.stages_dir.display()
        ));
    }

    let plan = GoalPlan::resolve(&config, &request.goal, &request.stages, &request.inputs)?;
    for stage in &plan.initial_stages {
        if !load.stages.contains_key(stage) {
            warn!(stage = %stage, "initial stage is not registered");
        }
    }

    let out_dir = request
        .out_dir
        .clone()
        .unwrap_or_else(|| default_out_dir(&request.run_id));
    let ctx = RunContext::new(
        &request.run_id,
        &request.goal,
        out_dir,
        request.inputs.clone(),
        config,
    );
    Ok(Prepared {
        ctx,
        registry: load.stages,
        plan,
    })
}

/// Run `orchestrator run` end to end with the given stage runner.
pub fn launch<R: StageRunner>(request: &RunRequest, runner: &R) -> Result<LaunchOutcome> {
    let prepared = prepare(request)?;
    if request.dry_run {
        info!(
            goal = %prepared.plan.goal,
            initial = ?prepared.plan.initial_stages,
            stages = prepared.registry.len(),
            "dry run, nothing dispatched"
        );
        return Ok(LaunchOutcome::DryRun {
            prepared: Box::new(prepared),
        });
    }

    let Prepared {
        ctx,
        registry,
        plan,
    } = prepared;
    let state_path = ctx.state_path();
    let store = if request.resume && state_path.exists() {
        StateStore::resume(&state_path, &ctx.run_id)?
    } else {
        if request.resume {
            info!(path = %state_path.display(), "no state to resume, starting fresh");
        } else if state_path.exists() {
            warn!(path = %state_path.display(), "overwriting state of a previous run");
        }
        StateStore::create(
            &state_path,
            RunState::new(&ctx.run_id, Some(ctx.goal.clone()), Utc::now()),
        )?
    };

    let pipeline = run_pipeline(&ctx, &registry, runner, &store, &plan.initial_stages)?;

    let summary = build_summary(
        &pipeline.state,
        &plan.goal,
        &ctx.out_dir,
        &plan.expected_outputs,
    )?;
    write_summary(&ctx.out_dir, &summary)?;
    let text = render_summary(&summary, &pipeline.state, store.path())?;

    Ok(LaunchOutcome::Finished {
        pipeline: Box::new(pipeline),
        summary: text,
    })
}
