//! Main dispatch loop for `orchestrator run`.
//!
//! Waves of stages are dispatched until the planner has nothing left or the
//! safety governor refuses a dispatch. The terminal stage then runs once and
//! the final state is written.

use std::fs;
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, info_span, warn};

use crate::context::RunContext;
use crate::core::descriptor::Registry;
use crate::core::governor::SafetyGovernor;
use crate::core::planner::Planner;
use crate::core::prereq::Resolver;
use crate::core::run_state::RunState;
use crate::core::types::{Outcome, PipelinePhase, StageOutcome, StopReason};
use crate::engine::{StageRun, execute_stage};
use crate::io::artifacts::OutDirProbe;
use crate::io::stage_runner::StageRunner;
use crate::store::StateStore;

/// Summary of a pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub succeeded: bool,
    /// Dispatches counted by the governor, earlier attempts of a resumed run
    /// included (terminal stage excluded).
    pub dispatched: u32,
    pub stop: StopReason,
    pub terminal_dispatched: bool,
    pub state: RunState,
}

/// Drive a run from `initial` until termination.
///
/// Stage failures are recorded and never abort the loop; `Err` is reserved
/// for orchestrator faults such as an unwritable state file.
pub fn run_pipeline<R: StageRunner>(
    ctx: &RunContext,
    registry: &Registry,
    runner: &R,
    store: &StateStore,
    initial: &[String],
) -> Result<PipelineOutcome> {
    let span = info_span!("run", run_id = %ctx.run_id);
    let _enter = span.enter();

    fs::create_dir_all(&ctx.out_dir)
        .with_context(|| format!("create output dir {}", ctx.out_dir.display()))?;

    let probe = OutDirProbe::new(&ctx.out_dir);
    let external = ctx.external_inputs();
    let resolver = Resolver::new(&probe, &external);
    let terminal = ctx.config.terminal_stage.as_str();
    let planner = Planner::new(registry, &resolver, terminal);
    let snapshot = store.snapshot();
    let mut governor = SafetyGovernor::for_state(ctx.config.max_dispatches, terminal, &snapshot);
    if governor.dispatched() > 0 {
        info!(already = governor.dispatched(), "resuming with earlier dispatches counted");
    }
    let mut wave = if snapshot.completed.is_empty() && snapshot.failed.is_empty() {
        planner.admit_initial(initial, &snapshot)
    } else {
        planner.resume_frontier(initial, &snapshot)
    };

    let mut phase = PipelinePhase::Active;
    info!(?phase, wave = ?wave, "pipeline started");
    let mut stop = StopReason::Drained;
    while !wave.is_empty() {
        let mut admitted = Vec::with_capacity(wave.len());
        for stage in &wave {
            if governor.admit(stage).is_err() {
                stop = StopReason::Exhausted;
                break;
            }
            admitted.push(stage.clone());
        }

        let finished = run_wave(ctx, registry, runner, store, &admitted)?;
        if stop == StopReason::Exhausted {
            break;
        }
        let state = store.snapshot();
        wave = planner.next_wave(finished.iter().map(|(s, o)| (s.as_str(), *o)), &state);
        info!(next = ?wave, "wave finished");
    }

    phase = PipelinePhase::Draining;
    info!(?phase, ?stop, dispatched = governor.dispatched(), "no runnable stages left");

    let mut terminal_dispatched = false;
    if governor.terminal_pending(&store.snapshot()) {
        dispatch(ctx, registry, runner, store, governor.terminal())?;
        terminal_dispatched = true;
    } else {
        info!(stage = %terminal, "terminal stage already settled");
    }

    let state = store.finish(stop)?;
    phase = PipelinePhase::Terminated;
    info!(
        ?phase,
        succeeded = state.pipeline_succeeded,
        completed = state.completed.len(),
        failed = state.failed.len(),
        "pipeline finished"
    );

    Ok(PipelineOutcome {
        run_id: ctx.run_id.clone(),
        succeeded: state.pipeline_succeeded,
        dispatched: governor.dispatched(),
        stop,
        terminal_dispatched,
        state,
    })
}

/// Run every stage of a wave, at most `wave_parallelism` at a time.
/// Results come back in wave order.
fn run_wave<R: StageRunner>(
    ctx: &RunContext,
    registry: &Registry,
    runner: &R,
    store: &StateStore,
    stages: &[String],
) -> Result<Vec<(String, Outcome)>> {
    let width = ctx.config.wave_parallelism.max(1);
    let mut finished = Vec::with_capacity(stages.len());
    if width == 1 || stages.len() == 1 {
        for stage in stages {
            finished.push(dispatch(ctx, registry, runner, store, stage)?);
        }
        return Ok(finished);
    }

    for chunk in stages.chunks(width) {
        thread::scope(|scope| -> Result<()> {
            let handles: Vec<_> = chunk
                .iter()
                .map(|stage| scope.spawn(move || dispatch(ctx, registry, runner, store, stage)))
                .collect();
            for handle in handles {
                let result = handle
                    .join()
                    .map_err(|_| anyhow!("stage worker thread panicked"))?;
                finished.push(result?);
            }
            Ok(())
        })?;
    }
    Ok(finished)
}

/// Mark, execute and record one stage.
fn dispatch<R: StageRunner>(
    ctx: &RunContext,
    registry: &Registry,
    runner: &R,
    store: &StateStore,
    stage: &str,
) -> Result<(String, Outcome)> {
    store.mark_running(stage)?;
    let run = match registry.get(stage) {
        Some(descriptor) => {
            let snapshot = store.snapshot();
            execute_stage(ctx, runner, descriptor, &snapshot)
        }
        None => {
            error!(stage = %stage, "stage is not registered");
            StageRun::internal(format!("stage '{stage}' is not registered"), 0)
        }
    };
    if let StageOutcome::Failure { kind, detail } = &run.result.outcome {
        warn!(stage = %stage, kind = %kind, detail = %detail, "stage recorded as failed");
    }
    store.record(stage, &run)?;
    Ok((stage.to_string(), run.result.outcome.edge()))
}
