//! State store: the single writer of `state.json`.
//!
//! Every mutation happens under one lock and is followed by a full atomic
//! rewrite of the document before the lock is released, so concurrent wave
//! members never interleave partial updates.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};
use chrono::Utc;
use tracing::{debug, info};

use crate::core::run_state::RunState;
use crate::core::types::{StageOutcome, StopReason};
use crate::engine::StageRun;
use crate::io::run_state::{load_run_state, write_run_state};

pub struct StateStore {
    path: PathBuf,
    state: Mutex<RunState>,
}

impl StateStore {
    /// Start a fresh run and persist its initial document.
    pub fn create(path: impl Into<PathBuf>, state: RunState) -> Result<Self> {
        let store = Self {
            path: path.into(),
            state: Mutex::new(state),
        };
        store.update(|_| {})?;
        Ok(store)
    }

    /// Reload an interrupted run. Settled stages stay settled; anything that
    /// was running when the process died is dispatched again.
    pub fn resume(path: impl Into<PathBuf>, run_id: &str) -> Result<Self> {
        let path = path.into();
        let mut state = load_run_state(&path)?;
        if state.run_id != run_id {
            return Err(anyhow!(
                "state file {} belongs to run '{}', not '{}'",
                path.display(),
                state.run_id,
                run_id
            ));
        }
        info!(
            completed = state.completed.len(),
            failed = state.failed.len(),
            "resuming run"
        );
        state.reopen();
        Self::create(path, state)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current document.
    pub fn snapshot(&self) -> RunState {
        self.lock().clone()
    }

    pub fn mark_running(&self, stage: &str) -> Result<()> {
        debug!(stage = %stage, "dispatching");
        self.update(|state| state.mark_running(stage))
    }

    /// Move `stage` into `completed` or `failed` according to its run.
    pub fn record(&self, stage: &str, run: &StageRun) -> Result<()> {
        let now = Utc::now();
        self.update(|state| match &run.result.outcome {
            StageOutcome::Success => {
                state.mark_completed(stage, run.result.duration_ms, run.outputs.clone(), now);
            }
            StageOutcome::Failure { kind, detail } => {
                state.mark_failed(stage, *kind, detail.clone(), run.result.exit.code, now);
            }
        })
    }

    /// Close the run and return the final document.
    pub fn finish(&self, stop: StopReason) -> Result<RunState> {
        let mut guard = self.lock();
        guard.finish(stop, Utc::now());
        write_run_state(&self.path, &guard)?;
        Ok(guard.clone())
    }

    fn update<F: FnOnce(&mut RunState)>(&self, mutate: F) -> Result<()> {
        let mut guard = self.lock();
        mutate(&mut guard);
        write_run_state(&self.path, &guard)
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
