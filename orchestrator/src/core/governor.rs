//! Dispatch ceiling and terminal-stage guarantee.

use tracing::warn;

use crate::core::run_state::RunState;

/// Bounds total dispatches of a run and tracks the terminal stage.
#[derive(Debug, Clone)]
pub struct SafetyGovernor {
    ceiling: u32,
    dispatched: u32,
    terminal: String,
}

/// Returned when the ceiling refuses a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CeilingReached {
    pub dispatched: u32,
    pub ceiling: u32,
}

impl SafetyGovernor {
    pub fn new(ceiling: u32, terminal: impl Into<String>) -> Self {
        Self {
            ceiling,
            dispatched: 0,
            terminal: terminal.into(),
        }
    }

    /// Governor for a resumed run that already spent `already` dispatches.
    pub fn resumed(ceiling: u32, terminal: impl Into<String>, already: u32) -> Self {
        Self {
            dispatched: already,
            ..Self::new(ceiling, terminal)
        }
    }

    /// Governor seeded from a persisted run. A terminal dispatch recorded in
    /// `state` does not count against the ceiling.
    pub fn for_state(ceiling: u32, terminal: impl Into<String>, state: &RunState) -> Self {
        let terminal = terminal.into();
        let terminal_runs = u32::from(state.is_settled(&terminal));
        let already = state.dispatch_count.saturating_sub(terminal_runs);
        Self::resumed(ceiling, terminal, already)
    }

    /// Count one dispatch, or refuse it when the ceiling is already reached.
    pub fn admit(&mut self, stage: &str) -> Result<(), CeilingReached> {
        if self.dispatched >= self.ceiling {
            warn!(
                stage = %stage,
                dispatched = self.dispatched,
                ceiling = self.ceiling,
                "dispatch ceiling reached, stopping pipeline"
            );
            return Err(CeilingReached {
                dispatched: self.dispatched,
                ceiling: self.ceiling,
            });
        }
        self.dispatched += 1;
        Ok(())
    }

    pub fn dispatched(&self) -> u32 {
        self.dispatched
    }

    pub fn terminal(&self) -> &str {
        &self.terminal
    }

    /// The terminal stage still has to run.
    pub fn terminal_pending(&self, state: &RunState) -> bool {
        !state.is_settled(&self.terminal)
    }
}
