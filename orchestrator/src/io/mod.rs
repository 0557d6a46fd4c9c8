//! I/O helpers for orchestrator commands.

pub mod artifacts;
pub mod config;
pub mod process;
pub mod registry;
pub mod run_state;
pub mod stage_runner;
pub mod summary;
