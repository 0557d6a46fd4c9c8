//! Runtime-decided pipeline orchestrator for external analysis stages.
//!
//! Stages are external processes described by YAML descriptors. Which stage
//! runs next is decided at runtime from the outcome of the previous one and
//! from which inputs are actually available. The architecture keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (descriptors, templates,
//!   prerequisite resolution, planning, the safety governor, run-state model).
//! - **[`io`]**: Side-effecting operations (config and registry loading,
//!   process execution, state persistence, output inspection).
//!
//! Orchestration modules ([`engine`], [`store`], [`pipeline`], [`launch`])
//! combine the two to implement CLI commands.

pub mod context;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod goals;
pub mod io;
pub mod launch;
pub mod logging;
pub mod pipeline;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
