//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded; for `run`, the pipeline succeeded.
pub const OK: i32 = 0;
/// The pipeline terminated with failed stages or hit the dispatch ceiling.
pub const FAILED: i32 = 1;
/// Invalid invocation, configuration, registry or state document.
pub const INVALID: i32 = 2;
