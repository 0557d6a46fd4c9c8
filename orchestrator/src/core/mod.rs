//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules are free of I/O side effects except through the
//! [`prereq::ArtifactProbe`] seam. They operate on in-memory data structures
//! and return deterministic outputs suitable for tests.

pub mod descriptor;
pub mod governor;
pub mod invariants;
pub mod planner;
pub mod prereq;
pub mod run_state;
pub mod template;
pub mod types;
