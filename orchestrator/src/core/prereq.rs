//! Prerequisite resolution: is every required input of a stage available?
//!
//! A required input is satisfied by, in order:
//! 1. an output of that name recorded under a completed stage,
//! 2. a conventionally named file in the run's output directory,
//! 3. membership in the set of externally supplied inputs.
//!
//! Resolution never mutates anything and may be called any number of times.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::core::descriptor::StageDescriptor;
use crate::core::run_state::RunState;

/// Read-only view of files present in the output directory.
pub trait ArtifactProbe {
    /// Whether a file matching the conventional patterns for `input` exists.
    fn has_artifact(&self, input: &str) -> bool;
}

/// Result of checking a stage's prerequisites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Runnable,
    /// `PrerequisiteUnmet`: the first required input that is not available.
    Unmet { missing: String },
}

/// How a single required input was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    RecordedOutput,
    Artifact,
    External,
}

/// Prerequisite resolver bound to one run's external inputs and output directory.
pub struct Resolver<'a, P: ArtifactProbe> {
    probe: &'a P,
    external: &'a BTreeSet<String>,
}

impl<'a, P: ArtifactProbe> Resolver<'a, P> {
    pub fn new(probe: &'a P, external: &'a BTreeSet<String>) -> Self {
        Self { probe, external }
    }

    pub fn source_of(&self, input: &str, state: &RunState) -> Option<InputSource> {
        if state.has_recorded_output(input) {
            Some(InputSource::RecordedOutput)
        } else if self.probe.has_artifact(input) {
            Some(InputSource::Artifact)
        } else if self.external.contains(input) {
            Some(InputSource::External)
        } else {
            None
        }
    }

    pub fn readiness(&self, stage: &StageDescriptor, state: &RunState) -> Readiness {
        for input in &stage.required_inputs {
            match self.source_of(input, state) {
                Some(source) => {
                    debug!(stage = %stage.name, input = %input, ?source, "input available");
                }
                None => {
                    info!(stage = %stage.name, input = %input, "missing required input");
                    return Readiness::Unmet {
                        missing: input.clone(),
                    };
                }
            }
        }
        Readiness::Runnable
    }

    pub fn is_runnable(&self, stage: &StageDescriptor, state: &RunState) -> bool {
        self.readiness(stage, state) == Readiness::Runnable
    }
}

/// Conventional file-name patterns for an input, checked against names in the
/// output directory. The recognised shapes (`<name>.*`, `<name>.json`,
/// `<name>.geojson`, `<name>.csv`) are all covered by `*<name>*`.
pub fn matches_input_pattern(file_name: &str, input: &str) -> bool {
    !input.is_empty() && file_name.contains(input)
}
