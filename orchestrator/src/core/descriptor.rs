//! Normalized stage descriptor.
//!
//! Descriptor files come in several historical shapes; the registry folds all
//! of them into this one representation so nothing downstream branches on
//! the source schema.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::template::referenced_inputs;
use crate::core::types::Outcome;

/// A declared output of a stage (`outputs[]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDecl {
    pub name: String,
    /// Path template, may reference `${RUN_ID}` and `${OUT_DIR}`.
    pub path: String,
}

/// Static configuration for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: String,
    /// Required inputs in declaration order, deduplicated.
    pub required_inputs: Vec<String>,
    pub optional_inputs: Vec<String>,
    /// Entrypoint template, split into words at render time.
    pub entrypoint: String,
    pub args: Vec<String>,
    pub outputs: Vec<OutputDecl>,
    pub on_success: Vec<String>,
    /// `None` when the descriptor does not declare a failure edge.
    pub on_failure: Option<Vec<String>>,
    pub timeout: Duration,
}

impl StageDescriptor {
    /// Candidate stages for the given outcome. An undeclared failure edge
    /// routes to `terminal`.
    pub fn edges(&self, outcome: Outcome, terminal: &str) -> Vec<String> {
        match outcome {
            Outcome::Success => self.on_success.clone(),
            Outcome::Failure => self
                .on_failure
                .clone()
                .unwrap_or_else(|| vec![terminal.to_string()]),
        }
    }

    /// Inputs the command templates reference without declaring them as
    /// required or optional. They still resolve at run time.
    pub fn undeclared_inputs(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for template in std::iter::once(&self.entrypoint).chain(&self.args) {
            for name in referenced_inputs(template) {
                let declared = self.required_inputs.contains(&name)
                    || self.optional_inputs.contains(&name);
                if !declared && !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// Name-keyed stage map produced by the registry.
pub type Registry = BTreeMap<String, StageDescriptor>;
