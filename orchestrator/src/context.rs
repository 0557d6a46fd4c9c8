//! Per-run context threaded through the planner, engine and store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::run_state::RunState;
use crate::core::template::{TemplateVars, render_path};
use crate::io::artifacts::STATE_FILE;
use crate::io::config::OrchestratorConfig;

const LOGS_DIR: &str = "logs";

/// `data/outputs/<run_id>`, relative to the working directory.
pub fn default_out_dir(run_id: &str) -> PathBuf {
    Path::new("data").join("outputs").join(run_id)
}

/// Everything a single run needs to know about itself.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub goal: String,
    pub out_dir: PathBuf,
    out_dir_str: String,
    /// `name -> value` supplied on the command line.
    pub explicit_inputs: BTreeMap<String, String>,
    pub config: OrchestratorConfig,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        goal: impl Into<String>,
        out_dir: impl Into<PathBuf>,
        explicit_inputs: BTreeMap<String, String>,
        config: OrchestratorConfig,
    ) -> Self {
        let out_dir = out_dir.into();
        let out_dir_str = out_dir.display().to_string();
        Self {
            run_id: run_id.into(),
            goal: goal.into(),
            out_dir,
            out_dir_str,
            explicit_inputs,
            config,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.out_dir.join(STATE_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.out_dir.join(LOGS_DIR)
    }

    pub fn log_path(&self, stage: &str) -> PathBuf {
        self.logs_dir().join(format!("{stage}.log"))
    }

    pub fn template_vars(&self) -> TemplateVars<'_> {
        TemplateVars {
            run_id: &self.run_id,
            out_dir: &self.out_dir_str,
        }
    }

    /// Inputs the resolver treats as present without any artifact: the
    /// configured always-present inputs plus every explicit input.
    pub fn external_inputs(&self) -> BTreeSet<String> {
        self.config
            .always_present_inputs
            .iter()
            .cloned()
            .chain(self.explicit_inputs.keys().cloned())
            .collect()
    }

    /// Value substituted for `${input.<name>}` in `stage`'s command.
    ///
    /// Order: explicit input, output recorded by a completed stage, the
    /// per-stage default table, then the generic fallback.
    pub fn input_value(&self, stage: &str, input: &str, state: &RunState) -> String {
        if let Some(value) = self.explicit_inputs.get(input) {
            return value.clone();
        }
        if let Some(path) = state.recorded_output(input) {
            return path.to_string();
        }
        if let Some(template) = self
            .config
            .default_inputs
            .get(stage)
            .and_then(|inputs| inputs.get(input))
        {
            match render_path(template, self.template_vars()) {
                Ok(value) => return value,
                Err(err) => {
                    warn!(stage = %stage, input = %input, err = %format!("{err:#}"), "bad default input template");
                }
            }
        }
        debug!(stage = %stage, input = %input, "using fallback input value");
        self.config.fallback_input.clone()
    }

    /// Environment handed to every stage process.
    pub fn child_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("RUN_ID".to_string(), self.run_id.clone()),
            ("OUT_DIR".to_string(), self.out_dir_str.clone()),
        ];
        env.extend(
            self.explicit_inputs
                .iter()
                .map(|(name, value)| (env_key(name), value.clone())),
        );
        env
    }
}

fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
