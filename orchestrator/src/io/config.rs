//! Orchestrator configuration stored in `orchestrator.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::registry::DescriptorDefaults;

/// Per-stage default values for `${input.<name>}` placeholders.
pub type DefaultInputs = BTreeMap<String, BTreeMap<String, String>>;

/// Orchestrator configuration (TOML).
///
/// Human-edited; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Directory holding one YAML descriptor per stage.
    pub stages_dir: PathBuf,

    /// Stage started when neither the goal nor the CLI names initial stages.
    pub entry_stage: String,

    /// Stage guaranteed to run exactly once at the end of every run.
    pub terminal_stage: String,

    /// Safety ceiling on total dispatches per run (terminal stage excluded).
    pub max_dispatches: u32,

    /// Timeout for descriptors that do not declare `error_handling.timeout`.
    pub default_timeout_secs: u64,

    /// Entrypoint for descriptors without `cli.entrypoint`; `${STAGE}` is
    /// replaced by the stage name.
    pub default_entrypoint: String,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// How many members of one wave may run at the same time.
    pub wave_parallelism: usize,

    /// Inputs supplied from outside the pipeline, always considered present.
    pub always_present_inputs: Vec<String>,

    /// Value used for an input placeholder with no explicit or default value.
    pub fallback_input: String,

    /// `stage -> input -> value template` for unattended runs.
    pub default_inputs: DefaultInputs,

    pub goals: BTreeMap<String, GoalConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GoalConfig {
    pub description: String,
    /// Empty means "use `entry_stage`".
    pub initial_stages: Vec<String>,
    /// Inputs that must be supplied (explicitly or as always-present) before a run starts.
    pub required_inputs: Vec<String>,
    /// File names or `*` patterns expected in the output directory afterwards.
    pub expected_outputs: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stages_dir: PathBuf::from(".claude/agents"),
            entry_stage: "geowiz".to_string(),
            terminal_stage: "reporter".to_string(),
            max_dispatches: 20,
            default_timeout_secs: 300,
            default_entrypoint: "python agents/${STAGE}_agent.py".to_string(),
            output_limit_bytes: 100_000,
            wave_parallelism: 1,
            always_present_inputs: vec!["shapefile".to_string(), "region".to_string()],
            fallback_input: "demo_input".to_string(),
            default_inputs: default_input_table(),
            goals: default_goals(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.entry_stage.trim().is_empty() {
            return Err(anyhow!("entry_stage must not be empty"));
        }
        if self.terminal_stage.trim().is_empty() {
            return Err(anyhow!("terminal_stage must not be empty"));
        }
        if self.max_dispatches == 0 {
            return Err(anyhow!("max_dispatches must be > 0"));
        }
        if self.default_timeout_secs == 0 {
            return Err(anyhow!("default_timeout_secs must be > 0"));
        }
        if self.default_entrypoint.trim().is_empty() {
            return Err(anyhow!("default_entrypoint must not be empty"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.wave_parallelism == 0 {
            return Err(anyhow!("wave_parallelism must be > 0"));
        }
        for (name, goal) in &self.goals {
            if goal.initial_stages.iter().any(|s| s.trim().is_empty()) {
                return Err(anyhow!("goal '{name}' has an empty initial stage name"));
            }
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn descriptor_defaults(&self) -> DescriptorDefaults {
        DescriptorDefaults {
            timeout: self.default_timeout(),
            entrypoint: self.default_entrypoint.clone(),
        }
    }

    /// Initial stages for `goal`: the goal's own list, else the entry stage.
    pub fn initial_stages(&self, goal: &str) -> Vec<String> {
        match self.goals.get(goal) {
            Some(cfg) if !cfg.initial_stages.is_empty() => cfg.initial_stages.clone(),
            _ => vec![self.entry_stage.clone()],
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn default_goals() -> BTreeMap<String, GoalConfig> {
    let goal = |description: &str, required: &[&str], expected: &[&str]| GoalConfig {
        description: description.to_string(),
        initial_stages: vec!["geowiz".to_string()],
        required_inputs: required.iter().map(|s| s.to_string()).collect(),
        expected_outputs: expected.iter().map(|s| s.to_string()).collect(),
    };
    BTreeMap::from([
        (
            "tract_eval".to_string(),
            goal(
                "Complete tract evaluation from geology to investment decision",
                &["shapefile", "region"],
                &["SHALE_YEAH_REPORT.md", "investment_decision.json"],
            ),
        ),
        (
            "geology_only".to_string(),
            goal(
                "Geological analysis and curve QC only",
                &[],
                &["geology_summary.md", "qc_report.md"],
            ),
        ),
        (
            "demo".to_string(),
            goal(
                "Demo pipeline with sample data",
                &[],
                &["SHALE_YEAH_REPORT.md"],
            ),
        ),
    ])
}

fn default_input_table() -> DefaultInputs {
    let table = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    };
    BTreeMap::from([
        (
            "geowiz".to_string(),
            table(&[
                ("shapefile", "data/samples/tract.shp.txt"),
                ("region", "Permian"),
                ("las_files", "data/samples/demo.las"),
            ]),
        ),
        (
            "curve-smith".to_string(),
            table(&[
                ("las_files", "data/samples/demo.las"),
                ("zones", "${OUT_DIR}/zones.geojson"),
            ]),
        ),
        (
            "drillcast".to_string(),
            table(&[("zones", "${OUT_DIR}/zones.geojson")]),
        ),
        (
            "titletracker".to_string(),
            table(&[("access_db", "data/samples/demo.accdb.txt")]),
        ),
        (
            "econobot".to_string(),
            table(&[
                ("drill_forecast", "${OUT_DIR}/drill_forecast.json"),
                ("ownership_data", "${OUT_DIR}/ownership.json"),
            ]),
        ),
        (
            "riskranger".to_string(),
            table(&[
                ("valuation_data", "${OUT_DIR}/valuation.json"),
                ("ownership_data", "${OUT_DIR}/ownership.json"),
            ]),
        ),
        (
            "the-core".to_string(),
            table(&[
                ("valuation_data", "${OUT_DIR}/valuation.json"),
                ("risk_assessment", "${OUT_DIR}/risk_score.json"),
                ("ownership_data", "${OUT_DIR}/ownership.json"),
            ]),
        ),
        (
            "notarybot".to_string(),
            table(&[(
                "investment_decision",
                "${OUT_DIR}/investment_decision.json",
            )]),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn serialized_default_loads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestrator.toml");
        let cfg = OrchestratorConfig::default();
        fs::write(&path, toml::to_string_pretty(&cfg).expect("serialize")).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestrator.toml");
        fs::write(&path, "max_dispatches = 5\nterminal_stage = \"summary\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_dispatches, 5);
        assert_eq!(cfg.terminal_stage, "summary");
        assert_eq!(cfg.entry_stage, "geowiz");
        assert_eq!(cfg.default_timeout_secs, 300);
    }

    #[test]
    fn rejects_zero_ceiling() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("orchestrator.toml");
        fs::write(&path, "max_dispatches = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_dispatches"));
    }

    #[test]
    fn initial_stages_fall_back_to_entry_stage() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.initial_stages("tract_eval"), vec!["geowiz"]);
        assert_eq!(cfg.initial_stages("unknown-goal"), vec!["geowiz"]);
    }
}
