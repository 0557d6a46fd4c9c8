//! Stage registry: load YAML stage descriptors from a directory.
//!
//! Descriptor files have drifted over time. `inputs.required` may be a list of
//! names, a list of single-key `{name: description}` maps, or a mapping;
//! `next_agents` may be a mapping with `on_success`/`on_failure` or a legacy
//! flat list of success edges. All of them normalize to [`StageDescriptor`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::core::descriptor::{OutputDecl, Registry, StageDescriptor};

/// A descriptor file that was skipped during loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Values applied to descriptors that leave a field out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDefaults {
    pub timeout: Duration,
    /// Entrypoint template; `${STAGE}` becomes the stage name.
    pub entrypoint: String,
}

impl DescriptorDefaults {
    fn entrypoint_for(&self, stage: &str) -> String {
        self.entrypoint.replace(STAGE_PLACEHOLDER, stage)
    }
}

const STAGE_PLACEHOLDER: &str = "${STAGE}";

/// Loaded registry plus the files that failed validation.
#[derive(Debug, Clone, Default)]
pub struct RegistryLoad {
    pub stages: Registry,
    pub skipped: Vec<ConfigError>,
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    inputs: Option<RawInputs>,
    #[serde(default)]
    cli: Option<RawCli>,
    #[serde(default)]
    outputs: Option<Vec<RawOutput>>,
    #[serde(default)]
    next_agents: Option<RawNext>,
    #[serde(default)]
    error_handling: Option<RawErrorHandling>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInputs {
    #[serde(default)]
    required: Option<RawInputSet>,
    #[serde(default)]
    optional: Option<RawInputSet>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInputSet {
    List(Vec<RawInputItem>),
    Map(Mapping),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInputItem {
    Name(String),
    Described(Mapping),
}

#[derive(Debug, Default, Deserialize)]
struct RawCli {
    #[serde(default)]
    entrypoint: Option<String>,
    #[serde(default)]
    args: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNext {
    Edges {
        #[serde(default)]
        on_success: Option<Vec<String>>,
        #[serde(default)]
        on_failure: Option<Vec<String>>,
    },
    Legacy(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct RawErrorHandling {
    #[serde(default)]
    timeout: Option<RawTimeout>,
}

/// Seconds as a YAML number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimeout {
    Seconds(f64),
    Text(String),
}

impl RawTimeout {
    fn to_duration(&self) -> std::result::Result<Duration, String> {
        let secs = match self {
            Self::Seconds(secs) => *secs,
            Self::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("timeout '{text}' is not a number"))?,
        };
        if secs.is_nan() || secs <= 0.0 {
            return Err(format!("timeout must be positive (got {secs})"));
        }
        Duration::try_from_secs_f64(secs).map_err(|err| format!("timeout {secs}: {err}"))
    }
}

/// Load every `*.yaml` / `*.yml` descriptor in `dir`, in sorted path order.
///
/// Invalid descriptors are skipped with a warning. A later file reusing a
/// name replaces the earlier one.
pub fn load_registry(dir: &Path, defaults: &DescriptorDefaults) -> Result<RegistryLoad> {
    if !dir.is_dir() {
        return Err(anyhow!("stages directory {} does not exist", dir.display()));
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read stages directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_descriptor_file(path))
        .collect();
    paths.sort();

    let mut load = RegistryLoad::default();
    for path in paths {
        let parsed = fs::read_to_string(&path)
            .map_err(|err| format!("read failed: {err}"))
            .and_then(|contents| parse_descriptor(&contents, defaults));
        match parsed {
            Ok(descriptor) => {
                debug!(stage = %descriptor.name, path = %path.display(), "loaded stage");
                let undeclared = descriptor.undeclared_inputs();
                if !undeclared.is_empty() {
                    warn!(
                        stage = %descriptor.name,
                        inputs = ?undeclared,
                        "command references inputs the descriptor does not declare"
                    );
                }
                if let Some(previous) = load.stages.insert(descriptor.name.clone(), descriptor) {
                    warn!(
                        stage = %previous.name,
                        path = %path.display(),
                        "duplicate stage name, later descriptor wins"
                    );
                }
            }
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "skipping stage descriptor");
                load.skipped.push(ConfigError { path, reason });
            }
        }
    }
    info!(
        stages = load.stages.len(),
        skipped = load.skipped.len(),
        "stage registry loaded"
    );
    Ok(load)
}

/// Parse and normalize one descriptor document.
pub fn parse_descriptor(
    contents: &str,
    defaults: &DescriptorDefaults,
) -> std::result::Result<StageDescriptor, String> {
    let raw: RawDescriptor =
        serde_yaml::from_str(contents).map_err(|err| format!("invalid descriptor: {err}"))?;

    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "missing name".to_string())?;

    let inputs = raw.inputs.unwrap_or_default();
    let required_inputs = normalize_inputs(inputs.required)?;
    let optional_inputs = normalize_inputs(inputs.optional)?;

    let cli = raw.cli.unwrap_or_default();
    let entrypoint = match cli.entrypoint {
        Some(e) if e.trim().is_empty() => {
            return Err(format!("stage '{name}' has an empty cli.entrypoint"));
        }
        Some(e) => e.trim().to_string(),
        None => defaults.entrypoint_for(&name),
    };
    let args = cli
        .args
        .iter()
        .map(scalar_to_string)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| format!("stage '{name}' cli.args: {err}"))?;

    let mut outputs = Vec::new();
    for output in raw.outputs.unwrap_or_default() {
        let (Some(out_name), Some(path)) = (output.name, output.path) else {
            return Err(format!("stage '{name}' has an output without name or path"));
        };
        if out_name.trim().is_empty() || path.trim().is_empty() {
            return Err(format!("stage '{name}' has an output with empty name or path"));
        }
        outputs.push(OutputDecl {
            name: out_name.trim().to_string(),
            path: path.trim().to_string(),
        });
    }

    let (on_success, on_failure) = match raw.next_agents {
        Some(RawNext::Edges {
            on_success,
            on_failure,
        }) => (on_success.unwrap_or_default(), on_failure),
        Some(RawNext::Legacy(list)) => (list, None),
        None => (Vec::new(), None),
    };

    let timeout = match raw.error_handling.and_then(|e| e.timeout) {
        Some(raw) => raw
            .to_duration()
            .map_err(|err| format!("stage '{name}': {err}"))?,
        None => defaults.timeout,
    };

    Ok(StageDescriptor {
        name,
        required_inputs,
        optional_inputs,
        entrypoint,
        args,
        outputs,
        on_success: trim_names(on_success),
        on_failure: on_failure.map(trim_names),
        timeout,
    })
}

fn normalize_inputs(set: Option<RawInputSet>) -> std::result::Result<Vec<String>, String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: String| {
        let name = name.trim().to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    };
    match set {
        None => {}
        Some(RawInputSet::Map(map)) => {
            for key in map.keys() {
                push(mapping_key(key)?);
            }
        }
        Some(RawInputSet::List(items)) => {
            for item in items {
                match item {
                    RawInputItem::Name(name) => push(name),
                    RawInputItem::Described(map) => {
                        for key in map.keys() {
                            push(mapping_key(key)?);
                        }
                    }
                }
            }
        }
    }
    Ok(names)
}

fn mapping_key(key: &Value) -> std::result::Result<String, String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        other => Err(format!("input name must be a string, got {other:?}")),
    }
}

fn scalar_to_string(value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected a scalar argument, got {other:?}")),
    }
}

fn trim_names(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

fn is_descriptor_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}
