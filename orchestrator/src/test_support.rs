//! Test-only helpers: descriptor builders, registries and a scripted runner.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::descriptor::{OutputDecl, Registry, StageDescriptor};
use crate::core::prereq::ArtifactProbe;
use crate::io::stage_runner::{RunnerReport, StageInvocation, StageRunner};

/// Builder for a deterministic descriptor with no inputs, edges or outputs.
pub fn stage(name: &str) -> StageBuilder {
    StageBuilder {
        descriptor: StageDescriptor {
            name: name.to_string(),
            required_inputs: Vec::new(),
            optional_inputs: Vec::new(),
            entrypoint: format!("run-{name}"),
            args: Vec::new(),
            outputs: Vec::new(),
            on_success: Vec::new(),
            on_failure: None,
            timeout: Duration::from_secs(30),
        },
    }
}

pub struct StageBuilder {
    descriptor: StageDescriptor,
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl StageBuilder {
    pub fn requires(mut self, inputs: &[&str]) -> Self {
        self.descriptor.required_inputs = owned(inputs);
        self
    }

    pub fn optional(mut self, inputs: &[&str]) -> Self {
        self.descriptor.optional_inputs = owned(inputs);
        self
    }

    pub fn on_success(mut self, stages: &[&str]) -> Self {
        self.descriptor.on_success = owned(stages);
        self
    }

    pub fn on_failure(mut self, stages: &[&str]) -> Self {
        self.descriptor.on_failure = Some(owned(stages));
        self
    }

    pub fn output(mut self, name: &str, path: &str) -> Self {
        self.descriptor.outputs.push(OutputDecl {
            name: name.to_string(),
            path: path.to_string(),
        });
        self
    }

    pub fn entrypoint(mut self, entrypoint: &str) -> Self {
        self.descriptor.entrypoint = entrypoint.to_string();
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.descriptor.args = owned(args);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = timeout;
        self
    }

    pub fn build(self) -> StageDescriptor {
        self.descriptor
    }
}

/// Registry keyed by descriptor name.
pub fn registry(stages: Vec<StageDescriptor>) -> Registry {
    stages.into_iter().map(|s| (s.name.clone(), s)).collect()
}

/// Probe for an output directory that never contains anything.
pub struct NoArtifacts;

impl ArtifactProbe for NoArtifacts {
    fn has_artifact(&self, _input: &str) -> bool {
        false
    }
}

/// Scripted behavior of one stage.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStage {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stderr: String,
    /// Files created in `OUT_DIR` before reporting.
    pub writes: Vec<String>,
    pub delay: Duration,
    pub spawn_error: bool,
}

impl ScriptedStage {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.to_string(),
            ..Self::default()
        }
    }

    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }

    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::default()
        }
    }

    pub fn writes(mut self, files: &[&str]) -> Self {
        self.writes = owned(files);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Runner that never spawns processes. Unscripted stages succeed.
#[derive(Default)]
pub struct ScriptedRunner {
    scripts: BTreeMap<String, ScriptedStage>,
    invocations: Mutex<Vec<StageInvocation>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, stage: &str, scripted: ScriptedStage) -> Self {
        self.scripts.insert(stage.to_string(), scripted);
        self
    }

    /// Stage names in dispatch order.
    pub fn dispatched(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|inv| inv.stage)
            .collect()
    }

    pub fn invocations(&self) -> Vec<StageInvocation> {
        self.invocations
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Highest number of stages observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl StageRunner for ScriptedRunner {
    fn run(&self, invocation: &StageInvocation) -> Result<RunnerReport> {
        if let Ok(mut calls) = self.invocations.lock() {
            calls.push(invocation.clone());
        }
        let scripted = self
            .scripts
            .get(&invocation.stage)
            .cloned()
            .unwrap_or_else(ScriptedStage::success);
        if scripted.spawn_error {
            return Err(anyhow!("spawn command: no such file or directory"));
        }

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !scripted.delay.is_zero() {
            thread::sleep(scripted.delay);
        }
        let written = write_files(invocation, &scripted.writes);
        self.active.fetch_sub(1, Ordering::SeqCst);
        written?;

        Ok(RunnerReport {
            exit_code: if scripted.timed_out {
                None
            } else {
                scripted.exit_code
            },
            timed_out: scripted.timed_out,
            stderr: scripted.stderr,
            elapsed: scripted.delay,
        })
    }
}

fn write_files(invocation: &StageInvocation, files: &[String]) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    let out_dir = invocation
        .env
        .iter()
        .find(|(key, _)| key == "OUT_DIR")
        .map(|(_, value)| PathBuf::from(value))
        .ok_or_else(|| anyhow!("OUT_DIR missing from stage environment"))?;
    fs::create_dir_all(&out_dir)?;
    for file in files {
        fs::write(out_dir.join(file), &invocation.stage)?;
    }
    Ok(())
}
