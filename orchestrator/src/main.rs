//! Pipeline orchestrator CLI.
//!
//! Runs a goal's stages as external processes, deciding after each stage what
//! runs next, and records the run in `<out_dir>/state.json`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use orchestrator::core::descriptor::StageDescriptor;
use orchestrator::exit_codes;
use orchestrator::io::config::load_config;
use orchestrator::io::registry::load_registry;
use orchestrator::io::run_state::load_run_state;
use orchestrator::io::stage_runner::ProcessRunner;
use orchestrator::launch::{LaunchOutcome, RunRequest, launch, parse_input};
use orchestrator::logging;

#[derive(Parser, Debug)]
#[command(
    name = "orchestrator",
    version,
    about = "Runtime-decided pipeline orchestrator for external analysis stages"
)]
struct Cli {
    /// Debug-level tracing on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a goal until no stage is runnable, then the terminal stage.
    Run {
        #[arg(long)]
        goal: String,
        #[arg(long)]
        run_id: String,
        /// Defaults to data/outputs/<run-id>.
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Initial stage; repeat to start several. Overrides the goal's stages.
        #[arg(long = "stage")]
        stages: Vec<String>,
        /// Explicit input as name=value; repeatable.
        #[arg(long = "input", value_parser = input_arg)]
        inputs: Vec<(String, String)>,
        #[arg(long, default_value = "orchestrator.toml")]
        config: PathBuf,
        #[arg(long)]
        stages_dir: Option<PathBuf>,
        /// Continue from an existing state.json for the same run id.
        #[arg(long)]
        resume: bool,
        /// Load the registry and check the goal's inputs; dispatch nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// List registered stages.
    Stages {
        #[arg(long, default_value = "orchestrator.toml")]
        config: PathBuf,
        #[arg(long)]
        stages_dir: Option<PathBuf>,
    },
    /// Check a state.json against the schema and run-state invariants.
    CheckState { path: PathBuf },
}

fn input_arg(raw: &str) -> Result<(String, String), String> {
    parse_input(raw).map_err(|err| err.to_string())
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            goal,
            run_id,
            out_dir,
            stages,
            inputs,
            config,
            stages_dir,
            resume,
            dry_run,
        } => {
            let request = RunRequest {
                goal,
                run_id,
                out_dir,
                stages,
                inputs: inputs.into_iter().collect(),
                config_path: config,
                stages_dir,
                resume,
                dry_run,
            };
            cmd_run(&request)
        }
        Command::Stages { config, stages_dir } => cmd_stages(config, stages_dir),
        Command::CheckState { path } => cmd_check_state(path),
    }
}

fn cmd_run(request: &RunRequest) -> Result<i32> {
    match launch(request, &ProcessRunner)? {
        LaunchOutcome::DryRun { prepared } => {
            println!(
                "goal '{}' is ready: {} stages registered, initial stages: {}",
                prepared.plan.goal,
                prepared.registry.len(),
                prepared.plan.initial_stages.join(", ")
            );
            Ok(exit_codes::OK)
        }
        LaunchOutcome::Finished { pipeline, summary } => {
            println!("{summary}");
            if pipeline.succeeded {
                Ok(exit_codes::OK)
            } else {
                Ok(exit_codes::FAILED)
            }
        }
    }
}

fn cmd_stages(config: PathBuf, stages_dir: Option<PathBuf>) -> Result<i32> {
    let config = load_config(&config)?;
    let dir = stages_dir.unwrap_or_else(|| config.stages_dir.clone());
    let load = load_registry(&dir, &config.descriptor_defaults())?;
    for descriptor in load.stages.values() {
        println!("{}", describe_stage(descriptor));
    }
    for skipped in &load.skipped {
        eprintln!("skipped {skipped}");
    }
    Ok(exit_codes::OK)
}

fn cmd_check_state(path: PathBuf) -> Result<i32> {
    let state = load_run_state(&path)?;
    println!(
        "{}: ok (run {}, {} completed, {} failed)",
        path.display(),
        state.run_id,
        state.completed.len(),
        state.failed.len()
    );
    Ok(exit_codes::OK)
}

fn describe_stage(stage: &StageDescriptor) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "-".to_string()
        } else {
            items.join(",")
        }
    };
    let on_failure = match &stage.on_failure {
        Some(stages) => list(stages),
        None => "(terminal)".to_string(),
    };
    format!(
        "{}\trequires={}\ton_success={}\ton_failure={}\ttimeout={}s",
        stage.name,
        list(&stage.required_inputs),
        list(&stage.on_success),
        on_failure,
        stage.timeout.as_secs()
    )
}
