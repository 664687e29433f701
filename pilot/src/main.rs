//! Plan → execute → replan driver for a mobile device under test.
//!
//! `pilot run` grounds a planner on the current screen, executes the plan one
//! step at a time through a tool-using agent and lets a replanner revise the
//! plan after every step until the goal is reported done, the replan budget
//! runs out, or the run is cancelled.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use pilot::cancel::{CancelToken, cancel_on_ctrl_c};
use pilot::core::budget::ReplanBudget;
use pilot::core::error::{PlanningFailed, StepCeilingExceeded};
use pilot::core::types::{History, StepRecord, TerminationReason};
use pilot::exit_codes;
use pilot::io::config::{DEFAULT_CONFIG_PATH, PilotConfig, load_config, write_config};
use pilot::io::executor::CodexExec;
use pilot::io::run_log::{RunLog, new_run_id};
use pilot::io::screen::{CommandScreen, ScreenStateProvider};
use pilot::io::setup::run_setup;
use pilot::logging;
use pilot::orchestrator::{AbortKind, AgentSettings, Orchestrator, RunConfig};

#[derive(Parser)]
#[command(
    name = "pilot",
    version,
    about = "Plan, execute and replan UI automation against a device"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `pilot.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Run the loop for one goal and print the final response.
    Run(RunArgs),
    /// Capture the current screen once.
    Capture {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Write the normalized JPEG here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Goal text.
    #[arg(long, conflicts_with = "goal_file", required_unless_present = "goal_file")]
    goal: Option<String>,
    /// Read the goal from a file.
    #[arg(long)]
    goal_file: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Override `max_replans`.
    #[arg(long, conflicts_with = "unbounded")]
    max_replans: Option<u32>,
    /// Allow unlimited replans.
    #[arg(long)]
    unbounded: bool,
    /// Override `step_ceiling`.
    #[arg(long)]
    step_ceiling: Option<u32>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run(args) => cmd_run(&args),
        Command::Capture { config, out } => cmd_capture(&config, out.as_deref()),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<StepCeilingExceeded>().is_some() {
        exit_codes::STEP_CEILING
    } else if err.downcast_ref::<PlanningFailed>().is_some() {
        exit_codes::PLANNING_FAILED
    } else {
        exit_codes::INVALID
    }
}

fn exit_code_for_reason(reason: TerminationReason) -> i32 {
    match reason {
        TerminationReason::Finished => exit_codes::OK,
        TerminationReason::BoundExceeded | TerminationReason::ReplanFailed => {
            exit_codes::FORCED_TERMINATION
        }
        TerminationReason::Cancelled => exit_codes::CANCELLED,
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &PilotConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, args);
    config.validate()?;
    let goal = read_goal(args)?;

    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let run_id = new_run_id();
    let mut run_log = RunLog::create(&config.run_dir, &run_id)?;
    info!(run_id = run_log.run_id(), "starting run");

    let mut seed: Vec<StepRecord> = config.seed_history.iter().map(StepRecord::from).collect();
    seed.extend(run_setup(&config.setup, config.screen.limits(), &cancel)?);

    let workdir = std::env::current_dir().context("resolve working directory")?;
    let backend = CodexExec::new(
        config.agent.clone(),
        workdir,
        run_log.dir().to_path_buf(),
        cancel.clone(),
    );
    let screen = ScreenStateProvider::new(CommandScreen::new(config.screen.clone(), cancel.clone()))
        .with_jpeg_quality(config.screen.jpeg_quality);
    let orchestrator = Orchestrator::new(
        &screen,
        &backend,
        &backend,
        AgentSettings {
            prompt_budget_bytes: config.prompt_budget_bytes,
            hints: config.hints.clone(),
        },
        cancel,
    );

    let run_config = RunConfig {
        goal,
        replan_budget: ReplanBudget::from_option(config.max_replans),
        step_ceiling: config.step_ceiling,
        seed_history: History::seeded(seed),
    };

    match orchestrator.run(run_config, &mut run_log) {
        Ok(outcome) => {
            run_log.write_summary(&outcome.state, outcome.transitions, None)?;
            let response = outcome
                .response()
                .ok_or_else(|| anyhow!("run ended without a final response"))?;
            println!("{}", response.text);
            Ok(exit_code_for_reason(response.reason))
        }
        Err(aborted) => {
            let message = aborted.to_string();
            if let Err(err) = run_log.write_summary(&aborted.state, aborted.transitions, Some(&message)) {
                warn!(err = %format!("{err:#}"), "failed to write run summary");
            }
            Err(match aborted.kind {
                AbortKind::StepCeiling(err) => err.into(),
                AbortKind::Planning(err) => err.into(),
            })
        }
    }
}

fn apply_overrides(config: &mut PilotConfig, args: &RunArgs) {
    if args.unbounded {
        config.max_replans = None;
    } else if let Some(max) = args.max_replans {
        config.max_replans = Some(max);
    }
    if let Some(ceiling) = args.step_ceiling {
        config.step_ceiling = ceiling;
    }
}

fn read_goal(args: &RunArgs) -> Result<String> {
    let goal = match (&args.goal, &args.goal_file) {
        (Some(goal), _) => goal.clone(),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("read goal {}", path.display()))?
        }
        (None, None) => bail!("either --goal or --goal-file is required"),
    };
    let goal = goal.trim().to_string();
    if goal.is_empty() {
        bail!("goal must not be empty");
    }
    Ok(goal)
}

fn cmd_capture(config_path: &Path, out: Option<&Path>) -> Result<i32> {
    let config = load_config(config_path)?;
    let cancel = CancelToken::new();
    let provider = ScreenStateProvider::new(CommandScreen::new(config.screen.clone(), cancel))
        .with_jpeg_quality(config.screen.jpeg_quality);
    let state = provider.capture();

    println!("{}", state.locator);
    match (state.vision(), out) {
        (Some(vision), Some(path)) => {
            fs::write(path, &vision.jpeg).with_context(|| format!("write {}", path.display()))?;
            eprintln!(
                "wrote {}x{} screenshot to {}",
                vision.width,
                vision.height,
                path.display()
            );
        }
        (None, Some(_)) => eprintln!("no screenshot available"),
        _ => {}
    }
    Ok(exit_codes::OK)
}
