//! ralph-waves - parallel coding-agent runs on isolated git worktrees

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ralph_waves::attempt::AttemptSnapshot;
use ralph_waves::config::{ensure_ralph_dir, ConfigLoader};
use ralph_waves::{
    parse_plan, AttemptLoop, AttemptOutcome, AttemptStateStore, CliGit, CommandAgent, CommandGate, RunReport,
    TaskStatus, WavePlan, WaveScheduler, WavesConfig, WavesError, WorktreeOrchestrator,
};

#[derive(Parser)]
#[command(name = "ralph-waves")]
#[command(version)]
#[command(about = "Dependency-ordered parallel coding agents on isolated git worktrees", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "RALPH_WAVES_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a plan, then print its waves
    Plan {
        /// Markdown plan file
        file: PathBuf,

        /// Output the wave plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Execute a plan: one agent per task, wave by wave
    Run {
        /// Markdown plan file
        file: PathBuf,

        /// Maximum agents running at once
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Per-wave timeout in seconds
        #[arg(long, value_name = "SECS")]
        wave_timeout: Option<u64>,

        /// Keep task branches after integration
        #[arg(long)]
        keep_branches: bool,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Retry one task on the current branch until a gate passes
    Attempt(AttemptArgs),

    /// Inspect or reset attempt state
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("task").required(true).args(["prompt", "prompt_file"]))]
struct AttemptArgs {
    /// Task prompt
    #[arg(long)]
    prompt: Option<String>,

    /// Read the task prompt from a file
    #[arg(long, value_name = "FILE")]
    prompt_file: Option<PathBuf>,

    /// Validation gate shell command (overrides attempt.gate_command)
    #[arg(long, value_name = "COMMAND")]
    gate: Option<String>,

    /// Maximum iterations
    #[arg(short, long)]
    max_iterations: Option<u32>,

    /// Identical failures in a row before changing strategy
    #[arg(short, long)]
    stuck_threshold: Option<u32>,

    /// File hints passed to the agent
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<String>,
}

#[derive(Subcommand)]
enum StateAction {
    /// Show the current attempt state
    Show,
    /// Delete the current attempt state
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the merged configuration and where it came from
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "ralph_waves=debug,info"
    } else {
        "ralph_waves=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    match execute(cli.command, &project_path).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn execute(command: Commands, project: &Path) -> Result<i32, WavesError> {
    match command {
        Commands::Plan { file, json } => {
            let plan = load_plan(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
            Ok(0)
        }

        Commands::Run {
            file,
            max_parallel,
            wave_timeout,
            keep_branches,
            json,
        } => {
            let plan = load_plan(&file)?;
            let (mut config, _) = ConfigLoader::new().load(project)?;
            if let Some(max_parallel) = max_parallel {
                config.orchestrator.max_parallel = max_parallel;
            }
            if wave_timeout.is_some() {
                config.orchestrator.wave_timeout_secs = wave_timeout;
            }
            if keep_branches {
                config.orchestrator.delete_merged_branches = false;
            }
            config.validate()?;
            require_tools(&config)?;

            let ralph_dir = ensure_ralph_dir(project)?;
            let orchestrator = WorktreeOrchestrator::new(
                CliGit::new(project),
                CommandAgent::new(config.agent.command.clone(), config.agent.args.clone()),
                config.orchestrator_config(project),
            );

            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());

            let report = orchestrator.run(&plan, cancel).await?;
            match report.save(&ralph_dir.join("runs")) {
                Ok(path) => info!(path = %path.display(), "Saved run report"),
                Err(e) => warn!("Failed to save run report: {}", e),
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(report.exit_code())
        }

        Commands::Attempt(args) => {
            let prompt = match (&args.prompt, &args.prompt_file) {
                (Some(prompt), _) => prompt.clone(),
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (None, None) => return Err(WavesError::config("either --prompt or --prompt-file is required")),
            };

            let (mut config, _) = ConfigLoader::new().load(project)?;
            if let Some(max_iterations) = args.max_iterations {
                config.attempt.max_iterations = max_iterations;
            }
            if let Some(stuck_threshold) = args.stuck_threshold {
                config.attempt.stuck_threshold = stuck_threshold;
            }
            if args.gate.is_some() {
                config.attempt.gate_command = args.gate.clone();
            }
            config.validate()?;
            let gate_command = config
                .attempt
                .gate_command
                .clone()
                .ok_or_else(|| WavesError::config("no validation gate: pass --gate or set attempt.gate_command"))?;
            require_tools(&config)?;

            let attempt = AttemptLoop::new(
                CliGit::new(project),
                CommandAgent::new(config.agent.command.clone(), config.agent.args.clone()),
                CommandGate::new("gate", gate_command),
                AttemptStateStore::new(project),
                config.attempt_config(),
            );
            let outcome = attempt.run(&prompt, &args.files).await?;
            print_attempt(&outcome);
            Ok(outcome.exit_code())
        }

        Commands::State { action } => {
            let store = AttemptStateStore::new(project);
            match action {
                StateAction::Show => {
                    let snapshot = store.snapshot();
                    if snapshot == AttemptSnapshot::Malformed {
                        println!("{}", snapshot.render().yellow());
                    } else {
                        println!("{}", snapshot.render());
                    }
                }
                StateAction::Clear => {
                    let _lock = store.lock()?;
                    store.clear()?;
                    println!("{} Attempt state cleared", "✓".green());
                }
            }
            Ok(0)
        }

        Commands::Config { action } => match action {
            ConfigAction::Show { json } => {
                let (config, sources) = ConfigLoader::new().load(project)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    for source in &sources {
                        let marker = if source.loaded { "loaded".green() } else { "missing".dimmed() };
                        println!("# {} ({}): {}", source.level, marker, source.path.display());
                    }
                    println!("{}", "─".repeat(40));
                    print!("{}", config.to_toml()?);
                }
                Ok(0)
            }
        },
    }
}

fn load_plan(file: &Path) -> Result<WavePlan, WavesError> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| WavesError::config_with_path(format!("cannot read plan: {e}"), file.to_path_buf()))?;
    WaveScheduler::plan(parse_plan(&content)?)
}

fn require_tools(config: &WavesConfig) -> Result<(), WavesError> {
    if which::which("git").is_err() {
        return Err(WavesError::config("git not found in PATH"));
    }
    if which::which(&config.agent.command).is_err() {
        return Err(WavesError::config(format!(
            "agent command '{}' not found in PATH",
            config.agent.command
        )));
    }
    Ok(())
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping agents");
            cancel.cancel();
        }
    });
}

fn print_plan(plan: &WavePlan) {
    println!("{} {} task(s) in {} wave(s)", "Plan:".bold(), plan.len(), plan.waves().len());
    for (index, wave) in plan.waves().iter().enumerate() {
        println!("\n{}", format!("Wave {index}").cyan().bold());
        for id in wave {
            if let Some(task) = plan.task(*id) {
                let deps = if task.depends_on.is_empty() {
                    String::new()
                } else {
                    let ids: Vec<String> = task.depends_on.iter().map(|d| d.to_string()).collect();
                    format!(" (after {})", ids.join(", ")).dimmed().to_string()
                };
                println!("  {:>3}. {}{}", task.id, task.title, deps);
            }
        }
    }
}

fn print_report(report: &RunReport) {
    println!("{} {}", "Run".bold(), report.run_id.dimmed());
    for task in &report.tasks {
        let label = match &task.status {
            TaskStatus::Integrated { .. } => task.status.label().green(),
            TaskStatus::Quarantined { .. } => task.status.label().red(),
            TaskStatus::Blocked { .. } | TaskStatus::NotStarted => task.status.label().yellow(),
        };
        let detail = match &task.status {
            TaskStatus::Quarantined { reason } => {
                let blocked = report.blocked_by(task.id);
                if blocked.is_empty() {
                    format!(" - {reason}")
                } else {
                    format!(" - {reason} (blocks {blocked:?})")
                }
            }
            TaskStatus::Blocked { by } => format!(" - waiting on {by:?}"),
            _ => String::new(),
        };
        println!("  [{}] task {}: {}{}", label, task.id, task.title, detail);
        if let Some(worktree) = &task.worktree {
            println!("        worktree kept at {}", worktree.display());
        }
    }
    println!("{}", "─".repeat(40));
    let totals = report.summary().lines().last().unwrap_or_default().to_string();
    if report.is_success() {
        println!("{} {}", "✓".green(), totals);
    } else {
        println!("{} {}", "✗".red(), totals);
    }
}

fn print_attempt(outcome: &AttemptOutcome) {
    match outcome {
        AttemptOutcome::Succeeded { state } => {
            println!(
                "{} Gate passed after {} iteration(s), {} strategy shift(s)",
                "✓".green(),
                state.iteration,
                state.strategy_shifts
            );
        }
        AttemptOutcome::Exhausted { state, quarantine } => {
            println!(
                "{} Gave up after {} iteration(s); last failing gate: {}",
                "✗".red(),
                state.iteration,
                state.last_gate.as_deref().unwrap_or("unknown")
            );
            match quarantine {
                Some(report) => println!(
                    "  Work preserved on {}{}",
                    report.branch.bold(),
                    if report.pushed { " (pushed)" } else { "" }
                ),
                None => println!("  {}", "Quarantine failed; see log".yellow()),
            }
        }
    }
}
