//! Lockbench CLI - resource contention and deadlock experiments

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use lockbench_core::config::{SimulationConfig, TerminationMode};
use lockbench_core::domain::locking::LockingPolicy;
use lockbench_core::simulation::{self, PolicyComparison, RunSummary, Simulation};
use tracing::{debug, info};


#[derive(Parser)]
#[command(name = "lockbench")]
#[command(author, version, about = "Discrete-step resource contention and deadlock simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single simulation
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Print the event log
        #[arg(long)]
        events: bool,
    },

    /// Run the same workload under both locking policies
    Compare {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Per-invocation overrides layered on top of the config file
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Locking policy (two_phase or incremental)
    #[arg(long)]
    policy: Option<LockingPolicy>,

    /// Number of competing processes
    #[arg(long)]
    population: Option<usize>,

    /// Number of resource units
    #[arg(long)]
    pool_size: Option<usize>,

    /// Units each task must hold simultaneously
    #[arg(long)]
    required: Option<usize>,

    /// Waiting time beyond which partial holdings are surrendered
    #[arg(long)]
    max_wait: Option<u64>,

    /// Exclusive upper bound of random backoff delays
    #[arg(long)]
    backoff: Option<u32>,

    /// Steps between deadlock checks
    #[arg(long)]
    interval: Option<u64>,

    /// Waiting time a process must exceed to count as stuck
    #[arg(long)]
    wait_threshold: Option<u64>,

    /// Disable deadlock detection
    #[arg(long)]
    no_detection: bool,

    /// One task per process, stop once all are complete
    #[arg(long)]
    until_complete: bool,

    /// Step budget
    #[arg(long)]
    steps: Option<u64>,

    /// Random seed for a reproducible run
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all configuration values
    Show,
    /// Show config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
}

impl Overrides {
    /// Read the base configuration and apply every flag that was given
    ///
    /// The result is validated once, when the simulation is built.
    fn resolve(&self) -> anyhow::Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load_from(path)?,
            None => SimulationConfig::load()?,
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(policy) = self.policy {
            config.locking.policy = policy;
        }
        if let Some(population) = self.population {
            config.workload.population = population;
        }
        if let Some(pool_size) = self.pool_size {
            config.workload.pool_size = pool_size;
        }
        if let Some(required) = self.required {
            config.workload.required_per_task = required;
        }
        if let Some(max_wait) = self.max_wait {
            config.locking.max_wait_time = max_wait;
        }
        if let Some(backoff) = self.backoff {
            config.locking.backoff_range = backoff;
        }
        if let Some(interval) = self.interval {
            config.detection.check_interval = interval;
        }
        if let Some(threshold) = self.wait_threshold {
            config.detection.wait_threshold = threshold;
        }
        if self.no_detection {
            config.detection.enabled = false;
        }
        if self.until_complete {
            config.run.termination = TerminationMode::AllComplete;
        }
        if let Some(steps) = self.steps {
            config.run.max_steps = steps;
        }
        if let Some(seed) = self.seed {
            config.run.seed = Some(seed);
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let directive = if cli.quiet {
        "lockbench=warn"
    } else {
        "lockbench=info"
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match directive.parse() {
        Ok(d) => filter.add_directive(d),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run { overrides, events } => cmd_run(&overrides, events, cli.format, cli.quiet),
        Commands::Compare { overrides } => cmd_compare(&overrides, cli.format, cli.quiet),
        Commands::Config { action } => cmd_config(action, cli.quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<lockbench_core::Error>() {
        Some(core) => {
            eprintln!("Error [{}]: {}", core.code(), core);
            if let Some(suggestion) = core.suggestion() {
                eprintln!("  Try: {}", suggestion);
            }
        }
        None => eprintln!("Error: {:#}", err),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_run(
    overrides: &Overrides,
    events: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let config = overrides.resolve()?;
    debug!(?config, "Resolved configuration");

    let mut sim = Simulation::new(config)?;
    sim.record_events(events);
    let summary = sim.run()?;

    match format {
        OutputFormat::Json => {
            for event in sim.events() {
                println!("{}", serde_json::to_string(event)?);
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            for event in sim.events() {
                println!("{}", event);
            }
            if events && !quiet {
                println!();
            }
            print_summary(&summary, quiet);
        }
    }
    Ok(())
}

fn cmd_compare(overrides: &Overrides, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let config = overrides.resolve()?;
    let comparison = simulation::compare(&config)?;
    info!(seed = comparison.seed, "Comparison finished");

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&comparison)?),
        OutputFormat::Text => print_comparison(&comparison, quiet),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = SimulationConfig::load()?;
            for (key, value) in config.list() {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            let path = SimulationConfig::config_path()?;
            println!("{}", path.display());
        }
        ConfigAction::Init { force } => {
            let path = SimulationConfig::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {} (use --force to overwrite)",
                    path.display()
                );
            }
            SimulationConfig::default().save()?;
            if !quiet {
                println!("Wrote default configuration to {}", path.display());
            }
        }
        ConfigAction::Get { key } => {
            let config = SimulationConfig::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = SimulationConfig::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_summary(summary: &RunSummary, quiet: bool) {
    let m = &summary.metrics;
    if quiet {
        println!(
            "{} tasks={} deadlocks={} rate={:.1}%",
            summary.policy, m.tasks_completed, m.deadlocks_detected, m.completion_rate
        );
        return;
    }

    println!("Lockbench Run Summary");
    println!("=====================");
    println!("  Policy:           {}", summary.policy);
    println!("  Steps:            {} ({})", summary.steps, summary.stop_reason);
    if let Some(seed) = summary.seed {
        println!("  Seed:             {}", seed);
    }
    println!("  Tasks completed:  {}", m.tasks_completed);
    println!("  Completion rate:  {:.1}%", m.completion_rate);
    println!("  Deadlocks:        {}", m.deadlocks_detected);
    println!("  Timeouts:         {}", m.timeouts);
    println!("  Forced releases:  {}", m.forced_releases);
    println!("  Total wait:       {}", m.total_wait_time);
    println!("  Average wait:     {:.2}", m.average_wait_time);
    println!("  Cumulative wait:  {}", m.cumulative_wait_time);
}

fn print_comparison(comparison: &PolicyComparison, quiet: bool) {
    if !quiet {
        println!("Policy Comparison (seed {})", comparison.seed);
        println!();
    }
    println!(
        "{:<12} {:>7} {:>7} {:>9} {:>9} {:>8} {:>10}",
        "POLICY", "STEPS", "TASKS", "RATE", "DEADLOCKS", "TIMEOUTS", "CUM WAIT"
    );
    for run in &comparison.runs {
        let m = &run.metrics;
        println!(
            "{:<12} {:>7} {:>7} {:>8.1}% {:>9} {:>8} {:>10}",
            run.policy.as_str(),
            run.steps,
            m.tasks_completed,
            m.completion_rate,
            m.deadlocks_detected,
            m.timeouts,
            m.cumulative_wait_time
        );
    }
}
