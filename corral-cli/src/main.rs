//! Corral CLI - Command line interface for corral
//!
//! Runs coding agents side by side in tmux windows and git worktrees.

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use corral_core::{CliOverrides, Config};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{HookArgs, RunArgs, StatusArgs};

/// Corral: run coding agents in parallel tmux windows and git worktrees
#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Command that starts an agent (overrides config and env)
    #[arg(long, global = true)]
    agent_command: Option<String>,

    /// Command opened in the review pane (overrides config and env)
    #[arg(long, global = true)]
    review_command: Option<String>,

    /// tmux session to open agent windows in
    #[arg(long, global = true)]
    tmux_session: Option<String>,

    /// Directory for persisted state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Monitor poll interval, e.g. "500ms"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Start the interactive console and the monitor
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// Show persisted agents
    #[command(visible_alias = "st")]
    Status(StatusArgs),

    /// Report an agent state to its status file (called from agent hooks)
    Hook(HookArgs),

    /// Show current configuration
    Config,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            agent_command: self.agent_command.clone(),
            review_command: self.review_command.clone(),
            tmux_session: self.tmux_session.clone(),
            state_dir: self.state_dir.clone(),
            poll_interval: self.poll_interval,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Hooks run on every agent event; skip logging and config for them
    if let Some(Commands::Hook(args)) = &cli.command {
        return args.execute();
    }

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration with overrides
    let config = Config::load_with_overrides(cli.overrides())?;

    if cli.verbose {
        tracing::debug!(
            agent_command = %config.agent.command,
            review_command = %config.review.command,
            poll_interval = ?config.monitor.poll_interval,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("corral {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run(args)) => {
            args.execute(config).await?;
        }
        Some(Commands::Status(args)) => {
            args.execute(&config)?;
        }
        Some(Commands::Hook(args)) => {
            args.execute()?;
        }
        Some(Commands::Config) => {
            print_config(&config);
        }
        None => {
            println!("Corral - run coding agents side by side");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn print_config(config: &Config) {
    println!("Corral Configuration");
    println!("====================");
    println!();
    println!("Agent:");
    println!("  command: {}", config.agent.command);
    println!("  settings_flag: {}", config.agent.settings_flag);
    println!("  hook_command: {}", config.agent.hook_command);
    println!("  scrub_env: {}", config.agent.scrub_env.join(", "));
    println!("  grace_period: {}", humantime::format_duration(config.agent.grace_period));
    println!();
    println!("Review:");
    println!("  command: {}", config.review.command);
    println!("  split: {:?} ({}%)", config.review.split, config.review.size_percent);
    println!();
    println!("Monitor:");
    println!("  poll_interval: {}", humantime::format_duration(config.monitor.poll_interval));
    println!("  call_timeout: {}", humantime::format_duration(config.monitor.call_timeout));
    println!(
        "  persist_interval: {}",
        humantime::format_duration(config.monitor.persist_interval)
    );
    println!("  hook_freshness: {}", humantime::format_duration(config.monitor.hook_freshness));
    println!();
    println!("tmux session: {}", config.tmux.session.as_deref().unwrap_or("(current)"));
    match config.worktree_dir() {
        Ok(dir) => println!("Worktree dir: {}", dir.display()),
        Err(e) => println!("Worktree dir: unavailable ({})", e),
    }
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}
