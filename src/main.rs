//! mentorgate - guided question flow and attempt gating
//!
//! CLI entry point with global panic handler.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mentorgate::cli::{
    exit_code_for, ConfigCommand, ConfigOptions, ResumeCommand, ResumeOptions, RunCommand,
    RunOptions, StatusCommand, StatusOptions,
};
use mentorgate::config::{mentorgate_home, xp_ledger_path, Config};
use mentorgate::core::{CooldownGuard, FlowController, FlowMode, FlowPorts, SystemClock};
use mentorgate::error::{exit_codes, FlowError};
use mentorgate::services::{JsonContentProvider, JsonlXpLedger, SimulatedClipPlayer};
use mentorgate::storage::FileStore;

// =============================================================================
// CLI Definition
// =============================================================================

/// mentorgate - guided question flow and attempt gating
#[derive(Parser)]
#[command(name = "mentorgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a question may be attempted now
    Status {
        /// Learner identity
        #[arg(long)]
        user: String,
        /// Question identity
        #[arg(long)]
        question: String,
        /// Attempt mode (mentor-guided, timed-exam)
        #[arg(long, default_value = "mentor-guided")]
        mode: FlowMode,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Walk a question through the full flow with a simulated player
    Run {
        /// Learner identity
        #[arg(long)]
        user: String,
        /// Question identity
        #[arg(long)]
        question: String,
        /// Attempt mode (mentor-guided, timed-exam)
        #[arg(long, default_value = "mentor-guided")]
        mode: FlowMode,
        /// Directory holding `<question>.json` content files
        #[arg(long, default_value = "content")]
        content_dir: PathBuf,
        /// Alternative to submit; omit to submit without a selection
        #[arg(long)]
        answer: Option<char>,
        /// Narration playback speed; 0 plays instantly
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
        /// Simulate a player that refuses autoplay
        #[arg(long)]
        block_autoplay: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// List flows left in progress
    Resume {
        /// Maximum number of records
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write it to .mentorgate/config.toml in the current directory
        #[arg(long)]
        write_project: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    setup_panic_handler();
    init_tracing();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("mentorgate error: {}", e);
            exit_code(exit_code_for(&e))
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("MENTORGATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("mentorgate panic: {}", info);

        if let Some(home) = mentorgate_home() {
            let crash_log = home.join("crash.log");
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::ERROR);
    }));
}

async fn run() -> Result<ExitCode, FlowError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let config = Config::load_from_cwd(&cwd);

    match cli.command {
        Commands::Status {
            user,
            question,
            mode,
            json,
            quiet,
        } => {
            let options = StatusOptions {
                json,
                quiet,
                user_id: user,
                question_id: question,
                mode,
            };
            let store = Arc::new(FileStore::new()?);
            let guard = CooldownGuard::new(store, config.cooldown.clone(), Arc::new(SystemClock));
            let cmd = StatusCommand::new(guard);
            let output = cmd.run(&options).await;
            print_output(&cmd.format_output(&output, &options));
            Ok(exit_code(output.exit_code))
        }
        Commands::Run {
            user,
            question,
            mode,
            content_dir,
            answer,
            speed,
            block_autoplay,
            json,
            quiet,
        } => {
            let options = RunOptions {
                json,
                quiet,
                user_id: user,
                question_id: question,
                mode,
                answer,
            };
            let store = Arc::new(FileStore::new()?);
            let ledger = xp_ledger_path()
                .ok_or_else(|| FlowError::config("cannot locate the mentorgate home directory"))?;
            let ports = FlowPorts {
                cooldowns: store.clone(),
                resume: store,
                content: Arc::new(JsonContentProvider::new(content_dir)),
                xp: Arc::new(JsonlXpLedger::new(ledger)),
                player: Arc::new(
                    SimulatedClipPlayer::new()
                        .with_speed(speed)
                        .with_autoplay_blocked(block_autoplay),
                ),
                clock: Arc::new(SystemClock),
            };
            let cmd = RunCommand::new(FlowController::new(ports, config));
            let output = cmd.run(&options).await;
            print_output(&cmd.format_output(&output, &options));
            Ok(exit_code(output.exit_code))
        }
        Commands::Resume { limit, json, quiet } => {
            let options = ResumeOptions { json, quiet, limit };
            let cmd = ResumeCommand::new(FileStore::new()?);
            let output = cmd.run(&options).await;
            print_output(&cmd.format_output(&output, &options));
            Ok(success_to_exit_code(output.success))
        }
        Commands::Config {
            write_project,
            json,
            quiet,
        } => {
            let options = ConfigOptions {
                json,
                quiet,
                write_project,
            };
            let cmd = ConfigCommand::new(config);
            let output = cmd.run(&cwd, &options);
            print_output(&cmd.format_output(&output, &options));
            Ok(success_to_exit_code(output.success))
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn print_output(text: &str) {
    if !text.is_empty() {
        println!("{}", text.trim_end());
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn success_to_exit_code(success: bool) -> ExitCode {
    if success {
        exit_code(exit_codes::OK)
    } else {
        exit_code(exit_codes::ERROR)
    }
}
