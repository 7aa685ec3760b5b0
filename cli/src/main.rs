//! Termly CLI - mirror an AI coding session to your phone.
//!
//! This is the main binary entry point. See the `termly` library for the
//! core functionality.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use termly::commands::{self, StartArgs, VERSION};
use termly::{Config, SessionError, SessionRegistry};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "termly")]
#[command(version = VERSION)]
#[command(about = "Mirror your AI coding session to the Termly mobile app")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a mirrored session
    Start {
        /// Working directory (defaults to the current directory)
        directory: Option<String>,
        /// AI tool to run (e.g. claude-code, aider)
        #[arg(long)]
        ai: Option<String>,
        /// Run a custom command instead of a known AI tool
        #[arg(long)]
        command: Option<String>,
        /// Extra arguments passed to the AI tool
        #[arg(long, allow_hyphen_values = true)]
        ai_args: Option<String>,
        /// Log at debug level
        #[arg(long)]
        debug: bool,
    },
    /// List all sessions
    List,
    /// Show running sessions in detail
    Status,
    /// Stop a session (the one in the current directory by default)
    Stop {
        /// Session id or id prefix
        id: Option<String>,
        /// Stop every running session
        #[arg(long)]
        all: bool,
    },
    /// Remove stale sessions from the registry
    Cleanup,
    /// Show or change configuration
    Config {
        /// Key to read or write
        key: Option<String>,
        /// New value
        value: Option<String>,
        /// Restore defaults
        #[arg(long)]
        reset: bool,
    },
}

/// Log file location: `TERMLY_LOG_FILE`, else `<config dir>/logs/cli.log`.
fn log_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TERMLY_LOG_FILE") {
        return Some(PathBuf::from(path));
    }
    Config::config_dir()
        .ok()
        .map(|dir| dir.join("logs").join("cli.log"))
}

/// Set up file logging so log lines never land in the mirrored terminal.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder.format_timestamp_millis();

    let file = log_path().and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match file {
        Some(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        None => {
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    // A second init (tests, embedding) is harmless.
    let _ = builder.try_init();
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Start {
            directory,
            ai,
            command,
            ai_args,
            debug: _,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            let code = runtime.block_on(commands::start::run(StartArgs {
                directory,
                ai,
                command,
                ai_args,
            }))?;
            // Blocking stdin reader threads must not hold the process open.
            runtime.shutdown_timeout(std::time::Duration::from_millis(100));
            Ok(code)
        }
        Commands::List => {
            commands::list(&SessionRegistry::open_default()?)?;
            Ok(0)
        }
        Commands::Status => {
            commands::status(&SessionRegistry::open_default()?)?;
            Ok(0)
        }
        Commands::Stop { id, all } => {
            commands::stop(&SessionRegistry::open_default()?, id.as_deref(), all)?;
            Ok(0)
        }
        Commands::Cleanup => {
            commands::cleanup(&SessionRegistry::open_default()?)?;
            Ok(0)
        }
        Commands::Config { key, value, reset } => {
            commands::config::run(key.as_deref(), value.as_deref(), reset)?;
            Ok(0)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = matches!(cli.command, Commands::Start { debug: true, .. });
    init_logging(debug);

    // Set up panic hook to log panics and ensure terminal cleanup
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {panic_info:?}");
        let _ = crossterm::terminal::disable_raw_mode();
        default_hook(panic_info);
    }));

    log::info!("termly v{VERSION} starting");
    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<SessionError>()
                .map_or(1, SessionError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_flags_parse() {
        let cli = Cli::try_parse_from([
            "termly", "start", "/tmp", "--ai", "aider", "--ai-args", "--model gpt", "--debug",
        ])
        .unwrap();
        match cli.command {
            Commands::Start {
                directory,
                ai,
                ai_args,
                debug,
                ..
            } => {
                assert_eq!(directory.as_deref(), Some("/tmp"));
                assert_eq!(ai.as_deref(), Some("aider"));
                assert_eq!(ai_args.as_deref(), Some("--model gpt"));
                assert!(debug);
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_stop_and_config_parse() {
        let cli = Cli::try_parse_from(["termly", "stop", "--all"]).unwrap();
        assert!(matches!(cli.command, Commands::Stop { id: None, all: true }));

        let cli = Cli::try_parse_from(["termly", "config", "server_url", "ws://x"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config { key: Some(_), value: Some(_), reset: false }
        ));
    }
}
