//! `termly start`: run a mirrored session.
//!
//! Resolves what to launch, validates the directory, and hands over to the
//! [`SessionCoordinator`]. Tool resolution order:
//!
//! 1. `--command` (split on whitespace, runs anything)
//! 2. `--ai KEY`
//! 3. `default_ai` from the config
//! 4. The first installed tool in the built-in table

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::session::{Launch, SessionCoordinator, SessionRegistry, StartOptions};
use crate::tools::{self, AI_TOOLS};
use crate::validation::validate_directory;

/// Arguments of `termly start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartArgs {
    /// Working directory (defaults to the current directory).
    pub directory: Option<String>,
    /// AI tool key.
    pub ai: Option<String>,
    /// Custom command line.
    pub command: Option<String>,
    /// Extra arguments appended to the tool's command line.
    pub ai_args: Option<String>,
}

fn split_args(text: Option<&str>) -> Vec<String> {
    text.map(|t| t.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Decide which program the session runs.
///
/// # Errors
///
/// Unknown tool keys, tools missing from `PATH`, an empty `--command`, and
/// the case where no tool is installed at all.
pub fn resolve_launch(args: &StartArgs, config: &Config) -> Result<Launch> {
    let extra = split_args(args.ai_args.as_deref());

    if let Some(command_line) = args.command.as_deref() {
        let mut parts = split_args(Some(command_line));
        if parts.is_empty() {
            bail!("--command must not be empty");
        }
        let command = parts.remove(0);
        parts.extend(extra);
        return Ok(Launch {
            display_name: command.clone(),
            tool_key: command_line.trim().to_string(),
            command,
            args: parts,
            version: "unknown".to_string(),
        });
    }

    let tool = match args.ai.as_deref().or(config.default_ai.as_deref()) {
        Some(key) => {
            let Some(tool) = tools::find_tool(key) else {
                let known: Vec<&str> = AI_TOOLS.iter().map(|t| t.key).collect();
                bail!("unknown AI tool `{key}` (known: {})", known.join(", "));
            };
            if tools::find_on_path(tool.command).is_none() {
                bail!(
                    "{} is not installed (`{}` not found on PATH)",
                    tool.display_name,
                    tool.command
                );
            }
            tool
        }
        None => *tools::installed_tools().first().context(
            "no supported AI tool found on PATH; install one or pass --command",
        )?,
    };

    let mut tool_args: Vec<String> = tool.args.iter().map(|a| (*a).to_string()).collect();
    tool_args.extend(extra);
    Ok(Launch {
        command: tool.command.to_string(),
        args: tool_args,
        tool_key: tool.key.to_string(),
        display_name: tool.display_name.to_string(),
        version: tools::tool_version(tool.command),
    })
}

/// Run a session in the foreground and return the process exit code.
///
/// # Errors
///
/// Invalid directories, tool resolution failures, and every error of
/// [`SessionCoordinator::run`].
pub async fn run(args: StartArgs) -> Result<i32> {
    let directory = validate_directory(args.directory.as_deref().unwrap_or("."))?;
    let config = Config::load()?;
    let launch = resolve_launch(&args, &config)?;
    log::info!(
        "[Start] Launching {} ({}) in {}",
        launch.display_name,
        launch.version,
        directory.display()
    );

    let options = StartOptions {
        directory,
        launch,
        server_url: config.server_url.clone(),
        api_url: config.api_url.clone(),
        buffer_capacity: config.buffer_capacity,
        heartbeat_timeout: config.heartbeat_timeout(),
        max_reconnect_attempts: config.max_reconnect_attempts,
        local_terminal: true,
    };

    let coordinator = SessionCoordinator::new(options, SessionRegistry::open_default()?);
    let outcome = coordinator.run().await?;
    log::info!("[Start] Session finished: {outcome:?}");
    Ok(outcome.exit_code())
}
