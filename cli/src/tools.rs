//! Known AI coding tools.
//!
//! Maps a tool key (`claude-code`, `aider`, ...) to the command that starts
//! it, and detects what is installed on `PATH`. `termly start --command`
//! bypasses this table entirely.

use std::path::{Path, PathBuf};
use std::process::Command;

/// One supported AI tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiTool {
    /// Registry key.
    pub key: &'static str,
    /// Executable name.
    pub command: &'static str,
    /// Arguments always passed first.
    pub args: &'static [&'static str],
    /// Name shown to the user and to the mobile app.
    pub display_name: &'static str,
    /// One-line description.
    pub description: &'static str,
}

/// Every tool termly knows how to start.
pub const AI_TOOLS: [AiTool; 5] = [
    AiTool {
        key: "claude-code",
        command: "claude",
        args: &["code"],
        display_name: "Claude Code",
        description: "Anthropic's AI coding assistant",
    },
    AiTool {
        key: "aider",
        command: "aider",
        args: &[],
        display_name: "Aider",
        description: "AI pair programming in your terminal",
    },
    AiTool {
        key: "github-copilot",
        command: "github-copilot-cli",
        args: &[],
        display_name: "GitHub Copilot CLI",
        description: "GitHub's command line AI",
    },
    AiTool {
        key: "cursor",
        command: "cursor",
        args: &[],
        display_name: "Cursor",
        description: "AI-first code editor",
    },
    AiTool {
        key: "cody",
        command: "cody",
        args: &["chat"],
        display_name: "Cody",
        description: "Sourcegraph's AI assistant",
    },
];

/// Look a tool up by key, display name or command.
///
/// Keys are matched case-insensitively with spaces treated as dashes.
#[must_use]
pub fn find_tool(name: &str) -> Option<&'static AiTool> {
    let normalized = name.trim().to_lowercase().replace(' ', "-");
    AI_TOOLS.iter().find(|tool| {
        tool.key == normalized
            || tool.display_name.eq_ignore_ascii_case(name.trim())
            || tool.command == name.trim()
    })
}

/// Full path of `command` on `PATH`, if any.
#[must_use]
pub fn find_on_path(command: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Tools whose command is on `PATH`, in table order.
#[must_use]
pub fn installed_tools() -> Vec<&'static AiTool> {
    AI_TOOLS
        .iter()
        .filter(|tool| find_on_path(tool.command).is_some())
        .collect()
}

/// Version reported by `command --version`, or `"unknown"`.
#[must_use]
pub fn tool_version(command: &str) -> String {
    Command::new(command)
        .arg("--version")
        .output()
        .ok()
        .and_then(|out| {
            let text = format!(
                "{}{}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            );
            parse_version(&text)
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// First `N.N` or `N.N.N` token in `output`.
#[must_use]
pub fn parse_version(output: &str) -> Option<String> {
    output
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|token| token.trim_matches('.'))
        .find_map(|token| {
            let parts: Vec<&str> = token.split('.').filter(|p| !p.is_empty()).collect();
            (parts.len() >= 2).then(|| parts[..parts.len().min(3)].join("."))
        })
}
