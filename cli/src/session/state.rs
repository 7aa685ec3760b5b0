//! Persistent metadata of one mirrored session.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a registry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The agent process is mirroring.
    Running,
    /// Ended normally or by `termly stop`.
    Stopped,
    /// Ended because of an error.
    Failed,
    /// Marked running, but its process is gone.
    Stale,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// One entry of `sessions.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session id (server-assigned once paired).
    pub session_id: String,
    /// Process id of the agent (the `termly start` process).
    pub pid: u32,
    /// Last path component of the working directory.
    pub project_name: String,
    /// Absolute working directory.
    pub working_dir: PathBuf,
    /// AI tool key, or the custom command.
    pub ai_tool: String,
    /// AI tool display name.
    pub ai_tool_display_name: String,
    /// Detected AI tool version.
    pub ai_tool_version: String,
    /// Host name of this machine.
    pub computer_name: String,
    /// Relay URL.
    pub server_url: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Whether a mobile viewer is attached.
    #[serde(default)]
    pub mobile_connected: bool,
    /// Peer key fingerprint once paired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Caller-supplied part of a new record.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Absolute working directory.
    pub working_dir: PathBuf,
    /// AI tool key, or the custom command.
    pub ai_tool: String,
    /// AI tool display name.
    pub ai_tool_display_name: String,
    /// Detected AI tool version.
    pub ai_tool_version: String,
    /// Relay URL.
    pub server_url: String,
}

impl SessionRecord {
    /// Fresh `running` record for this process with a random id.
    #[must_use]
    pub fn new(new: NewSession) -> Self {
        let project_name = new
            .working_dir
            .file_name()
            .map_or_else(|| new.working_dir.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            pid: std::process::id(),
            project_name,
            working_dir: new.working_dir,
            ai_tool: new.ai_tool,
            ai_tool_display_name: new.ai_tool_display_name,
            ai_tool_version: new.ai_tool_version,
            computer_name: computer_name(),
            server_url: new.server_url,
            started_at: Utc::now(),
            status: SessionStatus::Running,
            mobile_connected: false,
            fingerprint: None,
        }
    }

    /// Human-readable uptime as of `now` (`3d 4h`, `2h 5m`, `7m`).
    #[must_use]
    pub fn uptime_at(&self, now: DateTime<Utc>) -> String {
        let minutes = (now - self.started_at).num_minutes().max(0);
        let hours = minutes / 60;
        let days = hours / 24;
        if days > 0 {
            format!("{days}d {}h", hours % 24)
        } else if hours > 0 {
            format!("{hours}h {}m", minutes % 60)
        } else {
            format!("{minutes}m")
        }
    }

    /// Uptime as of now.
    #[must_use]
    pub fn uptime(&self) -> String {
        self.uptime_at(Utc::now())
    }

    /// First eight characters of the id, for tables.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.session_id.get(..8).unwrap_or(&self.session_id)
    }
}

/// This machine's host name, or `"unknown"`.
#[must_use]
pub fn computer_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> SessionRecord {
        SessionRecord::new(NewSession {
            working_dir: PathBuf::from("/home/dev/my-project"),
            ai_tool: "aider".into(),
            ai_tool_display_name: "Aider".into(),
            ai_tool_version: "0.86.1".into(),
            server_url: "wss://api.termly.dev".into(),
        })
    }

    #[test]
    fn test_new_record_defaults() {
        let r = record();
        assert_eq!(r.project_name, "my-project");
        assert_eq!(r.status, SessionStatus::Running);
        assert_eq!(r.pid, std::process::id());
        assert!(!r.mobile_connected);
        assert_eq!(r.short_id().len(), 8);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(record()).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json.get("aiToolDisplayName").is_some());
        assert_eq!(json["status"], "running");
        assert!(json.get("fingerprint").is_none());
    }

    #[test]
    fn test_uptime_format() {
        let r = record();
        let start = r.started_at;
        assert_eq!(r.uptime_at(start + Duration::minutes(7)), "7m");
        assert_eq!(r.uptime_at(start + Duration::minutes(125)), "2h 5m");
        assert_eq!(r.uptime_at(start + Duration::hours(76)), "3d 4h");
    }
}
