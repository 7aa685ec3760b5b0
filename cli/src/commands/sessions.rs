//! Session management commands: `list`, `status`, `stop`, `cleanup`.
//!
//! All of them read the registry, which reports running records whose
//! process has died as `stale`.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::constants::GRACEFUL_KILL_TIMEOUT;
use crate::process::{graceful_kill, KillOutcome};
use crate::session::{SessionRecord, SessionRegistry, SessionRepository, SessionStatus};

/// Render records as a table.
#[must_use]
pub fn format_table(sessions: &[SessionRecord], now: DateTime<Utc>) -> String {
    let mut out = format!(
        "{:<10} {:<8} {:<20} {:<18} {:<8} {}\n",
        "ID", "STATUS", "PROJECT", "TOOL", "UPTIME", "MOBILE"
    );
    for s in sessions {
        let _ = writeln!(
            out,
            "{:<10} {:<8} {:<20} {:<18} {:<8} {}",
            s.short_id(),
            s.status.to_string(),
            truncate(&s.project_name, 20),
            truncate(&s.ai_tool_display_name, 18),
            s.uptime_at(now),
            if s.mobile_connected { "yes" } else { "no" }
        );
    }
    out
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

/// Detailed view of one record.
#[must_use]
pub fn format_details(s: &SessionRecord, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session {}", s.session_id);
    let _ = writeln!(out, "  Status:     {}", s.status);
    let _ = writeln!(out, "  Project:    {} ({})", s.project_name, s.working_dir.display());
    let _ = writeln!(
        out,
        "  Tool:       {} {}",
        s.ai_tool_display_name, s.ai_tool_version
    );
    let _ = writeln!(out, "  PID:        {}", s.pid);
    let _ = writeln!(out, "  Uptime:     {}", s.uptime_at(now));
    let _ = writeln!(out, "  Server:     {}", s.server_url);
    let _ = writeln!(
        out,
        "  Mobile:     {}",
        if s.mobile_connected { "connected" } else { "not connected" }
    );
    if let Some(fp) = &s.fingerprint {
        let _ = writeln!(out, "  Key:        {fp}");
    }
    out
}

/// `termly list`: every registered session.
pub fn list<R: SessionRepository>(registry: &SessionRegistry<R>) -> Result<()> {
    let sessions = registry.all()?;
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    print!("{}", format_table(&sessions, Utc::now()));
    let stale = sessions
        .iter()
        .filter(|s| s.status == SessionStatus::Stale)
        .count();
    if stale > 0 {
        println!();
        println!("{stale} stale session(s). Run `termly cleanup` to remove them.");
    }
    Ok(())
}

/// `termly status`: details of running sessions.
pub fn status<R: SessionRepository>(registry: &SessionRegistry<R>) -> Result<()> {
    let running = registry.running()?;
    if running.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }
    let now = Utc::now();
    for (i, session) in running.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print!("{}", format_details(session, now));
    }
    Ok(())
}

/// Sessions `stop` acts on.
///
/// `--all` wins over an id; with neither, the running session of `cwd`.
pub fn stop_targets<R: SessionRepository>(
    registry: &SessionRegistry<R>,
    id: Option<&str>,
    all: bool,
    cwd: &Path,
) -> Result<Vec<SessionRecord>> {
    if all {
        return registry.running();
    }
    if let Some(id) = id {
        return match registry.find(id)? {
            Some(record) => Ok(vec![record]),
            None => bail!("no session matches `{id}`"),
        };
    }
    match registry.by_directory(cwd)? {
        Some(record) => Ok(vec![record]),
        None => bail!(
            "no running session in {}; pass a session id or --all",
            cwd.display()
        ),
    }
}

/// `termly stop [ID] [--all]`.
pub fn stop<R: SessionRepository>(
    registry: &SessionRegistry<R>,
    id: Option<&str>,
    all: bool,
) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let cwd = cwd.canonicalize().unwrap_or(cwd);
    let targets = stop_targets(registry, id, all, &cwd)?;
    if targets.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }

    for session in targets {
        let outcome = graceful_kill(session.pid, GRACEFUL_KILL_TIMEOUT);
        log::info!(
            "[Stop] Session {} pid {}: {outcome:?}",
            session.session_id,
            session.pid
        );
        registry.update(&session.session_id, |r| {
            r.status = SessionStatus::Stopped;
            r.mobile_connected = false;
        })?;
        let how = match outcome {
            KillOutcome::Terminated => "stopped",
            KillOutcome::Killed => "killed after timeout",
            KillOutcome::NotRunning => "was not running",
        };
        println!("Session {} ({}) {how}.", session.short_id(), session.project_name);
    }
    Ok(())
}

/// `termly cleanup`: drop stale records.
pub fn cleanup<R: SessionRepository>(registry: &SessionRegistry<R>) -> Result<()> {
    let removed = registry.remove_stale()?;
    if removed == 0 {
        println!("No stale sessions.");
    } else {
        println!("Removed {removed} stale session(s).");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemoryRepository, NewSession};
    use std::path::PathBuf;

    fn record(dir: &str) -> SessionRecord {
        SessionRecord::new(NewSession {
            working_dir: PathBuf::from(dir),
            ai_tool: "aider".into(),
            ai_tool_display_name: "Aider".into(),
            ai_tool_version: "0.86.1".into(),
            server_url: "wss://api.termly.dev".into(),
        })
    }

    fn registry_with(records: &[SessionRecord]) -> SessionRegistry<InMemoryRepository> {
        let registry = SessionRegistry::with_liveness(InMemoryRepository::new(), |_| true);
        registry.repository().save(records).unwrap();
        registry
    }

    // ── Formatting ──

    #[test]
    fn test_table_has_header_and_rows() {
        let r = record("/work/alpha");
        let table = format_table(&[r.clone()], r.started_at);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].starts_with(r.short_id()));
        assert!(lines[1].contains("alpha"));
        assert!(lines[1].contains("running"));
    }

    #[test]
    fn test_truncate_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-project-name", 8).chars().count(), 8);
    }

    #[test]
    fn test_details_include_fingerprint_when_paired() {
        let mut r = record("/work/alpha");
        assert!(!format_details(&r, r.started_at).contains("Key:"));
        r.fingerprint = Some("ab:cd".into());
        assert!(format_details(&r, r.started_at).contains("Key:        ab:cd"));
    }

    // ── Stop targets ──

    #[test]
    fn test_stop_targets_by_directory() {
        let a = record("/work/alpha");
        let registry = registry_with(&[a.clone(), record("/work/beta")]);
        let targets = stop_targets(&registry, None, false, Path::new("/work/alpha")).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].session_id, a.session_id);

        assert!(stop_targets(&registry, None, false, Path::new("/elsewhere")).is_err());
    }

    #[test]
    fn test_stop_targets_all_and_by_prefix() {
        let a = record("/work/alpha");
        let registry = registry_with(&[a.clone(), record("/work/beta")]);
        assert_eq!(stop_targets(&registry, None, true, Path::new("/")).unwrap().len(), 2);

        let targets = stop_targets(&registry, Some(a.short_id()), false, Path::new("/")).unwrap();
        assert_eq!(targets[0].session_id, a.session_id);
        assert!(stop_targets(&registry, Some("zzzzzzzz"), false, Path::new("/")).is_err());
    }

    // ── Cleanup ──

    #[test]
    fn test_cleanup_removes_only_stale() {
        let registry = SessionRegistry::with_liveness(InMemoryRepository::new(), |_| false);
        let mut stopped = record("/work/beta");
        stopped.status = SessionStatus::Stopped;
        registry
            .repository()
            .save(&[record("/work/alpha"), stopped])
            .unwrap();

        cleanup(&registry).unwrap();
        let left = registry.all().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].status, SessionStatus::Stopped);
    }
}
