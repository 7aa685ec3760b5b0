//! Session registry: which sessions exist on this machine.
//!
//! Records are persisted through a [`SessionRepository`]; the JSON-file
//! implementation backs the CLI (`<config dir>/sessions.json`), the
//! in-memory one backs tests. Every read reconciles `running` records with
//! the process table: a running record whose pid is gone reads as
//! [`SessionStatus::Stale`].
//!
//! # File format
//!
//! ```json
//! { "sessions": [ { "sessionId": "...", "pid": 4242, "status": "running", ... } ] }
//! ```

// Rust guideline compliant 2026-02

use std::fmt::Debug;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::state::{SessionRecord, SessionStatus};
use crate::error::SessionError;
use crate::process::is_pid_alive;

/// Storage for session records.
pub trait SessionRepository: Send + Sync + Debug {
    /// All records, in insertion order.
    fn load(&self) -> Result<Vec<SessionRecord>>;

    /// Replace every record.
    fn save(&self, sessions: &[SessionRecord]) -> Result<()>;
}

#[derive(Serialize, Deserialize, Default)]
struct RegistryFile {
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

/// `sessions.json` on disk.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    /// Repository backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Repository at `<dir>/sessions.json`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("sessions.json"))
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionRepository for JsonFileRepository {
    fn load(&self) -> Result<Vec<SessionRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        match serde_json::from_str::<RegistryFile>(&content) {
            Ok(file) => Ok(file.sessions),
            Err(e) => {
                log::error!(
                    "[Registry] Failed to parse {}: {e}; starting empty",
                    self.path.display()
                );
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, sessions: &[SessionRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = RegistryFile {
            sessions: sessions.to_vec(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("failed to write {}", self.path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        log::debug!("[Registry] Saved {} sessions", sessions.len());
        Ok(())
    }
}

/// Records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    sessions: Mutex<Vec<SessionRecord>>,
}

impl InMemoryRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRepository for InMemoryRepository {
    fn load(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.sessions.lock().expect("registry lock poisoned").clone())
    }

    fn save(&self, sessions: &[SessionRecord]) -> Result<()> {
        *self.sessions.lock().expect("registry lock poisoned") = sessions.to_vec();
        Ok(())
    }
}

/// Registry operations over a repository.
#[derive(Debug)]
pub struct SessionRegistry<R: SessionRepository> {
    repo: R,
    is_alive: fn(u32) -> bool,
}

impl SessionRegistry<JsonFileRepository> {
    /// Registry at `<config dir>/sessions.json`.
    pub fn open_default() -> Result<Self> {
        let dir = crate::config::Config::config_dir()?;
        Ok(Self::new(JsonFileRepository::in_dir(&dir)))
    }
}

impl<R: SessionRepository> SessionRegistry<R> {
    /// Registry using the real process table for liveness.
    pub fn new(repo: R) -> Self {
        Self::with_liveness(repo, is_pid_alive)
    }

    /// Registry with a custom liveness probe.
    pub fn with_liveness(repo: R, is_alive: fn(u32) -> bool) -> Self {
        Self { repo, is_alive }
    }

    /// Underlying repository.
    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Every record, with dead running sessions reported as stale.
    pub fn all(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions = self.repo.load()?;
        for session in &mut sessions {
            if session.status == SessionStatus::Running && !(self.is_alive)(session.pid) {
                log::debug!(
                    "[Registry] Session {} pid {} is dead; marking stale",
                    session.session_id,
                    session.pid
                );
                session.status = SessionStatus::Stale;
            }
        }
        Ok(sessions)
    }

    /// Add a new record. A directory holds at most one running session.
    pub fn add(&self, record: SessionRecord) -> Result<()> {
        let mut sessions = self.all()?;
        if let Some(existing) = sessions.iter().find(|s| {
            s.status == SessionStatus::Running && s.working_dir == record.working_dir
        }) {
            return Err(SessionError::SessionAlreadyRunning {
                directory: existing.working_dir.clone(),
                session_id: existing.session_id.clone(),
                pid: existing.pid,
            }
            .into());
        }
        log::info!("[Registry] Session {} added", record.session_id);
        sessions.push(record);
        self.repo.save(&sessions)
    }

    /// Apply `change` to the record with exactly `session_id`.
    ///
    /// Returns `false` when no such record exists.
    pub fn update(&self, session_id: &str, change: impl FnOnce(&mut SessionRecord)) -> Result<bool> {
        let mut sessions = self.all()?;
        let Some(record) = sessions.iter_mut().find(|s| s.session_id == session_id) else {
            return Ok(false);
        };
        change(record);
        self.repo.save(&sessions)?;
        Ok(true)
    }

    /// Remove the record with exactly `session_id`.
    pub fn remove(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.all()?;
        let before = sessions.len();
        sessions.retain(|s| s.session_id != session_id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.repo.save(&sessions)?;
        log::info!("[Registry] Session {session_id} removed");
        Ok(true)
    }

    /// Find by exact id, else by unique id prefix.
    ///
    /// # Errors
    ///
    /// Fails when the prefix matches more than one record.
    pub fn find(&self, id_or_prefix: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.all()?;
        if let Some(exact) = sessions.iter().find(|s| s.session_id == id_or_prefix) {
            return Ok(Some(exact.clone()));
        }
        if id_or_prefix.is_empty() {
            return Ok(None);
        }
        let mut matches = sessions
            .into_iter()
            .filter(|s| s.session_id.starts_with(id_or_prefix));
        let first = matches.next();
        if matches.next().is_some() {
            bail!("session id prefix `{id_or_prefix}` is ambiguous");
        }
        Ok(first)
    }

    /// The running session in `dir`, if any.
    pub fn by_directory(&self, dir: &Path) -> Result<Option<SessionRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|s| s.status == SessionStatus::Running && s.working_dir == dir))
    }

    /// Every running session.
    pub fn running(&self) -> Result<Vec<SessionRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Running)
            .collect())
    }

    /// Every stale session.
    pub fn stale(&self) -> Result<Vec<SessionRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Stale)
            .collect())
    }

    /// Drop stale records; returns how many were removed.
    pub fn remove_stale(&self) -> Result<usize> {
        let sessions = self.all()?;
        let before = sessions.len();
        let kept: Vec<SessionRecord> = sessions
            .into_iter()
            .filter(|s| s.status != SessionStatus::Stale)
            .collect();
        let removed = before - kept.len();
        self.repo.save(&kept)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::NewSession;

    fn record(dir: &str) -> SessionRecord {
        SessionRecord::new(NewSession {
            working_dir: PathBuf::from(dir),
            ai_tool: "aider".into(),
            ai_tool_display_name: "Aider".into(),
            ai_tool_version: "unknown".into(),
            server_url: "wss://api.termly.dev".into(),
        })
    }

    fn alive_registry() -> SessionRegistry<InMemoryRepository> {
        SessionRegistry::with_liveness(InMemoryRepository::new(), |_| true)
    }

    #[test]
    fn test_add_and_find_by_prefix() {
        let registry = alive_registry();
        let r = record("/tmp/a");
        let id = r.session_id.clone();
        registry.add(r).unwrap();

        assert_eq!(registry.find(&id).unwrap().unwrap().session_id, id);
        assert_eq!(registry.find(&id[..6]).unwrap().unwrap().session_id, id);
        assert!(registry.find("zzzz").unwrap().is_none());
    }

    #[test]
    fn test_ambiguous_prefix_is_error() {
        let registry = alive_registry();
        let mut a = record("/tmp/a");
        a.session_id = "abc-1".into();
        let mut b = record("/tmp/b");
        b.session_id = "abc-2".into();
        registry.add(a).unwrap();
        registry.add(b).unwrap();
        assert!(registry.find("abc").is_err());
    }

    #[test]
    fn test_one_running_session_per_directory() {
        let registry = alive_registry();
        registry.add(record("/tmp/a")).unwrap();
        let err = registry.add(record("/tmp/a")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::SessionAlreadyRunning { .. })
        ));
        registry.add(record("/tmp/b")).unwrap();
        assert_eq!(registry.running().unwrap().len(), 2);
    }

    #[test]
    fn test_stopped_session_frees_directory() {
        let registry = alive_registry();
        let r = record("/tmp/a");
        let id = r.session_id.clone();
        registry.add(r).unwrap();
        assert!(registry
            .update(&id, |s| s.status = SessionStatus::Stopped)
            .unwrap());
        assert!(registry.by_directory(Path::new("/tmp/a")).unwrap().is_none());
        registry.add(record("/tmp/a")).unwrap();
    }

    #[test]
    fn test_dead_pid_reads_stale_and_is_removed() {
        let registry = SessionRegistry::with_liveness(InMemoryRepository::new(), |_| false);
        registry.repository().save(&[record("/tmp/a")]).unwrap();

        assert!(registry.running().unwrap().is_empty());
        assert_eq!(registry.stale().unwrap().len(), 1);
        assert_eq!(registry.remove_stale().unwrap(), 1);
        assert!(registry.all().unwrap().is_empty());
    }

    #[test]
    fn test_update_and_remove_missing() {
        let registry = alive_registry();
        assert!(!registry.update("nope", |_| {}).unwrap());
        assert!(!registry.remove("nope").unwrap());
    }
}
