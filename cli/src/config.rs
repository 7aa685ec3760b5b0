//! Configuration loading and persistence.
//!
//! Handles reading and writing `<config dir>/config.json`. The config
//! directory defaults to `~/.termly` and is overridden by
//! `TERMLY_CONFIG_DIR`; the session registry and log file live there too.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_BUFFER_CAPACITY, HEARTBEAT_TIMEOUT, MAX_HEARTBEAT_TIMEOUT, MAX_RECONNECT_ATTEMPTS,
};
use crate::env::Environment;

/// Keys accepted by `termly config <key> [value]`.
pub const CONFIG_KEYS: [&str; 7] = [
    "server_url",
    "api_url",
    "default_ai",
    "buffer_capacity",
    "heartbeat_timeout_secs",
    "max_reconnect_attempts",
    "last_updated",
];

/// Configuration for the termly CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// WebSocket relay URL.
    pub server_url: String,
    /// HTTP API URL used for pairing registration.
    pub api_url: String,
    /// AI tool key used when `start` gets no `--ai`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_ai: Option<String>,
    /// Output ring buffer capacity in bytes.
    pub buffer_capacity: usize,
    /// Server silence tolerated before reconnecting, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Reconnection attempts before mirroring is given up.
    pub max_reconnect_attempts: u32,
    /// Time of the last `set`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for Config {
    fn default() -> Self {
        let env = Environment::current();
        Self {
            server_url: env.default_server_url().to_string(),
            api_url: env.default_api_url().to_string(),
            default_ai: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            heartbeat_timeout_secs: HEARTBEAT_TIMEOUT.as_secs(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            last_updated: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `TERMLY_CONFIG_DIR` env var: explicit override
    /// 2. Default: `~/.termly`
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("TERMLY_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".termly")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of `config.json` inside `dir`.
    #[must_use]
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join("config.json")
    }

    /// Loads configuration from the config directory, with environment
    /// variable overrides. A missing or unreadable file yields defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir`, falling back to defaults.
    #[must_use]
    pub fn load_from(dir: &Path) -> Self {
        let path = Self::path_in(dir);
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("[Config] Ignoring malformed {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("TERMLY_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(api_url) = std::env::var("TERMLY_API_URL") {
            self.api_url = api_url;
        }

        if let Ok(buffer_size) = std::env::var("TERMLY_BUFFER_SIZE") {
            match parse_buffer_size(&buffer_size) {
                Some(size) => self.buffer_capacity = size,
                None => log::warn!("[Config] Ignoring TERMLY_BUFFER_SIZE={buffer_size:?}"),
            }
        }
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Persists the current configuration to `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let config_path = Self::path_in(dir);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", config_path.display()))?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Heartbeat timeout as a duration, clamped to `1s..=MAX_HEARTBEAT_TIMEOUT`
    /// for hand-edited files.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(
            self.heartbeat_timeout_secs
                .clamp(1, MAX_HEARTBEAT_TIMEOUT.as_secs()),
        )
    }

    /// Read one key as display text. `None` for unset optional keys.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(match normalize_key(key)? {
            "server_url" => Some(self.server_url.clone()),
            "api_url" => Some(self.api_url.clone()),
            "default_ai" => self.default_ai.clone(),
            "buffer_capacity" => Some(self.buffer_capacity.to_string()),
            "heartbeat_timeout_secs" => Some(self.heartbeat_timeout_secs.to_string()),
            "max_reconnect_attempts" => Some(self.max_reconnect_attempts.to_string()),
            "last_updated" => self.last_updated.map(|t| t.to_rfc3339()),
            _ => None,
        })
    }

    /// Set one key from text and stamp `last_updated`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match normalize_key(key)? {
            "server_url" => self.server_url = value.to_string(),
            "api_url" => self.api_url = value.to_string(),
            "default_ai" => {
                self.default_ai = (!value.is_empty()).then(|| value.to_string());
            }
            "buffer_capacity" => {
                self.buffer_capacity = parse_in_range(key, value, 1, usize::MAX)?;
            }
            "heartbeat_timeout_secs" => {
                self.heartbeat_timeout_secs =
                    parse_in_range(key, value, 1, MAX_HEARTBEAT_TIMEOUT.as_secs())?;
            }
            "max_reconnect_attempts" => {
                self.max_reconnect_attempts = parse_number(key, value)?;
            }
            _ => bail!("`{key}` is read-only"),
        }
        self.last_updated = Some(Utc::now());
        Ok(())
    }
}

/// Accept both snake_case and camelCase key spellings.
fn normalize_key(key: &str) -> Result<&'static str> {
    let snake: String = key
        .chars()
        .flat_map(|c| {
            if c.is_ascii_uppercase() {
                vec!['_', c.to_ascii_lowercase()]
            } else {
                vec![c]
            }
        })
        .collect();
    let snake = snake.replace("default_a_i", "default_ai").replace('-', "_");
    CONFIG_KEYS
        .iter()
        .copied()
        .find(|k| *k == snake)
        .with_context(|| format!("unknown config key `{key}` (expected one of {})", CONFIG_KEYS.join(", ")))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .ok()
        .with_context(|| format!("`{key}` expects a number, got `{value}`"))
}

/// A usable `TERMLY_BUFFER_SIZE`: a positive byte count.
fn parse_buffer_size(raw: &str) -> Option<usize> {
    raw.trim().parse().ok().filter(|size| *size > 0)
}

fn parse_in_range<T>(key: &str, value: &str, min: T, max: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
{
    let number: T = parse_number(key, value)?;
    if number < min || number > max {
        bail!("`{key}` must be between {min} and {max}, got `{value}`");
    }
    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.buffer_capacity, 100_000);
        assert_eq!(config.heartbeat_timeout_secs, 13);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert!(config.default_ai.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip_in_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.set("default_ai", "aider").unwrap();
        config.save_to(dir.path()).unwrap();

        let loaded = Config::load_from(dir.path());
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            let mode = fs::metadata(Config::path_in(dir.path())).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_missing_or_malformed_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(Config::load_from(dir.path()), Config::default());

        fs::write(Config::path_in(dir.path()), "{not json").unwrap();
        assert_eq!(Config::load_from(dir.path()), Config::default());
    }

    #[test]
    fn test_get_and_set_keys() {
        let mut config = Config::default();
        config.set("serverUrl", "ws://localhost:4000").unwrap();
        assert_eq!(config.get("server_url").unwrap().as_deref(), Some("ws://localhost:4000"));

        config.set("defaultAI", "cody").unwrap();
        assert_eq!(config.get("default_ai").unwrap().as_deref(), Some("cody"));

        config.set("buffer_capacity", "5000").unwrap();
        assert_eq!(config.buffer_capacity, 5000);
        assert!(config.last_updated.is_some());
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut config = Config::default();
        assert!(config.set("buffer_capacity", "lots").is_err());
        assert!(config.set("no_such_key", "1").is_err());
        assert!(config.set("last_updated", "now").is_err());
    }

    #[test]
    fn test_zero_buffer_capacity_is_rejected() {
        let mut config = Config::default();
        let err = config.set("buffer_capacity", "0").unwrap_err().to_string();
        assert!(err.contains("between 1 and"), "{err}");
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert!(config.last_updated.is_none());
    }

    #[test]
    fn test_buffer_size_override_must_be_positive() {
        assert_eq!(parse_buffer_size("4096"), Some(4096));
        assert_eq!(parse_buffer_size(" 512 "), Some(512));
        assert_eq!(parse_buffer_size("0"), None);
        assert_eq!(parse_buffer_size("-1"), None);
        assert_eq!(parse_buffer_size("big"), None);
    }

    #[test]
    fn test_heartbeat_timeout_is_bounded() {
        let mut config = Config::default();
        assert!(config.set("heartbeat_timeout_secs", "0").is_err());
        assert!(config
            .set("heartbeat_timeout_secs", &u64::MAX.to_string())
            .is_err());
        assert!(config.set("heartbeat_timeout_secs", "3601").is_err());
        assert_eq!(config.heartbeat_timeout_secs, 13);

        config.set("heartbeat_timeout_secs", "3600").unwrap();
        assert_eq!(config.heartbeat_timeout(), MAX_HEARTBEAT_TIMEOUT);
    }

    #[test]
    fn test_hand_edited_heartbeat_is_clamped() {
        let config = Config {
            heartbeat_timeout_secs: u64::MAX,
            ..Config::default()
        };
        assert_eq!(config.heartbeat_timeout(), MAX_HEARTBEAT_TIMEOUT);

        let config = Config {
            heartbeat_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(1));
    }
}
