//! `termly config [KEY] [VALUE] [--reset]`.

use std::path::Path;

use anyhow::Result;

use crate::config::{Config, CONFIG_KEYS};

/// What a `config` invocation asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction<'a> {
    /// Print every key.
    Show,
    /// Print one key.
    Get(&'a str),
    /// Change one key.
    Set(&'a str, &'a str),
    /// Restore defaults.
    Reset,
}

impl<'a> ConfigAction<'a> {
    /// Interpret the command-line arguments.
    #[must_use]
    pub fn from_args(key: Option<&'a str>, value: Option<&'a str>, reset: bool) -> Self {
        match (reset, key, value) {
            (true, _, _) => Self::Reset,
            (false, Some(key), Some(value)) => Self::Set(key, value),
            (false, Some(key), None) => Self::Get(key),
            (false, None, _) => Self::Show,
        }
    }
}

/// Apply `action` to the config stored in `dir` and return what to print.
pub fn execute_in(dir: &Path, action: &ConfigAction<'_>) -> Result<String> {
    match action {
        ConfigAction::Show => {
            let config = Config::load_from(dir);
            let mut out = String::new();
            for key in CONFIG_KEYS {
                let value = config.get(key)?.unwrap_or_else(|| "(not set)".to_string());
                out.push_str(&format!("{key} = {value}\n"));
            }
            Ok(out)
        }
        ConfigAction::Get(key) => {
            let config = Config::load_from(dir);
            Ok(format!(
                "{}\n",
                config.get(key)?.unwrap_or_else(|| "(not set)".to_string())
            ))
        }
        ConfigAction::Set(key, value) => {
            let mut config = Config::load_from(dir);
            config.set(key, value)?;
            config.save_to(dir)?;
            log::info!("[Config] {key} updated");
            Ok(format!("{key} = {value}\n"))
        }
        ConfigAction::Reset => {
            Config::default().save_to(dir)?;
            log::info!("[Config] Reset to defaults");
            Ok("Configuration reset to defaults.\n".to_string())
        }
    }
}

/// Run against the default config directory and print the result.
pub fn run(key: Option<&str>, value: Option<&str>, reset: bool) -> Result<()> {
    let dir = Config::config_dir()?;
    print!("{}", execute_in(&dir, &ConfigAction::from_args(key, value, reset))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_args() {
        assert_eq!(ConfigAction::from_args(None, None, false), ConfigAction::Show);
        assert_eq!(ConfigAction::from_args(Some("k"), None, false), ConfigAction::Get("k"));
        assert_eq!(
            ConfigAction::from_args(Some("k"), Some("v"), false),
            ConfigAction::Set("k", "v")
        );
        assert_eq!(ConfigAction::from_args(Some("k"), Some("v"), true), ConfigAction::Reset);
    }

    #[test]
    fn test_set_get_and_reset_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();

        execute_in(dir.path(), &ConfigAction::Set("defaultAi", "aider")).unwrap();
        let got = execute_in(dir.path(), &ConfigAction::Get("default_ai")).unwrap();
        assert_eq!(got.trim(), "aider");

        let shown = execute_in(dir.path(), &ConfigAction::Show).unwrap();
        assert!(shown.contains("default_ai = aider"));
        assert!(!shown.contains("last_updated = (not set)"));

        execute_in(dir.path(), &ConfigAction::Reset).unwrap();
        let got = execute_in(dir.path(), &ConfigAction::Get("default_ai")).unwrap();
        assert_eq!(got.trim(), "(not set)");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(execute_in(dir.path(), &ConfigAction::Set("buffer_capacity", "lots")).is_err());
        assert!(execute_in(dir.path(), &ConfigAction::Set("last_updated", "now")).is_err());
        assert!(execute_in(dir.path(), &ConfigAction::Get("nope")).is_err());
    }
}
