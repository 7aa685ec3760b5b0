//! Input validation for command arguments.

use std::path::PathBuf;

use crate::error::SessionError;

/// Resolve `input` (with `~` and `$VAR` expansion) to an existing directory.
///
/// Returns the canonical absolute path.
pub fn validate_directory(input: &str) -> Result<PathBuf, SessionError> {
    if input.trim().is_empty() {
        return Err(SessionError::InvalidDirectory(
            "Directory path is required".into(),
        ));
    }
    let expanded = shellexpand::full(input)
        .map_err(|e| SessionError::InvalidDirectory(format!("cannot expand `{input}`: {e}")))?;
    let path = PathBuf::from(expanded.as_ref());

    let resolved = path.canonicalize().map_err(|e| {
        SessionError::InvalidDirectory(format!("Directory does not exist: {} ({e})", path.display()))
    })?;
    if !resolved.is_dir() {
        return Err(SessionError::InvalidDirectory(format!(
            "Path is not a directory: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// Whether `id` looks like a session id (hyphenated UUID).
#[must_use]
pub fn is_valid_session_id(id: &str) -> bool {
    uuid::Uuid::try_parse(id).is_ok() && id.len() == 36
}

/// Whether `code` is a well-formed pairing code.
///
/// Accepts the registered form (`ABC123`) and the displayed form
/// (`ABC-123`), case-insensitively.
#[must_use]
pub fn is_valid_pairing_code(code: &str) -> bool {
    let compact: String = code.chars().filter(|c| *c != '-').collect();
    let dashes = code.len() - compact.len();
    compact.len() == 6
        && compact.chars().all(|c| c.is_ascii_alphanumeric())
        && (dashes == 0 || (dashes == 1 && code.as_bytes().get(3) == Some(&b'-')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_must_exist() {
        let dir = tempfile::TempDir::new().unwrap();
        let resolved = validate_directory(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap());

        let missing = dir.path().join("nope");
        assert!(matches!(
            validate_directory(missing.to_str().unwrap()),
            Err(SessionError::InvalidDirectory(_))
        ));
        assert!(validate_directory("  ").is_err());
    }

    #[test]
    fn test_file_is_not_a_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        let err = validate_directory(file.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_session_id_format() {
        assert!(is_valid_session_id("0f8fad5b-d9cb-469f-a165-70867728950e"));
        assert!(!is_valid_session_id("0f8fad5bd9cb469fa16570867728950e"));
        assert!(!is_valid_session_id("not-a-uuid"));
    }

    #[test]
    fn test_pairing_code_format() {
        assert!(is_valid_pairing_code("ABC123"));
        assert!(is_valid_pairing_code("abc-123"));
        assert!(!is_valid_pairing_code("AB-C123"));
        assert!(!is_valid_pairing_code("ABC12"));
        assert!(!is_valid_pairing_code("ABC!23"));
    }
}
