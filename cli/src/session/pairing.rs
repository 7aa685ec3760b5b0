//! Pairing code generation and registration.
//!
//! The agent registers a fresh 6-character code together with its
//! Diffie-Hellman public value before dialing the relay. The mobile app
//! enters the code, the relay matches both sides and answers the agent with
//! `pairing_complete`.

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a pairing code.
pub const CODE_LENGTH: usize = 6;

/// Random pairing code (`A-Z0-9`, no separator).
#[must_use]
pub fn generate_pairing_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// `ABC123` shown as `ABC-123`.
#[must_use]
pub fn display_code(code: &str) -> String {
    if code.len() == CODE_LENGTH && code.is_ascii() {
        format!("{}-{}", &code[..3], &code[3..])
    } else {
        code.to_string()
    }
}

/// Body of `POST /api/pairing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    /// Pairing code.
    pub code: String,
    /// Base64 DH public value.
    pub public_key: String,
    /// Project (directory) name.
    pub project_name: String,
    /// Absolute working directory.
    pub working_dir: String,
    /// Host name.
    pub computer_name: String,
    /// AI tool key.
    pub ai_tool: String,
    /// AI tool version.
    pub ai_tool_version: String,
}

#[derive(Debug, Deserialize)]
struct ValidationDetail {
    #[serde(default)]
    field: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<ValidationDetail>,
}

/// Turn an error response body into one readable line.
fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return format!("server returned {status}");
    };
    let mut text = format!("server returned {status}");
    if let Some(headline) = parsed.message.or(parsed.error) {
        text.push_str(&format!(": {headline}"));
    }
    for detail in parsed.details {
        text.push_str(&format!("; {}: {}", detail.field, detail.message));
    }
    text
}

/// Register `request` with the API at `api_url`.
///
/// # Errors
///
/// Network failures and non-2xx responses. The error text includes the
/// server's validation details when the body carries them.
pub async fn register(client: &reqwest::Client, api_url: &str, request: &PairingRequest) -> Result<()> {
    let url = format!("{}/api/pairing", api_url.trim_end_matches('/'));
    log::debug!("[Pairing] Registering code with {url}");

    let response = client
        .post(&url)
        .header("X-API-Type", "cli")
        .json(request)
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;

    let status = response.status();
    if status.is_success() {
        log::info!("[Pairing] Pairing code registered");
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    let reason = describe_failure(status, &body);
    log::error!("[Pairing] Registration failed: {reason}");
    bail!("failed to register pairing code: {reason}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_alphabet_and_length() {
        for _ in 0..100 {
            let code = generate_pairing_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
            assert!(crate::validation::is_valid_pairing_code(&code));
        }
    }

    #[test]
    fn test_display_code() {
        assert_eq!(display_code("ABC123"), "ABC-123");
        assert_eq!(display_code("odd"), "odd");
    }

    #[test]
    fn test_request_field_names() {
        let json = serde_json::to_value(PairingRequest {
            code: "ABC123".into(),
            public_key: "AQID".into(),
            project_name: "p".into(),
            working_dir: "/p".into(),
            computer_name: "host".into(),
            ai_tool: "aider".into(),
            ai_tool_version: "1.0".into(),
        })
        .unwrap();
        for key in ["code", "publicKey", "projectName", "workingDir", "computerName", "aiTool", "aiToolVersion"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_describe_failure_includes_details() {
        let text = describe_failure(
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"invalid","details":[{"field":"code","message":"already taken"}]}"#,
        );
        assert!(text.contains("422"));
        assert!(text.contains("invalid"));
        assert!(text.contains("code: already taken"));

        let plain = describe_failure(reqwest::StatusCode::BAD_GATEWAY, "<html>");
        assert!(plain.contains("502"));
    }
}
