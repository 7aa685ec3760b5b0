//! Wire messages exchanged with the relay server.
//!
//! All messages are JSON text frames discriminated by a `type` field.
//! Payload bytes (`output`, `input`, catch-up items) are AES-GCM sealed and
//! base64-encoded; everything else is plaintext metadata the relay routes on.
//!
//! # Message Types
//!
//! - [`Inbound`] - relay/mobile -> agent
//! - [`Outbound`] - agent -> relay/mobile
//! - [`TerminalClose`] - structured close reasons that end the session

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

use crate::ring_buffer::NO_SEQUENCE;

/// Messages received from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// The mobile device accepted the pairing code.
    PairingComplete {
        /// Mobile's DH public value (base64). Older servers call it
        /// `theirPublicKey`.
        #[serde(rename = "publicKey", alias = "theirPublicKey")]
        public_key: String,
        /// Server-assigned session id, superseding the local one.
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
    },
    /// A mobile viewer attached.
    ClientConnected,
    /// The mobile viewer detached.
    ClientDisconnected,
    /// Legacy form of attach + catch-up in one message.
    ClientReconnected {
        /// Last sequence number the mobile has.
        #[serde(rename = "lastSeq", default)]
        last_seq: Option<i64>,
    },
    /// Replay everything after `lastSeq`.
    CatchupRequest {
        /// Last sequence number the mobile has.
        #[serde(rename = "lastSeq", default)]
        last_seq: Option<i64>,
    },
    /// Encrypted keystrokes.
    Input {
        /// Base64 ciphertext with tag.
        data: String,
        /// Base64 IV.
        iv: String,
    },
    /// Mobile viewport size.
    Resize {
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },
    /// Application-level ping; answered with `pong`.
    Ping,
    /// Answer to our own `ping`.
    Pong,
    /// Any type this agent does not know.
    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// Parse a text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PairingComplete { .. } => "pairing_complete",
            Self::ClientConnected => "client_connected",
            Self::ClientDisconnected => "client_disconnected",
            Self::ClientReconnected { .. } => "client_reconnected",
            Self::CatchupRequest { .. } => "catchup_request",
            Self::Input { .. } => "input",
            Self::Resize { .. } => "resize",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown => "unknown",
        }
    }
}

/// Resolve an optional `lastSeq` to a concrete sequence number.
#[must_use]
pub fn last_seq_or_start(last_seq: Option<i64>) -> i64 {
    last_seq.unwrap_or(NO_SEQUENCE)
}

/// Busy/idle state reported in `pong`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliStatus {
    /// The AI tool produced output recently.
    Busy,
    /// No output within the idle threshold.
    Idle,
}

/// One replayed chunk inside a `catchup_batch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    /// Chunk sequence number.
    pub seq: i64,
    /// Base64 ciphertext with tag.
    pub data: String,
    /// Always `true`.
    pub encrypted: bool,
    /// Base64 IV, unique per item.
    pub iv: String,
    /// Original capture time (ms since epoch).
    pub timestamp: i64,
}

/// Messages sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Answer to `ping`.
    Pong {
        /// Send time (ms since epoch).
        timestamp: i64,
        /// Whether the AI tool is currently producing output.
        status: CliStatus,
    },
    /// Agent-side keepalive.
    Ping {
        /// Current session id.
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// One live output chunk.
    Output {
        /// Current session id.
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Chunk sequence number.
        seq: i64,
        /// Always `true`.
        encrypted: bool,
        /// Base64 ciphertext with tag.
        data: String,
        /// Base64 IV.
        iv: String,
        /// Capture time (ms since epoch).
        timestamp: i64,
    },
    /// One batch of replayed chunks.
    CatchupBatch {
        /// Chunks in ascending sequence order.
        batch: Vec<BatchItem>,
        /// Zero-based index of this batch.
        #[serde(rename = "batchIndex")]
        batch_index: usize,
        /// Number of batches in this catch-up.
        #[serde(rename = "totalBatches")]
        total_batches: usize,
    },
    /// Catch-up finished; the mobile is current up to `currentSeq`.
    SyncComplete {
        /// Buffer's current sequence when the catch-up snapshot was taken.
        #[serde(rename = "currentSeq")]
        current_seq: i64,
    },
}

impl Outbound {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Close reasons after which reconnecting cannot help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalClose {
    /// `session_expired` or `session_not_found`.
    pub reason: String,
    /// Human-readable server message (may be empty).
    pub message: String,
}

#[derive(Deserialize)]
struct CloseReasonBody {
    #[serde(alias = "reason")]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Close-reason error codes that end the session.
pub const TERMINAL_CLOSE_REASONS: [&str; 2] = ["session_expired", "session_not_found"];

/// Parse a WebSocket close reason; `Some` only for terminal reasons.
///
/// Unstructured reasons (plain text, empty, unknown codes) return `None`
/// and are treated as transient.
#[must_use]
pub fn parse_terminal_close(reason: &str) -> Option<TerminalClose> {
    let body: CloseReasonBody = serde_json::from_str(reason).ok()?;
    let error = body.error?;
    TERMINAL_CLOSE_REASONS
        .contains(&error.as_str())
        .then(|| TerminalClose {
            reason: error,
            message: body.message.unwrap_or_default(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairing_complete() {
        let msg = Inbound::parse(r#"{"type":"pairing_complete","publicKey":"AQID","sessionId":"srv-1"}"#)
            .unwrap();
        assert_eq!(
            msg,
            Inbound::PairingComplete {
                public_key: "AQID".into(),
                session_id: Some("srv-1".into()),
            }
        );
    }

    #[test]
    fn test_parse_pairing_complete_legacy_field() {
        let msg = Inbound::parse(r#"{"type":"pairing_complete","theirPublicKey":"AQID"}"#).unwrap();
        assert_eq!(
            msg,
            Inbound::PairingComplete {
                public_key: "AQID".into(),
                session_id: None,
            }
        );
    }

    #[test]
    fn test_parse_catchup_and_reconnected() {
        assert_eq!(
            Inbound::parse(r#"{"type":"catchup_request","lastSeq":5}"#).unwrap(),
            Inbound::CatchupRequest { last_seq: Some(5) }
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"client_reconnected"}"#).unwrap(),
            Inbound::ClientReconnected { last_seq: None }
        );
        assert_eq!(last_seq_or_start(None), NO_SEQUENCE);
    }

    #[test]
    fn test_parse_unit_messages_ignore_extra_fields() {
        assert_eq!(
            Inbound::parse(r#"{"type":"ping","timestamp":123}"#).unwrap(),
            Inbound::Ping
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"client_connected","clientId":"m1"}"#).unwrap(),
            Inbound::ClientConnected
        );
    }

    #[test]
    fn test_parse_unknown_type() {
        assert_eq!(
            Inbound::parse(r#"{"type":"server_banner","text":"hi"}"#).unwrap(),
            Inbound::Unknown
        );
    }

    #[test]
    fn test_parse_malformed_is_error() {
        assert!(Inbound::parse("not json").is_err());
        assert!(Inbound::parse(r#"{"type":"resize","cols":"wide"}"#).is_err());
        assert!(Inbound::parse(r#"{"no_type":true}"#).is_err());
    }

    #[test]
    fn test_outbound_output_shape() {
        let json = Outbound::Output {
            session_id: "s1".into(),
            seq: 7,
            encrypted: true,
            data: "Y3Q=".into(),
            iv: "aXY=".into(),
            timestamp: 1_700_000_000_000,
        }
        .to_json()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "output");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["seq"], 7);
        assert_eq!(value["encrypted"], true);
    }

    #[test]
    fn test_outbound_catchup_and_sync_shape() {
        let batch = Outbound::CatchupBatch {
            batch: vec![BatchItem {
                seq: 6,
                data: "x".into(),
                encrypted: true,
                iv: "y".into(),
                timestamp: 1,
            }],
            batch_index: 0,
            total_batches: 2,
        };
        let value: serde_json::Value = serde_json::from_str(&batch.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "catchup_batch");
        assert_eq!(value["batchIndex"], 0);
        assert_eq!(value["totalBatches"], 2);
        assert_eq!(value["batch"][0]["seq"], 6);

        let sync = Outbound::SyncComplete { current_seq: 150 }.to_json().unwrap();
        assert_eq!(sync, r#"{"type":"sync_complete","currentSeq":150}"#);
    }

    #[test]
    fn test_outbound_pong_shape() {
        let pong = Outbound::Pong {
            timestamp: 42,
            status: CliStatus::Busy,
        }
        .to_json()
        .unwrap();
        assert_eq!(pong, r#"{"type":"pong","timestamp":42,"status":"busy"}"#);
    }

    #[test]
    fn test_terminal_close_reasons() {
        let close = parse_terminal_close(r#"{"error":"session_not_found","message":"no such session"}"#)
            .unwrap();
        assert_eq!(close.reason, "session_not_found");
        assert_eq!(close.message, "no such session");

        assert!(parse_terminal_close(r#"{"error":"session_expired"}"#).is_some());
    }

    #[test]
    fn test_transient_close_reasons() {
        assert!(parse_terminal_close("").is_none());
        assert!(parse_terminal_close("going away").is_none());
        assert!(parse_terminal_close(r#"{"error":"server_restart"}"#).is_none());
        assert!(parse_terminal_close(r#"{"message":"bye"}"#).is_none());
    }
}
