//! Destination for outbound text frames.
//!
//! The driver writes through [`MessageSink`] so catch-up and message
//! encoding can be exercised against an in-memory sink in tests.

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::protocol::Outbound;
use crate::ws::WsWriter;

/// Something that accepts JSON text frames.
#[async_trait]
pub trait MessageSink: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Encode and send one protocol message.
    async fn send_message(&mut self, message: &Outbound) -> Result<()> {
        let text = message.to_json().context("failed to encode outbound message")?;
        self.send_text(text).await
    }
}

#[async_trait]
impl MessageSink for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<()> {
        WsWriter::send_text(self, &text).await
    }
}

/// Collects frames in memory.
#[async_trait]
impl MessageSink for Vec<String> {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.push(text);
        Ok(())
    }
}
