//! Relay socket.
//!
//! One connection to `<server>/ws/agent`, split so the channel driver can
//! wait on inbound frames while it writes. Only the driver opens sockets;
//! integration tests talk to the same halves from a local relay.
//!
//! The relay ends a session by closing with a JSON reason
//! (`{"error":"session_not_found", ...}`), so [`WsMessage::Close`] keeps the
//! code and reason exactly as received. A close without a frame reads as
//! [`CLOSE_NO_STATUS`], which the channel treats as a transient drop.

// Rust guideline compliant 2026-02

use std::borrow::Cow;

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type RelayStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Code the relay "sent" when its close frame had no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Code for an intentional shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Inbound frame from the relay.
#[derive(Debug)]
pub enum WsMessage {
    /// JSON protocol message.
    Text(String),
    /// Binary frame; the protocol has none, counted as liveness.
    Binary(Vec<u8>),
    /// Transport ping; answered with a pong by the driver.
    Ping(Vec<u8>),
    /// Transport pong.
    Pong(Vec<u8>),
    /// The relay closed the socket.
    Close {
        /// Close code as sent, or [`CLOSE_NO_STATUS`].
        code: u16,
        /// Close reason as sent. Session-level failures carry JSON here.
        reason: String,
    },
}

/// Outbound half of the relay socket.
#[derive(Debug)]
pub struct WsWriter {
    sink: SplitSink<RelayStream, Message>,
}

impl WsWriter {
    /// Send one protocol message.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .context("relay send failed")
    }

    /// Answer a transport ping.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(Message::Pong(data))
            .await
            .context("relay pong failed")
    }

    /// Send a close frame. `close()` on the channel uses [`CLOSE_NORMAL`].
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .context("relay close failed")
    }
}

/// Inbound half of the relay socket.
#[derive(Debug)]
pub struct WsReader {
    stream: SplitStream<RelayStream>,
}

impl WsReader {
    /// Next frame, or `None` once the socket is gone.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(anyhow::anyhow!("relay read error: {e}"))),
            };
            return Some(Ok(match message {
                Message::Text(text) => WsMessage::Text(text),
                Message::Binary(data) => WsMessage::Binary(data),
                Message::Ping(data) => WsMessage::Ping(data),
                Message::Pong(data) => WsMessage::Pong(data),
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                        (f.code.into(), f.reason.into_owned())
                    });
                    WsMessage::Close { code, reason }
                }
                Message::Frame(_) => continue,
            }));
        }
    }
}

/// Open a socket to `url` (a `?code=` or `?sessionId=` agent URL).
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .context("relay handshake failed")?;
    let (sink, stream) = stream.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// `https://` → `wss://`, `http://` → `ws://`; socket URLs pass through.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Inverse of [`http_to_ws_scheme`], used to derive the pairing API URL.
#[must_use]
pub fn ws_to_http_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    /// Accept one socket on a local port and hand it to `serve`.
    async fn relay<F, Fut>(serve: F) -> (String, tokio::task::JoinHandle<()>)
    where
        F: FnOnce(WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/agent?code=ABC123", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(tokio_tungstenite::accept_async(stream).await.unwrap()).await;
        });
        (url, task)
    }

    #[test]
    fn test_scheme_conversion() {
        assert_eq!(http_to_ws_scheme("https://api.termly.dev"), "wss://api.termly.dev");
        assert_eq!(http_to_ws_scheme("http://localhost:3000"), "ws://localhost:3000");
        assert_eq!(http_to_ws_scheme("wss://api.termly.dev"), "wss://api.termly.dev");
        assert_eq!(ws_to_http_scheme("wss://dev-api.termly.dev"), "https://dev-api.termly.dev");
        assert_eq!(ws_to_http_scheme("ws://localhost:3000"), "http://localhost:3000");
        assert_eq!(ws_to_http_scheme("https://x.dev"), "https://x.dev");
    }

    #[tokio::test]
    async fn test_connect_failures() {
        assert!(connect("not-a-url").await.is_err());
        assert!(connect("ws://127.0.0.1:1/ws/agent?code=ABC123").await.is_err());
    }

    #[tokio::test]
    async fn test_text_both_ways() {
        let (url, server) = relay(|mut ws| async move {
            ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
            match ws.next().await {
                Some(Ok(Message::Text(text))) => assert!(text.contains("pong")),
                other => panic!("expected pong text, got {other:?}"),
            }
        })
        .await;

        let (mut writer, mut reader) = connect(&url).await.unwrap();
        match reader.recv().await {
            Some(Ok(WsMessage::Text(text))) => assert_eq!(text, r#"{"type":"ping"}"#),
            other => panic!("expected text, got {other:?}"),
        }
        writer.send_text(r#"{"type":"pong"}"#).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_structured_close_reason_is_kept() {
        let (url, server) = relay(|mut ws| async move {
            let frame = CloseFrame {
                code: CloseCode::from(4004),
                reason: Cow::Borrowed(r#"{"error":"session_not_found","message":"gone"}"#),
            };
            ws.close(Some(frame)).await.unwrap();
        })
        .await;

        let (_writer, mut reader) = connect(&url).await.unwrap();
        match reader.recv().await {
            Some(Ok(WsMessage::Close { code, reason })) => {
                assert_eq!(code, 4004);
                assert_eq!(reason, r#"{"error":"session_not_found","message":"gone"}"#);
            }
            other => panic!("expected close, got {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_without_frame_reads_no_status() {
        let (url, server) = relay(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let (_writer, mut reader) = connect(&url).await.unwrap();
        match reader.recv().await {
            Some(Ok(WsMessage::Close { code, reason })) => {
                assert_eq!(code, CLOSE_NO_STATUS);
                assert!(reason.is_empty());
            }
            other => panic!("expected close, got {other:?}"),
        }
        server.await.unwrap();
    }
}
