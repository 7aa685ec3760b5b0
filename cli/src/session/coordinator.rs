//! Session coordinator: one mirrored session from start to teardown.
//!
//! Wires the key exchange, ring buffer, terminal bridge and channel together
//! for a single working directory.
//!
//! # Lifecycle
//!
//! ```text
//! reject if a session already runs in the directory
//!   ─► DH key pair ─► register pairing code ─► registry: running
//!   ─► ChannelManager::connect (code URL)
//!   ─► Paired ─► spawn child on a PTY, raw mode, forward stdin
//!   ─► loop { channel events | PTY events | signals | stdin }
//!   ─► child exit / invalidation / signal ─► teardown
//! ```
//!
//! Teardown always kills the child, closes the channel (code 1000) and
//! updates the registry record. Losing the relay for good only stops
//! mirroring; the local session keeps running until the child exits.

// Rust guideline compliant 2026-02

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use super::pairing::{self, PairingRequest};
use super::registry::{SessionRegistry, SessionRepository};
use super::state::{NewSession, SessionRecord, SessionStatus};
use super::terminal::{self, LocalSignal, RawModeGuard};
use crate::channel::{ChannelConfig, ChannelEvent, ChannelManager, ReconnectPolicy};
use crate::constants::RECONNECT_BACKOFF;
use crate::crypto::KeyExchange;
use crate::error::SessionError;
use crate::pty::{
    AltScreenTracker, BridgeOutputs, ForwardGate, PtyBridge, PtyEvent, PtySpawnConfig,
    ScreenPolicy,
};
use crate::ring_buffer::{OutputRingBuffer, SharedRingBuffer};

/// What to run inside the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    /// Executable.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Tool key recorded in the registry and sent to the server.
    pub tool_key: String,
    /// Name shown to the user.
    pub display_name: String,
    /// Detected version, or `"unknown"`.
    pub version: String,
}

/// Everything `termly start` decided before the session begins.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Validated absolute working directory.
    pub directory: PathBuf,
    /// Child process.
    pub launch: Launch,
    /// Relay WebSocket URL.
    pub server_url: String,
    /// HTTP API URL for pairing registration.
    pub api_url: String,
    /// Ring buffer capacity in bytes.
    pub buffer_capacity: usize,
    /// Server silence tolerated before reconnecting.
    pub heartbeat_timeout: Duration,
    /// Reconnection attempt budget.
    pub max_reconnect_attempts: u32,
    /// Drive the local terminal (raw mode, stdin, echo, signals).
    pub local_terminal: bool,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The child exited with this code.
    ChildExited(i32),
    /// The server invalidated the session.
    SessionInvalidated {
        /// `session_expired` or `session_not_found`.
        reason: String,
        /// Server message.
        message: String,
    },
    /// A shutdown signal arrived.
    Interrupted,
}

impl SessionOutcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ChildExited(code) => *code,
            Self::SessionInvalidated { .. } => 2,
            Self::Interrupted => 0,
        }
    }

    fn final_status(&self) -> SessionStatus {
        match self {
            Self::SessionInvalidated { .. } => SessionStatus::Failed,
            Self::ChildExited(_) | Self::Interrupted => SessionStatus::Stopped,
        }
    }
}

/// Runs one session against an injected registry.
#[derive(Debug)]
pub struct SessionCoordinator<R: SessionRepository> {
    options: StartOptions,
    registry: SessionRegistry<R>,
    http: reqwest::Client,
}

impl<R: SessionRepository> SessionCoordinator<R> {
    /// Coordinator for `options`.
    pub fn new(options: StartOptions, registry: SessionRegistry<R>) -> Self {
        Self {
            options,
            registry,
            http: reqwest::Client::new(),
        }
    }

    /// The registry this coordinator writes to.
    pub fn registry(&self) -> &SessionRegistry<R> {
        &self.registry
    }

    /// Run the session to completion.
    ///
    /// # Errors
    ///
    /// A zero buffer capacity or [`SessionError::SessionAlreadyRunning`]
    /// before anything is registered. After that: pairing registration
    /// failures, [`SessionError::ConnectFailed`] when the relay cannot be
    /// reached at all, and [`SessionError::SpawnFailed`] when the child
    /// cannot start.
    pub async fn run(&self) -> Result<SessionOutcome> {
        let opts = &self.options;
        if opts.buffer_capacity == 0 {
            bail!("buffer capacity must be at least 1 byte");
        }
        if let Some(existing) = self.registry.by_directory(&opts.directory)? {
            return Err(SessionError::SessionAlreadyRunning {
                directory: existing.working_dir,
                session_id: existing.session_id,
                pid: existing.pid,
            }
            .into());
        }

        let buffer = OutputRingBuffer::shared(opts.buffer_capacity);
        let exchange = Arc::new(KeyExchange::new());
        let code = pairing::generate_pairing_code();
        let mut record = SessionRecord::new(NewSession {
            working_dir: opts.directory.clone(),
            ai_tool: opts.launch.tool_key.clone(),
            ai_tool_display_name: opts.launch.display_name.clone(),
            ai_tool_version: opts.launch.version.clone(),
            server_url: opts.server_url.clone(),
        });

        pairing::register(
            &self.http,
            &opts.api_url,
            &PairingRequest {
                code: code.clone(),
                public_key: exchange.public_key().to_base64(),
                project_name: record.project_name.clone(),
                working_dir: opts.directory.display().to_string(),
                computer_name: record.computer_name.clone(),
                ai_tool: opts.launch.tool_key.clone(),
                ai_tool_version: opts.launch.version.clone(),
            },
        )
        .await?;

        record.fingerprint = Some(exchange.public_key().fingerprint());
        self.registry.add(record.clone())?;
        log::info!(
            "[Session] Session {} registered for {}",
            record.session_id,
            opts.directory.display()
        );

        println!();
        println!("Pairing code: {}", pairing::display_code(&code));
        println!("Enter this code in the Termly mobile app to connect.");
        println!("Project: {}  Tool: {}", record.project_name, opts.launch.display_name);
        println!();

        let gate = ForwardGate::new();
        let mut channel_config = ChannelConfig::new(&opts.server_url, &code, &record.session_id);
        channel_config.heartbeat_timeout = opts.heartbeat_timeout;
        channel_config.reconnect =
            ReconnectPolicy::new(opts.max_reconnect_attempts, RECONNECT_BACKOFF.to_vec());
        let redacted_url = format!("{}/ws/agent", channel_config.server_url.trim_end_matches('/'));

        let (mut channel, channel_events) = ChannelManager::connect(
            channel_config,
            Arc::clone(&exchange),
            Arc::clone(&buffer),
            gate.clone(),
        );

        let mut live = LiveSession {
            options: opts,
            registry: &self.registry,
            session_id: record.session_id.clone(),
            exchange,
            buffer,
            gate,
            screen: Arc::new(AltScreenTracker::new()),
            bridge: None,
            raw_mode: None,
            pty_events: None,
            stdin: None,
            mobile_drives_size: false,
        };

        let result = live.event_loop(&channel, channel_events, &redacted_url).await;

        // Teardown: child first so no output races the close frame.
        if let Some(bridge) = live.bridge.take() {
            bridge.kill();
        }
        live.raw_mode = None;
        channel.close().await;

        let status = match &result {
            Ok(outcome) => outcome.final_status(),
            Err(_) => SessionStatus::Failed,
        };
        if let Err(e) = self.registry.update(&live.session_id, |r| {
            r.status = status;
            r.mobile_connected = false;
        }) {
            log::warn!("[Session] Failed to update registry: {e:#}");
        }
        log::info!("[Session] Session {} ended ({status})", live.session_id);
        result
    }
}

/// Mutable state of a running session.
struct LiveSession<'a, R: SessionRepository> {
    options: &'a StartOptions,
    registry: &'a SessionRegistry<R>,
    session_id: String,
    exchange: Arc<KeyExchange>,
    buffer: SharedRingBuffer,
    gate: ForwardGate,
    screen: Arc<dyn ScreenPolicy>,
    bridge: Option<PtyBridge>,
    raw_mode: Option<RawModeGuard>,
    pty_events: Option<mpsc::UnboundedReceiver<PtyEvent>>,
    stdin: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    mobile_drives_size: bool,
}

enum Wake {
    Channel(Option<ChannelEvent>),
    Pty(Option<PtyEvent>),
    Signal(Option<LocalSignal>),
    Stdin(Option<Vec<u8>>),
}

/// Next item from an optional receiver; pending forever when absent.
async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<R: SessionRepository> LiveSession<'_, R> {
    async fn event_loop(
        &mut self,
        channel: &ChannelManager,
        channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
        redacted_url: &str,
    ) -> Result<SessionOutcome> {
        let mut channel_events = Some(channel_events);
        let mut signals = None;
        let mut signal_handle = None;
        if self.options.local_terminal {
            let (handle, rx) = terminal::spawn_signal_listener()?;
            signals = Some(rx);
            signal_handle = Some(handle);
        }
        scopeguard::defer! {
            if let Some(handle) = signal_handle.as_ref() {
                handle.close();
            }
        }

        loop {
            let wake = tokio::select! {
                event = recv_opt(&mut channel_events) => Wake::Channel(event),
                event = recv_opt(&mut self.pty_events) => Wake::Pty(event),
                signal = recv_opt(&mut signals) => Wake::Signal(signal),
                bytes = recv_opt(&mut self.stdin) => Wake::Stdin(bytes),
            };

            match wake {
                Wake::Channel(Some(event)) => {
                    if let Some(outcome) = self.on_channel_event(event, redacted_url)? {
                        return Ok(outcome);
                    }
                }
                Wake::Channel(None) => {
                    log::info!("[Session] Channel stopped; local session continues");
                    channel_events = None;
                    if self.bridge.is_none() {
                        // Never paired, so there is nothing left to run.
                        return Ok(SessionOutcome::Interrupted);
                    }
                }
                Wake::Pty(Some(PtyEvent::Output(chunk))) => channel.send_output(chunk),
                Wake::Pty(Some(PtyEvent::Exited { exit_code })) => {
                    self.raw_mode = None;
                    self.notice(&format!(
                        "{} exited with code {exit_code}",
                        self.options.launch.display_name
                    ));
                    return Ok(SessionOutcome::ChildExited(exit_code));
                }
                Wake::Pty(None) => self.pty_events = None,
                Wake::Signal(Some(LocalSignal::WindowChanged)) => {
                    if !self.mobile_drives_size {
                        self.resize_to_local();
                    }
                }
                Wake::Signal(Some(LocalSignal::Shutdown(signal))) => {
                    log::info!("[Session] Shutting down on signal {signal}");
                    return Ok(SessionOutcome::Interrupted);
                }
                Wake::Signal(None) => signals = None,
                Wake::Stdin(Some(bytes)) => {
                    if let Some(bridge) = self.bridge.as_ref() {
                        bridge.write(&bytes);
                    }
                }
                Wake::Stdin(None) => self.stdin = None,
            }
        }
    }

    fn on_channel_event(
        &mut self,
        event: ChannelEvent,
        redacted_url: &str,
    ) -> Result<Option<SessionOutcome>> {
        match event {
            ChannelEvent::Connected => {
                println!("Connected to relay. Waiting for the mobile app to pair...");
            }
            ChannelEvent::Paired { session_id } => {
                self.adopt_session_id(session_id);
                self.start_child()?;
            }
            ChannelEvent::MobileConnected => self.set_mobile_connected(true),
            ChannelEvent::MobileDisconnected => self.set_mobile_connected(false),
            ChannelEvent::Input(bytes) => {
                if let Some(bridge) = self.bridge.as_ref() {
                    bridge.write(&bytes);
                }
            }
            ChannelEvent::Resize { cols, rows } => {
                if let Some(bridge) = self.bridge.as_ref() {
                    if bridge.resize(cols, rows) {
                        self.mobile_drives_size = true;
                    }
                }
            }
            ChannelEvent::RestoreLocalSize => {
                self.mobile_drives_size = false;
                self.resize_to_local();
            }
            ChannelEvent::Reconnecting {
                attempt,
                max_attempts,
                delay,
            } => self.notice(&format!(
                "Connection lost. Reconnecting in {}s (attempt {attempt}/{max_attempts})...",
                delay.as_secs()
            )),
            ChannelEvent::Reconnected => self.notice("Reconnected."),
            ChannelEvent::ReconnectFailed { attempts } => self.notice(&format!(
                "Could not reconnect after {attempts} attempts. Mirroring stopped; the local session continues."
            )),
            ChannelEvent::SessionInvalidated { reason, message } => {
                self.raw_mode = None;
                self.notice(&format!("Session ended by server ({reason}): {message}"));
                return Ok(Some(SessionOutcome::SessionInvalidated { reason, message }));
            }
            ChannelEvent::ConnectFailed { reason } => {
                return Err(SessionError::ConnectFailed {
                    url: redacted_url.to_string(),
                    reason,
                }
                .into());
            }
        }
        Ok(None)
    }

    fn adopt_session_id(&mut self, session_id: String) {
        if session_id == self.session_id {
            return;
        }
        let old = std::mem::replace(&mut self.session_id, session_id.clone());
        match self.registry.update(&old, |r| r.session_id = session_id) {
            Ok(_) => log::info!("[Session] Session id superseded by server: {}", self.session_id),
            Err(e) => log::warn!("[Session] Failed to record server session id: {e:#}"),
        }
    }

    fn start_child(&mut self) -> Result<()> {
        if self.bridge.is_some() {
            return Ok(());
        }
        let opts = self.options;
        println!();
        println!("Paired. End-to-end encryption enabled (AES-256-GCM, DH-2048).");
        if let Some(fp) = self.exchange.peer_fingerprint() {
            println!("Peer fingerprint: {fp}");
        }
        println!("Session ID: {}", self.session_id);
        println!("Starting {}...", opts.launch.display_name);
        println!();

        let (cols, rows) = if opts.local_terminal {
            terminal::local_size()
        } else {
            crate::constants::DEFAULT_TERMINAL_SIZE
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let local_output: Option<Box<dyn Write + Send>> = if opts.local_terminal {
            Some(Box::new(std::io::stdout()))
        } else {
            None
        };

        let bridge = PtyBridge::start(
            PtySpawnConfig {
                command: opts.launch.command.clone(),
                args: opts.launch.args.clone(),
                cwd: opts.directory.clone(),
                cols,
                rows,
                env: std::collections::HashMap::new(),
            },
            BridgeOutputs {
                buffer: Arc::clone(&self.buffer),
                local_output,
                events: events_tx,
                screen: Arc::clone(&self.screen),
                gate: self.gate.clone(),
            },
        )?;

        if opts.local_terminal && terminal::stdin_is_tty() {
            self.raw_mode = Some(RawModeGuard::enable()?);
        }
        if opts.local_terminal {
            self.stdin = Some(terminal::spawn_stdin_forwarder()?);
        }
        self.pty_events = Some(events_rx);
        self.bridge = Some(bridge);
        Ok(())
    }

    fn set_mobile_connected(&self, connected: bool) {
        log::info!(
            "[Session] Mobile {}",
            if connected { "connected" } else { "disconnected" }
        );
        if let Err(e) = self
            .registry
            .update(&self.session_id, |r| r.mobile_connected = connected)
        {
            log::warn!("[Session] Failed to update registry: {e:#}");
        }
    }

    fn resize_to_local(&self) {
        if !self.options.local_terminal {
            return;
        }
        if let Some(bridge) = self.bridge.as_ref() {
            let (cols, rows) = terminal::local_size();
            bridge.resize(cols, rows);
        }
    }

    /// Status line on stderr, suppressed while a full-screen app owns the
    /// terminal.
    fn notice(&self, text: &str) {
        log::info!("[Session] {text}");
        if !self.options.local_terminal || self.screen.is_full_screen_application() {
            return;
        }
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "\r\n[termly] {text}\r\n");
        let _ = stderr.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(SessionOutcome::ChildExited(3).exit_code(), 3);
        assert_eq!(
            SessionOutcome::SessionInvalidated {
                reason: "session_expired".into(),
                message: String::new()
            }
            .exit_code(),
            2
        );
        assert_eq!(SessionOutcome::Interrupted.exit_code(), 0);
    }

    #[test]
    fn test_outcome_final_status() {
        assert_eq!(SessionOutcome::ChildExited(0).final_status(), SessionStatus::Stopped);
        assert_eq!(SessionOutcome::Interrupted.final_status(), SessionStatus::Stopped);
        assert_eq!(
            SessionOutcome::SessionInvalidated {
                reason: "session_not_found".into(),
                message: String::new()
            }
            .final_status(),
            SessionStatus::Failed
        );
    }
}
