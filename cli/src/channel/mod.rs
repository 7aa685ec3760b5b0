//! Channel manager: the agent's single WebSocket link to the relay.
//!
//! Owns the connection lifecycle, liveness, reconnection, catch-up replay
//! and message encoding. Protocol decisions live in [`machine`]; this
//! module only performs their effects.
//!
//! # Architecture
//!
//! ```text
//! ChannelManager (handle, owned by the coordinator)
//!  ├── commands ──► driver task
//!  │                 ├── ChannelMachine  (pure state machine)
//!  │                 ├── WsWriter / WsReader (current socket)
//!  │                 ├── TimerSet (heartbeat, reconnect, restore, ping)
//!  │                 └── KeyExchange / ring buffer / ForwardGate
//!  ◄── ChannelEvent stream
//! ```
//!
//! The driver waits on commands, the connect attempt in flight, the socket
//! and the timers with one `tokio::select!`, turns whichever wakes first
//! into a [`ChannelInput`], and runs the resulting effects. Effects that
//! produce new inputs (pairing) are queued and dispatched in order.
//!
//! # Usage
//!
//! ```ignore
//! let config = ChannelConfig::new(server_url, &code, &session_id);
//! let (channel, mut events) =
//!     ChannelManager::connect(config, exchange, buffer, gate);
//!
//! while let Some(event) = events.recv().await {
//!     // ChannelEvent::Paired, Input, Resize, ...
//! }
//! channel.send_output(chunk);
//! channel.close().await;
//! ```

// Rust guideline compliant 2026-02

pub mod activity;
pub mod backoff;
pub mod catchup;
pub mod machine;
pub mod protocol;
pub mod sink;
pub mod timers;

pub use backoff::ReconnectPolicy;
pub use catchup::{CatchUpSettings, CatchUpSummary};
pub use machine::{
    ChannelEvent, ChannelInput, ChannelMachine, ConnectionState, Effect, FailureReason,
};
pub use protocol::{Inbound, Outbound};
pub use timers::TimerKind;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::constants::{
    CATCHUP_BATCH_DELAY, CATCHUP_BATCH_SIZE, CLI_IDLE_THRESHOLD, CONNECT_TIMEOUT,
    HEARTBEAT_GRACE_FACTOR, HEARTBEAT_TIMEOUT, PING_INTERVAL, RESTORE_RESIZE_DELAY,
};
use crate::crypto::{open_from_wire, seal_for_wire, KeyExchange};
use crate::pty::ForwardGate;
use crate::ring_buffer::{OutputChunk, SharedRingBuffer};
use crate::ws::{self, WsMessage, WsReader, WsWriter};
use activity::CliActivity;
use sink::MessageSink;
use timers::TimerSet;

/// Close code used when the socket vanished without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

/// Everything the channel needs to know before connecting.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Relay base URL (`ws://` or `wss://`).
    pub server_url: String,
    /// Pairing code for the first connection.
    pub pairing_code: String,
    /// Local session id, used for reconnection until the server assigns one.
    pub session_id: String,
    /// Maximum silence before the socket is considered dead.
    pub heartbeat_timeout: Duration,
    /// Multiplier on `heartbeat_timeout` right after a (re)connect.
    pub heartbeat_grace_factor: u32,
    /// Interval between agent-side `ping` messages.
    pub ping_interval: Duration,
    /// Delay before restoring the local size after the mobile leaves.
    pub restore_resize_delay: Duration,
    /// Upper bound on one WebSocket handshake.
    pub connect_timeout: Duration,
    /// Attempt budget and backoff schedule.
    pub reconnect: ReconnectPolicy,
    /// Catch-up batching.
    pub catch_up: CatchUpSettings,
    /// Output silence after which `pong` reports `idle`.
    pub idle_threshold: Duration,
}

impl ChannelConfig {
    /// Config with protocol defaults.
    #[must_use]
    pub fn new(
        server_url: impl Into<String>,
        pairing_code: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            server_url: ws::http_to_ws_scheme(&server_url.into()),
            pairing_code: pairing_code.into(),
            session_id: session_id.into(),
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            heartbeat_grace_factor: HEARTBEAT_GRACE_FACTOR,
            ping_interval: PING_INTERVAL,
            restore_resize_delay: RESTORE_RESIZE_DELAY,
            connect_timeout: CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            catch_up: CatchUpSettings {
                batch_size: CATCHUP_BATCH_SIZE,
                batch_delay: CATCHUP_BATCH_DELAY,
            },
            idle_threshold: CLI_IDLE_THRESHOLD,
        }
    }

    /// URL of the first connection.
    #[must_use]
    pub fn pairing_url(&self) -> String {
        machine::pairing_url(&self.server_url, &self.pairing_code)
    }

    /// URL for reconnecting to `session_id`.
    #[must_use]
    pub fn session_url(&self, session_id: &str) -> String {
        machine::session_url(&self.server_url, session_id)
    }
}

/// Hide the pairing code in URLs written to logs.
fn redact_url(url: &str) -> String {
    match url.split_once("code=") {
        Some((head, _)) => format!("{head}code=******"),
        None => url.to_string(),
    }
}

/// Observable channel status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Session id in effect.
    pub session_id: String,
    /// Whether a mobile viewer is attached.
    pub mobile_connected: bool,
}

#[derive(Debug)]
enum Command {
    Output(OutputChunk),
    Close,
}

/// Handle to a running channel.
#[derive(Debug)]
pub struct ChannelManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
    task: Option<JoinHandle<()>>,
}

impl ChannelManager {
    /// Start the channel and begin the initial connection.
    ///
    /// Must be called from within a tokio runtime. Events stop when the
    /// channel reaches `Failed` or `Closed`.
    pub fn connect(
        config: ChannelConfig,
        exchange: Arc<KeyExchange>,
        buffer: SharedRingBuffer,
        gate: ForwardGate,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let machine = ChannelMachine::new(&config);
        let (status_tx, status_rx) = watch::channel(ChannelStatus {
            state: machine.state().clone(),
            session_id: machine.session_id().to_string(),
            mobile_connected: false,
        });

        let driver = Driver {
            activity: CliActivity::new(config.idle_threshold),
            config,
            machine,
            exchange,
            buffer,
            gate,
            writer: None,
            reader: None,
            pending: None,
            timers: TimerSet::new(),
            last_sent_seq: -1,
            commands: command_rx,
            events: event_tx,
            status: status_tx,
        };
        let task = tokio::spawn(driver.run());

        (
            Self {
                commands: command_tx,
                status: status_rx,
                task: Some(task),
            },
            event_rx,
        )
    }

    /// Hand a PTY output chunk to the channel.
    ///
    /// Sent only while active with a mobile attached and a key established;
    /// otherwise it stays in the ring buffer for catch-up.
    pub fn send_output(&self, chunk: OutputChunk) {
        if self.commands.send(Command::Output(chunk)).is_err() {
            log::trace!("[Channel] Output after channel stopped; dropped");
        }
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state.clone()
    }

    /// Close with code 1000, cancel every timer, and wait for the driver
    /// to stop. Idempotent.
    pub async fn close(&mut self) {
        // The driver may already be gone after a terminal failure.
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("[Channel] Driver task ended abnormally: {e}");
            }
        }
    }
}

/// What woke the driver.
enum Wake {
    Command(Option<Command>),
    Connected(Result<(WsWriter, WsReader)>),
    Frame(Option<Result<WsMessage>>),
    Timer(TimerKind),
}

type ConnectTask = JoinHandle<Result<(WsWriter, WsReader)>>;

struct Driver {
    config: ChannelConfig,
    machine: ChannelMachine,
    exchange: Arc<KeyExchange>,
    buffer: SharedRingBuffer,
    gate: ForwardGate,
    activity: CliActivity,

    writer: Option<WsWriter>,
    reader: Option<WsReader>,
    pending: Option<ConnectTask>,
    timers: TimerSet,
    /// Highest sequence already delivered (live or by catch-up).
    last_sent_seq: i64,

    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    status: watch::Sender<ChannelStatus>,
}

/// Resolve the connect attempt in flight; pending forever when idle.
async fn connect_result(pending: &mut Option<ConnectTask>) -> Result<(WsWriter, WsReader)> {
    let Some(task) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let result = task.await;
    *pending = None;
    result.map_err(|e| anyhow!("connect task failed: {e}"))?
}

/// Next frame from the socket; pending forever when there is none.
async fn next_frame(reader: &mut Option<WsReader>) -> Option<Result<WsMessage>> {
    match reader.as_mut() {
        Some(reader) => reader.recv().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self) {
        self.dispatch(ChannelInput::ConnectRequested).await;

        while !self.machine.state().is_terminal() {
            // Buffered frames win over timers that expired while a
            // catch-up replay held this loop.
            let wake = tokio::select! {
                biased;
                frame = next_frame(&mut self.reader) => Wake::Frame(frame),
                result = connect_result(&mut self.pending) => Wake::Connected(result),
                command = self.commands.recv() => Wake::Command(command),
                kind = self.timers.fired() => Wake::Timer(kind),
            };

            let input = match wake {
                Wake::Command(Some(Command::Output(chunk))) => {
                    self.activity.record_output();
                    ChannelInput::Output(chunk)
                }
                Wake::Command(Some(Command::Close) | None) => ChannelInput::CloseRequested,
                Wake::Connected(Ok((writer, reader))) => {
                    self.writer = Some(writer);
                    self.reader = Some(reader);
                    ChannelInput::Opened
                }
                Wake::Connected(Err(e)) => ChannelInput::OpenFailed {
                    reason: format!("{e:#}"),
                },
                Wake::Frame(frame) => match self.frame_to_input(frame).await {
                    Some(input) => input,
                    None => continue,
                },
                Wake::Timer(kind) => ChannelInput::TimerFired(kind),
            };
            self.dispatch(input).await;
        }

        self.drop_socket();
        log::info!("[Channel] Stopped ({})", self.machine.state());
    }

    async fn frame_to_input(&mut self, frame: Option<Result<WsMessage>>) -> Option<ChannelInput> {
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                let message = Inbound::parse(&text).unwrap_or_else(|e| {
                    log::warn!("[Channel] Ignoring malformed message: {e}");
                    Inbound::Unknown
                });
                log::trace!("[Channel] <- {}", message.kind());
                Some(ChannelInput::Message(message))
            }
            Some(Ok(WsMessage::Ping(data))) => {
                if let Some(writer) = self.writer.as_mut() {
                    if let Err(e) = writer.send_pong(data).await {
                        log::debug!("[Channel] Failed to answer ws ping: {e:#}");
                    }
                }
                Some(ChannelInput::Liveness)
            }
            Some(Ok(WsMessage::Pong(_) | WsMessage::Binary(_))) => Some(ChannelInput::Liveness),
            Some(Ok(WsMessage::Close { code, reason })) => {
                log::info!("[Channel] Server closed connection: code={code} reason={reason}");
                self.drop_socket();
                Some(ChannelInput::Closed { code, reason })
            }
            Some(Err(e)) => {
                log::warn!("[Channel] {e:#}");
                self.drop_socket();
                Some(ChannelInput::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: String::new(),
                })
            }
            None => {
                if self.reader.is_none() {
                    return None;
                }
                self.drop_socket();
                Some(ChannelInput::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: String::new(),
                })
            }
        }
    }

    /// Feed `first` and every input its effects produce through the machine.
    async fn dispatch(&mut self, first: ChannelInput) {
        let mut queue = VecDeque::from([first]);
        while let Some(input) = queue.pop_front() {
            for effect in self.machine.handle(input) {
                if let Some(follow_up) = self.perform(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = ChannelStatus {
            state: self.machine.state().clone(),
            session_id: self.machine.session_id().to_string(),
            mobile_connected: self.machine.mobile_connected(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn drop_socket(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
        }
        self.writer = None;
        self.reader = None;
    }

    async fn perform(&mut self, effect: Effect) -> Option<ChannelInput> {
        match effect {
            Effect::OpenSocket { url } => {
                self.drop_socket();
                log::info!("[Channel] Connecting to {}", redact_url(&url));
                let timeout = self.config.connect_timeout;
                self.pending = Some(tokio::spawn(async move {
                    tokio::time::timeout(timeout, ws::connect(&url))
                        .await
                        .with_context(|| format!("connection timed out after {timeout:?}"))?
                }));
            }
            Effect::CloseSocket { code, reason } => {
                if let Some(writer) = self.writer.as_mut() {
                    if let Err(e) = writer.send_close(code, &reason).await {
                        log::debug!("[Channel] Close frame not sent: {e:#}");
                    }
                }
                self.drop_socket();
            }
            Effect::DropSocket => self.drop_socket(),
            Effect::ArmTimer(kind, after) => self.timers.arm(kind, after),
            Effect::CancelTimer(kind) => self.timers.cancel(kind),
            Effect::CancelAllTimers => self.timers.cancel_all(),
            Effect::CompletePairing { peer_public_key } => {
                return Some(match self.exchange.complete(&peer_public_key) {
                    Ok(_) => {
                        if let Some(fp) = self.exchange.peer_fingerprint() {
                            log::info!("[Channel] Session key established (peer {fp})");
                        }
                        ChannelInput::KeyEstablished
                    }
                    Err(e) => ChannelInput::PairingFailed {
                        reason: e.to_string(),
                    },
                });
            }
            Effect::SendPong => {
                let pong = Outbound::Pong {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    status: self.activity.status(),
                };
                self.send(&pong).await;
            }
            Effect::SendPing { session_id } => {
                self.send(&Outbound::Ping { session_id }).await;
            }
            Effect::SendOutput { session_id, chunk } => self.send_output(session_id, &chunk).await,
            Effect::SendCatchUp { after_seq } => self.send_catch_up(after_seq).await,
            Effect::DeliverInput { data, iv } => {
                let Some(key) = self.exchange.session_key() else {
                    log::warn!("[Channel] Input before key exchange; dropped");
                    return None;
                };
                match open_from_wire(&data, &iv, &key) {
                    Ok(bytes) => self.notify(ChannelEvent::Input(bytes)),
                    Err(e) => log::warn!("[Channel] Dropping input message: {e}"),
                }
            }
            Effect::PauseOutput => self.gate.pause(),
            Effect::ResumeOutput => self.gate.resume(),
            Effect::Notify(event) => self.notify(event),
        }
        None
    }

    fn notify(&self, event: ChannelEvent) {
        if self.events.send(event).is_err() {
            log::trace!("[Channel] Event listener gone");
        }
    }

    async fn send(&mut self, message: &Outbound) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        // A failed send surfaces as a read error and drives reconnection.
        if let Err(e) = writer.send_message(message).await {
            log::debug!("[Channel] Send failed: {e:#}");
        }
    }

    async fn send_output(&mut self, session_id: String, chunk: &OutputChunk) {
        if chunk.seq <= self.last_sent_seq {
            return;
        }
        let Some(key) = self.exchange.session_key() else {
            return;
        };
        let sealed = match seal_for_wire(&chunk.data, &key) {
            Ok(sealed) => sealed,
            Err(e) => {
                log::warn!("[Channel] Dropping output chunk {}: {e}", chunk.seq);
                return;
            }
        };
        self.send(&Outbound::Output {
            session_id,
            seq: chunk.seq,
            encrypted: true,
            data: sealed.data,
            iv: sealed.iv,
            timestamp: chunk.timestamp_ms,
        })
        .await;
        self.last_sent_seq = chunk.seq;
    }

    async fn send_catch_up(&mut self, after_seq: i64) {
        let Some(key) = self.exchange.session_key() else {
            return;
        };
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match catchup::send_catch_up(writer, &self.buffer, after_seq, &key, self.config.catch_up)
            .await
        {
            Ok(summary) => {
                self.last_sent_seq = self.last_sent_seq.max(summary.current_seq);
                log::info!(
                    "[Channel] Catch-up complete: {} chunks, now at seq {}",
                    summary.chunks,
                    summary.current_seq
                );
            }
            Err(e) => log::warn!("[Channel] Catch-up interrupted: {e:#}"),
        }
    }
}
