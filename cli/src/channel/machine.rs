//! Channel state machine.
//!
//! A pure transition function: [`ChannelMachine::handle`] takes one
//! [`ChannelInput`] and returns the [`Effect`]s the driver must perform. It
//! never touches sockets, clocks or keys, so every protocol rule (backoff,
//! terminal closes, output gating, pairing) is unit-tested without I/O.
//!
//! # States
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingPairing -> Active
//!                     |               |              |
//!                     v               +--> Reconnecting{n} --> Active | AwaitingPairing
//!                 Failed                        |
//!                                               v
//!                                  Failed(ReconnectExhausted)
//! any -> Closed (close requested)      any connected -> Failed(SessionInvalidated)
//! ```

// Rust guideline compliant 2026-02

use std::time::Duration;

use super::backoff::ReconnectPolicy;
use super::protocol::{last_seq_or_start, parse_terminal_close, Inbound};
use super::timers::TimerKind;
use super::ChannelConfig;
use crate::constants::{MIN_PEER_COLS, MIN_PEER_ROWS};
use crate::ring_buffer::OutputChunk;
use crate::ws::CLOSE_NORMAL;

/// Why the channel stopped for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The very first connection could not be opened.
    ConnectFailed(String),
    /// Every reconnection attempt failed.
    ReconnectExhausted,
    /// The server declared the session dead.
    SessionInvalidated {
        /// `session_expired` or `session_not_found`.
        reason: String,
        /// Server message.
        message: String,
    },
}

/// Connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started.
    Disconnected,
    /// Initial handshake in flight.
    Connecting,
    /// Socket open, waiting for `pairing_complete`.
    AwaitingPairing,
    /// Socket open and session key established.
    Active,
    /// Socket lost; waiting for or running attempt `attempt`.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Stopped without a way back.
    Failed(FailureReason),
    /// Closed on request.
    Closed,
}

impl ConnectionState {
    /// Whether a socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::AwaitingPairing | Self::Active)
    }

    /// Whether the driver should stop.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::AwaitingPairing => write!(f, "awaiting pairing"),
            Self::Active => write!(f, "active"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Failed(reason) => write!(f, "failed ({reason:?})"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Events surfaced to the session coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// First connection opened; the pairing code is now live.
    Connected,
    /// Session key established. Emitted once per channel.
    Paired {
        /// Session id in effect (server-assigned when provided).
        session_id: String,
    },
    /// Mobile viewer attached.
    MobileConnected,
    /// Mobile viewer detached.
    MobileDisconnected,
    /// Decrypted keystrokes for the PTY, in arrival order.
    Input(Vec<u8>),
    /// Mobile viewport size to apply to the PTY.
    Resize {
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },
    /// The mobile left and did not come back in time; restore local size.
    RestoreLocalSize,
    /// Connection lost; attempt `attempt` scheduled after `delay`.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Attempt budget.
        max_attempts: u32,
        /// Wait before this attempt.
        delay: Duration,
    },
    /// Connection restored.
    Reconnected,
    /// Reconnection budget exhausted. Mirroring stops; the local process
    /// keeps running.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// The server invalidated the session.
    SessionInvalidated {
        /// `session_expired` or `session_not_found`.
        reason: String,
        /// Server message.
        message: String,
    },
    /// The initial connection failed.
    ConnectFailed {
        /// Underlying error text.
        reason: String,
    },
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelInput {
    /// Start the initial connection.
    ConnectRequested,
    /// A socket finished its handshake.
    Opened,
    /// A connection attempt failed.
    OpenFailed {
        /// Underlying error text.
        reason: String,
    },
    /// The open socket closed (or errored).
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason text.
        reason: String,
    },
    /// A parsed text frame (malformed frames arrive as [`Inbound::Unknown`]).
    Message(Inbound),
    /// A control frame; counts as liveness only.
    Liveness,
    /// A timer expired.
    TimerFired(TimerKind),
    /// The driver derived the session key.
    KeyEstablished,
    /// The peer's public key was rejected.
    PairingFailed {
        /// Why.
        reason: String,
    },
    /// The PTY produced a chunk.
    Output(OutputChunk),
    /// Shut down for good.
    CloseRequested,
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Dial `url` (replacing any socket or attempt in flight).
    OpenSocket {
        /// Full WebSocket URL.
        url: String,
    },
    /// Send a close frame and drop the socket.
    CloseSocket {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Drop the socket without a close handshake.
    DropSocket,
    /// Arm (or re-arm) a timer.
    ArmTimer(TimerKind, Duration),
    /// Disarm a timer.
    CancelTimer(TimerKind),
    /// Disarm every timer.
    CancelAllTimers,
    /// Run the key exchange against the peer's public value.
    CompletePairing {
        /// Base64 DH public value.
        peer_public_key: String,
    },
    /// Answer an application `ping`.
    SendPong,
    /// Send an agent-side `ping`.
    SendPing {
        /// Current session id.
        session_id: String,
    },
    /// Encrypt and send a live output chunk.
    SendOutput {
        /// Current session id.
        session_id: String,
        /// The chunk.
        chunk: OutputChunk,
    },
    /// Replay buffered output after `after_seq`.
    SendCatchUp {
        /// Mobile's last sequence.
        after_seq: i64,
    },
    /// Decrypt keystrokes and hand them to the coordinator.
    DeliverInput {
        /// Base64 ciphertext.
        data: String,
        /// Base64 IV.
        iv: String,
    },
    /// Pause live PTY forwarding.
    PauseOutput,
    /// Resume live PTY forwarding.
    ResumeOutput,
    /// Surface an event.
    Notify(ChannelEvent),
}

/// WebSocket URL for the first connection.
#[must_use]
pub fn pairing_url(server_url: &str, pairing_code: &str) -> String {
    format!("{}/ws/agent?code={pairing_code}", server_url.trim_end_matches('/'))
}

/// WebSocket URL for reconnections.
#[must_use]
pub fn session_url(server_url: &str, session_id: &str) -> String {
    format!("{}/ws/agent?sessionId={session_id}", server_url.trim_end_matches('/'))
}

/// Pure channel state machine.
#[derive(Debug, Clone)]
pub struct ChannelMachine {
    server_url: String,
    pairing_code: String,
    session_id: String,
    heartbeat_timeout: Duration,
    heartbeat_grace: Duration,
    ping_interval: Duration,
    restore_resize_delay: Duration,
    policy: ReconnectPolicy,

    state: ConnectionState,
    mobile_connected: bool,
    key_established: bool,
}

impl ChannelMachine {
    /// Machine in [`ConnectionState::Disconnected`].
    #[must_use]
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            server_url: config.server_url.clone(),
            pairing_code: config.pairing_code.clone(),
            session_id: config.session_id.clone(),
            heartbeat_timeout: config.heartbeat_timeout,
            heartbeat_grace: config
                .heartbeat_timeout
                .saturating_mul(config.heartbeat_grace_factor.max(1)),
            ping_interval: config.ping_interval,
            restore_resize_delay: config.restore_resize_delay,
            policy: config.reconnect.clone(),
            state: ConnectionState::Disconnected,
            mobile_connected: false,
            key_established: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Session id in effect (superseded by `pairing_complete` when given).
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether a mobile viewer is attached.
    #[must_use]
    pub fn mobile_connected(&self) -> bool {
        self.mobile_connected
    }

    /// Whether the session key exists.
    #[must_use]
    pub fn key_established(&self) -> bool {
        self.key_established
    }

    /// Apply one input.
    pub fn handle(&mut self, input: ChannelInput) -> Vec<Effect> {
        let mut fx = Vec::new();
        match input {
            ChannelInput::ConnectRequested => {
                if self.state == ConnectionState::Disconnected {
                    self.state = ConnectionState::Connecting;
                    fx.push(Effect::OpenSocket {
                        url: pairing_url(&self.server_url, &self.pairing_code),
                    });
                }
            }
            ChannelInput::Opened => self.on_opened(&mut fx),
            ChannelInput::OpenFailed { reason } => self.on_open_failed(reason, &mut fx),
            ChannelInput::Closed { code, reason } => self.on_closed(code, &reason, &mut fx),
            ChannelInput::Message(message) => {
                if self.state.is_connected() {
                    fx.push(Effect::ArmTimer(TimerKind::Heartbeat, self.heartbeat_timeout));
                    self.on_message(message, &mut fx);
                }
            }
            ChannelInput::Liveness => {
                if self.state.is_connected() {
                    fx.push(Effect::ArmTimer(TimerKind::Heartbeat, self.heartbeat_timeout));
                }
            }
            ChannelInput::TimerFired(kind) => self.on_timer(kind, &mut fx),
            ChannelInput::KeyEstablished => {
                let first = !self.key_established;
                self.key_established = true;
                if self.state == ConnectionState::AwaitingPairing {
                    self.state = ConnectionState::Active;
                }
                if first {
                    fx.push(Effect::Notify(ChannelEvent::Paired {
                        session_id: self.session_id.clone(),
                    }));
                }
            }
            ChannelInput::PairingFailed { reason } => {
                log::warn!("[Channel] Pairing attempt rejected: {reason}");
            }
            ChannelInput::Output(chunk) => {
                if self.state == ConnectionState::Active
                    && self.mobile_connected
                    && self.key_established
                {
                    fx.push(Effect::SendOutput {
                        session_id: self.session_id.clone(),
                        chunk,
                    });
                }
            }
            ChannelInput::CloseRequested => {
                if self.state != ConnectionState::Closed {
                    self.state = ConnectionState::Closed;
                    fx.push(Effect::CancelAllTimers);
                    fx.push(Effect::CloseSocket {
                        code: CLOSE_NORMAL,
                        reason: "Client closed".into(),
                    });
                }
            }
        }
        fx
    }

    fn on_opened(&mut self, fx: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::AwaitingPairing;
                log::info!("[Channel] Connected; awaiting pairing");
                fx.push(Effect::ArmTimer(TimerKind::Heartbeat, self.heartbeat_grace));
                fx.push(Effect::ArmTimer(TimerKind::Ping, self.ping_interval));
                fx.push(Effect::Notify(ChannelEvent::Connected));
            }
            ConnectionState::Reconnecting { attempt } => {
                self.state = if self.key_established {
                    ConnectionState::Active
                } else {
                    ConnectionState::AwaitingPairing
                };
                log::info!("[Channel] Reconnected on attempt {attempt}");
                fx.push(Effect::CancelTimer(TimerKind::Reconnect));
                fx.push(Effect::ArmTimer(TimerKind::Heartbeat, self.heartbeat_grace));
                fx.push(Effect::ArmTimer(TimerKind::Ping, self.ping_interval));
                fx.push(Effect::ResumeOutput);
                fx.push(Effect::Notify(ChannelEvent::Reconnected));
            }
            _ => log::debug!("[Channel] Ignoring open in state {}", self.state),
        }
    }

    fn on_open_failed(&mut self, reason: String, fx: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Connecting => {
                log::error!("[Channel] Initial connection failed: {reason}");
                self.state = ConnectionState::Failed(FailureReason::ConnectFailed(reason.clone()));
                fx.push(Effect::CancelAllTimers);
                fx.push(Effect::Notify(ChannelEvent::ConnectFailed { reason }));
            }
            ConnectionState::Reconnecting { attempt } => {
                log::debug!("[Channel] Reconnection attempt {attempt} failed: {reason}");
                self.schedule_attempt(attempt + 1, fx);
            }
            _ => log::debug!("[Channel] Ignoring open failure in state {}", self.state),
        }
    }

    fn on_closed(&mut self, code: u16, reason: &str, fx: &mut Vec<Effect>) {
        if !self.state.is_connected() {
            return;
        }
        if let Some(close) = parse_terminal_close(reason) {
            log::error!(
                "[Channel] Session invalidated by server ({}): {}",
                close.reason,
                close.message
            );
            self.state = ConnectionState::Failed(FailureReason::SessionInvalidated {
                reason: close.reason.clone(),
                message: close.message.clone(),
            });
            fx.push(Effect::CancelAllTimers);
            fx.push(Effect::Notify(ChannelEvent::SessionInvalidated {
                reason: close.reason,
                message: close.message,
            }));
            return;
        }
        log::warn!("[Channel] Connection closed (code {code}); reconnecting");
        self.begin_reconnect(fx);
    }

    fn on_timer(&mut self, kind: TimerKind, fx: &mut Vec<Effect>) {
        match kind {
            TimerKind::Heartbeat => {
                if self.state.is_connected() {
                    log::warn!(
                        "[Channel] No server message for {:?}; dropping connection",
                        self.heartbeat_timeout
                    );
                    fx.push(Effect::DropSocket);
                    self.begin_reconnect(fx);
                }
            }
            TimerKind::Reconnect => {
                if let ConnectionState::Reconnecting { attempt } = self.state {
                    log::info!(
                        "[Channel] Reconnection attempt {attempt}/{}",
                        self.policy.max_attempts()
                    );
                    fx.push(Effect::OpenSocket {
                        url: session_url(&self.server_url, &self.session_id),
                    });
                }
            }
            TimerKind::RestoreResize => {
                if !self.mobile_connected {
                    fx.push(Effect::Notify(ChannelEvent::RestoreLocalSize));
                }
            }
            TimerKind::Ping => {
                if self.state.is_connected() {
                    fx.push(Effect::SendPing {
                        session_id: self.session_id.clone(),
                    });
                    fx.push(Effect::ArmTimer(TimerKind::Ping, self.ping_interval));
                }
            }
        }
    }

    fn on_message(&mut self, message: Inbound, fx: &mut Vec<Effect>) {
        match message {
            Inbound::PairingComplete {
                public_key,
                session_id,
            } => {
                if let Some(id) = session_id.filter(|id| !id.is_empty()) {
                    if id != self.session_id {
                        log::info!("[Channel] Server assigned session id {id}");
                        self.session_id = id;
                    }
                }
                fx.push(Effect::CompletePairing {
                    peer_public_key: public_key,
                });
            }
            Inbound::ClientConnected => self.mark_mobile_connected(fx),
            Inbound::ClientDisconnected => {
                self.mobile_connected = false;
                fx.push(Effect::ArmTimer(
                    TimerKind::RestoreResize,
                    self.restore_resize_delay,
                ));
                fx.push(Effect::Notify(ChannelEvent::MobileDisconnected));
            }
            Inbound::ClientReconnected { last_seq } | Inbound::CatchupRequest { last_seq } => {
                self.mark_mobile_connected(fx);
                if self.key_established {
                    fx.push(Effect::SendCatchUp {
                        after_seq: last_seq_or_start(last_seq),
                    });
                    // The replay holds the read loop; restart the silence
                    // window once it has been flushed.
                    fx.push(Effect::ArmTimer(TimerKind::Heartbeat, self.heartbeat_timeout));
                } else {
                    log::warn!("[Channel] Catch-up requested before pairing; ignoring");
                }
            }
            Inbound::Input { data, iv } => {
                if self.key_established {
                    fx.push(Effect::DeliverInput { data, iv });
                } else {
                    log::warn!("[Channel] Received input but no encryption key set");
                }
            }
            Inbound::Resize { cols, rows } => {
                if cols >= MIN_PEER_COLS && rows >= MIN_PEER_ROWS {
                    fx.push(Effect::Notify(ChannelEvent::Resize { cols, rows }));
                } else {
                    log::debug!("[Channel] Ignoring degenerate resize {cols}x{rows}");
                }
            }
            Inbound::Ping => fx.push(Effect::SendPong),
            Inbound::Pong | Inbound::Unknown => {}
        }
    }

    fn mark_mobile_connected(&mut self, fx: &mut Vec<Effect>) {
        fx.push(Effect::CancelTimer(TimerKind::RestoreResize));
        if !self.mobile_connected {
            self.mobile_connected = true;
            fx.push(Effect::Notify(ChannelEvent::MobileConnected));
        }
    }

    fn begin_reconnect(&mut self, fx: &mut Vec<Effect>) {
        fx.push(Effect::CancelTimer(TimerKind::Heartbeat));
        fx.push(Effect::CancelTimer(TimerKind::Ping));
        fx.push(Effect::PauseOutput);
        self.schedule_attempt(1, fx);
    }

    fn schedule_attempt(&mut self, attempt: u32, fx: &mut Vec<Effect>) {
        if !self.policy.allows(attempt) {
            let attempts = attempt.saturating_sub(1);
            log::error!("[Channel] Giving up after {attempts} reconnection attempts");
            self.state = ConnectionState::Failed(FailureReason::ReconnectExhausted);
            fx.push(Effect::CancelAllTimers);
            fx.push(Effect::ResumeOutput);
            fx.push(Effect::Notify(ChannelEvent::ReconnectFailed { attempts }));
            return;
        }
        let delay = self.policy.delay_for(attempt);
        self.state = ConnectionState::Reconnecting { attempt };
        fx.push(Effect::ArmTimer(TimerKind::Reconnect, delay));
        fx.push(Effect::Notify(ChannelEvent::Reconnecting {
            attempt,
            max_attempts: self.policy.max_attempts(),
            delay,
        }));
    }
}
