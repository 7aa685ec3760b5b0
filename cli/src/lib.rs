//! Termly - mirror a local AI coding session to a paired mobile device.
//!
//! The agent runs a child program (an AI coding assistant, or any command)
//! on a pseudo-terminal, records its output, and relays it end-to-end
//! encrypted over a WebSocket relay to a mobile viewer that can type back.
//!
//! # Architecture
//!
//! ```text
//!  local terminal ◄──► PtyBridge ──► OutputRingBuffer
//!                          ▲               │
//!                          │ input         │ output / catch-up
//!                          │               ▼
//!               SessionCoordinator ◄── ChannelManager ◄──► relay ◄──► mobile
//!                                          │
//!                                     KeyExchange (DH-2048 → AES-256-GCM)
//! ```
//!
//! # Modules
//!
//! - [`crypto`] - Key exchange and payload cipher
//! - [`ring_buffer`] - Sequenced, bounded output history
//! - [`pty`] - Child process on a pseudo-terminal
//! - [`channel`] - Relay connection state machine and driver
//! - [`session`] - Pairing, registry and the session coordinator
//! - [`commands`] - CLI subcommand implementations
//! - [`config`] - Configuration loading/saving

pub mod channel;
pub mod commands;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod env;
pub mod error;
pub mod process;
pub mod pty;
pub mod ring_buffer;
pub mod session;
pub mod tools;
pub mod validation;
pub mod ws;

// Re-export commonly used types
pub use channel::{ChannelConfig, ChannelEvent, ChannelManager, ConnectionState};
pub use config::Config;
pub use crypto::KeyExchange;
pub use error::SessionError;
pub use pty::PtyBridge;
pub use ring_buffer::{OutputChunk, OutputRingBuffer};
pub use session::{SessionCoordinator, SessionOutcome, SessionRegistry};
