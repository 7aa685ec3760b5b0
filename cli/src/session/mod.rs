//! Session lifecycle on the agent side.
//!
//! # Architecture
//!
//! - [`coordinator`] - Runs one session: pairing, channel, child, teardown
//! - [`pairing`] - Pairing code generation and HTTP registration
//! - [`registry`] - Persistent list of sessions on this machine
//! - [`state`] - Registry record types
//! - [`terminal`] - Raw mode, stdin forwarding and signals for the local terminal

pub mod coordinator;
pub mod pairing;
pub mod registry;
pub mod state;
pub mod terminal;

pub use coordinator::{Launch, SessionCoordinator, SessionOutcome, StartOptions};
pub use registry::{InMemoryRepository, JsonFileRepository, SessionRegistry, SessionRepository};
pub use state::{NewSession, SessionRecord, SessionStatus};
