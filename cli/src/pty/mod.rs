//! Terminal process bridge.
//!
//! Owns one interactive child process on a pseudo-terminal and moves bytes
//! between it, the local terminal, the output ring buffer and the channel.
//!
//! # Architecture
//!
//! ```text
//! PtyBridge (owns the PTY master and the child's killer)
//!  ├── reader thread: PTY -> ring buffer -> local terminal -> [gate] -> events
//!  ├── exit watcher:  child.wait() -> drain reader -> PtyEvent::Exited (once)
//!  ├── io: Mutex<{ writer, master }> (input + resize)
//!  └── gate: ForwardGate (pauses live forwarding during reconnection)
//! ```
//!
//! Every output chunk is appended to the ring buffer before anything else
//! sees it, so a paused gate never loses data: catch-up replays it later.
//!
//! # Lifecycle
//!
//! After the child exits, [`PtyBridge::write`] and [`PtyBridge::resize`]
//! return `false` without error. [`PtyBridge::kill`] is idempotent and runs
//! on drop.

// Rust guideline compliant 2026-02

pub mod events;
pub mod screen;
pub mod spawn;

pub use events::PtyEvent;
pub use screen::{AltScreenTracker, NeverFullScreen, ScreenPolicy};

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use portable_pty::{ChildKiller, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::ring_buffer::SharedRingBuffer;

/// Cooperative flag controlling live forwarding of PTY output.
///
/// Cloned into the reader thread; the channel driver pauses it while
/// reconnecting and resumes it on `Active` or when reconnection gives up.
#[derive(Debug, Clone)]
pub struct ForwardGate(Arc<AtomicBool>);

impl ForwardGate {
    /// Create an open gate.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Stop delivering output events. Buffering and local echo continue.
    pub fn pause(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Resume delivering output events.
    pub fn resume(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether output events are currently delivered.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for ForwardGate {
    fn default() -> Self {
        Self::new()
    }
}

/// What to run and where.
#[derive(Debug, Clone)]
pub struct PtySpawnConfig {
    /// Executable name or path.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory of the child.
    pub cwd: PathBuf,
    /// Initial width in columns.
    pub cols: u16,
    /// Initial height in rows.
    pub rows: u16,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
}

/// Where the bridge sends what the child prints.
pub struct BridgeOutputs {
    /// Session ring buffer; every chunk lands here first.
    pub buffer: SharedRingBuffer,
    /// Local terminal echo (usually stdout). `None` disables echo.
    pub local_output: Option<Box<dyn Write + Send>>,
    /// Listener for output and exit events.
    pub events: mpsc::UnboundedSender<PtyEvent>,
    /// Full-screen detection fed from the raw output stream.
    pub screen: Arc<dyn ScreenPolicy>,
    /// Live-forwarding flag shared with the channel driver.
    pub gate: ForwardGate,
}

impl std::fmt::Debug for BridgeOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeOutputs")
            .field("local_output", &self.local_output.is_some())
            .field("screen", &self.screen)
            .field("forwarding", &self.gate.is_open())
            .finish_non_exhaustive()
    }
}

/// Snapshot of the running process, for the registry and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyHandle {
    /// OS process id of the child.
    pub pid: Option<u32>,
    /// Current width.
    pub cols: u16,
    /// Current height.
    pub rows: u16,
    /// Working directory.
    pub cwd: PathBuf,
}

struct BridgeIo {
    writer: Option<Box<dyn Write + Send>>,
    master: Option<Box<dyn MasterPty + Send>>,
    size: (u16, u16),
}

/// A running child process on a PTY.
pub struct PtyBridge {
    pid: Option<u32>,
    cwd: PathBuf,
    io: Arc<Mutex<BridgeIo>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    exited: Arc<AtomicBool>,
    gate: ForwardGate,
    reader_handle: Option<thread::JoinHandle<()>>,
    exit_handle: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for PtyBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyBridge")
            .field("pid", &self.pid)
            .field("cwd", &self.cwd)
            .field("exited", &self.has_exited())
            .field("forwarding", &self.gate.is_open())
            .finish_non_exhaustive()
    }
}

impl PtyBridge {
    /// Spawn `config.command` on a new PTY and start the I/O threads.
    ///
    /// # Errors
    ///
    /// [`SessionError::SpawnFailed`] when the PTY cannot be opened or the
    /// executable cannot be launched (missing, not executable, bad cwd).
    pub fn start(config: PtySpawnConfig, outputs: BridgeOutputs) -> Result<Self, SessionError> {
        let spawn_failed = |reason: String| SessionError::SpawnFailed {
            command: config.command.clone(),
            reason,
        };

        let pair = spawn::open_pty(config.rows, config.cols)
            .map_err(|e| spawn_failed(format!("{e:#}")))?;
        let cmd = spawn::build_command(&config.command, &config.args, &config.cwd, &config.env);
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_failed(format!("{e:#}")))?;
        // The slave end must close in this process so EOF reaches the reader.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_failed(format!("{e:#}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_failed(format!("{e:#}")))?;

        log::info!(
            "[Pty] Spawned {} (pid {:?}) in {} at {}x{}",
            config.command,
            pid,
            config.cwd.display(),
            config.cols,
            config.rows
        );

        let io = Arc::new(Mutex::new(BridgeIo {
            writer: Some(writer),
            master: Some(pair.master),
            size: (config.cols, config.rows),
        }));
        let exited = Arc::new(AtomicBool::new(false));
        let gate = outputs.gate;

        let (reader_handle, reader_done) = spawn::spawn_reader_thread(
            reader,
            spawn::ReaderSinks {
                buffer: outputs.buffer,
                local_output: outputs.local_output,
                events: outputs.events.clone(),
                gate: gate.clone(),
                screen: outputs.screen,
            },
        )
        .map_err(|e| spawn_failed(format!("{e:#}")))?;

        let io_for_exit = Arc::clone(&io);
        let release_io = Box::new(move || {
            let mut io = io_for_exit.lock().expect("pty io lock poisoned");
            io.writer = None;
            io.master = None;
        });
        let exit_handle = spawn::spawn_exit_watcher(
            child,
            reader_done,
            Arc::clone(&exited),
            release_io,
            outputs.events,
        )
        .map_err(|e| spawn_failed(format!("{e:#}")))?;

        Ok(Self {
            pid,
            cwd: config.cwd,
            io,
            killer: Mutex::new(killer),
            exited,
            gate,
            reader_handle: Some(reader_handle),
            exit_handle: Some(exit_handle),
        })
    }

    /// OS process id of the child.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current process snapshot.
    #[must_use]
    pub fn handle(&self) -> PtyHandle {
        let (cols, rows) = self.size();
        PtyHandle {
            pid: self.pid,
            cols,
            rows,
            cwd: self.cwd.clone(),
        }
    }

    /// Current (cols, rows).
    #[must_use]
    pub fn size(&self) -> (u16, u16) {
        self.io.lock().expect("pty io lock poisoned").size
    }

    /// Handle to the live-forwarding flag.
    #[must_use]
    pub fn forward_gate(&self) -> ForwardGate {
        self.gate.clone()
    }

    /// Whether the child has exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Write input bytes to the child.
    ///
    /// Returns `false` once the process has exited or the write failed.
    pub fn write(&self, data: &[u8]) -> bool {
        if self.has_exited() {
            return false;
        }
        let mut io = self.io.lock().expect("pty io lock poisoned");
        let Some(writer) = io.writer.as_mut() else {
            return false;
        };
        match writer.write_all(data).and_then(|()| writer.flush()) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("[Pty] Input write failed: {e}");
                false
            }
        }
    }

    /// Resize the PTY. Returns `false` once the process has exited.
    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        if self.has_exited() {
            return false;
        }
        let mut io = self.io.lock().expect("pty io lock poisoned");
        let Some(master) = io.master.as_ref() else {
            return false;
        };
        if let Err(e) = master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            log::warn!("[Pty] Failed to resize PTY: {e}");
            return false;
        }
        io.size = (cols, rows);
        log::debug!("[Pty] Resized to {cols}x{rows}");
        true
    }

    /// Terminate the child if it is still running. Idempotent.
    pub fn kill(&self) {
        if self.has_exited() {
            return;
        }
        log::info!("[Pty] Killing child process");
        let mut killer = self.killer.lock().expect("pty killer lock poisoned");
        if let Err(e) = killer.kill() {
            log::debug!("[Pty] Kill failed (already gone?): {e}");
        }
    }
}

impl Drop for PtyBridge {
    fn drop(&mut self) {
        self.kill();
        // The exit watcher finishes on its own once the child is reaped.
        drop(self.exit_handle.take());
        drop(self.reader_handle.take());
    }
}
