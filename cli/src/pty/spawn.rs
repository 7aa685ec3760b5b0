//! PTY spawning utilities.
//!
//! Opens the PTY pair, builds the child command and runs the two background
//! threads every bridge needs:
//!
//! - the **reader** moves each output chunk into the ring buffer, then the
//!   local terminal, then (if the forward gate is open) the event listener;
//! - the **exit watcher** waits on the child, lets the reader drain, and
//!   reports the exit exactly once.

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;

use anyhow::{Context, Result};
use bytes::Bytes;
use portable_pty::{native_pty_system, Child, CommandBuilder, PtyPair, PtySize};
use tokio::sync::mpsc;

use super::events::PtyEvent;
use super::screen::ScreenPolicy;
use super::ForwardGate;
use crate::constants::EXIT_DRAIN_TIMEOUT;
use crate::ring_buffer::SharedRingBuffer;

/// Read buffer size for the PTY reader thread.
const READ_CHUNK_SIZE: usize = 4096;

/// Open a new PTY pair with the given dimensions.
pub fn open_pty(rows: u16, cols: u16) -> Result<PtyPair> {
    let pty_system = native_pty_system();
    let size = PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    };
    pty_system.openpty(size).context("Failed to open PTY")
}

/// Build a command from a program, its arguments, a working directory and
/// extra environment.
#[allow(
    clippy::implicit_hasher,
    reason = "internal API doesn't need hasher generalization"
)]
pub fn build_command(
    program: &str,
    args: &[String],
    cwd: &Path,
    env_vars: &HashMap<String, String>,
) -> CommandBuilder {
    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    cmd.cwd(cwd);
    if std::env::var_os("TERM").is_none() {
        cmd.env("TERM", "xterm-256color");
    }
    for (key, value) in env_vars {
        cmd.env(key, value);
    }
    cmd
}

/// Everything the reader thread writes to.
pub(crate) struct ReaderSinks {
    pub buffer: SharedRingBuffer,
    pub local_output: Option<Box<dyn Write + Send>>,
    pub events: mpsc::UnboundedSender<PtyEvent>,
    pub gate: ForwardGate,
    pub screen: Arc<dyn ScreenPolicy>,
}

/// Spawn the PTY reader thread.
///
/// Returns a receiver that is signalled (by disconnect) when the reader
/// has seen EOF or an error and will produce no more output.
pub(crate) fn spawn_reader_thread(
    reader: Box<dyn Read + Send>,
    sinks: ReaderSinks,
) -> Result<(thread::JoinHandle<()>, std_mpsc::Receiver<()>)> {
    let (done_tx, done_rx) = std_mpsc::channel::<()>();

    let handle = thread::Builder::new()
        .name("termly-pty-reader".into())
        .spawn(move || {
            let _done = done_tx;
            let ReaderSinks {
                buffer,
                mut local_output,
                events,
                gate,
                screen,
            } = sinks;
            let mut reader = reader;
            let mut buf = [0u8; READ_CHUNK_SIZE];
            log::info!("[Pty] Reader thread started");

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        screen.observe(&data);

                        let chunk = buffer
                            .lock()
                            .expect("ring buffer lock poisoned")
                            .append(data.clone());

                        if let Some(out) = local_output.as_mut() {
                            if let Err(e) = out.write_all(&data).and_then(|()| out.flush()) {
                                log::debug!("[Pty] Local echo failed, disabling: {e}");
                                local_output = None;
                            }
                        }

                        if gate.is_open() {
                            let _ = events.send(PtyEvent::output(chunk));
                        }
                    }
                    Err(e) => {
                        // EIO is the normal end of stream once the child is gone.
                        log::debug!("[Pty] Read ended: {e}");
                        break;
                    }
                }
            }
            log::info!("[Pty] Reader thread exiting");
        })
        .context("Failed to spawn PTY reader thread")?;

    Ok((handle, done_rx))
}

/// Spawn the exit watcher thread.
///
/// Blocks on `child.wait()`, waits up to [`EXIT_DRAIN_TIMEOUT`] for the
/// reader to finish so trailing output is ordered before the exit, marks
/// the bridge exited and sends [`PtyEvent::Exited`].
pub(crate) fn spawn_exit_watcher(
    mut child: Box<dyn Child + Send + Sync>,
    reader_done: std_mpsc::Receiver<()>,
    exited: Arc<AtomicBool>,
    on_exit: Box<dyn FnOnce() + Send>,
    events: mpsc::UnboundedSender<PtyEvent>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("termly-pty-exit".into())
        .spawn(move || {
            let exit_code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(e) => {
                    log::warn!("[Pty] Waiting on child failed: {e}");
                    1
                }
            };

            // Disconnect (Err) means the reader is done; timeout means a
            // grandchild still holds the slave side open.
            if reader_done.recv_timeout(EXIT_DRAIN_TIMEOUT)
                == Err(std_mpsc::RecvTimeoutError::Timeout)
            {
                log::debug!("[Pty] Reader still open after exit; reporting exit anyway");
            }

            exited.store(true, Ordering::SeqCst);
            on_exit();
            log::info!("[Pty] Child exited with code {exit_code}");
            let _ = events.send(PtyEvent::exited(exit_code));
        })
        .context("Failed to spawn PTY exit watcher")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_sets_args_and_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut env = HashMap::new();
        env.insert("TERMLY_TEST".to_string(), "1".to_string());

        let cmd = build_command(
            "claude",
            &["code".to_string(), "--verbose".to_string()],
            dir.path(),
            &env,
        );
        let argv: Vec<String> = cmd
            .get_argv()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(argv, vec!["claude", "code", "--verbose"]);
        assert_eq!(cmd.get_cwd(), Some(&dir.path().as_os_str().to_owned()));
        assert_eq!(cmd.get_env("TERMLY_TEST"), Some(std::ffi::OsStr::new("1")));
    }

    #[test]
    fn test_open_pty_succeeds() {
        let pair = open_pty(24, 80).unwrap();
        let size = pair.master.get_size().unwrap();
        assert_eq!((size.rows, size.cols), (24, 80));
    }
}
