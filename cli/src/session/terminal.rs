//! Local terminal integration.
//!
//! While the child runs, the user's terminal is in raw mode and every
//! keystroke goes to the PTY. Window-size changes and shutdown signals
//! arrive as [`LocalSignal`]s on a tokio channel fed by a `signal-hook`
//! listener thread.

use std::io::Read;
use std::thread;

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGWINCH};
use signal_hook::iterator::{Handle, Signals};
use tokio::sync::mpsc;

use crate::constants::DEFAULT_TERMINAL_SIZE;

/// Whether stdin is an interactive terminal.
#[must_use]
pub fn stdin_is_tty() -> bool {
    atty::is(atty::Stream::Stdin)
}

/// Local (cols, rows), or the default size when there is no terminal.
#[must_use]
pub fn local_size() -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => DEFAULT_TERMINAL_SIZE,
    }
}

/// Raw mode for as long as the guard lives.
#[derive(Debug)]
pub struct RawModeGuard;

impl RawModeGuard {
    /// Enter raw mode.
    pub fn enable() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Always attempt to restore terminal state, ignoring errors
        let _ = disable_raw_mode();
    }
}

/// Signals the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSignal {
    /// SIGWINCH.
    WindowChanged,
    /// SIGINT, SIGTERM or SIGHUP.
    Shutdown(i32),
}

impl LocalSignal {
    /// Classify a raw signal number.
    #[must_use]
    pub fn from_raw(signal: i32) -> Self {
        if signal == SIGWINCH {
            Self::WindowChanged
        } else {
            Self::Shutdown(signal)
        }
    }
}

/// Start the signal listener thread.
///
/// Close the returned [`Handle`] to stop it.
pub fn spawn_signal_listener() -> Result<(Handle, mpsc::UnboundedReceiver<LocalSignal>)> {
    let mut signals = Signals::new([SIGWINCH, SIGINT, SIGTERM, SIGHUP])
        .context("failed to register signal handlers")?;
    let handle = signals.handle();
    let (tx, rx) = mpsc::unbounded_channel();

    thread::Builder::new()
        .name("termly-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                log::debug!("[Terminal] Received signal {signal}");
                if tx.send(LocalSignal::from_raw(signal)).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn signal thread")?;

    Ok((handle, rx))
}

/// Forward raw stdin bytes to a channel until EOF or the receiver is gone.
///
/// The thread blocks in `read` and is left detached at shutdown.
pub fn spawn_stdin_forwarder() -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("termly-stdin".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; 4096];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::debug!("[Terminal] stdin read failed: {e}");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin thread")?;
    Ok(rx)
}
