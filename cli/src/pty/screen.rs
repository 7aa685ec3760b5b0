//! Full-screen application detection.
//!
//! Reconnection notices are printed to the local terminal only when they
//! cannot corrupt a full-screen UI. Whether one is active is an injectable
//! [`ScreenPolicy`]; the default [`AltScreenTracker`] watches the raw PTY
//! stream for alternate-screen enter/leave sequences.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};

/// Decides whether a full-screen application currently owns the terminal.
pub trait ScreenPolicy: Send + Sync + std::fmt::Debug {
    /// Feed raw PTY output. Called from the reader thread for every chunk.
    fn observe(&self, _data: &[u8]) {}

    /// True while a full-screen application is running.
    fn is_full_screen_application(&self) -> bool;
}

/// Tracks DEC private modes 1049, 1047 and 47 (alternate screen buffer).
#[derive(Debug, Default)]
pub struct AltScreenTracker {
    active: AtomicBool,
}

impl AltScreenTracker {
    /// Create a tracker in the normal-screen state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScreenPolicy for AltScreenTracker {
    fn observe(&self, data: &[u8]) {
        if let Some(state) = scan_alt_screen_state(data) {
            self.active.store(state, Ordering::Relaxed);
        }
    }

    fn is_full_screen_application(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Policy that never reports a full-screen application.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverFullScreen;

impl ScreenPolicy for NeverFullScreen {
    fn is_full_screen_application(&self) -> bool {
        false
    }
}

/// Scan PTY output for alternate-screen set/reset sequences.
///
/// Returns `Some(true)` if the last relevant sequence enters the alternate
/// screen (`CSI ? 1049 h`, `CSI ? 1047 h`, `CSI ? 47 h`), `Some(false)` if it
/// leaves it (same modes with `l`), or `None` if the chunk has neither.
/// Only the last occurrence matters because one chunk may contain several.
pub fn scan_alt_screen_state(data: &[u8]) -> Option<bool> {
    let mut result = None;

    let mut i = 0;
    while i + 3 < data.len() {
        if data[i] == 0x1b && data[i + 1] == b'[' && data[i + 2] == b'?' {
            let start = i + 3;
            let mut j = start;
            while j < data.len() && data[j].is_ascii_digit() {
                j += 1;
            }
            if j < data.len() && matches!(&data[start..j], b"1049" | b"1047" | b"47") {
                match data[j] {
                    b'h' => result = Some(true),
                    b'l' => result = Some(false),
                    _ => {}
                }
            }
            i = j.max(i + 1);
            continue;
        }
        i += 1;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_detects_enter_and_leave() {
        assert_eq!(scan_alt_screen_state(b"\x1b[?1049h"), Some(true));
        assert_eq!(scan_alt_screen_state(b"\x1b[?1049l"), Some(false));
        assert_eq!(scan_alt_screen_state(b"\x1b[?47h"), Some(true));
        assert_eq!(scan_alt_screen_state(b"\x1b[?1047l"), Some(false));
    }

    #[test]
    fn test_scan_last_sequence_wins() {
        assert_eq!(scan_alt_screen_state(b"\x1b[?1049hdraw\x1b[?1049l"), Some(false));
        assert_eq!(scan_alt_screen_state(b"\x1b[?1049l\x1b[?1049h"), Some(true));
    }

    #[test]
    fn test_scan_ignores_other_modes() {
        assert_eq!(scan_alt_screen_state(b"\x1b[?25h\x1b[?2004h"), None);
        assert_eq!(scan_alt_screen_state(b"\x1b[?104h"), None);
        assert_eq!(scan_alt_screen_state(b"plain text"), None);
        assert_eq!(scan_alt_screen_state(b""), None);
    }

    #[test]
    fn test_tracker_follows_stream() {
        let tracker = AltScreenTracker::new();
        assert!(!tracker.is_full_screen_application());

        tracker.observe(b"\x1b[?1049h\x1b[H");
        assert!(tracker.is_full_screen_application());

        tracker.observe(b"no mode changes here");
        assert!(tracker.is_full_screen_application());

        tracker.observe(b"\x1b[?1049l");
        assert!(!tracker.is_full_screen_application());
    }

    #[test]
    fn test_never_full_screen() {
        let policy = NeverFullScreen;
        policy.observe(b"\x1b[?1049h");
        assert!(!policy.is_full_screen_application());
    }
}
