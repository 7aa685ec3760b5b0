// PTY bridge integration tests.
//
// These tests run a real `/bin/sh` on a pseudo-terminal and drive it the way
// the session coordinator does: input bytes in, sequenced output chunks and
// an exit event out.

#![cfg(unix)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use termly::pty::{
    AltScreenTracker, BridgeOutputs, ForwardGate, NeverFullScreen, PtyBridge, PtyEvent,
    PtySpawnConfig, ScreenPolicy,
};
use termly::ring_buffer::{OutputRingBuffer, NO_SEQUENCE};
use tokio::sync::mpsc;

/// How long to wait for shell output or exit.
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

fn shell_config(dir: &tempfile::TempDir, args: &[&str]) -> PtySpawnConfig {
    PtySpawnConfig {
        command: "/bin/sh".to_string(),
        args: args.iter().map(|a| (*a).to_string()).collect(),
        cwd: dir.path().to_path_buf(),
        cols: 80,
        rows: 24,
        env: HashMap::from([("PS1".to_string(), "$ ".to_string())]),
    }
}

/// Collect output events until `needle` appears or the child exits.
///
/// Returns the concatenated output and the exit code if one was seen.
async fn collect_until(
    events: &mut mpsc::UnboundedReceiver<PtyEvent>,
    needle: &str,
) -> (String, Option<i32>) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    let mut text = String::new();
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Some(PtyEvent::Output(chunk))) => {
                text.push_str(&String::from_utf8_lossy(&chunk.data));
                if !needle.is_empty() && text.contains(needle) {
                    return (text, None);
                }
            }
            Ok(Some(PtyEvent::Exited { exit_code })) => return (text, Some(exit_code)),
            Ok(None) | Err(_) => break,
        }
    }
    (text, None)
}

#[tokio::test]
async fn test_shell_output_is_buffered_and_sequenced() {
    let dir = tempfile::TempDir::new().unwrap();
    let buffer = OutputRingBuffer::shared(100_000);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let bridge = PtyBridge::start(
        shell_config(&dir, &["-c", "echo termly-ready; exit 3"]),
        BridgeOutputs {
            buffer: Arc::clone(&buffer),
            local_output: None,
            events: tx,
            screen: Arc::new(NeverFullScreen),
            gate: ForwardGate::new(),
        },
    )
    .unwrap();
    assert!(bridge.pid().is_some());

    let (text, exit) = collect_until(&mut rx, "").await;
    assert!(text.contains("termly-ready"), "output was: {text:?}");
    assert_eq!(exit, Some(3));
    assert!(bridge.has_exited());
    assert!(!bridge.write(b"too late\n"));

    let chunks = buffer.lock().unwrap().get_after(NO_SEQUENCE);
    assert!(!chunks.is_empty());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.seq, i as i64, "sequence numbers are gapless from 0");
    }
    let replayed: String = chunks
        .iter()
        .map(|c| String::from_utf8_lossy(&c.data).into_owned())
        .collect();
    assert!(replayed.contains("termly-ready"));
}

#[tokio::test]
async fn test_input_reaches_child_and_resize_is_visible() {
    let dir = tempfile::TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let bridge = PtyBridge::start(
        shell_config(&dir, &[]),
        BridgeOutputs {
            buffer: OutputRingBuffer::shared(100_000),
            local_output: None,
            events: tx,
            screen: Arc::new(NeverFullScreen),
            gate: ForwardGate::new(),
        },
    )
    .unwrap();

    assert!(bridge.resize(120, 40));
    assert_eq!(bridge.size(), (120, 40));
    assert!(bridge.write(b"stty size; echo done-$((6*7))\n"));

    let (text, _) = collect_until(&mut rx, "done-42").await;
    assert!(text.contains("40 120"), "output was: {text:?}");

    assert!(bridge.write(b"exit 0\n"));
    let (_, exit) = collect_until(&mut rx, "").await;
    assert_eq!(exit, Some(0));
}

#[tokio::test]
async fn test_paused_gate_buffers_without_forwarding() {
    let dir = tempfile::TempDir::new().unwrap();
    let buffer = OutputRingBuffer::shared(100_000);
    let gate = ForwardGate::new();
    gate.pause();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _bridge = PtyBridge::start(
        shell_config(&dir, &["-c", "echo while-paused"]),
        BridgeOutputs {
            buffer: Arc::clone(&buffer),
            local_output: None,
            events: tx,
            screen: Arc::new(NeverFullScreen),
            gate,
        },
    )
    .unwrap();

    let (text, exit) = collect_until(&mut rx, "").await;
    assert!(exit.is_some());
    assert!(!text.contains("while-paused"), "output was forwarded: {text:?}");

    let replayed: String = buffer
        .lock()
        .unwrap()
        .get_after(NO_SEQUENCE)
        .iter()
        .map(|c| String::from_utf8_lossy(&c.data).into_owned())
        .collect();
    assert!(replayed.contains("while-paused"));
}

#[tokio::test]
async fn test_alt_screen_tracker_follows_child_output() {
    let dir = tempfile::TempDir::new().unwrap();
    let tracker = Arc::new(AltScreenTracker::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let bridge = PtyBridge::start(
        shell_config(&dir, &[]),
        BridgeOutputs {
            buffer: OutputRingBuffer::shared(100_000),
            local_output: None,
            events: tx,
            screen: tracker.clone(),
            gate: ForwardGate::new(),
        },
    )
    .unwrap();

    bridge.write(b"printf '\\033[?1049h'; echo ent\"\"ered\n");
    collect_until(&mut rx, "entered\r\n").await;
    assert!(tracker.is_full_screen_application());

    bridge.write(b"printf '\\033[?1049l'; echo le\"\"ft\n");
    collect_until(&mut rx, "left\r\n").await;
    assert!(!tracker.is_full_screen_application());

    bridge.kill();
    let (_, exit) = collect_until(&mut rx, "").await;
    assert!(exit.is_some());
}
