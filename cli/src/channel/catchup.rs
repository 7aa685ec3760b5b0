//! Batched replay of buffered output after a gap.
//!
//! On `catchup_request {lastSeq}` the driver snapshots everything after
//! `lastSeq` from the ring buffer, encrypts each chunk under its own IV and
//! sends the result as ordered `catchup_batch` messages separated by a short
//! delay, then a single `sync_complete` carrying the snapshot's current
//! sequence.
//!
//! The snapshot and its current sequence are taken under one lock, so
//! chunks appended during the replay are strictly newer than `currentSeq`
//! and flow through the live path afterwards.

use std::time::Duration;

use anyhow::Result;

use super::protocol::{BatchItem, Outbound};
use super::sink::MessageSink;
use crate::crypto::{seal_for_wire, SessionKey};
use crate::ring_buffer::{OutputChunk, SharedRingBuffer};

/// Batching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpSettings {
    /// Chunks per `catchup_batch`.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub batch_delay: Duration,
}

/// What a catch-up sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpSummary {
    /// Chunks replayed.
    pub chunks: usize,
    /// `catchup_batch` messages sent.
    pub batches: usize,
    /// Sequence reported in `sync_complete`.
    pub current_seq: i64,
}

/// Split `chunks` into consecutive slices of at most `batch_size`.
pub fn plan_batches(chunks: &[OutputChunk], batch_size: usize) -> std::slice::Chunks<'_, OutputChunk> {
    chunks.chunks(batch_size.max(1))
}

fn seal_chunk(chunk: &OutputChunk, key: &SessionKey) -> Result<BatchItem> {
    let sealed = seal_for_wire(&chunk.data, key)?;
    Ok(BatchItem {
        seq: chunk.seq,
        data: sealed.data,
        encrypted: true,
        iv: sealed.iv,
        timestamp: chunk.timestamp_ms,
    })
}

/// Replay everything after `after_seq` to `sink`.
///
/// # Errors
///
/// Returns the first send or encryption failure. Batches already sent stay
/// sent; the mobile re-requests from its own last sequence.
pub async fn send_catch_up<S>(
    sink: &mut S,
    buffer: &SharedRingBuffer,
    after_seq: i64,
    key: &SessionKey,
    settings: CatchUpSettings,
) -> Result<CatchUpSummary>
where
    S: MessageSink + ?Sized,
{
    let (chunks, current_seq) = {
        let buffer = buffer.lock().expect("ring buffer lock poisoned");
        (buffer.get_after(after_seq), buffer.current_sequence())
    };

    let batches: Vec<&[OutputChunk]> = plan_batches(&chunks, settings.batch_size).collect();
    let total_batches = batches.len();
    log::info!(
        "[Channel] Catch-up after seq {after_seq}: {} chunks in {total_batches} batches",
        chunks.len()
    );

    for (batch_index, batch) in batches.into_iter().enumerate() {
        let items = batch
            .iter()
            .map(|chunk| seal_chunk(chunk, key))
            .collect::<Result<Vec<_>>>()?;

        sink.send_message(&Outbound::CatchupBatch {
            batch: items,
            batch_index,
            total_batches,
        })
        .await?;

        if batch_index + 1 < total_batches && !settings.batch_delay.is_zero() {
            tokio::time::sleep(settings.batch_delay).await;
        }
    }

    sink.send_message(&Outbound::SyncComplete { current_seq }).await?;

    Ok(CatchUpSummary {
        chunks: chunks.len(),
        batches: total_batches,
        current_seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CATCHUP_BATCH_DELAY, CATCHUP_BATCH_SIZE};
    use crate::crypto::{open_from_wire, SessionKey};
    use crate::ring_buffer::OutputRingBuffer;

    fn settings() -> CatchUpSettings {
        CatchUpSettings {
            batch_size: CATCHUP_BATCH_SIZE,
            batch_delay: CATCHUP_BATCH_DELAY,
        }
    }

    fn filled(count: usize) -> SharedRingBuffer {
        let buffer = OutputRingBuffer::shared(1_000_000);
        {
            let mut b = buffer.lock().unwrap();
            for i in 0..count {
                b.append(format!("line {i}\r\n").into_bytes());
            }
        }
        buffer
    }

    fn parse(frames: &[String]) -> Vec<serde_json::Value> {
        frames
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_batches_then_sync_complete() {
        // Buffer holds seq 0..=150; the mobile has everything up to 5.
        let buffer = filled(151);
        let key = SessionKey::from_bytes([7; 32]);
        let mut sink: Vec<String> = Vec::new();

        let summary = send_catch_up(&mut sink, &buffer, 5, &key, settings()).await.unwrap();
        assert_eq!(summary.chunks, 145);
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.current_seq, 150);

        let frames = parse(&sink);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0]["type"], "catchup_batch");
        assert_eq!(frames[0]["batch"].as_array().unwrap().len(), 100);
        assert_eq!(frames[0]["batchIndex"], 0);
        assert_eq!(frames[0]["totalBatches"], 2);
        assert_eq!(frames[1]["batch"].as_array().unwrap().len(), 45);
        assert_eq!(frames[1]["batchIndex"], 1);
        assert_eq!(frames[2]["type"], "sync_complete");
        assert_eq!(frames[2]["currentSeq"], 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_is_ordered_and_decryptable() {
        let buffer = filled(20);
        let key = SessionKey::from_bytes([9; 32]);
        let mut sink: Vec<String> = Vec::new();

        send_catch_up(
            &mut sink,
            &buffer,
            -1,
            &key,
            CatchUpSettings {
                batch_size: 7,
                batch_delay: Duration::from_millis(50),
            },
        )
        .await
        .unwrap();

        let frames = parse(&sink);
        let mut seqs = Vec::new();
        let mut ivs = std::collections::HashSet::new();
        for frame in &frames[..frames.len() - 1] {
            for item in frame["batch"].as_array().unwrap() {
                let seq = item["seq"].as_i64().unwrap();
                let plain = open_from_wire(
                    item["data"].as_str().unwrap(),
                    item["iv"].as_str().unwrap(),
                    &key,
                )
                .unwrap();
                assert_eq!(plain, format!("line {seq}\r\n").into_bytes());
                assert!(ivs.insert(item["iv"].as_str().unwrap().to_string()));
                seqs.push(seq);
            }
        }
        assert_eq!(seqs, (0..20).collect::<Vec<i64>>());
        assert_eq!(frames.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_when_current_sends_only_sync() {
        let buffer = filled(3);
        let key = SessionKey::from_bytes([1; 32]);
        let mut sink: Vec<String> = Vec::new();

        let summary = send_catch_up(&mut sink, &buffer, 2, &key, settings()).await.unwrap();
        assert_eq!(summary.batches, 0);
        assert_eq!(sink, vec![r#"{"type":"sync_complete","currentSeq":2}"#.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_catch_up_delays_between_batches() {
        let buffer = filled(250);
        let key = SessionKey::from_bytes([2; 32]);
        let mut sink: Vec<String> = Vec::new();

        let start = tokio::time::Instant::now();
        send_catch_up(&mut sink, &buffer, -1, &key, settings()).await.unwrap();
        // Three batches, two gaps.
        assert_eq!(start.elapsed(), CATCHUP_BATCH_DELAY * 2);
    }

    #[test]
    fn test_plan_batches_sizes() {
        let buffer = filled(250);
        let chunks = buffer.lock().unwrap().get_after(-1);
        let sizes: Vec<usize> = plan_batches(&chunks, 100).map(<[OutputChunk]>::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }
}
