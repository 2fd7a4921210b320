//! Duration- and size-bounded ring of encoded chunks.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{trace, warn};

use crate::chunk::{EncodedChunk, StreamFormat};

/// Ring buffer of encoded chunks, oldest evicted first.
///
/// Chunks are kept in nondecreasing timestamp order. After every push the span
/// between the oldest and newest chunk is at most the window, and the payload
/// total is at most `max_bytes` unless a single chunk alone exceeds it.
#[derive(Debug)]
pub struct ChunkRing {
    chunks: VecDeque<EncodedChunk>,
    window_usec: u64,
    max_bytes: usize,
    total_bytes: usize,
    format: Option<StreamFormat>,
    evicted: u64,
    rejected: u64,
}

impl ChunkRing {
    /// Create a ring holding at most `window` of video and `max_bytes` of
    /// payload.
    pub fn new(window: Duration, max_bytes: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            window_usec: window.as_micros() as u64,
            max_bytes,
            total_bytes: 0,
            format: None,
            evicted: 0,
            rejected: 0,
        }
    }

    /// Record the encoder output format.
    pub fn set_format(&mut self, format: StreamFormat) {
        self.format = Some(format);
    }

    /// Encoder output format, once known.
    pub fn format(&self) -> Option<&StreamFormat> {
        self.format.as_ref()
    }

    /// Append `chunk`, evicting from the front as needed.
    ///
    /// Returns false if the chunk was dropped because its timestamp precedes
    /// the newest buffered chunk.
    pub fn push(&mut self, chunk: EncodedChunk) -> bool {
        if let Some(newest) = self.chunks.back() {
            if chunk.pts_usec < newest.pts_usec {
                warn!(
                    pts_usec = chunk.pts_usec,
                    newest_usec = newest.pts_usec,
                    "Dropping out-of-order chunk"
                );
                self.rejected += 1;
                return false;
            }
        }

        self.total_bytes += chunk.len();
        self.chunks.push_back(chunk);
        self.evict();
        true
    }

    fn evict(&mut self) {
        while self.chunks.len() > 1
            && (self.span_usec() > self.window_usec || self.total_bytes > self.max_bytes)
        {
            if let Some(oldest) = self.chunks.pop_front() {
                self.total_bytes -= oldest.len();
                self.evicted += 1;
                trace!(pts_usec = oldest.pts_usec, "Evicted chunk");
            }
        }
    }

    /// Time between the oldest and newest buffered chunk.
    pub fn span_usec(&self) -> u64 {
        match (self.chunks.front(), self.chunks.back()) {
            (Some(first), Some(last)) => last.pts_usec - first.pts_usec,
            _ => 0,
        }
    }

    /// Number of buffered chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total payload bytes buffered.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Chunks evicted so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Out-of-order chunks dropped so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Index of the oldest sync chunk.
    pub fn first_sync_index(&self) -> Option<usize> {
        self.chunks.iter().position(|c| c.is_sync)
    }

    /// Iterate over buffered chunks, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &EncodedChunk> {
        self.chunks.iter()
    }

    /// Copy the current contents starting at the oldest sync chunk.
    ///
    /// The snapshot owns its chunk list, so later pushes and evictions do not
    /// affect it.
    pub fn snapshot(&self) -> SaveSnapshot {
        let chunks = match self.first_sync_index() {
            Some(start) => self.chunks.iter().skip(start).cloned().collect(),
            None => Vec::new(),
        };

        SaveSnapshot {
            chunks,
            format: self.format.clone(),
        }
    }

    /// Drop every buffered chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }
}

/// Point-in-time copy of the ring handed to the muxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSnapshot {
    /// Chunks, oldest first, starting at a sync chunk.
    pub chunks: Vec<EncodedChunk>,

    /// Encoder output format at snapshot time.
    pub format: Option<StreamFormat>,
}

impl SaveSnapshot {
    /// Returns true if the snapshot can be written to a playable file.
    pub fn is_playable(&self) -> bool {
        self.format.is_some() && self.chunks.first().is_some_and(|c| c.is_sync)
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if the snapshot holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Span between the first and last chunk.
    pub fn duration_usec(&self) -> u64 {
        match (self.chunks.first(), self.chunks.last()) {
            (Some(first), Some(last)) => last.pts_usec - first.pts_usec,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn chunk(pts_usec: u64, is_sync: bool) -> EncodedChunk {
        EncodedChunk::new(Bytes::from(vec![0xAB; 100]), pts_usec, is_sync)
    }

    fn format() -> StreamFormat {
        StreamFormat {
            width: 64,
            height: 64,
            codec_config: Bytes::from_static(&[0, 0, 0, 1, 0x67, 0, 0, 0, 1, 0x68]),
        }
    }

    #[test]
    fn test_window_bound_holds_after_every_push() {
        let mut ring = ChunkRing::new(Duration::from_secs(7), usize::MAX);
        let mut pts = 0;
        for i in 0..1000u64 {
            // Irregular spacing between 10ms and 50ms.
            pts += 10_000 + (i * 7919 % 40_000);
            assert!(ring.push(chunk(pts, i % 30 == 0)));
            assert!(ring.span_usec() <= 7_000_000);

            let stamps: Vec<u64> = ring.iter().map(|c| c.pts_usec).collect();
            assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        }
        assert!(ring.evicted() > 0);
    }

    #[test]
    fn test_out_of_order_chunk_is_dropped() {
        let mut ring = ChunkRing::new(Duration::from_secs(7), usize::MAX);
        assert!(ring.push(chunk(1_000, true)));
        assert!(ring.push(chunk(2_000, false)));
        assert!(!ring.push(chunk(1_500, false)));
        assert!(ring.push(chunk(2_000, false)));

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.rejected(), 1);
    }

    #[test]
    fn test_byte_bound_keeps_newest() {
        let mut ring = ChunkRing::new(Duration::from_secs(7), 250);
        for i in 0..5 {
            ring.push(chunk(i * 1000, true));
            assert!(ring.total_bytes() <= 250);
        }
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.iter().next().map(|c| c.pts_usec), Some(3000));

        // A single oversized chunk is still kept.
        ring.push(EncodedChunk::new(Bytes::from(vec![0; 1000]), 10_000, true));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_snapshot_starts_at_sync_chunk() {
        let mut ring = ChunkRing::new(Duration::from_secs(7), usize::MAX);
        ring.set_format(format());
        ring.push(chunk(0, false));
        ring.push(chunk(1, false));
        ring.push(chunk(2, true));
        ring.push(chunk(3, false));

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.chunks[0].is_sync);
        assert_eq!(snapshot.chunks[0].pts_usec, 2);
        assert!(snapshot.is_playable());
    }

    #[test]
    fn test_snapshot_without_sync_or_format_is_not_playable() {
        let mut ring = ChunkRing::new(Duration::from_secs(7), usize::MAX);
        ring.push(chunk(0, true));
        assert!(!ring.snapshot().is_playable());

        let mut ring = ChunkRing::new(Duration::from_secs(7), usize::MAX);
        ring.set_format(format());
        ring.push(chunk(0, false));
        let snapshot = ring.snapshot();
        assert!(snapshot.is_empty());
        assert!(!snapshot.is_playable());
    }

    #[test]
    fn test_snapshot_isolated_from_later_eviction() {
        let mut ring = ChunkRing::new(Duration::from_secs(1), usize::MAX);
        ring.set_format(format());
        for i in 0..30u64 {
            ring.push(chunk(i * 33_333, i % 10 == 0));
        }

        let snapshot = ring.snapshot();
        let before = snapshot.clone();

        for i in 30..200u64 {
            ring.push(chunk(i * 33_333, i % 10 == 0));
        }
        ring.clear();

        assert_eq!(snapshot, before);
        assert_eq!(snapshot.chunks[0].pts_usec, 0);
        assert_eq!(snapshot.chunks[0].data.len(), 100);
    }
}
