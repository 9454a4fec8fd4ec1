//! Ordered reassembly of TTS chunks.
//!
//! Chunks arrive keyed by a sequential index but not necessarily in order.
//! The sequencer buffers out-of-order arrivals and releases runs of chunks
//! strictly ascending from the cursor, starting at 0. A sentinel (keyed at
//! `totalChunks`, which sorts after every real chunk) ends the session.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One entry in the player's priority queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedChunk {
    pub index: usize,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPayload {
    Audio { bytes: Vec<u8>, content_type: String },
    /// "No more chunks for this utterance"; index = totalChunks.
    Sentinel,
}

impl Ord for QueuedChunk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index).then_with(|| {
            // Same key: play audio before acknowledging the sentinel.
            let rank = |p: &ChunkPayload| match p {
                ChunkPayload::Audio { .. } => 0,
                ChunkPayload::Sentinel => 1,
            };
            rank(&self.payload).cmp(&rank(&other.payload))
        })
    }
}

impl PartialOrd for QueuedChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cursor + pending map enforcing in-order playback.
pub struct ChunkSequencer {
    next_index: usize,
    pending: BTreeMap<usize, (Vec<u8>, String)>,
}

impl ChunkSequencer {
    pub fn new() -> Self {
        Self {
            next_index: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Accept one chunk; returns the run of chunks now playable, in
    /// strictly ascending index order. Chunks at an index already played
    /// or already buffered are dropped (nothing plays twice).
    pub fn push_audio(
        &mut self,
        index: usize,
        bytes: Vec<u8>,
        content_type: String,
    ) -> Vec<(usize, Vec<u8>, String)> {
        if index < self.next_index || self.pending.contains_key(&index) {
            return Vec::new();
        }
        self.pending.insert(index, (bytes, content_type));

        let mut ready = Vec::new();
        while let Some((bytes, ct)) = self.pending.remove(&self.next_index) {
            ready.push((self.next_index, bytes, ct));
            self.next_index += 1;
        }
        ready
    }

    /// End the session: reset the cursor and discard any stragglers.
    pub fn reset_session(&mut self) {
        self.next_index = 0;
        self.pending.clear();
    }

    #[allow(dead_code)]
    pub fn next_index(&self) -> usize {
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(index: usize) -> (usize, Vec<u8>, String) {
        (index, vec![index as u8], "audio/wav".to_string())
    }

    #[test]
    fn in_order_chunks_release_immediately() {
        let mut seq = ChunkSequencer::new();
        for i in 0..3 {
            let (idx, bytes, ct) = audio(i);
            let ready = seq.push_audio(idx, bytes, ct);
            assert_eq!(ready.len(), 1);
            assert_eq!(ready[0].0, i);
        }
    }

    #[test]
    fn out_of_order_arrival_plays_in_index_order() {
        let mut seq = ChunkSequencer::new();
        // Arrival order 2, 0, 1 must play as 0, 1, 2.
        assert!(seq.push_audio(2, vec![2], "audio/wav".into()).is_empty());
        let first = seq.push_audio(0, vec![0], "audio/wav".into());
        assert_eq!(first.iter().map(|r| r.0).collect::<Vec<_>>(), vec![0]);
        let rest = seq.push_audio(1, vec![1], "audio/wav".into());
        assert_eq!(rest.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(seq.next_index(), 3);
    }

    #[test]
    fn no_index_plays_twice() {
        let mut seq = ChunkSequencer::new();
        assert_eq!(seq.push_audio(0, vec![0], "audio/wav".into()).len(), 1);
        assert!(seq.push_audio(0, vec![0], "audio/wav".into()).is_empty());
        // Duplicate of a still-pending chunk is also dropped.
        assert!(seq.push_audio(2, vec![2], "audio/wav".into()).is_empty());
        assert!(seq.push_audio(2, vec![9], "audio/wav".into()).is_empty());
        let ready = seq.push_audio(1, vec![1], "audio/wav".into());
        assert_eq!(ready.iter().map(|r| r.0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(ready[1].1, vec![2]);
    }

    #[test]
    fn session_reset_starts_over_at_zero() {
        let mut seq = ChunkSequencer::new();
        seq.push_audio(0, vec![0], "audio/wav".into());
        seq.push_audio(5, vec![5], "audio/wav".into());
        seq.reset_session();
        assert_eq!(seq.next_index(), 0);
        let ready = seq.push_audio(0, vec![7], "audio/wav".into());
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn sentinel_sorts_after_audio_at_same_key() {
        let audio = QueuedChunk {
            index: 3,
            payload: ChunkPayload::Audio {
                bytes: vec![],
                content_type: "audio/wav".into(),
            },
        };
        let sentinel = QueuedChunk {
            index: 3,
            payload: ChunkPayload::Sentinel,
        };
        assert!(audio < sentinel);
        let earlier = QueuedChunk {
            index: 1,
            payload: ChunkPayload::Sentinel,
        };
        assert!(earlier < audio);
    }
}
