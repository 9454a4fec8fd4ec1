//! Pre-roll ring buffer: the most recent frames before a wake word fires.
//!
//! Bounded FIFO of frames with producer-side eviction (appending when full
//! drops the oldest) and an atomic drain. Shared between the capture thread
//! (appends) and the decision thread (drains on wake), so the deque sits
//! behind a mutex; each operation holds it for microseconds.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::frame::Frame;

pub struct PrerollBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
}

impl PrerollBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Add a frame, evicting the oldest when full.
    pub fn append(&self, frame: Frame) {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// Concatenate all buffered frames in temporal order and empty the
    /// buffer in one step.
    pub fn drain(&self) -> Vec<u8> {
        let mut frames = self.frames.lock().unwrap();
        let mut out = Vec::with_capacity(frames.len() * crate::config::FRAME_BYTES);
        for frame in frames.drain(..) {
            out.extend_from_slice(frame.as_bytes());
        }
        out
    }

    #[allow(dead_code)]
    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FRAME_BYTES;

    fn frame_filled(value: u8) -> Frame {
        Frame::from_bytes(&vec![value; FRAME_BYTES]).unwrap()
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let ring = PrerollBuffer::new(3);
        for i in 0..10 {
            ring.append(frame_filled(i));
            assert!(ring.len() <= 3);
        }
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn append_evicts_oldest() {
        let ring = PrerollBuffer::new(2);
        ring.append(frame_filled(1));
        ring.append(frame_filled(2));
        ring.append(frame_filled(3));
        let drained = ring.drain();
        assert_eq!(drained.len(), 2 * FRAME_BYTES);
        assert_eq!(drained[0], 2);
        assert_eq!(drained[FRAME_BYTES], 3);
    }

    #[test]
    fn drain_preserves_order_and_empties() {
        let ring = PrerollBuffer::new(4);
        for i in 1..=4 {
            ring.append(frame_filled(i));
        }
        let drained = ring.drain();
        for (i, chunk) in drained.chunks(FRAME_BYTES).enumerate() {
            assert!(chunk.iter().all(|&b| b == (i + 1) as u8));
        }
        assert_eq!(ring.len(), 0);
        assert!(ring.drain().is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let ring = PrerollBuffer::new(4);
        ring.append(frame_filled(7));
        ring.clear();
        assert_eq!(ring.len(), 0);
    }
}
