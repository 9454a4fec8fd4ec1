//! Fixed-size PCM frame passed between the capture, detection, and
//! capture-buffer stages.

use std::sync::Arc;

use crate::config::FRAME_BYTES;
use crate::error::{EarError, Result};

/// One 32 ms block of mono S16LE audio at 16 kHz — exactly 1024 bytes.
///
/// Frames are created by the capture thread and never mutated; cloning is
/// a reference-count bump, so the same frame can sit in the pre-roll ring
/// and the downstream queue without copying.
#[derive(Debug, Clone)]
pub struct Frame(Arc<[u8]>);

impl Frame {
    /// Build a frame from raw PCM bytes, validating the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        EarError::check_frame_len(bytes)?;
        Ok(Self(Arc::from(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Decode the frame's S16LE payload into normalized f32 samples.
    pub fn to_f32(&self) -> Vec<f32> {
        self.0
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FRAME_SAMPLES;

    #[test]
    fn from_bytes_enforces_frame_shape() {
        assert!(Frame::from_bytes(&vec![0u8; FRAME_BYTES]).is_ok());
        assert!(Frame::from_bytes(&vec![0u8; FRAME_BYTES - 1]).is_err());
        assert!(Frame::from_bytes(&vec![0u8; FRAME_BYTES * 2]).is_err());
    }

    #[test]
    fn to_f32_normalizes_full_scale() {
        let mut bytes = vec![0u8; FRAME_BYTES];
        bytes[..2].copy_from_slice(&i16::MIN.to_le_bytes());
        bytes[2..4].copy_from_slice(&i16::MAX.to_le_bytes());
        let samples = Frame::from_bytes(&bytes).unwrap().to_f32();
        assert_eq!(samples.len(), FRAME_SAMPLES);
        assert_eq!(samples[0], -1.0);
        assert!((samples[1] - (32767.0 / 32768.0)).abs() < 1e-6);
        assert_eq!(samples[2], 0.0);
    }
}
