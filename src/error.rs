use thiserror::Error;

/// Errors produced by the audio pipeline components.
#[derive(Debug, Error)]
pub enum EarError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("no default input device available")]
    NoDefaultInputDevice,

    #[error(
        "frame must be exactly {expected} bytes ({samples} samples x 2 bytes), got {got} bytes"
    )]
    FrameShape {
        expected: usize,
        samples: usize,
        got: usize,
    },

    #[error("model file not found: {}\n{hint}", path.display())]
    ModelNotFound {
        path: std::path::PathBuf,
        hint: String,
    },

    #[error("inference error: {0}")]
    Inference(String),

    #[error("threshold must be in [0.0, 1.0], got {0}")]
    ThresholdRange(f32),
}

pub type Result<T> = std::result::Result<T, EarError>;

impl EarError {
    /// Strict frame-length validation shared by the VAD and wake-word
    /// engines. Wrong-size frames are programming errors, not runtime
    /// conditions, so this propagates instead of being swallowed.
    pub fn check_frame_len(frame: &[u8]) -> Result<()> {
        if frame.len() != crate::config::FRAME_BYTES {
            return Err(EarError::FrameShape {
                expected: crate::config::FRAME_BYTES,
                samples: crate::config::FRAME_SAMPLES,
                got: frame.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FRAME_BYTES;

    #[test]
    fn frame_len_accepts_exact() {
        let frame = vec![0u8; FRAME_BYTES];
        assert!(EarError::check_frame_len(&frame).is_ok());
    }

    #[test]
    fn frame_len_rejects_short_and_long() {
        assert!(matches!(
            EarError::check_frame_len(&vec![0u8; FRAME_BYTES - 2]),
            Err(EarError::FrameShape { got, .. }) if got == FRAME_BYTES - 2
        ));
        assert!(EarError::check_frame_len(&vec![0u8; FRAME_BYTES + 2]).is_err());
        assert!(EarError::check_frame_len(&[]).is_err());
    }
}
