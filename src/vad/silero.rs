//! Silero VAD via ONNX Runtime.
//!
//! Streaming per-frame speech probability over 512-sample windows at 16 kHz.
//! The model is stateful: a (2,1,128) hidden-state tensor and a 64-sample
//! context window carry temporal context across frames, and the high-pass
//! pre-filter carries its own two-tap memory. All three reset together.

use std::path::Path;

use ort::session::Session;
use tracing::{debug, info};

use crate::config::{FRAME_SAMPLES, SAMPLE_RATE};
use crate::error::{EarError, Result};

use super::highpass::{HighPassFilter, CUTOFF_HZ};

/// Hidden state shape (2, 1, 128), flattened.
const STATE_SIZE: usize = 2 * 1 * 128;

/// Samples of the previous frame prepended as overlap context. Without
/// this the model outputs near-zero probabilities.
const CONTEXT_SAMPLES: usize = if SAMPLE_RATE == 16_000 { 64 } else { 32 };

pub struct SileroVad {
    session: Session,
    state: Vec<f32>,
    context: Vec<f32>,
    hpf: HighPassFilter,
    threshold: f32,
}

impl SileroVad {
    /// Load the Silero VAD model. A missing or unloadable model is fatal:
    /// the daemon cannot gate the wake word without it.
    pub fn new(model_path: &Path, threshold: f32) -> Result<Self> {
        if !model_path.exists() {
            return Err(EarError::ModelNotFound {
                path: model_path.to_path_buf(),
                hint: "Download it with: wget -O models/silero_vad.onnx \
                       https://github.com/snakers4/silero-vad/raw/master/\
                       src/silero_vad/data/silero_vad.onnx"
                    .into(),
            });
        }

        // Single-threaded execution: the default thread pool burns 150%+
        // CPU on small-core devices.
        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.with_inter_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| EarError::Inference(format!("failed to load Silero VAD: {e}")))?;

        info!(
            model = %model_path.display(),
            threshold,
            frame_samples = FRAME_SAMPLES,
            "VAD loaded (Silero ONNX)"
        );

        Ok(Self {
            session,
            state: vec![0.0; STATE_SIZE],
            context: vec![0.0; CONTEXT_SAMPLES],
            hpf: HighPassFilter::new(CUTOFF_HZ, SAMPLE_RATE),
            threshold,
        })
    }

    #[allow(dead_code)]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    #[allow(dead_code)]
    pub fn set_threshold(&mut self, value: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(EarError::ThresholdRange(value));
        }
        self.threshold = value;
        Ok(())
    }

    /// Classify one frame as speech or silence.
    pub fn is_speech(&mut self, frame: &[u8]) -> Result<bool> {
        Ok(self.get_probability(frame)? >= self.threshold)
    }

    /// Raw speech probability for a frame. Frames must be exactly 1024
    /// bytes; anything else is a shape error.
    pub fn get_probability(&mut self, frame: &[u8]) -> Result<f32> {
        EarError::check_frame_len(frame)?;

        // int16 -> f32 in [-1, 1]
        let mut samples: Vec<f32> = frame
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();

        // The streaming model is sensitive to sub-100 Hz energy; filter
        // before it ever sees the frame.
        self.hpf.process(&mut samples);

        // Prepend the previous frame's tail as context, then save this
        // frame's post-filter tail for the next call.
        let mut with_context = Vec::with_capacity(CONTEXT_SAMPLES + FRAME_SAMPLES);
        with_context.extend_from_slice(&self.context);
        with_context.extend_from_slice(&samples);
        self.context.copy_from_slice(&samples[FRAME_SAMPLES - CONTEXT_SAMPLES..]);

        let input_tensor = ort::value::Value::from_array((
            [1, CONTEXT_SAMPLES + FRAME_SAMPLES],
            with_context,
        ))
        .map_err(|e| EarError::Inference(format!("input value: {e}")))?;

        let state_tensor = ort::value::Value::from_array(([2, 1, 128], self.state.clone()))
            .map_err(|e| EarError::Inference(format!("state value: {e}")))?;

        let sr_tensor = ort::value::Value::from_array(([1], vec![SAMPLE_RATE as i64]))
            .map_err(|e| EarError::Inference(format!("sr value: {e}")))?;

        let inputs = ort::inputs![
            "input" => input_tensor,
            "state" => state_tensor,
            "sr" => sr_tensor,
        ];
        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| EarError::Inference(format!("inference: {e}")))?;

        // Output[0]: speech probability, Output[1]: new hidden state.
        let prob = {
            let (_shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EarError::Inference(format!("extract probability: {e}")))?;
            *data
                .first()
                .ok_or_else(|| EarError::Inference("empty probability output".into()))?
        };
        {
            let (_shape, data) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| EarError::Inference(format!("extract state: {e}")))?;
            self.state = data.to_vec();
        }

        Ok(prob)
    }

    /// Zero the hidden state, context window, and filter memory. Call
    /// between separate utterances to avoid state leakage.
    pub fn reset(&mut self) {
        self.state = vec![0.0; STATE_SIZE];
        self.context = vec![0.0; CONTEXT_SAMPLES];
        self.hpf.reset();
        debug!("VAD state reset");
    }
}
