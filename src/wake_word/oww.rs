//! openWakeWord 3-stage ONNX detection pipeline for "Hey Jarvis".
//!
//! Stages:
//!   1. `melspectrogram.onnx` — 1280 raw samples -> mel features
//!   2. `embedding_model.onnx` — mel features -> one embedding vector
//!   3. one classifier per configured phrase (`hey_jarvis_v0.1.onnx`) —
//!      a window of recent embeddings -> confidence score
//!
//! Input frames are 512 samples (32 ms); the detector buffers internally
//! and only runs the pipeline once 1280 samples (80 ms) have accumulated.

use std::path::Path;

use ort::session::Session;
use tracing::{debug, info};

use crate::error::{EarError, Result};

/// Samples per pipeline invocation (80 ms at 16 kHz).
const CHUNK_SAMPLES: usize = 1280;

/// How many embeddings the phrase classifiers expect.
const EMBEDDING_WINDOW: usize = 16;

/// Default phrase classifier shipped with the daemon.
const DEFAULT_PHRASE: &str = "hey_jarvis_v0.1";

pub struct WakeWordDetector {
    mel_session: Session,
    embed_session: Session,
    phrase_sessions: Vec<(String, Session)>,
    /// Raw sample accumulation until a full 1280-sample chunk exists.
    buffer: Vec<f32>,
    /// Recent embedding vectors fed to the phrase classifiers.
    embeddings: Vec<Vec<f32>>,
    threshold: f32,
}

impl WakeWordDetector {
    /// Load the shared mel/embedding models and the phrase classifier.
    /// All three must be present; a wake daemon without its phrase model
    /// serves no purpose, so absence is fatal with a download hint.
    pub fn new(model_dir: &Path, threshold: f32) -> Result<Self> {
        let mel_path = model_dir.join("melspectrogram.onnx");
        let embed_path = model_dir.join("embedding_model.onnx");
        let phrase_path = model_dir.join(format!("{DEFAULT_PHRASE}.onnx"));

        for path in [&mel_path, &embed_path, &phrase_path] {
            if !path.exists() {
                return Err(EarError::ModelNotFound {
                    path: path.clone(),
                    hint: "Download the openWakeWord base models and the hey_jarvis \
                           classifier from https://github.com/dscripka/openWakeWord/releases"
                        .into(),
                });
            }
        }

        let load = |path: &Path| -> Result<Session> {
            Session::builder()
                .and_then(|b| b.with_intra_threads(1))
                .and_then(|b| b.with_inter_threads(1))
                .and_then(|b| b.commit_from_file(path))
                .map_err(|e| EarError::Inference(format!("{}: {e}", path.display())))
        };

        let detector = Self {
            mel_session: load(&mel_path)?,
            embed_session: load(&embed_path)?,
            phrase_sessions: vec![(DEFAULT_PHRASE.to_string(), load(&phrase_path)?)],
            buffer: Vec::new(),
            embeddings: Vec::new(),
            threshold,
        };

        info!(
            phrase = DEFAULT_PHRASE,
            threshold, "Wake word loaded (openWakeWord 3-stage pipeline)"
        );
        Ok(detector)
    }

    /// Feed one frame; true when any configured phrase scores at or above
    /// the threshold. Internally buffers until the analysis window fills,
    /// so most calls return without touching the models.
    pub fn detect(&mut self, frame: &[u8]) -> Result<bool> {
        let score = self.process(frame)?;
        if score >= self.threshold {
            debug!(score, threshold = self.threshold, "Wake word score over threshold");
            return Ok(true);
        }
        Ok(false)
    }

    /// Best score across configured phrases for the windows completed by
    /// this frame (0.0 when no window completed).
    pub fn process(&mut self, frame: &[u8]) -> Result<f32> {
        EarError::check_frame_len(frame)?;

        // openWakeWord consumes raw int16 amplitudes, not normalized audio.
        self.buffer.extend(
            frame
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32),
        );

        let mut best: f32 = 0.0;
        while self.buffer.len() >= CHUNK_SAMPLES {
            let chunk: Vec<f32> = self.buffer.drain(..CHUNK_SAMPLES).collect();
            let score = self.run_pipeline(chunk)?;
            best = best.max(score);
        }
        Ok(best)
    }

    /// Discard buffered audio and embedding history. Called after every
    /// positive detection so trailing audio cannot re-trigger, and at
    /// every utterance boundary.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.embeddings.clear();
        debug!("Wake word detector reset");
    }

    fn run_pipeline(&mut self, chunk: Vec<f32>) -> Result<f32> {
        // Stage 1: raw audio -> mel spectrogram.
        let audio_input = ort::value::Value::from_array(([1, CHUNK_SAMPLES], chunk))
            .map_err(|e| EarError::Inference(format!("mel input: {e}")))?;
        let mel_outputs = self
            .mel_session
            .run(ort::inputs!["input" => audio_input])
            .map_err(|e| EarError::Inference(format!("mel inference: {e}")))?;

        let (mel_shape, mel_data) = mel_outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EarError::Inference(format!("extract mel: {e}")))?;
        let mel_dims: Vec<i64> = mel_shape.iter().copied().collect();
        let mel_vec = mel_data.to_vec();

        // Stage 2: mel features -> embedding vector.
        let embed_input = ort::value::Value::from_array((mel_dims, mel_vec))
            .map_err(|e| EarError::Inference(format!("embed input: {e}")))?;
        let embed_outputs = self
            .embed_session
            .run(ort::inputs!["input" => embed_input])
            .map_err(|e| EarError::Inference(format!("embed inference: {e}")))?;

        let embedding: Vec<f32> = {
            let (_shape, data) = embed_outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EarError::Inference(format!("extract embedding: {e}")))?;
            data.to_vec()
        };

        self.embeddings.push(embedding);
        if self.embeddings.len() > EMBEDDING_WINDOW {
            let excess = self.embeddings.len() - EMBEDDING_WINDOW;
            self.embeddings.drain(..excess);
        }
        if self.embeddings.len() < EMBEDDING_WINDOW {
            return Ok(0.0);
        }

        // Stage 3: embedding window -> per-phrase score; report the best.
        let embed_dim = self.embeddings[0].len();
        let flat: Vec<f32> = self
            .embeddings
            .iter()
            .flat_map(|e| e.iter().copied())
            .collect();

        let mut best: f32 = 0.0;
        for (name, session) in &mut self.phrase_sessions {
            let input = ort::value::Value::from_array((
                [1, EMBEDDING_WINDOW, embed_dim],
                flat.clone(),
            ))
            .map_err(|e| EarError::Inference(format!("{name} input: {e}")))?;

            let outputs = session
                .run(ort::inputs!["input" => input])
                .map_err(|e| EarError::Inference(format!("{name} inference: {e}")))?;

            let score = {
                let (_shape, data) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| EarError::Inference(format!("extract {name} score: {e}")))?;
                *data
                    .first()
                    .ok_or_else(|| EarError::Inference(format!("empty {name} output")))?
            };
            best = best.max(score);
        }

        Ok(best)
    }
}
