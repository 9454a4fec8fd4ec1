//! Central configuration for the jarvis-ear daemon.
//!
//! Audio topology is fixed at compile time (the numbers are tied to the
//! Silero VAD and openWakeWord input windows); deployment-specific values
//! (backend URL, password, model dir) come from the environment at startup.

use std::time::Duration;

// ── Capture format ──────────────────────────────────────────────────

/// Capture sample rate. Matches the DMIC native rate and the VAD model.
pub const SAMPLE_RATE: u32 = 16_000;
/// Bytes per sample (S16LE).
pub const SAMPLE_WIDTH: usize = 2;
pub const CHANNELS: usize = 1;

/// Samples per frame — Silero VAD's native streaming window at 16 kHz.
pub const FRAME_SAMPLES: usize = 512;
/// Frame size in bytes (512 samples × 2 bytes × 1 channel), 32 ms.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * SAMPLE_WIDTH * CHANNELS;

// ── Pre-roll and queueing ───────────────────────────────────────────

/// Frames of audio kept before the wake word fires (15 × 32 ms ≈ 500 ms).
pub const PREROLL_FRAMES: usize = 15;
/// Frame queue capacity (100 × 32 ms ≈ 3.2 s of headroom).
pub const FRAME_QUEUE_CAPACITY: usize = 100;
/// Raw-sample ring between the device callback and the framing thread
/// (~10 s at 16 kHz, same sizing as the capture it was adapted from).
pub const CAPTURE_RING_SAMPLES: usize = 160_000;

// ── Detection thresholds ────────────────────────────────────────────

/// Speech probability threshold. Lower than Silero's neutral 0.5 because
/// DMIC low-frequency hum depresses speech probability even after the
/// high-pass; measured speech peaks at 0.3-0.9 vs <0.05 for quiet rooms.
pub const VAD_THRESHOLD: f32 = 0.15;
/// Wake word confidence threshold.
pub const WAKE_THRESHOLD: f32 = 0.5;

// ── Capture lifecycle ───────────────────────────────────────────────

/// Consecutive silence that ends an utterance.
pub const SILENCE_TIMEOUT: Duration = Duration::from_secs(2);
/// Follow-up window after TTS playback during which speech re-opens
/// capture without a wake word.
pub const CONVERSATION_WINDOW: Duration = Duration::from_secs(15);
/// Gate for the follow-up window (the simpler deployment disables it).
pub const CONVERSATION_ENABLED: bool = true;

// ── Playback ────────────────────────────────────────────────────────

pub const SPEAKER_SAMPLE_RATE: u32 = 48_000;
pub const SPEAKER_CHANNELS: usize = 2;
/// Playback period in frames; PCM writes are padded to period multiples.
pub const SPEAKER_PERIOD_FRAMES: usize = 1024;
pub const SPEAKER_VOLUME_PCT: u32 = 85;
/// ALSA card index for the mixer controls below.
pub const MIXER_CARD: u32 = 1;
/// Gate for the mic mute/unmute lifecycle around playback.
pub const MIC_MUTE_ENABLED: bool = true;
/// Force-unmute deadline: the mic must never stay muted longer than this.
pub const MIC_MUTE_SAFETY: Duration = Duration::from_secs(60);
/// Peak sample value of the wake chime.
pub const CHIME_AMPLITUDE: i16 = 12_000;

// ── Backend ─────────────────────────────────────────────────────────

/// Unique agent identifier attached to every voice session.
pub const AGENT_ID: &str = "jarvis-ear";
/// Keepalive ping interval.
pub const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Warn when no pong arrived for this long.
pub const PONG_STALE_AFTER: Duration = Duration::from_secs(120);
/// Refresh the token ahead of its 7-day validity.
pub const TOKEN_REFRESH_AFTER: Duration = Duration::from_secs(6 * 24 * 3600);
/// Reconnect backoff bounds.
pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);

// ── Shutdown deadlines ──────────────────────────────────────────────

/// Join deadline for the capture and playback threads.
pub const THREAD_STOP_TIMEOUT: Duration = Duration::from_secs(2);

// ── Stats ───────────────────────────────────────────────────────────

pub const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Environment-derived settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend_url: String,
    pub password: String,
    pub model_dir: std::path::PathBuf,
    pub display_url: String,
}

impl Settings {
    pub fn from_env() -> Self {
        let env = |key: &str, default: &str| {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        Self {
            backend_url: env("BACKEND_URL", "http://localhost:4000"),
            password: env("JARVIS_PASSWORD", "jarvis"),
            model_dir: env("JARVIS_EAR_MODEL_DIR", "models").into(),
            display_url: env("DISPLAY_DAEMON_URL", "http://localhost:8765"),
        }
    }
}
