//! jarvis-ear: always-on voice capture daemon.
//!
//! Two-stage audio pipeline feeding a remote conversational backend:
//! 1. The capture thread reads 32 ms frames (512 samples at 16 kHz).
//! 2. Every frame goes through Silero VAD.
//! 3. Only speech frames reach the wake word detector (saves CPU).
//! 4. On "Hey Jarvis" the state machine transitions to CAPTURING.
//! 5. During CAPTURING all frames (speech and silence) are buffered.
//! 6. After 2 s of silence the utterance ships to the backend, and the
//!    streamed TTS reply plays back with the mic muted.

mod audio;
mod backend;
mod config;
mod display;
mod error;
mod playback;
mod state_machine;
mod vad;
mod wake_word;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use audio::AudioCapture;
use backend::BackendClient;
use config::{
    Settings, CHANNELS, SAMPLE_RATE, SAMPLE_WIDTH, STATS_INTERVAL, VAD_THRESHOLD, WAKE_THRESHOLD,
};
use display::DisplayClient;
use playback::{AlsaMixer, AudioPlayer, Mixer, PlaybackDoneSink};
use state_machine::{CaptureStateMachine, State};
use vad::SileroVad;
use wake_word::WakeWordDetector;

/// Events crossing from other threads into the decision loop, so the
/// decision thread stays the sole mutator of state-machine fields.
enum ControlEvent {
    PlaybackDone,
}

/// One-method handle the player calls when an utterance finishes playing.
struct MailboxDoneSink(crossbeam_channel::Sender<ControlEvent>);

impl PlaybackDoneSink for MailboxDoneSink {
    fn playback_done(&self) {
        let _ = self.0.try_send(ControlEvent::PlaybackDone);
    }
}

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        error!("Fatal: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    info!("=== jarvis-ear starting ===");
    info!(
        rate = SAMPLE_RATE,
        bits = SAMPLE_WIDTH * 8,
        channels = CHANNELS,
        "Audio format"
    );

    let settings = Settings::from_env();

    // Backend I/O and signal handling run on their own thread pool; the
    // decision loop below keeps the main thread.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    runtime.spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {e}");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // Model loading is fatal when the files are missing; the daemon has
    // nothing to do without its ears.
    info!("Loading VAD model...");
    let mut vad = SileroVad::new(&settings.model_dir.join("silero_vad.onnx"), VAD_THRESHOLD)?;

    info!("Loading wake word model...");
    let mut wakeword = WakeWordDetector::new(&settings.model_dir, WAKE_THRESHOLD)?;

    let mut state = CaptureStateMachine::new();
    info!("State machine initialized (idle)");

    let mut capture = AudioCapture::start()?;

    let display = Arc::new(DisplayClient::new(&settings.display_url));
    let (control_tx, control_rx) = crossbeam_channel::bounded::<ControlEvent>(16);
    let mixer: Arc<dyn Mixer> = Arc::new(AlsaMixer::new());
    let player = Arc::new(AudioPlayer::new(
        mixer,
        Arc::new(MailboxDoneSink(control_tx)),
    )?);

    // Backend is optional at boot: capture and wake detection run locally
    // while the client reconnects in the background.
    info!("Connecting to backend...");
    let mut backend = BackendClient::new(settings.clone(), player.clone(), display.clone());
    backend.start(runtime.handle(), shutdown_rx.clone());

    info!("=== Listening for 'Hey Jarvis' ===");

    let mut total_frames: u64 = 0;
    let mut speech_frames: u64 = 0;
    let mut wake_detections: u64 = 0;
    let mut captures_completed: u64 = 0;
    let mut last_stats = Instant::now();

    while !*shutdown_rx.borrow() {
        // Cross-thread events first: keeps state-machine mutation on this
        // thread only.
        while let Ok(event) = control_rx.try_recv() {
            match event {
                ControlEvent::PlaybackDone => {
                    state.on_tts_done();
                    display.on_tts_done();
                }
            }
        }
        state.check_conversation_timeout();

        let Some(frame) = capture.get_frame(Duration::from_millis(100)) else {
            continue;
        };

        total_frames += 1;
        let is_speech = vad.is_speech(frame.as_bytes())?;
        if is_speech {
            speech_frames += 1;
        }

        match state.state() {
            State::Idle => {
                // Two-stage pipeline: the wake word only runs on speech
                // frames. A CPU optimization, not a correctness gate.
                if is_speech && wakeword.detect(frame.as_bytes())? {
                    wake_detections += 1;
                    info!("Wake word detected, draining pre-roll buffer");
                    player.play_chime();
                    display.on_wake_word();
                    let preroll = capture.drain_preroll();
                    state.on_wake_word(preroll);
                    wakeword.reset();
                    vad.reset();
                }
            }
            State::Capturing => {
                if let Some(captured) = state.on_frame(frame.as_bytes(), is_speech) {
                    captures_completed += 1;
                    let duration_s = captured.len() as f64
                        / (SAMPLE_RATE as usize * SAMPLE_WIDTH * CHANNELS) as f64;
                    info!(
                        capture = captures_completed,
                        duration_secs = duration_s,
                        bytes = captured.len(),
                        "Capture complete"
                    );
                    backend.send_audio(&captured);
                    vad.reset();
                    wakeword.reset();
                }
            }
            State::Conversation => {
                if is_speech {
                    state.on_conversation_speech(frame.as_bytes());
                }
            }
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let elapsed = last_stats.elapsed().as_secs_f64();
            let fps = total_frames as f64 / elapsed;
            let speech_pct = if total_frames > 0 {
                speech_frames as f64 / total_frames as f64 * 100.0
            } else {
                0.0
            };
            let status = backend.status();
            info!(
                fps,
                speech_pct,
                wakes = wake_detections,
                captures = captures_completed,
                queue_drops = capture.dropped_frames(),
                overruns = capture.overruns(),
                backend_connected = status.connected,
                backend_reconnects = status.reconnects,
                token_age_secs = status.token_age.map(|a| a.as_secs()),
                "Stats"
            );
            total_frames = 0;
            speech_frames = 0;
            last_stats = Instant::now();
        }
    }

    info!("Disconnecting from backend...");
    let _ = shutdown_tx.send(true);
    info!("Stopping audio capture...");
    capture.stop();
    player.stop();
    runtime.shutdown_timeout(Duration::from_secs(2));
    info!("=== jarvis-ear stopped ===");
    Ok(())
}
