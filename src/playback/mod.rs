//! Ordered TTS playback through the system speakers.
//!
//! A background thread consumes chunks from a priority queue, reassembles
//! them in index order, decodes to the fixed playback format, and writes
//! period-padded PCM to the always-open output device. The thread also owns
//! the mic mute/unmute lifecycle around playback so the daemon never hears
//! its own voice.
//!
//! Mute safety: unmute is guaranteed on the sentinel, on `stop()`, on a
//! playback-thread panic (drop guard), and by a 60 s force-unmute timer.

pub mod chime;
pub mod decode;
pub mod mixer;
pub mod sequencer;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use base64::Engine as _;
use tracing::{debug, info, warn};

use crate::config::{
    CHIME_AMPLITUDE, MIC_MUTE_ENABLED, MIC_MUTE_SAFETY, SPEAKER_CHANNELS, SPEAKER_PERIOD_FRAMES,
    SPEAKER_SAMPLE_RATE, THREAD_STOP_TIMEOUT,
};

pub use mixer::{AlsaMixer, Mixer};
use sequencer::{ChunkPayload, ChunkSequencer, QueuedChunk};

/// Narrow capability handed to the player: who to tell when an utterance
/// finishes playing. Keeps the player decoupled from the state machine.
pub trait PlaybackDoneSink: Send + Sync {
    fn playback_done(&self);
}

/// Mute bookkeeping: when the mic went quiet, and whether the safety
/// deadline has passed.
struct MuteState {
    muted_at: Option<Instant>,
}

impl MuteState {
    fn new() -> Self {
        Self { muted_at: None }
    }

    /// Record the mute; returns false when already muted.
    fn mute(&mut self) -> bool {
        if self.muted_at.is_some() {
            return false;
        }
        self.muted_at = Some(Instant::now());
        true
    }

    /// Clear the mute; returns true when the mic was actually muted.
    fn unmute(&mut self) -> bool {
        self.muted_at.take().is_some()
    }

    #[allow(dead_code)]
    fn muted(&self) -> bool {
        self.muted_at.is_some()
    }

    fn safety_due(&self, timeout: Duration) -> bool {
        self.muted_at
            .map(|t| t.elapsed() >= timeout)
            .unwrap_or(false)
    }
}

type SharedQueue = Arc<(Mutex<BinaryHeap<Reverse<QueuedChunk>>>, Condvar)>;

pub struct AudioPlayer {
    queue: SharedQueue,
    stop: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    mute: Arc<Mutex<MuteState>>,
    mixer: Arc<dyn Mixer>,
    sink: Arc<rodio::Sink>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AudioPlayer {
    /// Open the playback device (kept open for the daemon's lifetime) and
    /// start the playback thread. An unopenable device is fatal.
    pub fn new(
        mixer: Arc<dyn Mixer>,
        done_sink: Arc<dyn PlaybackDoneSink>,
    ) -> anyhow::Result<Self> {
        mixer.enable_speakers();

        let queue: SharedQueue = Arc::new((Mutex::new(BinaryHeap::new()), Condvar::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let playing = Arc::new(AtomicBool::new(false));
        let mute = Arc::new(Mutex::new(MuteState::new()));

        // The output stream is !Send, so the playback thread opens the
        // device itself and reports back through this one-shot channel.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<Arc<rodio::Sink>>>();

        let thread = {
            let queue = queue.clone();
            let stop = stop.clone();
            let playing = playing.clone();
            let mute = mute.clone();
            let mixer = mixer.clone();
            std::thread::Builder::new()
                .name("jarvis-ear-speaker".into())
                .spawn(move || {
                    let (stream, handle) = match rodio::OutputStream::try_default() {
                        Ok(v) => v,
                        Err(e) => {
                            let _ = ready_tx
                                .send(Err(anyhow::anyhow!("failed to open playback device: {e}")));
                            return;
                        }
                    };
                    let sink = match rodio::Sink::try_new(&handle) {
                        Ok(s) => Arc::new(s),
                        Err(e) => {
                            let _ = ready_tx
                                .send(Err(anyhow::anyhow!("failed to create playback sink: {e}")));
                            return;
                        }
                    };
                    if ready_tx.send(Ok(sink.clone())).is_err() {
                        return;
                    }
                    playback_loop(&queue, &stop, &playing, &mute, &*mixer, &sink, &*done_sink);
                    drop(stream);
                })?
        };

        let sink = ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("playback thread died during startup"))??;

        info!(
            rate = SPEAKER_SAMPLE_RATE,
            channels = SPEAKER_CHANNELS,
            period = SPEAKER_PERIOD_FRAMES,
            "Playback device opened"
        );

        Ok(Self {
            queue,
            stop,
            playing,
            mute,
            mixer,
            sink,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Queue one TTS chunk. Out-of-order arrivals are fine; playback is
    /// strictly by ascending index.
    pub fn enqueue(&self, index: usize, audio_b64: &str, content_type: &str) {
        match base64::engine::general_purpose::STANDARD.decode(audio_b64) {
            Ok(bytes) => {
                debug!(index, bytes = bytes.len(), content_type, "TTS chunk enqueued");
                self.push(QueuedChunk {
                    index,
                    payload: ChunkPayload::Audio {
                        bytes,
                        content_type: content_type.to_string(),
                    },
                });
            }
            Err(e) => {
                warn!(index, "Dropping TTS chunk with invalid base64: {e}");
            }
        }
    }

    /// All chunks for this utterance have been sent; the sentinel keys at
    /// `total_chunks` so it sorts after every real chunk.
    pub fn signal_done(&self, total_chunks: usize) {
        debug!(total_chunks, "Sentinel enqueued");
        self.push(QueuedChunk {
            index: total_chunks,
            payload: ChunkPayload::Sentinel,
        });
    }

    /// Play the wake acknowledgement chime. Appended synchronously at
    /// detection time, while the mic is still live — it is not a queue
    /// item and precedes any TTS audio.
    pub fn play_chime(&self) {
        write_pcm(&self.sink, chime::wake_chime(CHIME_AMPLITUDE));
        debug!("Wake chime queued for playback");
    }

    #[allow(dead_code)]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Stop the playback thread and close out. Unmutes the mic if the
    /// thread left it muted.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblock both the condvar wait and any in-progress drain.
        self.sink.stop();
        self.queue.1.notify_all();

        if let Some(handle) = self.thread.lock().unwrap().take() {
            let deadline = Instant::now() + THREAD_STOP_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("Playback thread did not stop within 2 seconds");
            }
        }

        // Belt and braces: the drop guard in the thread normally handles
        // this, but a hung thread must not leave the mic dead.
        if self.mute.lock().unwrap().unmute() {
            warn!("Mic still muted at player stop, unmuting");
            self.mixer.set_mic_capture(true);
        }

        info!("Audio player stopped");
    }

    fn push(&self, chunk: QueuedChunk) {
        let (lock, cvar) = &*self.queue;
        lock.lock().unwrap().push(Reverse(chunk));
        cvar.notify_one();
    }
}

/// Unmute-on-exit guard: runs on normal return and on panic unwind.
struct UnmuteOnExit<'a> {
    mute: &'a Mutex<MuteState>,
    mixer: &'a dyn Mixer,
}

impl Drop for UnmuteOnExit<'_> {
    fn drop(&mut self) {
        if self.mute.lock().unwrap().unmute() {
            warn!("Playback loop exiting with mic muted, unmuting");
            self.mixer.set_mic_capture(true);
        }
    }
}

fn playback_loop(
    queue: &SharedQueue,
    stop: &AtomicBool,
    playing: &AtomicBool,
    mute: &Mutex<MuteState>,
    mixer: &dyn Mixer,
    sink: &rodio::Sink,
    done_sink: &dyn PlaybackDoneSink,
) {
    let _guard = UnmuteOnExit { mute, mixer };
    let mut sequencer = ChunkSequencer::new();
    let (lock, cvar) = &**queue;

    while !stop.load(Ordering::SeqCst) {
        // Safety timer: the daemon must never leave the mic muted.
        {
            let mut m = mute.lock().unwrap();
            if m.safety_due(MIC_MUTE_SAFETY) {
                warn!(
                    timeout_secs = MIC_MUTE_SAFETY.as_secs(),
                    "Mic muted past the safety deadline, forcing unmute"
                );
                m.unmute();
                mixer.set_mic_capture(true);
            }
        }

        let item = {
            let mut q = lock.lock().unwrap();
            if q.is_empty() {
                let (guard, _timeout) = cvar
                    .wait_timeout(q, Duration::from_millis(100))
                    .unwrap();
                q = guard;
            }
            q.pop().map(|Reverse(chunk)| chunk)
        };
        let Some(chunk) = item else { continue };

        match chunk.payload {
            ChunkPayload::Sentinel => {
                // Let the device buffer empty before releasing the mic.
                sink.sleep_until_end();
                if mute.lock().unwrap().unmute() {
                    mixer.set_mic_capture(true);
                }
                playing.store(false, Ordering::SeqCst);
                sequencer.reset_session();
                info!(total_chunks = chunk.index, "Playback complete");
                done_sink.playback_done();
            }
            ChunkPayload::Audio {
                bytes,
                content_type,
            } => {
                if chunk.index == 0 {
                    playing.store(true, Ordering::SeqCst);
                    if MIC_MUTE_ENABLED && mute.lock().unwrap().mute() {
                        mixer.set_mic_capture(false);
                    }
                }
                for (index, bytes, ct) in sequencer.push_audio(chunk.index, bytes, content_type) {
                    let pcm = decode::decode_chunk(&bytes, &ct);
                    if pcm.is_empty() {
                        // Decode failure already logged; skip the chunk.
                        continue;
                    }
                    write_pcm(sink, pcm);
                    debug!(index, "TTS chunk written");
                }
            }
        }
    }
}

/// Pad PCM to a whole number of playback periods so the final write never
/// leaves the device starved mid-period.
fn pad_to_period(mut pcm: Vec<i16>) -> Vec<i16> {
    let period = SPEAKER_PERIOD_FRAMES * SPEAKER_CHANNELS;
    let rem = pcm.len() % period;
    if rem != 0 {
        pcm.extend(std::iter::repeat(0i16).take(period - rem));
    }
    pcm
}

fn write_pcm(sink: &rodio::Sink, pcm: Vec<i16>) {
    let period = SPEAKER_PERIOD_FRAMES * SPEAKER_CHANNELS;
    let padded = pad_to_period(pcm);
    for block in padded.chunks(period) {
        sink.append(rodio::buffer::SamplesBuffer::new(
            SPEAKER_CHANNELS as u16,
            SPEAKER_SAMPLE_RATE,
            block.to_vec(),
        ));
    }
}
