//! Continuous audio capture via cpal.
//!
//! The device callback downmixes to mono, resamples to 16 kHz, and pushes
//! f32 samples into a lock-free SPSC ring — no locks on the audio thread.
//! A dedicated framing thread pops samples, converts to S16LE, and slices
//! 1024-byte frames. Each complete frame:
//! 1. is appended to the pre-roll ring buffer unconditionally, then
//! 2. is offered to the bounded frame queue with a non-blocking send.
//!
//! If the queue is full (downstream too slow) the queue copy is dropped and
//! counted; the pre-roll ring is always updated first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};
use tracing::{error, info, warn};

use crate::config::{
    CAPTURE_RING_SAMPLES, FRAME_BYTES, FRAME_QUEUE_CAPACITY, PREROLL_FRAMES, SAMPLE_RATE,
    THREAD_STOP_TIMEOUT,
};
use crate::error::{EarError, Result};

use super::frame::Frame;
use super::resample::{downmix, resample_mono};
use super::ring_buffer::PrerollBuffer;

/// Accumulates f32 samples and emits complete S16LE frames.
///
/// Device reads rarely align with the 512-sample frame boundary, so bytes
/// are buffered until at least one full frame is available; a single push
/// may emit several frames.
pub struct Framer {
    pending: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(FRAME_BYTES * 2),
        }
    }

    pub fn push(&mut self, samples: &[f32]) -> Vec<Frame> {
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
            self.pending.extend_from_slice(&v.to_le_bytes());
        }
        let mut frames = Vec::new();
        while self.pending.len() >= FRAME_BYTES {
            let rest = self.pending.split_off(FRAME_BYTES);
            // Length is exact by construction.
            let frame = Frame::from_bytes(&self.pending).expect("framer slice is frame-sized");
            self.pending = rest;
            frames.push(frame);
        }
        frames
    }
}

/// Counters shared between the device callback, the framing thread, and
/// the stats line.
#[derive(Default)]
struct CaptureCounters {
    overruns: AtomicU64,
    drops: AtomicU64,
    device_errors: AtomicU64,
}

/// Resolved input device and its native stream parameters.
struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

fn resolve_device() -> Result<CaptureConfig> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(EarError::NoDefaultInputDevice)?;

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device
        .default_input_config()
        .map_err(|e| EarError::AudioDevice(format!("failed to get input config: {e}")))?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        native_rate,
        channels,
        "Input device config (will resample to {} Hz mono if needed)",
        SAMPLE_RATE,
    );

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Always-on capture pipeline: device stream + framing thread.
pub struct AudioCapture {
    // Keeps the device stream alive; dropped on stop.
    stream: Option<Stream>,
    preroll: Arc<PrerollBuffer>,
    frame_rx: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    framing_thread: Option<std::thread::JoinHandle<()>>,
    counters: Arc<CaptureCounters>,
}

impl AudioCapture {
    /// Open the default input device and start capturing. Device-open
    /// failure is fatal; the caller exits.
    pub fn start() -> Result<Self> {
        let cfg = resolve_device()?;
        let native_rate = cfg.native_rate;
        let channels = cfg.stream_config.channels;

        let rb = HeapRb::<f32>::new(CAPTURE_RING_SAMPLES);
        let (mut producer, mut consumer) = rb.split();

        let counters = Arc::new(CaptureCounters::default());
        let cb_counters = counters.clone();
        let err_counters = counters.clone();

        let stream = cfg
            .device
            .build_input_stream(
                &cfg.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = downmix(data, channels);
                    let resampled = resample_mono(&mono, native_rate, SAMPLE_RATE);
                    let written = producer.push_slice(&resampled);
                    if written < resampled.len() {
                        // Framing thread fell behind; oldest audio is lost.
                        let n = cb_counters.overruns.fetch_add(1, Ordering::Relaxed) + 1;
                        if n % 100 == 1 {
                            warn!(total = n, "Capture ring overrun, dropping samples");
                        }
                    }
                },
                move |err| {
                    let n = err_counters.device_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % 100 == 1 {
                        error!(total = n, "Audio input stream error: {err}");
                    }
                },
                None,
            )
            .map_err(|e| EarError::AudioDevice(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| EarError::AudioDevice(format!("failed to start input stream: {e}")))?;

        let preroll = Arc::new(PrerollBuffer::new(PREROLL_FRAMES));
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_QUEUE_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));

        let framing_thread = {
            let preroll = preroll.clone();
            let stop = stop.clone();
            let counters = counters.clone();
            std::thread::Builder::new()
                .name("jarvis-ear-capture".into())
                .spawn(move || {
                    framing_loop(&mut consumer, &preroll, &frame_tx, &stop, &counters);
                })
                .map_err(|e| EarError::AudioDevice(format!("failed to spawn capture thread: {e}")))?
        };

        info!("Audio capture started (target frame: {} bytes)", FRAME_BYTES);

        Ok(Self {
            stream: Some(stream),
            preroll,
            frame_rx,
            stop,
            framing_thread: Some(framing_thread),
            counters,
        })
    }

    /// Next frame from the queue, or `None` if the timeout expires.
    pub fn get_frame(&self, timeout: Duration) -> Option<Frame> {
        self.frame_rx.recv_timeout(timeout).ok()
    }

    /// Drain the pre-roll ring into a single byte buffer.
    pub fn drain_preroll(&self) -> Vec<u8> {
        self.preroll.drain()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.counters.drops.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.counters.overruns.load(Ordering::Relaxed)
    }

    /// Stop the device stream and join the framing thread (2 s deadline).
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the stream stops the device callbacks.
        self.stream.take();

        if let Some(handle) = self.framing_thread.take() {
            let deadline = Instant::now() + THREAD_STOP_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
                info!("Audio capture stopped");
            } else {
                warn!("Capture thread did not stop within 2 seconds");
            }
        }
    }
}

fn framing_loop(
    consumer: &mut ringbuf::HeapCons<f32>,
    preroll: &PrerollBuffer,
    frame_tx: &Sender<Frame>,
    stop: &AtomicBool,
    counters: &CaptureCounters,
) {
    let mut framer = Framer::new();
    let mut read_buf = vec![0.0f32; crate::config::FRAME_SAMPLES];

    while !stop.load(Ordering::SeqCst) {
        let n = consumer.pop_slice(&mut read_buf);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        for frame in framer.push(&read_buf[..n]) {
            // Pre-roll must stay current even when downstream stalls.
            preroll.append(frame.clone());

            match frame_tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let drops = counters.drops.fetch_add(1, Ordering::Relaxed) + 1;
                    if drops % 100 == 1 {
                        warn!(total = drops, "Frame queue full, dropped frame");
                    }
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    info!(
        overruns = counters.overruns.load(Ordering::Relaxed),
        drops = counters.drops.load(Ordering::Relaxed),
        "Capture loop exited"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_accumulates_partial_reads() {
        let mut framer = Framer::new();
        // 300 + 300 samples: first push yields nothing, second completes
        // one 512-sample frame with 88 samples left over.
        assert!(framer.push(&vec![0.0; 300]).is_empty());
        let frames = framer.push(&vec![0.0; 300]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_BYTES);
        assert_eq!(framer.pending.len(), 88 * 2);
    }

    #[test]
    fn framer_emits_multiple_frames_per_push() {
        let mut framer = Framer::new();
        let frames = framer.push(&vec![0.5; 512 * 3 + 10]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == FRAME_BYTES));
    }

    #[test]
    fn framer_converts_to_s16le() {
        let mut framer = Framer::new();
        let mut samples = vec![0.0f32; 512];
        samples[0] = 1.0;
        samples[1] = -1.0;
        let frames = framer.push(&samples);
        let bytes = frames[0].as_bytes();
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);
    }
}
