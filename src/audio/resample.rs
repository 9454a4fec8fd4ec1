//! Mono sample-rate conversion shared by the capture and playback paths.
//!
//! Both pipelines work on mono signals (capture downmixes before
//! resampling; playback duplicates to stereo after), so only the mono
//! case is implemented. Linear interpolation is plenty for speech.

/// Linearly interpolate mono samples from `from_hz` to `to_hz`.
pub fn resample_mono(samples: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if from_hz == to_hz || samples.is_empty() {
        return samples.to_vec();
    }
    let step = from_hz as f64 / to_hz as f64;
    let out_len = (samples.len() as f64 / step) as usize;
    let last = samples.len() - 1;

    let mut out = Vec::with_capacity(out_len);
    let mut pos = 0.0f64;
    for _ in 0..out_len {
        let base = (pos as usize).min(last);
        let t = (pos - base as f64) as f32;
        let a = samples[base];
        let b = samples[(base + 1).min(last)];
        out.push(a + t * (b - a));
        pos += step;
    }
    out
}

/// Average interleaved capture channels down to a mono signal.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let width = channels as usize;
    samples
        .chunks_exact(width)
        .map(|frame| frame.iter().sum::<f32>() / width as f32)
        .collect()
}
