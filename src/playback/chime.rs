//! Wake acknowledgement chime.
//!
//! A short two-tone cue played the moment the wake word fires, while the
//! mic is still live. The tones (523 Hz, 659 Hz — C5/E5) sit outside the
//! phrase model's active band so the chime cannot re-trigger detection.

use crate::config::SPEAKER_SAMPLE_RATE;

const TONE_HZ: [f32; 2] = [523.0, 659.0];
const TONE_SECS: f32 = 0.150;
const GAP_SECS: f32 = 0.050;
/// Linear attack/release applied to each tone's edges.
const RAMP_SECS: f32 = 0.025;

/// Synthesize the chime as interleaved stereo i16 at the playback rate.
pub fn wake_chime(amplitude: i16) -> Vec<i16> {
    let rate = SPEAKER_SAMPLE_RATE as f32;
    let tone_frames = (TONE_SECS * rate) as usize;
    let gap_frames = (GAP_SECS * rate) as usize;

    let mut out = Vec::with_capacity((tone_frames * 2 + gap_frames) * 2);

    for (i, &freq) in TONE_HZ.iter().enumerate() {
        if i > 0 {
            out.extend(std::iter::repeat(0i16).take(gap_frames * 2));
        }
        for n in 0..tone_frames {
            let t = n as f32 / rate;
            // Envelope: product of a linear rise over the first 25 ms and
            // a linear fall over the last 25 ms.
            let rise = (t / RAMP_SECS).min(1.0);
            let fall = ((TONE_SECS - t) / RAMP_SECS).clamp(0.0, 1.0);
            let envelope = rise * fall;
            let sample = (2.0 * std::f32::consts::PI * freq * t).sin();
            let v = (amplitude as f32 * envelope * sample) as i16;
            // Mono synthesized, duplicated L/R.
            out.push(v);
            out.push(v);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chime_has_expected_length() {
        let chime = wake_chime(12_000);
        // 150 ms + 50 ms + 150 ms at 48 kHz, stereo.
        let frames = (0.350 * SPEAKER_SAMPLE_RATE as f64) as usize;
        assert_eq!(chime.len(), frames * 2);
    }

    #[test]
    fn channels_are_duplicated() {
        let chime = wake_chime(8_000);
        for frame in chime.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn peak_stays_within_amplitude() {
        let amplitude = 12_000i16;
        let chime = wake_chime(amplitude);
        let peak = chime.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= amplitude.unsigned_abs());
        // The envelope reaches full scale between the ramps.
        assert!(peak > (amplitude as f32 * 0.9) as u16);
    }

    #[test]
    fn edges_are_silent_and_gap_is_zero() {
        let chime = wake_chime(12_000);
        assert_eq!(chime[0], 0);
        // The fall ramp ends one sample shy of zero; allow the residue of
        // a single sample step.
        assert!(chime.last().unwrap().unsigned_abs() <= 16);

        let rate = SPEAKER_SAMPLE_RATE as usize;
        let tone = (0.150 * rate as f64) as usize * 2;
        let gap = (0.050 * rate as f64) as usize * 2;
        assert!(chime[tone..tone + gap].iter().all(|&s| s == 0));
    }
}
