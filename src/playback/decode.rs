//! TTS chunk decoding: any symphonia-supported container to the fixed
//! playback format (48 kHz stereo S16LE).
//!
//! Decode failures yield empty PCM — the chunk is dropped with a warning
//! and playback of the rest of the utterance continues.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::warn;

use crate::audio::resample::resample_mono;
use crate::config::SPEAKER_SAMPLE_RATE;

/// Decode one chunk to interleaved stereo i16 at the playback rate.
/// Returns an empty Vec on any decode failure.
pub fn decode_chunk(bytes: &[u8], content_type: &str) -> Vec<i16> {
    match decode_to_mono_f32(bytes, content_type) {
        Ok((samples, rate)) => {
            let mono = resample_mono(&samples, rate, SPEAKER_SAMPLE_RATE);
            let mut stereo = Vec::with_capacity(mono.len() * 2);
            for s in mono {
                let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                stereo.push(v);
                stereo.push(v);
            }
            stereo
        }
        Err(e) => {
            warn!(content_type, "TTS chunk decode failed: {e}");
            Vec::new()
        }
    }
}

/// Probe and decode compressed audio to mono f32 at its native rate.
fn decode_to_mono_f32(bytes: &[u8], content_type: &str) -> Result<(Vec<f32>, u32), String> {
    // MediaSourceStream needs an owned 'static source.
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension_for(content_type) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("probe failed: {e}"))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| "no audio track".to_string())?;
    let track_id = track.id;
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| "unknown sample rate".to_string())?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| format!("decoder init failed: {e}"))?;

    let mut all_samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(format!("decode error: {e}")),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                warn!("Packet decode error (skipping): {e}");
                continue;
            }
        };
        let spec = *decoded.spec();
        let duration = decoded.capacity();
        let mut sample_buf = SampleBuffer::<f32>::new(duration as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame in samples.chunks(channels) {
                let sum: f32 = frame.iter().sum();
                all_samples.push(sum / channels as f32);
            }
        }
    }

    Ok((all_samples, sample_rate))
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/ogg" | "application/ogg" => Some("ogg"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_tone(rate: u32, freq: f32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let s = (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin();
                writer.write_sample((s * 20_000.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_wav_to_stereo_playback_rate() {
        let wav = wav_tone(24_000, 440.0, 2400); // 100 ms at 24 kHz
        let pcm = decode_chunk(&wav, "audio/wav");
        // 100 ms at 48 kHz stereo = 4800 frames * 2 channels.
        assert_eq!(pcm.len(), 9600);
        // Stereo duplication: every frame has equal L and R.
        for frame in pcm.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        let peak = pcm.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 15_000, "tone lost in decode: peak={peak}");
    }

    #[test]
    fn native_rate_wav_passes_through_sample_exact() {
        let wav = wav_tone(48_000, 440.0, 480);
        let pcm = decode_chunk(&wav, "audio/wav");
        assert_eq!(pcm.len(), 960);
    }

    #[test]
    fn garbage_yields_empty_pcm() {
        assert!(decode_chunk(&[0xDE, 0xAD, 0xBE, 0xEF], "audio/wav").is_empty());
        assert!(decode_chunk(&[], "audio/ogg").is_empty());
        assert!(decode_chunk(b"not audio at all", "application/unknown").is_empty());
    }

    #[test]
    fn content_type_maps_to_extension() {
        assert_eq!(extension_for("audio/wav"), Some("wav"));
        assert_eq!(extension_for("audio/mpeg"), Some("mp3"));
        assert_eq!(extension_for("audio/ogg"), Some("ogg"));
        assert_eq!(extension_for("video/mp4"), None);
    }
}
