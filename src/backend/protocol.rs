//! Voice event vocabulary and WAV framing for the backend channel.
//!
//! Every message on the wire is a JSON text frame shaped
//! `{"event": "<name>", "data": {...}}`, in both directions. Outbound
//! events serialize from a tagged enum; inbound events are parsed through
//! an envelope so a missing or empty `data` object never breaks a
//! payload-free event.

use serde::{Deserialize, Serialize};

use crate::config::{CHANNELS, SAMPLE_RATE};

/// Events the daemon emits to the backend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "voice:audio_start")]
    AudioStart {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    #[serde(rename = "voice:audio_chunk")]
    AudioChunk {
        #[serde(rename = "agentId")]
        agent_id: String,
        /// base64(WAV-wrapped PCM).
        audio: String,
        seq: u32,
    },
    #[serde(rename = "voice:audio_end")]
    AudioEnd {
        #[serde(rename = "agentId")]
        agent_id: String,
    },
    #[serde(rename = "voice:ping")]
    Ping,
}

/// Events the backend pushes to the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Listening,
    Processing,
    Transcript {
        text: String,
    },
    Thinking {
        provider: Option<String>,
    },
    TtsChunk {
        index: usize,
        audio: String,
        content_type: String,
    },
    TtsDone {
        total_chunks: usize,
    },
    Error {
        error: String,
    },
    Pong,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct TranscriptData {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ThinkingData {
    #[serde(default)]
    provider: Option<String>,
}

#[derive(Deserialize)]
struct TtsChunkData {
    index: usize,
    audio: String,
    #[serde(rename = "contentType")]
    content_type: String,
}

#[derive(Deserialize)]
struct TtsDoneData {
    #[serde(rename = "totalChunks", default)]
    total_chunks: usize,
}

#[derive(Deserialize)]
struct ErrorData {
    #[serde(default = "unknown_error")]
    error: String,
}

fn unknown_error() -> String {
    "unknown".to_string()
}

impl ServerEvent {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let data = envelope.data;
        let event = match envelope.event.as_str() {
            "voice:listening" => Self::Listening,
            "voice:processing" => Self::Processing,
            "voice:transcript" => {
                let d: TranscriptData = serde_json::from_value(data)?;
                Self::Transcript { text: d.text }
            }
            "voice:thinking" => {
                let d: ThinkingData = serde_json::from_value(data)?;
                Self::Thinking {
                    provider: d.provider,
                }
            }
            "voice:tts_chunk" => {
                let d: TtsChunkData = serde_json::from_value(data)?;
                Self::TtsChunk {
                    index: d.index,
                    audio: d.audio,
                    content_type: d.content_type,
                }
            }
            "voice:tts_done" => {
                let d: TtsDoneData = serde_json::from_value(data)?;
                Self::TtsDone {
                    total_chunks: d.total_chunks,
                }
            }
            "voice:error" => {
                let d: ErrorData = serde_json::from_value(data)?;
                Self::Error { error: d.error }
            }
            "voice:pong" => Self::Pong,
            other => anyhow::bail!("unknown event: {other}"),
        };
        Ok(event)
    }
}

/// Wrap raw captured PCM in a WAV container at the capture format
/// (16 kHz, mono, 16-bit). The header must match what the capture path
/// produced or the backend's decoder will mangle the utterance.
pub fn pcm_to_wav(pcm: &[u8]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: CHANNELS as u16,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        // Writing into an in-memory cursor cannot fail.
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("in-memory wav writer");
        for bytes in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))
                .expect("in-memory wav write");
        }
        writer.finalize().expect("in-memory wav finalize");
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trips_pcm() {
        let samples: Vec<i16> = (0..512).map(|i| (i * 37 % 20_000) as i16 - 10_000).collect();
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let wav = pcm_to_wav(&pcm);
        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);

        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn wav_header_wraps_empty_pcm() {
        let wav = pcm_to_wav(&[]);
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }

    #[test]
    fn client_events_serialize_with_camel_case_agent_id() {
        let json = serde_json::to_string(&ClientEvent::AudioChunk {
            agent_id: "jarvis-ear".into(),
            audio: "QUJD".into(),
            seq: 0,
        })
        .unwrap();
        assert!(json.contains(r#""event":"voice:audio_chunk""#));
        assert!(json.contains(r#""agentId":"jarvis-ear""#));
        assert!(json.contains(r#""seq":0"#));

        let ping = serde_json::to_string(&ClientEvent::Ping).unwrap();
        assert_eq!(ping, r#"{"event":"voice:ping"}"#);
    }

    #[test]
    fn server_events_parse_with_payloads() {
        let chunk = ServerEvent::parse(
            r#"{"event":"voice:tts_chunk","data":{"index":2,"audio":"QUJD","contentType":"audio/wav"}}"#,
        )
        .unwrap();
        assert_eq!(
            chunk,
            ServerEvent::TtsChunk {
                index: 2,
                audio: "QUJD".into(),
                content_type: "audio/wav".into(),
            }
        );

        let done =
            ServerEvent::parse(r#"{"event":"voice:tts_done","data":{"totalChunks":3}}"#).unwrap();
        assert_eq!(done, ServerEvent::TtsDone { total_chunks: 3 });

        let thinking =
            ServerEvent::parse(r#"{"event":"voice:thinking","data":{"provider":"openai"}}"#)
                .unwrap();
        assert_eq!(
            thinking,
            ServerEvent::Thinking {
                provider: Some("openai".into())
            }
        );
    }

    #[test]
    fn payload_free_events_tolerate_missing_or_empty_data() {
        assert_eq!(
            ServerEvent::parse(r#"{"event":"voice:pong"}"#).unwrap(),
            ServerEvent::Pong
        );
        assert_eq!(
            ServerEvent::parse(r#"{"event":"voice:pong","data":{}}"#).unwrap(),
            ServerEvent::Pong
        );
        assert_eq!(
            ServerEvent::parse(r#"{"event":"voice:listening","data":null}"#).unwrap(),
            ServerEvent::Listening
        );
        // Optional fields fall back to defaults.
        assert_eq!(
            ServerEvent::parse(r#"{"event":"voice:error","data":{}}"#).unwrap(),
            ServerEvent::Error {
                error: "unknown".into()
            }
        );
    }

    #[test]
    fn unknown_events_are_rejected() {
        assert!(ServerEvent::parse(r#"{"event":"voice:nonsense"}"#).is_err());
        assert!(ServerEvent::parse("not json").is_err());
    }
}
