//! Event-channel client for the conversational backend.
//!
//! A websocket on the `/voice` endpoint carries JSON events in both
//! directions. The client authenticates with a bearer token (password
//! login over HTTP, refreshed when stale), reconnects forever with capped
//! exponential backoff, pings every 60 s, and hands inbound TTS chunks
//! straight to the player. `start()` never blocks: the capture pipeline
//! runs whether or not the backend is reachable.

pub mod auth;
pub mod protocol;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::config::{
    AGENT_ID, CHANNELS, PING_INTERVAL, PONG_STALE_AFTER, SAMPLE_RATE, SAMPLE_WIDTH,
};
use crate::config::Settings;
use crate::display::DisplayClient;
use crate::playback::AudioPlayer;

use auth::{login, Backoff, TokenCache};
use protocol::{pcm_to_wav, ClientEvent, ServerEvent};

/// Connection bookkeeping shared with the stats line.
#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    ever_connected: AtomicBool,
    reconnects: AtomicU64,
    last_connect: Mutex<Option<DateTime<Utc>>>,
    last_disconnect: Mutex<Option<DateTime<Utc>>>,
}

/// Snapshot of connection health for logging.
#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub connected: bool,
    pub reconnects: u64,
    pub last_connect: Option<DateTime<Utc>>,
    pub last_disconnect: Option<DateTime<Utc>>,
    pub token_age: Option<Duration>,
}

pub struct BackendClient {
    settings: Settings,
    shared: Arc<Shared>,
    tokens: Arc<TokenCache>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Option<mpsc::UnboundedReceiver<String>>,
    player: Arc<AudioPlayer>,
    display: Arc<DisplayClient>,
}

impl BackendClient {
    pub fn new(settings: Settings, player: Arc<AudioPlayer>, display: Arc<DisplayClient>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            shared: Arc::new(Shared::default()),
            tokens: Arc::new(TokenCache::new()),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            player,
            display,
        }
    }

    /// Spawn the connection task. Non-blocking: failure to reach the
    /// backend leaves the rest of the daemon fully operational while the
    /// task retries in the background.
    pub fn start(&mut self, handle: &tokio::runtime::Handle, shutdown: watch::Receiver<bool>) {
        let outbound_rx = self
            .outbound_rx
            .take()
            .expect("BackendClient::start called twice");
        let task = ConnectionTask {
            settings: self.settings.clone(),
            shared: self.shared.clone(),
            tokens: self.tokens.clone(),
            player: self.player.clone(),
            display: self.display.clone(),
        };
        handle.spawn(task.run(outbound_rx, shutdown));
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Ship one captured utterance: audio_start, a single WAV-wrapped
    /// base64 chunk with seq 0, audio_end. Dropped with a warning when
    /// the backend is unreachable.
    pub fn send_audio(&self, pcm: &[u8]) {
        if !self.connected() {
            warn!(bytes = pcm.len(), "Not connected to backend, dropping audio");
            return;
        }

        let wav = pcm_to_wav(pcm);
        let audio_b64 = base64::engine::general_purpose::STANDARD.encode(&wav);

        self.emit(&ClientEvent::AudioStart {
            agent_id: AGENT_ID.to_string(),
        });
        self.emit(&ClientEvent::AudioChunk {
            agent_id: AGENT_ID.to_string(),
            audio: audio_b64.clone(),
            seq: 0,
        });
        self.emit(&ClientEvent::AudioEnd {
            agent_id: AGENT_ID.to_string(),
        });

        let duration_s = pcm.len() as f64 / (SAMPLE_RATE as usize * SAMPLE_WIDTH * CHANNELS) as f64;
        info!(
            duration_secs = duration_s,
            raw_bytes = pcm.len(),
            wav_bytes = wav.len(),
            b64_bytes = audio_b64.len(),
            "Sent utterance to backend"
        );
    }

    pub fn status(&self) -> BackendStatus {
        BackendStatus {
            connected: self.connected(),
            reconnects: self.shared.reconnects.load(Ordering::SeqCst),
            last_connect: *self.shared.last_connect.lock().unwrap(),
            last_disconnect: *self.shared.last_disconnect.lock().unwrap(),
            token_age: self.tokens.age(),
        }
    }

    fn emit(&self, event: &ClientEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                let _ = self.outbound_tx.send(json);
            }
            Err(e) => error!("Failed to serialize outbound event: {e}"),
        }
    }
}

/// Derive the websocket endpoint from the backend's HTTP base URL.
fn ws_url(backend_url: &str) -> String {
    let base = if let Some(rest) = backend_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = backend_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{backend_url}")
    };
    format!("{}/voice", base.trim_end_matches('/'))
}

struct ConnectionTask {
    settings: Settings,
    shared: Arc<Shared>,
    tokens: Arc<TokenCache>,
    player: Arc<AudioPlayer>,
    display: Arc<DisplayClient>,
}

impl ConnectionTask {
    async fn run(
        self,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let http = reqwest::Client::new();
        let mut backoff = Backoff::new();
        let endpoint = ws_url(&self.settings.backend_url);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let Some(token) = self.acquire_token(&http).await else {
                self.wait_backoff(&mut backoff, &mut shutdown).await;
                continue;
            };

            match tokio_tungstenite::connect_async(endpoint.as_str()).await {
                Ok((ws, _response)) => {
                    self.mark_connected();
                    backoff.reset();
                    info!(endpoint = %endpoint, "Connected to backend voice channel");

                    self.session(ws, token, &mut outbound_rx, &mut shutdown)
                        .await;

                    self.mark_disconnected();
                    info!("Disconnected from backend");
                }
                Err(e) => {
                    warn!("Failed to connect to backend: {e}");
                }
            }

            if *shutdown.borrow() {
                break;
            }
            self.wait_backoff(&mut backoff, &mut shutdown).await;
        }

        debug!("Backend connection task exiting");
    }

    /// Current token, refreshed when older than the refresh interval.
    /// When the refresh fails but a stale token is held, fall back to it
    /// best-effort; the next reconnect retries the refresh.
    async fn acquire_token(&self, http: &reqwest::Client) -> Option<String> {
        if let Some(token) = self.tokens.get_fresh() {
            return Some(token);
        }
        match login(http, &self.settings.backend_url, &self.settings.password).await {
            Ok(token) => {
                self.tokens.store(token.clone());
                Some(token)
            }
            Err(e) => {
                warn!("Token refresh failed: {e}");
                let stale = self.tokens.get_any();
                if stale.is_some() {
                    warn!("Using stale token for this connection attempt");
                }
                stale
            }
        }
    }

    async fn session(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        token: String,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let (mut sink, mut stream) = ws.split();

        // Auth handshake comes first on the wire.
        let auth = serde_json::json!({ "token": token }).to_string();
        if let Err(e) = sink.send(Message::Text(auth)).await {
            warn!("Auth handshake failed: {e}");
            return;
        }

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // consume the immediate first tick
        let mut last_pong = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                outbound = outbound_rx.recv() => {
                    let Some(json) = outbound else { return };
                    if let Err(e) = sink.send(Message::Text(json)).await {
                        warn!("Backend send failed: {e}");
                        return;
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_event(&text, &mut last_pong);
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = sink.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Ok(_)) => {} // binary/pong frames: ignored
                        Some(Err(e)) => {
                            warn!("Backend read error: {e}");
                            return;
                        }
                    }
                }
                _ = ping.tick() => {
                    if let Ok(json) = serde_json::to_string(&ClientEvent::Ping) {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            warn!("Backend ping failed: {e}");
                            return;
                        }
                    }
                    if last_pong.elapsed() > PONG_STALE_AFTER {
                        warn!(
                            stale_secs = last_pong.elapsed().as_secs(),
                            "No pong from backend, connection may be stale"
                        );
                    }
                }
            }
        }
    }

    fn handle_event(&self, text: &str, last_pong: &mut Instant) {
        let event = match ServerEvent::parse(text) {
            Ok(ev) => ev,
            Err(e) => {
                debug!("Unrecognized backend event ({e}): {text}");
                return;
            }
        };

        match event {
            ServerEvent::Listening => debug!("Backend listening for audio"),
            ServerEvent::Processing => info!("Backend processing audio (STT)"),
            ServerEvent::Transcript { text } => info!(transcript = %text, "Transcript"),
            ServerEvent::Thinking { provider } => {
                info!(provider = provider.as_deref().unwrap_or("?"), "Backend thinking");
            }
            ServerEvent::TtsChunk {
                index,
                audio,
                content_type,
            } => {
                if index == 0 {
                    self.display.on_tts_start();
                }
                self.player.enqueue(index, &audio, &content_type);
            }
            ServerEvent::TtsDone { total_chunks } => {
                info!(total_chunks, "TTS complete");
                self.player.signal_done(total_chunks);
            }
            ServerEvent::Error { error } => error!("Backend error: {error}"),
            ServerEvent::Pong => {
                *last_pong = Instant::now();
                debug!("Pong from backend");
            }
        }
    }

    fn mark_connected(&self) {
        if self.shared.ever_connected.swap(true, Ordering::SeqCst) {
            self.shared.reconnects.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        *self.shared.last_connect.lock().unwrap() = Some(Utc::now());
    }

    fn mark_disconnected(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        *self.shared.last_disconnect.lock().unwrap() = Some(Utc::now());
    }

    async fn wait_backoff(&self, backoff: &mut Backoff, shutdown: &mut watch::Receiver<bool>) {
        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_maps_scheme_and_appends_namespace() {
        assert_eq!(ws_url("http://localhost:4000"), "ws://localhost:4000/voice");
        assert_eq!(
            ws_url("https://jarvis.example.com"),
            "wss://jarvis.example.com/voice"
        );
        assert_eq!(ws_url("http://host:4000/"), "ws://host:4000/voice");
    }
}
