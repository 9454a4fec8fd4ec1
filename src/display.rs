//! Fire-and-forget HTTP client for the kiosk display daemon.
//!
//! Display control is cosmetic: every call spawns a short-lived thread
//! with a 2 s timeout and failures are debug-logged. Nothing here may
//! ever block or fail the audio loop.

use serde_json::json;
use tracing::{debug, info};

pub struct DisplayClient {
    base_url: String,
}

impl DisplayClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
        }
    }

    /// Show the HUD in listening state on wake word detection.
    pub fn on_wake_word(&self) {
        info!("Display: showing HUD (listening)");
        self.fire("/display/hud", json!({ "state": "listening" }));
    }

    /// Show the HUD in talking state when TTS playback begins.
    pub fn on_tts_start(&self) {
        info!("Display: showing HUD (talking)");
        self.fire("/display/hud", json!({ "state": "talking" }));
    }

    /// Restore the camera feeds once playback is complete.
    pub fn on_tts_done(&self) {
        info!("Display: restoring camera feeds");
        self.fire("/display/restore", json!({}));
    }

    fn fire(&self, endpoint: &str, payload: serde_json::Value) {
        let url = format!("{}{}", self.base_url, endpoint);
        std::thread::spawn(move || {
            let client = match reqwest::blocking::Client::builder()
                .timeout(std::time::Duration::from_secs(2))
                .build()
            {
                Ok(c) => c,
                Err(e) => {
                    debug!("Display client build failed: {e}");
                    return;
                }
            };
            if let Err(e) = client.post(&url).json(&payload).send() {
                debug!("Display call to {url} failed: {e}");
            }
        });
    }
}
