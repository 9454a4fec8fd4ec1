//! System mixer control: speaker bring-up and mic mute/unmute.
//!
//! The capture stream stays running while muted — the DMIC capture switch
//! is flipped out-of-band, so reads simply arrive as silence. Controls are
//! manipulated by name via `amixer`: `Speaker` (on), `Master` (on, volume),
//! `Dmic0` (cap/nocap).

use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::{MIXER_CARD, SPEAKER_VOLUME_PCT};

/// Seam between the player and the platform mixer; tests substitute a
/// recording stub.
pub trait Mixer: Send + Sync {
    /// Turn the speaker path on and set the output volume.
    fn enable_speakers(&self);
    /// Enable (true) or disable (false) the microphone capture switch.
    fn set_mic_capture(&self, enabled: bool);
}

/// amixer-backed mixer for the ALSA card driving the speakers and DMIC.
pub struct AlsaMixer {
    card: u32,
    volume_pct: u32,
}

impl AlsaMixer {
    pub fn new() -> Self {
        Self {
            card: MIXER_CARD,
            volume_pct: SPEAKER_VOLUME_PCT,
        }
    }

    fn amixer(&self, args: &[&str]) {
        let card = self.card.to_string();
        let mut cmd = Command::new("amixer");
        cmd.arg("-c").arg(&card).arg("sset").args(args);
        match cmd.output() {
            Ok(out) if out.status.success() => {
                debug!(?args, "amixer ok");
            }
            Ok(out) => {
                warn!(
                    ?args,
                    status = ?out.status.code(),
                    "amixer failed: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                );
            }
            Err(e) => {
                warn!(?args, "failed to run amixer: {e}");
            }
        }
    }
}

impl Mixer for AlsaMixer {
    fn enable_speakers(&self) {
        self.amixer(&["Speaker", "on"]);
        self.amixer(&["Master", "on"]);
        let volume = format!("{}%", self.volume_pct);
        self.amixer(&["Master", &volume]);
        info!(volume_pct = self.volume_pct, "Speakers enabled");
    }

    fn set_mic_capture(&self, enabled: bool) {
        let switch = if enabled { "cap" } else { "nocap" };
        self.amixer(&["Dmic0", switch]);
        info!(enabled, "Mic capture switch set");
    }
}

impl Default for AlsaMixer {
    fn default() -> Self {
        Self::new()
    }
}
