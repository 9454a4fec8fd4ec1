//! Capture lifecycle: IDLE -> CAPTURING -> (utterance shipped) ->
//! CONVERSATION -> IDLE.
//!
//! - IDLE: listening for the wake word (VAD -> wake word pipeline active).
//! - CAPTURING: recording the user's command after a trigger. Every frame
//!   is appended, speech or not, so natural silence gaps inside the
//!   utterance survive; only the trailing silence ends it.
//! - CONVERSATION: short follow-up window after TTS playback during which
//!   speech re-opens capture without a wake word.
//!
//! The machine owns the capture buffer and the silence clock. It does not
//! own the audio capture or VAD; the decision loop feeds it events.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{CONVERSATION_ENABLED, CONVERSATION_WINDOW, SILENCE_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Capturing,
    Conversation,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Capturing => write!(f, "capturing"),
            Self::Conversation => write!(f, "conversation"),
        }
    }
}

pub struct CaptureStateMachine {
    state: State,
    silence_timeout: Duration,
    conversation_window: Duration,
    conversation_enabled: bool,
    capture_buf: Vec<u8>,
    last_speech: Instant,
    capture_start: Instant,
    conversation_start: Instant,
}

impl CaptureStateMachine {
    pub fn new() -> Self {
        Self::with_timeouts(SILENCE_TIMEOUT, CONVERSATION_WINDOW, CONVERSATION_ENABLED)
    }

    pub fn with_timeouts(
        silence_timeout: Duration,
        conversation_window: Duration,
        conversation_enabled: bool,
    ) -> Self {
        let now = Instant::now();
        Self {
            state: State::Idle,
            silence_timeout,
            conversation_window,
            conversation_enabled,
            capture_buf: Vec::new(),
            last_speech: now,
            capture_start: now,
            conversation_start: now,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Wake word detected: seed the capture buffer with the pre-roll and
    /// start the silence clock. Outside IDLE this is a logged no-op.
    pub fn on_wake_word(&mut self, preroll: Vec<u8>) {
        if self.state != State::Idle {
            warn!(state = %self.state, "Wake word while not idle, ignoring");
            return;
        }

        info!("Wake word detected, transitioning idle -> capturing");
        self.state = State::Capturing;
        self.capture_buf = preroll;
        let now = Instant::now();
        self.last_speech = now;
        self.capture_start = now;
    }

    /// Process one frame during CAPTURING. Returns the finished utterance
    /// when the silence timeout fires; `None` while capture continues or
    /// outside CAPTURING.
    pub fn on_frame(&mut self, frame: &[u8], is_speech: bool) -> Option<Vec<u8>> {
        if self.state != State::Capturing {
            return None;
        }

        self.capture_buf.extend_from_slice(frame);

        if is_speech {
            self.last_speech = Instant::now();
        }

        // Wall time since the last speech frame, not a frame count, so
        // the boundary is robust under frame drops.
        let silence = self.last_speech.elapsed();
        if silence >= self.silence_timeout {
            let duration = self.capture_start.elapsed();
            let audio = std::mem::take(&mut self.capture_buf);
            info!(
                silence_secs = silence.as_secs_f64(),
                captured_secs = duration.as_secs_f64(),
                bytes = audio.len(),
                "Silence timeout, transitioning capturing -> idle"
            );
            self.state = State::Idle;
            return Some(audio);
        }

        None
    }

    /// TTS playback finished: open the follow-up window. A capture still
    /// in flight is discarded — the user was being answered, not heard.
    /// Allowed only from IDLE or CAPTURING; elsewhere the event is logged
    /// and ignored.
    pub fn on_tts_done(&mut self) {
        if !self.conversation_enabled {
            info!("Playback done (conversation window disabled)");
            return;
        }
        match self.state {
            State::Idle | State::Capturing => {
                if self.state == State::Capturing {
                    warn!("Playback done while capturing, discarding partial capture");
                    self.capture_buf.clear();
                }
                info!(
                    window_secs = self.conversation_window.as_secs_f64(),
                    "Opening conversation window"
                );
                self.state = State::Conversation;
                self.conversation_start = Instant::now();
            }
            State::Conversation => {
                warn!(state = %self.state, "tts_done while in conversation, ignoring");
            }
        }
    }

    /// Speech during the follow-up window starts a new capture without a
    /// wake word, seeded with the triggering frame.
    pub fn on_conversation_speech(&mut self, frame: &[u8]) {
        if self.state != State::Conversation {
            return;
        }
        info!("Follow-up speech, transitioning conversation -> capturing");
        self.state = State::Capturing;
        self.capture_buf.clear();
        self.capture_buf.extend_from_slice(frame);
        let now = Instant::now();
        self.last_speech = now;
        self.capture_start = now;
    }

    /// Expire the follow-up window. Returns true when the window closed.
    pub fn check_conversation_timeout(&mut self) -> bool {
        if self.state == State::Conversation
            && self.conversation_start.elapsed() >= self.conversation_window
        {
            info!("Conversation window expired, transitioning conversation -> idle");
            self.state = State::Idle;
            return true;
        }
        false
    }

    /// Force back to IDLE, discarding any in-progress capture.
    pub fn reset(&mut self) {
        if self.state != State::Idle {
            info!(state = %self.state, "Force reset -> idle");
        }
        self.state = State::Idle;
        self.capture_buf.clear();
    }

    #[cfg(test)]
    fn capture_len(&self) -> usize {
        self.capture_buf.len()
    }
}

impl Default for CaptureStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SILENCE: Duration = Duration::from_millis(40);
    const WINDOW: Duration = Duration::from_millis(80);

    fn machine() -> CaptureStateMachine {
        CaptureStateMachine::with_timeouts(SILENCE, WINDOW, true)
    }

    #[test]
    fn wake_word_seeds_capture_with_preroll() {
        let mut sm = machine();
        sm.on_wake_word(vec![1, 2, 3, 4]);
        assert_eq!(sm.state(), State::Capturing);
        assert_eq!(sm.capture_len(), 4);
    }

    #[test]
    fn wake_word_outside_idle_is_ignored() {
        let mut sm = machine();
        sm.on_wake_word(vec![1, 2]);
        sm.on_wake_word(vec![9, 9, 9, 9]);
        assert_eq!(sm.state(), State::Capturing);
        assert_eq!(sm.capture_len(), 2);
    }

    #[test]
    fn frames_appended_regardless_of_speech() {
        let mut sm = machine();
        sm.on_wake_word(Vec::new());
        assert!(sm.on_frame(&[1, 1], true).is_none());
        assert!(sm.on_frame(&[2, 2], false).is_none());
        assert_eq!(sm.capture_len(), 4);
    }

    #[test]
    fn silence_timeout_finalizes_and_returns_everything() {
        let mut sm = machine();
        sm.on_wake_word(vec![0xAA; 8]);
        sm.on_frame(&[1; 4], true);
        std::thread::sleep(SILENCE + Duration::from_millis(10));
        let audio = sm.on_frame(&[2; 4], false).expect("utterance finalized");
        // Pre-roll + speech frame + trailing silence frame, in order.
        assert_eq!(audio.len(), 16);
        assert_eq!(&audio[..8], &[0xAA; 8]);
        assert_eq!(sm.state(), State::Idle);
        assert_eq!(sm.capture_len(), 0);
    }

    #[test]
    fn speech_keeps_capture_alive_past_timeout() {
        let mut sm = machine();
        sm.on_wake_word(Vec::new());
        std::thread::sleep(SILENCE + Duration::from_millis(10));
        // Speech frame resets the clock before the check.
        assert!(sm.on_frame(&[1; 2], true).is_none());
        assert_eq!(sm.state(), State::Capturing);
    }

    #[test]
    fn on_frame_outside_capturing_returns_none() {
        let mut sm = machine();
        assert!(sm.on_frame(&[1; 2], true).is_none());
        assert_eq!(sm.capture_len(), 0);
    }

    #[test]
    fn buffer_nonempty_iff_capturing() {
        let mut sm = machine();
        assert_eq!(sm.capture_len(), 0);
        sm.on_wake_word(vec![1]);
        assert!(sm.capture_len() > 0);
        std::thread::sleep(SILENCE + Duration::from_millis(10));
        sm.on_frame(&[2], false);
        assert_eq!(sm.state(), State::Idle);
        assert_eq!(sm.capture_len(), 0);
    }

    #[test]
    fn conversation_follow_up_reaches_capturing_without_wake() {
        let mut sm = machine();
        sm.on_tts_done();
        assert_eq!(sm.state(), State::Conversation);
        sm.on_conversation_speech(&[7; 2]);
        assert_eq!(sm.state(), State::Capturing);
        assert_eq!(sm.capture_len(), 2);
    }

    #[test]
    fn conversation_window_expires_back_to_idle() {
        let mut sm = machine();
        sm.on_tts_done();
        assert!(!sm.check_conversation_timeout());
        std::thread::sleep(WINDOW + Duration::from_millis(10));
        assert!(sm.check_conversation_timeout());
        assert_eq!(sm.state(), State::Idle);
        // Speech after expiry does not enter capture without a wake word.
        sm.on_conversation_speech(&[1; 2]);
        assert_eq!(sm.state(), State::Idle);
    }

    #[test]
    fn tts_done_in_conversation_does_not_restart_the_clock() {
        let mut sm = machine();
        sm.on_tts_done();
        std::thread::sleep(Duration::from_millis(50));
        // A second tts_done mid-window is a disallowed event: ignored.
        sm.on_tts_done();
        assert_eq!(sm.state(), State::Conversation);
        std::thread::sleep(Duration::from_millis(40));
        // 90 ms since the window opened; had the second event restarted
        // the clock only 40 ms would have elapsed and this would fail.
        assert!(sm.check_conversation_timeout());
        assert_eq!(sm.state(), State::Idle);
    }

    #[test]
    fn tts_done_discards_partial_capture() {
        let mut sm = machine();
        sm.on_wake_word(vec![1; 4]);
        sm.on_tts_done();
        assert_eq!(sm.state(), State::Conversation);
        assert_eq!(sm.capture_len(), 0);
    }

    #[test]
    fn tts_done_is_noop_when_conversation_disabled() {
        let mut sm = CaptureStateMachine::with_timeouts(SILENCE, WINDOW, false);
        sm.on_tts_done();
        assert_eq!(sm.state(), State::Idle);
    }

    #[test]
    fn reset_discards_capture_from_any_state() {
        let mut sm = machine();
        sm.on_wake_word(vec![1; 4]);
        sm.reset();
        assert_eq!(sm.state(), State::Idle);
        assert_eq!(sm.capture_len(), 0);

        sm.on_tts_done();
        sm.reset();
        assert_eq!(sm.state(), State::Idle);
    }
}
