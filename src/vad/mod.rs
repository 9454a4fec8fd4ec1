//! Voice activity detection: high-pass pre-filter + Silero streaming model.

pub mod highpass;
pub mod silero;

pub use silero::SileroVad;
