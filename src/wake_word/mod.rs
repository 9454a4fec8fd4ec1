//! Wake word detection for the fixed "Hey Jarvis" phrase.

pub mod oww;

pub use oww::WakeWordDetector;
