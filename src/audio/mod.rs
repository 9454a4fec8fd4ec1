//! Audio capture path: frame type, pre-roll ring buffer, device capture.

pub mod capture;
pub mod frame;
pub mod resample;
pub mod ring_buffer;

pub use capture::AudioCapture;
pub use frame::Frame;
pub use ring_buffer::PrerollBuffer;
