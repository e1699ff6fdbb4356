//! Audio input: capture devices, WAV replay, and fixed-frame slicing.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod frame_source;
pub mod recorder;
pub mod wav;

pub use frame_source::{FrameSource, FrameSourceConfig};
pub use recorder::{AudioSource, MockAudioSource};
pub use wav::WavAudioSource;
