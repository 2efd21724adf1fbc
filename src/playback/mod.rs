//! Playback of inbound assistant speech
//!
//! ```text
//! PCM16 frame ─► PlaybackScheduler ─► AudioOutput (DeviceOutput) ─► Mixer ─► speakers
//!                  (decode, place on                 (cpal thread)
//!                   output timeline)
//! ```

mod device;
mod mixer;
pub mod scheduler;

pub use device::{DeviceOutput, DeviceOutputFactory};
pub use mixer::Mixer;
pub use scheduler::{
    AudioOutput, OutputFactory, PlayableBuffer, PlaybackScheduler, PlaybackStats,
    ScheduledChunk, MAX_SPEED, MIN_SPEED,
};

use crate::audio::CodecError;

/// Errors from opening an output or scheduling a frame.
#[derive(Debug, Clone)]
pub enum PlaybackError {
    NoOutputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    OutputThreadFailed(String),
    OutputUnavailable,
    Codec(CodecError),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::NoOutputDevice => write!(f, "No audio output device found"),
            PlaybackError::NoSupportedConfig => write!(f, "No supported output configuration"),
            PlaybackError::StreamCreationFailed(e) => {
                write!(f, "Failed to create output stream: {}", e)
            }
            PlaybackError::OutputThreadFailed(e) => write!(f, "Output thread failed: {}", e),
            PlaybackError::OutputUnavailable => write!(f, "Audio output is not open"),
            PlaybackError::Codec(e) => write!(f, "Invalid audio frame: {}", e),
        }
    }
}

impl std::error::Error for PlaybackError {}

impl From<CodecError> for PlaybackError {
    fn from(e: CodecError) -> Self {
        PlaybackError::Codec(e)
    }
}
