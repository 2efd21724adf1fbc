//! Audio capture and frame conversion
//!
//! Microphone input is captured with CPAL, downmixed and resampled to
//! 16 kHz mono, and encoded to PCM16LE frames for the conversation transport.

use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait};

pub mod capture;
pub mod codec;
mod resampler;

pub use capture::{AudioError, CaptureControl, CaptureEngine, CaptureHandle, FrameSink};
pub use codec::{CodecError, SAMPLE_RATE};
pub use resampler::CaptureResampler;

static AUDIO_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time audio backend setup, run lazily on the first capture start.
///
/// Probes the default host and logs the devices it exposes. Later calls are
/// no-ops.
pub fn ensure_initialized() {
    if AUDIO_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    let host = cpal::default_host();
    log::info!("Audio backend: {:?}", host.id());

    match host.input_devices() {
        Ok(devices) => {
            for device in devices {
                if let Ok(name) = device.name() {
                    log::debug!("Audio input device available: {}", name);
                }
            }
        }
        Err(e) => log::warn!("Failed to enumerate input devices: {}", e),
    }
}
