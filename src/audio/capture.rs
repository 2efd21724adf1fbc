//! Microphone capture using CPAL
//!
//! The capture engine opens the default input device on a dedicated thread
//! (CPAL streams are not `Send`), converts every callback block to mono
//! 16 kHz PCM16 and hands the encoded frame to a [`FrameSink`]. A callback
//! produces at most one frame, so frames leave in capture order. At 16 kHz
//! every callback yields a frame; at other device rates a callback that only
//! partly fills a resampler chunk yields nothing.
//!
//! Shutdown is split in two steps so teardown can mirror the audio graph:
//! [`CaptureControl::disconnect`] stops frames from reaching the sink,
//! [`CaptureControl::stop_tracks`] releases the physical device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::codec::{self, SAMPLE_RATE};
use super::resampler::CaptureResampler;

/// Errors that can occur while acquiring the microphone.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    CaptureThreadFailed(String),
    ResamplerFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::CaptureThreadFailed(e) => write!(f, "Capture thread failed: {}", e),
            AudioError::ResamplerFailed(e) => write!(f, "Failed to create resampler: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

/// Destination for encoded capture frames.
///
/// Called from the audio callback thread; implementations must not block.
pub trait FrameSink: Send + Sync + 'static {
    fn send_frame(&self, frame: Vec<u8>);
}

/// Control surface of a running capture, used by session teardown.
///
/// Both methods must be idempotent.
pub trait CaptureControl: Send {
    /// Stop forwarding frames to the sink
    fn disconnect(&mut self);
    /// Release the input device
    fn stop_tracks(&mut self);
}

/// Converts device callback blocks into PCM16 frames: downmix, resample, encode.
pub struct CaptureProcessor {
    channels: usize,
    resampler: CaptureResampler,
    mono: Vec<f32>,
}

impl CaptureProcessor {
    pub fn new(device_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let resampler = CaptureResampler::new(device_rate, SAMPLE_RATE)
            .map_err(|e| AudioError::ResamplerFailed(e.to_string()))?;
        if !resampler.is_passthrough() {
            log::info!(
                "CaptureProcessor: resampling {} Hz -> {} Hz in {}-sample chunks",
                device_rate,
                SAMPLE_RATE,
                resampler.chunk_size()
            );
        }
        Ok(Self {
            channels: channels.max(1) as usize,
            resampler,
            mono: Vec::new(),
        })
    }

    /// Process one interleaved callback block into an encoded frame. The
    /// frame is empty while the resampler is still filling a chunk.
    pub fn process<T>(&mut self, data: &[T]) -> Vec<u8>
    where
        T: Copy,
        f32: FromSample<T>,
    {
        self.mono.clear();
        for frame in data.chunks(self.channels) {
            let sum: f32 = frame.iter().map(|&s| f32::from_sample_(s)).sum();
            self.mono.push(sum / frame.len() as f32);
        }

        let resampled = self.resampler.process(&self.mono);
        codec::encode(&resampled)
    }
}

/// Microphone capture engine for the default input device.
pub struct CaptureEngine;

impl CaptureEngine {
    /// Open the default input device and start streaming frames into `sink`.
    ///
    /// Blocks until the device is running or has failed to open, so callers
    /// on an async runtime should run it via `spawn_blocking`.
    pub fn start(sink: Arc<dyn FrameSink>) -> Result<CaptureHandle, AudioError> {
        super::ensure_initialized();

        let is_capturing = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let flag = is_capturing.clone();
        let thread = std::thread::Builder::new()
            .name("flowchat-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(sink, flag) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamCreationFailed(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                // Park until stop (or until the handle is dropped)
                let _ = stop_rx.recv();

                if let Err(e) = stream.pause() {
                    log::debug!("CaptureEngine: pause on stop failed: {}", e);
                }
                drop(stream);
                log::info!("CaptureEngine: input device released");
            })
            .map_err(|e| AudioError::CaptureThreadFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("CaptureEngine: capture started");
                Ok(CaptureHandle {
                    is_capturing,
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::CaptureThreadFailed(
                    "capture thread exited before reporting".to_string(),
                ))
            }
        }
    }
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    is_capturing: Arc<AtomicBool>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureControl for CaptureHandle {
    fn disconnect(&mut self) {
        if self.is_capturing.swap(false, Ordering::SeqCst) {
            log::debug!("CaptureEngine: processing graph disconnected");
        }
    }

    fn stop_tracks(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("CaptureEngine: capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.disconnect();
        self.stop_tracks();
    }
}

fn open_input_stream(
    sink: Arc<dyn FrameSink>,
    is_capturing: Arc<AtomicBool>,
) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    log::info!(
        "Audio input config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();

    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, sink, is_capturing),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, sink, is_capturing),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, sink, is_capturing),
        _ => Err(AudioError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    sink: Arc<dyn FrameSink>,
    is_capturing: Arc<AtomicBool>,
) -> Result<Stream, AudioError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let mut processor = CaptureProcessor::new(config.sample_rate.0, config.channels)?;
    let err_fn = |err| log::error!("Audio input stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !is_capturing.load(Ordering::Relaxed) {
                    return;
                }
                let frame = processor.process(data);
                if !frame.is_empty() {
                    sink.send_frame(frame);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_processor_mono_passthrough_at_16k() {
        let mut processor = CaptureProcessor::new(16000, 1).unwrap();
        let frame = processor.process(&[0.0f32, 1.0, -1.0]);
        assert_eq!(frame, codec::encode(&[0.0, 1.0, -1.0]));
    }

    #[test]
    fn test_processor_downmixes_stereo() {
        let mut processor = CaptureProcessor::new(16000, 2).unwrap();
        // Interleaved L/R pairs average to 0.5 and 0.0
        let frame = processor.process(&[1.0f32, 0.0, 0.5, -0.5]);
        assert_eq!(frame, codec::encode(&[0.5, 0.0]));
    }

    #[test]
    fn test_processor_converts_integer_samples() {
        let mut processor = CaptureProcessor::new(16000, 1).unwrap();
        let frame = processor.process(&[i16::MAX, 0i16]);
        let decoded = codec::decode(&frame).unwrap();
        assert!(decoded[0] > 0.99);
        assert_eq!(decoded[1], 0.0);
    }

    #[test]
    fn test_processor_resamples_48k() {
        let mut processor = CaptureProcessor::new(48000, 1).unwrap();
        // One second of 10ms blocks at 48kHz comes out as about 16000 samples
        let frames: Vec<Vec<u8>> = (0..100)
            .map(|_| processor.process(&vec![0.25f32; 480]))
            .collect();

        assert!(frames.iter().all(|f| f.len() % 2 == 0));
        let samples: usize = frames.iter().map(|f| f.len() / 2).sum();
        assert!((15_000..=16_000).contains(&samples), "got {}", samples);
    }

    #[test]
    fn test_capture_handle_stop_is_idempotent() {
        let stopped = Arc::new(Mutex::new(false));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let stopped_clone = stopped.clone();
        let thread = std::thread::spawn(move || {
            let _ = stop_rx.recv();
            *stopped_clone.lock().unwrap() = true;
        });

        let mut handle = CaptureHandle {
            is_capturing: Arc::new(AtomicBool::new(true)),
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        };

        handle.disconnect();
        handle.disconnect();
        assert!(!handle.is_capturing.load(Ordering::SeqCst));

        handle.stop_tracks();
        handle.stop_tracks();
        assert!(*stopped.lock().unwrap());
    }

    #[test]
    #[ignore] // Requires a microphone
    fn test_capture_from_default_device() {
        struct CountingSink(Mutex<usize>);
        impl FrameSink for CountingSink {
            fn send_frame(&self, _frame: Vec<u8>) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let sink = Arc::new(CountingSink(Mutex::new(0)));
        let mut handle = CaptureEngine::start(sink.clone()).expect("capture failed");
        std::thread::sleep(std::time::Duration::from_millis(300));
        handle.disconnect();
        handle.stop_tracks();
        assert!(*sink.0.lock().unwrap() > 0);
    }
}
