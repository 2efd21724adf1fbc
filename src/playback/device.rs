//! CPAL output device
//!
//! Owns the default output device on a dedicated thread and renders the
//! shared [`Mixer`] from the device callback. The mixer's frame counter is
//! the output clock the scheduler places chunks against.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};

use super::mixer::Mixer;
use super::scheduler::{AudioOutput, OutputFactory, PlayableBuffer};
use super::PlaybackError;

fn lock_mixer(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    match mixer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Opens [`DeviceOutput`]s on the default output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceOutputFactory;

impl OutputFactory for DeviceOutputFactory {
    fn open(&self) -> Result<Box<dyn AudioOutput>, PlaybackError> {
        Ok(Box::new(DeviceOutput::open()?))
    }
}

/// A running output stream on the default device.
pub struct DeviceOutput {
    mixer: Arc<Mutex<Mixer>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceOutput {
    /// Open the default output device. Blocks until the stream is running.
    pub fn open() -> Result<Self, PlaybackError> {
        let (ready_tx, ready_rx) =
            std_mpsc::sync_channel::<Result<Arc<Mutex<Mixer>>, PlaybackError>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("flowchat-playback".to_string())
            .spawn(move || {
                let (stream, mixer) = match open_output_stream() {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PlaybackError::StreamCreationFailed(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(mixer));
                let _ = stop_rx.recv();

                if let Err(e) = stream.pause() {
                    log::debug!("DeviceOutput: pause on close failed: {}", e);
                }
                drop(stream);
                log::info!("DeviceOutput: output device released");
            })
            .map_err(|e| PlaybackError::OutputThreadFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(mixer)) => Ok(Self {
                mixer,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlaybackError::OutputThreadFailed(
                    "output thread exited before reporting".to_string(),
                ))
            }
        }
    }
}

impl AudioOutput for DeviceOutput {
    fn current_time(&self) -> f64 {
        lock_mixer(&self.mixer).current_time()
    }

    fn schedule(&mut self, buffer: PlayableBuffer, start_at: f64) {
        lock_mixer(&self.mixer).add(buffer, start_at);
    }

    fn close(&mut self) {
        {
            let mut mixer = lock_mixer(&self.mixer);
            if self.stop_tx.is_some() {
                log::info!(
                    "DeviceOutput: closing ({} buffers played, {} cut off)",
                    mixer.completed(),
                    mixer.active_voices()
                );
            }
            mixer.clear();
        }
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("DeviceOutput: playback thread panicked");
            }
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_output_stream() -> Result<(Stream, Arc<Mutex<Mixer>>), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(PlaybackError::NoOutputDevice)?;

    log::info!("Using audio output device: {:?}", device.name());

    let supported_config = device
        .default_output_config()
        .map_err(|_| PlaybackError::NoSupportedConfig)?;

    log::info!(
        "Audio output config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();
    let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0)));

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, mixer.clone()),
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, mixer.clone()),
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, mixer.clone()),
        _ => Err(PlaybackError::NoSupportedConfig),
    }?;

    Ok((stream, mixer))
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<Stream, PlaybackError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels.max(1) as usize;
    let err_fn = |err| log::error!("Audio output stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut mixer = lock_mixer(&mixer);
                for frame in data.chunks_mut(channels) {
                    let value = T::from_sample_(mixer.next_sample());
                    for sample in frame.iter_mut() {
                        *sample = value;
                    }
                }
                mixer.reap();
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore] // Requires an audio output device
    fn test_device_output_clock_advances() {
        let mut output = DeviceOutput::open().expect("no output device");
        let t0 = output.current_time();
        output.schedule(
            PlayableBuffer {
                samples: vec![0.0; 1600],
                sample_rate: 16000,
                speed: 1.0,
            },
            t0,
        );
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert!(output.current_time() > t0);
        output.close();
        output.close();
    }
}
