//! Capture-path resampler (device rate to 16 kHz mono)
//!
//! Input devices rarely run at 16 kHz natively. Blocks are resampled with
//! rubato's FFT resampler, which works on fixed-size input chunks; samples
//! that do not fill a chunk are held back until the next callback.

use rubato::{FftFixedIn, Resampler};

/// Input chunk length as a fraction of a second (10 ms)
const CHUNKS_PER_SECOND: u32 = 100;

/// Streaming mono resampler that buffers partial chunks across calls
pub struct CaptureResampler {
    /// `None` when rates match and samples pass through untouched
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    output: Vec<Vec<f32>>,
}

impl CaptureResampler {
    pub fn new(
        input_rate: u32,
        output_rate: u32,
    ) -> Result<Self, rubato::ResamplerConstructionError> {
        if input_rate == output_rate || input_rate == 0 || output_rate == 0 {
            if input_rate != output_rate {
                log::warn!(
                    "Invalid sample rate (input: {}, output: {}), passing audio through",
                    input_rate,
                    output_rate
                );
            }
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
                output: Vec::new(),
            });
        }

        let chunk_size = (input_rate / CHUNKS_PER_SECOND).max(1) as usize;
        let resampler = FftFixedIn::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            chunk_size,
            1,
            1,
        )?;

        let output = vec![vec![0.0; resampler.output_frames_max()]];
        Ok(Self {
            inner: Some(resampler),
            pending: Vec::new(),
            output,
        })
    }

    /// True when input and output rates match and samples pass through untouched
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Input samples consumed per chunk (0 in passthrough mode)
    pub fn chunk_size(&self) -> usize {
        self.inner.as_ref().map_or(0, |r| r.input_frames_next())
    }

    /// Resample one block of mono samples.
    ///
    /// Returns the output of every chunk the block completed, which may be
    /// empty while a chunk is still filling.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return input.to_vec();
        };

        self.pending.extend_from_slice(input);

        let mut resampled = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk = [&self.pending[..needed]];
            match resampler.process_into_buffer(&chunk[..], &mut self.output, None) {
                Ok((_, out_len)) => resampled.extend_from_slice(&self.output[0][..out_len]),
                Err(e) => log::warn!("CaptureResampler: dropping chunk: {}", e),
            }
            self.pending.drain(..needed);
        }

        resampled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_at_matching_rates() {
        let mut resampler = CaptureResampler::new(16000, 16000).unwrap();
        assert!(resampler.is_passthrough());
        assert_eq!(resampler.process(&[0.1, 0.2, 0.3]), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_zero_rate_passes_through() {
        let mut resampler = CaptureResampler::new(0, 16000).unwrap();
        assert!(resampler.is_passthrough());
        assert_eq!(resampler.process(&[0.5]), vec![0.5]);
    }

    #[test]
    fn test_partial_chunk_is_held_back() {
        let mut resampler = CaptureResampler::new(48000, 16000).unwrap();
        let chunk = resampler.chunk_size();
        assert!(chunk > 1);

        assert!(resampler.process(&vec![0.1; chunk - 1]).is_empty());
        // One more sample completes the chunk
        assert!(!resampler.process(&[0.1]).is_empty());
    }

    #[test]
    fn test_streaming_total_length_is_stable() {
        // 1 second of 44.1kHz in 441-sample blocks should give close to 16000 samples
        let mut resampler = CaptureResampler::new(44100, 16000).unwrap();
        let block = vec![0.25f32; 441];
        let total: usize = (0..100).map(|_| resampler.process(&block).len()).sum();
        assert!((15_000..=16_000).contains(&total), "got {}", total);
    }

    #[test]
    fn test_constant_signal_settles() {
        let mut resampler = CaptureResampler::new(48000, 16000).unwrap();
        let mut output = Vec::new();
        for _ in 0..20 {
            output.extend(resampler.process(&[0.5f32; 480]));
        }

        // Skip the filter's warm-up; the tail must sit on the input level
        let tail = &output[output.len() / 2..];
        assert!(!tail.is_empty());
        for &s in tail {
            assert!((s - 0.5).abs() < 0.02, "got {}", s);
        }
    }
}
