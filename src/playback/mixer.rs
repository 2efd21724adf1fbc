//! Sample-accurate voice mixer driven by the output device clock
//!
//! Every scheduled buffer becomes a voice with an absolute start time. The
//! device callback pulls one sample at a time; the mixer sums all voices that
//! are sounding at the current frame and advances its clock by one frame.
//! The number of frames rendered so far *is* the output clock.

use super::scheduler::PlayableBuffer;

#[derive(Debug)]
struct Voice {
    samples: Vec<f32>,
    /// Source samples advanced per device frame (source_rate * speed / device_rate)
    step: f64,
    /// Device frame at which the voice starts
    start_frame: f64,
}

impl Voice {
    fn end_frame(&self) -> f64 {
        self.start_frame + self.samples.len() as f64 / self.step
    }

    fn sample_at(&self, frame: f64) -> f32 {
        let offset = frame - self.start_frame;
        if offset < 0.0 {
            return 0.0;
        }
        let pos = offset * self.step;
        let idx = pos.floor() as usize;
        if idx >= self.samples.len() {
            return 0.0;
        }
        let a = self.samples[idx];
        let b = self.samples.get(idx + 1).copied().unwrap_or(0.0);
        let frac = (pos - idx as f64) as f32;
        a + frac * (b - a)
    }
}

/// Mixes scheduled buffers into a mono device stream.
#[derive(Debug)]
pub struct Mixer {
    device_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
    completed: u64,
}

impl Mixer {
    pub fn new(device_rate: u32) -> Self {
        Self {
            device_rate: device_rate.max(1),
            frames_rendered: 0,
            voices: Vec::new(),
            completed: 0,
        }
    }

    /// Output clock in seconds
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.device_rate as f64
    }

    /// Add a buffer that starts playing at `start_at` seconds on the output clock
    pub fn add(&mut self, buffer: PlayableBuffer, start_at: f64) {
        if buffer.samples.is_empty() || buffer.sample_rate == 0 || buffer.speed <= 0.0 {
            return;
        }
        let step = buffer.sample_rate as f64 * buffer.speed as f64 / self.device_rate as f64;
        self.voices.push(Voice {
            samples: buffer.samples,
            step,
            start_frame: start_at * self.device_rate as f64,
        });
    }

    /// Render the next device frame
    pub fn next_sample(&mut self) -> f32 {
        let frame = self.frames_rendered as f64;
        let mixed: f32 = self.voices.iter().map(|v| v.sample_at(frame)).sum();
        self.frames_rendered += 1;
        mixed.clamp(-1.0, 1.0)
    }

    /// Drop voices that have finished playing. Returns how many were removed.
    pub fn reap(&mut self) -> usize {
        let now = self.frames_rendered as f64;
        let before = self.voices.len();
        self.voices.retain(|v| v.end_frame() > now);
        let removed = before - self.voices.len();
        self.completed += removed as u64;
        removed
    }

    /// Silence everything that is playing or scheduled
    pub fn clear(&mut self) {
        self.voices.clear();
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Voices that played to completion since creation
    pub fn completed(&self) -> u64 {
        self.completed
    }
}
