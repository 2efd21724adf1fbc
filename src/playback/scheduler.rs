//! Gapless playback scheduling
//!
//! Inbound speech arrives as independent PCM16 frames at irregular intervals.
//! The scheduler places each frame on the output clock so it starts exactly
//! where the previous one ends, which makes consecutive chunks play back to
//! back with neither gaps nor overlap.
//!
//! # Timeline
//!
//! ```text
//! next_play_time ─┬─ chunk i ─┬─ chunk i+1 ─┬─ ...
//!                 start_i     start_i + duration_i / speed
//! ```
//!
//! If the clock has already passed `next_play_time` when a frame arrives
//! (underrun), the cursor snaps forward to "now" and the gap is accepted.

use std::sync::Arc;

use super::PlaybackError;
use crate::audio::codec::{self, SAMPLE_RATE};

/// Slowest supported playback speed
pub const MIN_SPEED: f32 = 0.5;

/// Fastest supported playback speed
pub const MAX_SPEED: f32 = 2.0;

/// Decoded audio ready to hand to an output
#[derive(Debug, Clone)]
pub struct PlayableBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Playback rate multiplier frozen at scheduling time
    pub speed: f32,
}

impl PlayableBuffer {
    /// Duration at normal speed, in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Wall-clock duration at the buffer's playback speed, in seconds
    pub fn playback_secs(&self) -> f64 {
        self.duration_secs() / self.speed as f64
    }
}

/// An output device with its own clock that plays buffers at absolute times.
pub trait AudioOutput: Send {
    /// Current output-clock time in seconds
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at `start_at` on the output clock
    fn schedule(&mut self, buffer: PlayableBuffer, start_at: f64);

    /// Stop playback and release the device. Must be idempotent.
    fn close(&mut self);
}

/// Opens outputs lazily on the first inbound frame.
pub trait OutputFactory: Send + Sync + 'static {
    fn open(&self) -> Result<Box<dyn AudioOutput>, PlaybackError>;
}

/// Placement of one frame on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start: f64,
    pub end: f64,
    /// Duration at normal speed
    pub duration: f64,
    pub speed: f32,
    /// The schedule had fallen behind the clock and was reset to "now"
    pub underrun: bool,
}

/// Counters for the current output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackStats {
    pub chunks_scheduled: u64,
    pub underruns: u64,
    pub decode_errors: u64,
    /// Total scheduled wall-clock audio in seconds
    pub scheduled_secs: f64,
}

/// Schedules inbound PCM16 frames back to back on a shared output clock.
pub struct PlaybackScheduler {
    factory: Arc<dyn OutputFactory>,
    output: Option<Box<dyn AudioOutput>>,
    /// Output-clock time at which the next chunk starts
    next_play_time: f64,
    speed: f32,
    stats: PlaybackStats,
}

impl PlaybackScheduler {
    pub fn new(factory: Arc<dyn OutputFactory>, speed: f32) -> Self {
        Self {
            factory,
            output: None,
            next_play_time: 0.0,
            speed: clamp_speed(speed).unwrap_or(1.0),
            stats: PlaybackStats::default(),
        }
    }

    /// Schedule one inbound frame
    pub fn on_frame(&mut self, frame: &[u8]) -> Result<ScheduledChunk, PlaybackError> {
        let samples = match codec::decode(frame) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.decode_errors += 1;
                return Err(PlaybackError::Codec(e));
            }
        };

        if self.output.is_none() {
            let output = self.factory.open()?;
            log::info!("PlaybackScheduler: output opened");
            self.output = Some(output);
            self.next_play_time = 0.0;
        }
        let Some(output) = self.output.as_mut() else {
            return Err(PlaybackError::OutputUnavailable);
        };

        let buffer = PlayableBuffer {
            samples,
            sample_rate: SAMPLE_RATE,
            speed: self.speed,
        };

        let now = output.current_time();
        let underrun = self.next_play_time < now;
        if underrun {
            log::debug!(
                "PlaybackScheduler: underrun, schedule was {:.3}s behind",
                now - self.next_play_time
            );
            self.next_play_time = now;
            self.stats.underruns += 1;
        }

        let start = self.next_play_time;
        let duration = codec::frame_duration_secs(frame.len());
        let end = start + buffer.playback_secs();

        if !buffer.samples.is_empty() {
            output.schedule(buffer, start);
        }
        self.next_play_time = end;

        self.stats.chunks_scheduled += 1;
        self.stats.scheduled_secs += end - start;
        if self.stats.chunks_scheduled % 50 == 0 {
            log::debug!(
                "PlaybackScheduler: {} chunks scheduled, {} underruns",
                self.stats.chunks_scheduled,
                self.stats.underruns
            );
        }

        Ok(ScheduledChunk {
            start,
            end,
            duration,
            speed: self.speed,
            underrun,
        })
    }

    /// Change the speed for chunks scheduled from now on.
    ///
    /// Values are clamped to `[MIN_SPEED, MAX_SPEED]`; non-finite values are
    /// ignored. Returns the speed in effect afterwards.
    pub fn set_speed(&mut self, speed: f32) -> f32 {
        match clamp_speed(speed) {
            Some(speed) => {
                if speed != self.speed {
                    log::info!("PlaybackScheduler: speed {:.2}x -> {:.2}x", self.speed, speed);
                }
                self.speed = speed;
            }
            None => log::warn!("PlaybackScheduler: ignoring invalid speed {}", speed),
        }
        self.speed
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn next_play_time(&self) -> f64 {
        self.next_play_time
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    /// Close the output (if any) and reset the timeline cursor to zero.
    ///
    /// Safe to call repeatedly and before any frame has arrived.
    pub fn release(&mut self) -> PlaybackStats {
        if let Some(mut output) = self.output.take() {
            output.close();
            log::info!(
                "PlaybackScheduler: output released after {} chunks ({:.1}s, {} underruns)",
                self.stats.chunks_scheduled,
                self.stats.scheduled_secs,
                self.stats.underruns
            );
        }
        self.next_play_time = 0.0;
        std::mem::take(&mut self.stats)
    }
}

fn clamp_speed(speed: f32) -> Option<f32> {
    if speed.is_finite() {
        Some(speed.clamp(MIN_SPEED, MAX_SPEED))
    } else {
        None
    }
}
