//! segplay-ap playback configuration
//!
//! Resolved from the bootstrap [`TomlConfig`] and sized against the PCM
//! format once the pipeline is known.

use crate::audio::PcmFormat;
use crate::error::Result;
use crate::playback::fill_thread::FillSettings;
use segplay_common::config::TomlConfig;
use std::time::Duration;
use tracing::debug;

/// Runtime playback parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Audio held in the ring buffer when full
    pub buffer_duration: Duration,
    pub segment_count: usize,
    /// Frames pulled from the pipeline per fill step
    pub chunk_frames: usize,
    /// Frames copied per render callback outside scrubbing
    pub max_frames_per_callback: usize,
    pub fill_backoff: Duration,
    /// Audio sent per seek while scrubbing
    pub preview_window: Duration,
    pub activation_timeout: Duration,
    pub gain: f32,
}

/// Ring buffer dimensions for one format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub capacity_bytes: usize,
    pub segment_count: usize,
    pub frames_per_segment: usize,
}

impl PlaybackConfig {
    /// Validate and convert the `[playback]` section
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        config.validate()?;
        let p = &config.playback;
        Ok(Self {
            buffer_duration: Duration::from_millis(p.buffer_duration_ms),
            segment_count: p.segment_count,
            chunk_frames: p.chunk_frames,
            max_frames_per_callback: p.max_frames_per_callback,
            fill_backoff: Duration::from_millis(p.fill_backoff_ms),
            preview_window: Duration::from_millis(p.preview_window_ms),
            activation_timeout: Duration::from_millis(p.activation_timeout_ms),
            gain: p.gain,
        })
    }

    /// Size the ring buffer so every segment holds a whole number of frames
    pub fn ring_layout(&self, format: &PcmFormat) -> RingLayout {
        let segment_count = self.segment_count.max(1);
        let frames = (format.duration_to_frames(self.buffer_duration) as usize).max(segment_count);
        let frames_per_segment = frames.div_ceil(segment_count);
        let layout = RingLayout {
            capacity_bytes: format.frames_to_bytes(frames_per_segment * segment_count),
            segment_count,
            frames_per_segment,
        };
        debug!(
            "Ring layout for {}: {} bytes in {} segments of {} frames",
            format, layout.capacity_bytes, layout.segment_count, layout.frames_per_segment
        );
        layout
    }

    pub fn fill_settings(&self) -> FillSettings {
        FillSettings {
            chunk_frames: self.chunk_frames,
            backoff: self.fill_backoff,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        let p = TomlConfig::default().playback;
        Self {
            buffer_duration: Duration::from_millis(p.buffer_duration_ms),
            segment_count: p.segment_count,
            chunk_frames: p.chunk_frames,
            max_frames_per_callback: p.max_frames_per_callback,
            fill_backoff: Duration::from_millis(p.fill_backoff_ms),
            preview_window: Duration::from_millis(p.preview_window_ms),
            activation_timeout: Duration::from_millis(p.activation_timeout_ms),
            gain: p.gain,
        }
    }
}
