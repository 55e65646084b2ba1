//! # segplay Audio Player Library (segplay-ap)
//!
//! Real-time audio playback core built around a segmented lock-free ring
//! buffer.
//!
//! **Data flow:** media packets → (codec) → [`AudioPipeline`] → buffer fill
//! thread → [`SegmentedRingBuffer`] → render callback → output engine.
//!
//! **Architecture:** symphonia decode pipeline + cpal output engine, glued by
//! a [`PlaybackDriver`] that owns the fill thread and the control state
//! machine.
//!
//! [`AudioPipeline`]: playback::AudioPipeline
//! [`SegmentedRingBuffer`]: playback::SegmentedRingBuffer
//! [`PlaybackDriver`]: playback::PlaybackDriver

pub mod audio;
pub mod config;
pub mod error;
pub mod media;
pub mod playback;

pub use config::PlaybackConfig;
pub use error::{Error, Result};
pub use playback::{PlaybackDriver, PlaybackState};
