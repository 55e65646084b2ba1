//! Audio subsystem
//!
//! PCM format types, the symphonia decode pipeline and the cpal output engine.

pub mod decoder;
pub mod output;
pub mod types;

pub use decoder::SymphoniaPipeline;
pub use output::CpalEngine;
pub use types::{
    encode_samples, encode_samples_into, GainTable, PcmFormat, SampleFormat, MAX_GAIN_CHANNELS,
};
