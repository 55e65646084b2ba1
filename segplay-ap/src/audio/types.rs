//! Core audio data types
//!
//! PCM format description and the gain table applied by the render callback.
//!
//! **Format:**
//! - Samples are interleaved, native-endian
//! - `I16` (signed 16-bit) or `F32` (floating point -1.0 to 1.0)
//! - Silence is all-zero bytes in both formats

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Maximum number of entries in a per-channel gain table
pub const MAX_GAIN_CHANNELS: usize = 32;

/// PCM sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit integer
    I16,
    /// 32-bit float
    F32,
}

impl SampleFormat {
    /// Bytes per sample
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// Interleaved PCM processing format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Sample rate (Hz)
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,

    /// Sample encoding
    pub sample_format: SampleFormat,
}

impl PcmFormat {
    /// Create a format description
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Bytes per sample
    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes_per_sample()
    }

    /// Bytes per interleaved frame (all channels)
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Frames contained in `bytes` (truncating partial frames)
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.bytes_per_frame()
    }

    /// Bytes occupied by `frames`
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    /// Frames covering `duration` at this sample rate
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        segplay_common::time::duration_to_frames(duration, self.sample_rate)
    }

    /// Duration of `frames` at this sample rate
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        segplay_common::time::frames_to_duration(frames, self.sample_rate)
    }
}

impl std::fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {:?}",
            self.sample_rate, self.channels, self.sample_format
        )
    }
}

/// Scalar or per-channel gain, shared between control plane and render callback
///
/// Entries are f32 bit patterns in atomics; the active length selects scalar
/// (1 entry) or per-channel mode. Sample `i` of a buffer uses entry
/// `channel(i) % active_len`. An update racing a render may apply partially
/// across one buffer; each entry is read atomically.
pub struct GainTable {
    gains: [AtomicU32; MAX_GAIN_CHANNELS],
    active: AtomicUsize,
}

impl GainTable {
    /// Create a table holding a single scalar gain
    pub fn new(gain: f32) -> Self {
        let table = Self {
            gains: std::array::from_fn(|_| AtomicU32::new(1.0f32.to_bits())),
            active: AtomicUsize::new(1),
        };
        table.set_scalar(gain);
        table
    }

    /// Replace the table with a single scalar gain
    pub fn set_scalar(&self, gain: f32) {
        self.gains[0].store(gain.to_bits(), Ordering::Relaxed);
        self.active.store(1, Ordering::Release);
    }

    /// Replace the table with per-channel gains
    ///
    /// Extra entries beyond [`MAX_GAIN_CHANNELS`] are ignored; an empty slice
    /// resets to unity gain.
    pub fn set_channels(&self, gains: &[f32]) {
        if gains.is_empty() {
            self.set_scalar(1.0);
            return;
        }
        let count = gains.len().min(MAX_GAIN_CHANNELS);
        for (slot, gain) in self.gains.iter().zip(&gains[..count]) {
            slot.store(gain.to_bits(), Ordering::Relaxed);
        }
        self.active.store(count, Ordering::Release);
    }

    /// Gain for `channel`
    pub fn gain_for(&self, channel: usize) -> f32 {
        let active = self.active.load(Ordering::Acquire).max(1);
        f32::from_bits(self.gains[channel % active].load(Ordering::Relaxed))
    }

    /// Snapshot of the active entries
    pub fn snapshot(&self) -> Vec<f32> {
        let active = self.active.load(Ordering::Acquire).max(1);
        (0..active).map(|ch| self.gain_for(ch)).collect()
    }

    /// True when every active entry is exactly 1.0
    fn is_unity(&self) -> bool {
        let active = self.active.load(Ordering::Acquire).max(1);
        self.gains[..active]
            .iter()
            .all(|g| g.load(Ordering::Relaxed) == 1.0f32.to_bits())
    }

    /// Copy `src` into `dst` applying gain per sample
    ///
    /// Both slices must hold the same whole number of samples and `src` must
    /// start on a frame boundary. Integer samples saturate.
    pub fn copy_with_gain(&self, src: &[u8], dst: &mut [u8], format: &PcmFormat) {
        debug_assert_eq!(src.len(), dst.len());

        if self.is_unity() {
            dst.copy_from_slice(src);
            return;
        }

        let channels = format.channels.max(1) as usize;
        match format.sample_format {
            SampleFormat::I16 => {
                for (i, (s, d)) in src.chunks_exact(2).zip(dst.chunks_exact_mut(2)).enumerate() {
                    let gain = self.gain_for(i % channels);
                    let sample = i16::from_ne_bytes([s[0], s[1]]) as f32 * gain;
                    let scaled = sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                    d.copy_from_slice(&scaled.to_ne_bytes());
                }
            }
            SampleFormat::F32 => {
                for (i, (s, d)) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)).enumerate() {
                    let gain = self.gain_for(i % channels);
                    let sample = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]) * gain;
                    d.copy_from_slice(&sample.to_ne_bytes());
                }
            }
        }
    }
}

impl Default for GainTable {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl std::fmt::Debug for GainTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GainTable")
            .field("gains", &self.snapshot())
            .finish()
    }
}

/// Encode f32 samples as interleaved native-endian bytes in `format`
pub fn encode_samples(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut out = vec![0u8; samples.len() * format.bytes_per_sample()];
    encode_samples_into(samples, &mut out, format);
    out
}

/// Encode f32 samples into `dest`; integer output clamps to [-1.0, 1.0] first
pub fn encode_samples_into(samples: &[f32], dest: &mut [u8], format: SampleFormat) {
    match format {
        SampleFormat::F32 => {
            for (sample, out) in samples.iter().zip(dest.chunks_exact_mut(4)) {
                out.copy_from_slice(&sample.to_ne_bytes());
            }
        }
        SampleFormat::I16 => {
            for (sample, out) in samples.iter().zip(dest.chunks_exact_mut(2)) {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.copy_from_slice(&value.to_ne_bytes());
            }
        }
    }
}
