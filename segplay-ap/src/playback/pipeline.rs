//! Upstream audio pipeline contract
//!
//! The fill thread pulls decoded PCM from an [`AudioPipeline`] straight into
//! ring buffer regions. Decoding, resampling and mixing live behind this
//! trait; [`MemoryPipeline`] serves already-decoded PCM and
//! [`crate::audio::SymphoniaPipeline`] decodes media files.

use crate::audio::PcmFormat;
use std::time::Duration;
use thiserror::Error;

/// Outcome of one pull from the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulled {
    /// This many whole frames were written to the start of the destination.
    /// Zero means "nothing available right now"; the caller backs off.
    Frames(usize),

    /// The source is exhausted; nothing was written
    EndOfData,
}

/// Upstream failure reported to the fill thread
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Codec failed to decode a packet
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Underlying media could not be read
    #[error("Read failed: {0}")]
    Read(String),

    /// Repositioning failed
    #[error("Seek failed: {0}")]
    Seek(String),
}

/// Pull-based source of interleaved PCM in a fixed processing format
pub trait AudioPipeline: Send {
    /// Processing format of every byte produced by [`fill`](Self::fill)
    fn format(&self) -> PcmFormat;

    /// Fill `dest` with up to `dest.len() / bytes_per_frame` frames
    ///
    /// `dest` always holds a whole number of frames.
    fn fill(&mut self, dest: &mut [u8]) -> Result<Pulled, PipelineError>;

    /// Reposition so the next [`fill`](Self::fill) starts at `position`
    fn seek(&mut self, position: Duration) -> Result<(), PipelineError>;
}

/// Pipeline over PCM bytes already held in memory
#[derive(Debug, Clone)]
pub struct MemoryPipeline {
    format: PcmFormat,
    data: Vec<u8>,
    cursor: usize,
}

impl MemoryPipeline {
    /// Create a pipeline over `data`; a trailing partial frame is dropped
    pub fn new(format: PcmFormat, mut data: Vec<u8>) -> Self {
        let whole = format.frames_to_bytes(format.bytes_to_frames(data.len()));
        data.truncate(whole);
        Self {
            format,
            data,
            cursor: 0,
        }
    }

    /// Total frames held
    pub fn total_frames(&self) -> usize {
        self.format.bytes_to_frames(self.data.len())
    }

    /// Total duration held
    pub fn duration(&self) -> Duration {
        self.format.frames_to_duration(self.total_frames() as u64)
    }
}

impl AudioPipeline for MemoryPipeline {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn fill(&mut self, dest: &mut [u8]) -> Result<Pulled, PipelineError> {
        let remaining = self.data.len() - self.cursor;
        if remaining == 0 {
            return Ok(Pulled::EndOfData);
        }

        let frames = self.format.bytes_to_frames(dest.len().min(remaining));
        let bytes = self.format.frames_to_bytes(frames);
        dest[..bytes].copy_from_slice(&self.data[self.cursor..self.cursor + bytes]);
        self.cursor += bytes;
        Ok(Pulled::Frames(frames))
    }

    fn seek(&mut self, position: Duration) -> Result<(), PipelineError> {
        let frame = self.format.duration_to_frames(position) as usize;
        self.cursor = self.format.frames_to_bytes(frame).min(self.data.len());
        Ok(())
    }
}
