//! Streaming audio decoder using symphonia
//!
//! [`SymphoniaPipeline`] decodes one audio track packet by packet and serves
//! interleaved PCM to the fill thread. Decoded samples that do not fit the
//! caller's buffer are kept for the next pull.

use crate::audio::{encode_samples_into, PcmFormat, SampleFormat};
use crate::error::{Error, Result};
use crate::playback::pipeline::{AudioPipeline, PipelineError, Pulled};
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, info, warn};

/// Decodes a media file into the pipeline's PCM format
pub struct SymphoniaPipeline {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    total_frames: Option<u64>,
    format: PcmFormat,

    sample_buf: Option<SampleBuffer<f32>>,
    /// Decoded interleaved samples not yet delivered
    pending: Vec<f32>,
    pending_pos: usize,
    /// Frames to discard from the next decoded packets after a seek
    skip_frames: u64,
    finished: bool,
}

impl SymphoniaPipeline {
    /// Open `path` and prepare the first audio track
    ///
    /// Output keeps the track's sample rate and channel count and uses
    /// `sample_format` for encoding.
    pub fn open(path: &Path, sample_format: SampleFormat) -> Result<Self> {
        debug!("Opening {} for decoding", path.display());

        let file = std::fs::File::open(path)
            .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let params = &track.codec_params;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;
        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        let format = PcmFormat::new(sample_rate, channels, sample_format);
        info!("Decoding {}: {}", path.display(), format);

        Ok(Self {
            track_id: track.id,
            time_base: params.time_base,
            total_frames: params.n_frames,
            reader,
            decoder,
            format,
            sample_buf: None,
            pending: Vec::new(),
            pending_pos: 0,
            skip_frames: 0,
            finished: false,
        })
    }

    /// Track duration when the container reports it
    pub fn duration(&self) -> Option<Duration> {
        self.total_frames
            .map(|frames| self.format.frames_to_duration(frames))
    }

    /// Decode the next packet of our track into `pending`
    ///
    /// Returns `false` at end of stream.
    fn decode_next(&mut self) -> std::result::Result<bool, PipelineError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("Reached end of stream");
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    warn!("Stream requires decoder reset, treating as end of stream");
                    return Ok(false);
                }
                Err(e) => return Err(PipelineError::Read(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    warn!("Skipping undecodable packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(PipelineError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            if spec.channels.count() != self.format.channels as usize {
                return Err(PipelineError::Decode(format!(
                    "Channel count changed mid-stream: {} -> {}",
                    self.format.channels,
                    spec.channels.count()
                )));
            }

            let needed = decoded.capacity() as u64;
            let needed_samples = needed as usize * spec.channels.count();
            if self
                .sample_buf
                .as_ref()
                .is_some_and(|buf| buf.capacity() < needed_samples)
            {
                self.sample_buf = None;
            }
            let buf = self
                .sample_buf
                .get_or_insert_with(|| SampleBuffer::<f32>::new(needed, spec));
            buf.copy_interleaved_ref(decoded);

            self.pending.clear();
            self.pending.extend_from_slice(buf.samples());

            let channels = self.format.channels as usize;
            let frames = (self.pending.len() / channels) as u64;
            let skip = self.skip_frames.min(frames);
            self.skip_frames -= skip;
            self.pending_pos = skip as usize * channels;

            if self.pending_pos < self.pending.len() {
                return Ok(true);
            }
        }
    }

    fn ts_to_frames(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                let rate = self.format.sample_rate as u64;
                time.seconds * rate + (time.frac * rate as f64) as u64
            }
            None => ts,
        }
    }
}

impl AudioPipeline for SymphoniaPipeline {
    fn format(&self) -> PcmFormat {
        self.format
    }

    fn fill(&mut self, dest: &mut [u8]) -> std::result::Result<Pulled, PipelineError> {
        let channels = self.format.channels as usize;
        let bytes_per_sample = self.format.bytes_per_sample();
        let frames_wanted = self.format.bytes_to_frames(dest.len());
        let mut frames_out = 0;

        while frames_out < frames_wanted {
            if self.pending_pos < self.pending.len() {
                let available = (self.pending.len() - self.pending_pos) / channels;
                let n = available.min(frames_wanted - frames_out);
                let samples = &self.pending[self.pending_pos..self.pending_pos + n * channels];
                let start = self.format.frames_to_bytes(frames_out);
                encode_samples_into(
                    samples,
                    &mut dest[start..start + samples.len() * bytes_per_sample],
                    self.format.sample_format,
                );
                self.pending_pos += n * channels;
                frames_out += n;
                continue;
            }

            if self.finished || !self.decode_next()? {
                self.finished = true;
                break;
            }
        }

        if frames_out == 0 && self.finished {
            return Ok(Pulled::EndOfData);
        }
        Ok(Pulled::Frames(frames_out))
    }

    fn seek(&mut self, position: Duration) -> std::result::Result<(), PipelineError> {
        self.pending.clear();
        self.pending_pos = 0;
        self.skip_frames = 0;
        self.finished = false;

        let time = Time::new(position.as_secs(), position.subsec_nanos() as f64 / 1e9);
        let seeked = self.reader.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        );

        match seeked {
            Ok(seeked) => {
                self.decoder.reset();
                let required = self.ts_to_frames(seeked.required_ts);
                let actual = self.ts_to_frames(seeked.actual_ts);
                self.skip_frames = required.saturating_sub(actual);
                debug!(
                    "Decoder seeked to {:?} (skipping {} frames)",
                    position, self.skip_frames
                );
                Ok(())
            }
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                debug!("Seek to {:?} is past the end of the stream", position);
                self.finished = true;
                Ok(())
            }
            Err(e) => Err(PipelineError::Seek(e.to_string())),
        }
    }
}
