//! Audio output using cpal
//!
//! [`CpalEngine`] implements [`OutputEngine`] on a cpal output stream. The
//! stream callback hands the device buffer to the driver's renderer as raw
//! interleaved bytes.

use crate::audio::{PcmFormat, SampleFormat};
use crate::error::{Error, Result};
use crate::playback::render::{
    ActivationCallback, OutputEngine, RenderStatus, RenderTarget, Renderer,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SizedSample, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Output engine backed by a cpal stream
///
/// cpal does not report queued device frames, so render targets always carry
/// zero padding.
pub struct CpalEngine {
    device: Device,
    buffer_frames: Option<u32>,
    stream: Option<Stream>,
    /// Renderer reported end of data; callbacks output silence until `start()`
    idle: Arc<AtomicBool>,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl CpalEngine {
    /// Names of the available output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open `device_name`, falling back to the default output device
    pub fn new(device_name: Option<&str>, buffer_frames: Option<u32>) -> Result<Self> {
        let host = cpal::default_host();

        let requested = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().ok().as_deref() == Some(name)),
            None => None,
        };

        let device = match (requested, device_name) {
            (Some(device), _) => device,
            (None, name) => {
                if let Some(name) = name {
                    warn!(
                        "Requested device '{}' not found, falling back to default device",
                        name
                    );
                }
                host.default_output_device()
                    .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?
            }
        };

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        Ok(Self {
            device,
            buffer_frames,
            stream: None,
            idle: Arc::new(AtomicBool::new(false)),
            error_flag: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
        })
    }

    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    /// Sample encoding the device prefers (f32 unless it defaults to i16)
    pub fn preferred_sample_format(&self) -> Result<SampleFormat> {
        let config = self
            .device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        Ok(match config.sample_format() {
            cpal::SampleFormat::I16 => SampleFormat::I16,
            _ => SampleFormat::F32,
        })
    }

    /// True once the stream error callback fired; `start()` then fails
    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Check the device can run `format` natively
    fn check_supported(&self, format: &PcmFormat) -> Result<()> {
        let wanted = match format.sample_format {
            SampleFormat::F32 => cpal::SampleFormat::F32,
            SampleFormat::I16 => cpal::SampleFormat::I16,
        };
        let supported = self
            .device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .any(|config| {
                config.channels() == format.channels
                    && config.sample_format() == wanted
                    && config.min_sample_rate().0 <= format.sample_rate
                    && config.max_sample_rate().0 >= format.sample_rate
            });

        if !supported {
            return Err(Error::AudioOutput(format!(
                "Device '{}' does not support {}",
                self.device_name(),
                format
            )));
        }
        Ok(())
    }

    fn build_stream<T: SizedSample>(
        &self,
        config: &StreamConfig,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Stream> {
        let idle = Arc::clone(&self.idle);
        let error_flag = Arc::clone(&self.error_flag);
        let error_count = Arc::clone(&self.error_count);

        self.device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let len = std::mem::size_of_val(data);
                    // SAFETY: T is a plain numeric sample; viewing its storage as
                    // bytes is valid for the lifetime of `data` and u8 has no
                    // alignment requirement.
                    let bytes =
                        unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr().cast::<u8>(), len) };

                    if idle.load(Ordering::Acquire) {
                        bytes.fill(0);
                        return;
                    }

                    let mut target = RenderTarget::new(bytes, 0);
                    if renderer.render(&mut target) == RenderStatus::Idle {
                        idle.store(true, Ordering::Release);
                    }
                },
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }
}

impl OutputEngine for CpalEngine {
    fn activate(
        &mut self,
        format: PcmFormat,
        renderer: Arc<dyn Renderer>,
        on_activated: ActivationCallback,
    ) -> Result<()> {
        if let Err(e) = self.check_supported(&format) {
            on_activated(Err(e.to_string()));
            return Ok(());
        }

        let mut config = StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        if let Some(frames) = self.buffer_frames {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
            debug!("Using requested buffer size: {} frames", frames);
        }

        let built = match format.sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(&config, renderer),
            SampleFormat::I16 => self.build_stream::<i16>(&config, renderer),
        };
        let stream = match built {
            Ok(stream) => stream,
            Err(e) => {
                on_activated(Err(e.to_string()));
                return Ok(());
            }
        };

        // Some hosts start streams on creation
        if let Err(e) = stream.pause() {
            debug!("Stream pause after build not supported: {}", e);
        }
        self.stream = Some(stream);

        info!("Audio stream activated: {}", format);
        on_activated(Ok(()));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.has_error() {
            return Err(Error::AudioOutput(format!(
                "Audio stream reported {} errors",
                self.error_count()
            )));
        }
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| Error::InvalidState("audio stream not activated".to_string()))?;
        self.idle.store(false, Ordering::Release);
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        debug!("Audio stream started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
            debug!("Audio stream paused");
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        // cpal exposes no queue flush; a paused stream drains nothing further
        Ok(())
    }
}

impl Drop for CpalEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
