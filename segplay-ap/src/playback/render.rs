//! Contracts between the playback driver and the OS audio engine
//!
//! The engine owns the real-time thread and calls [`Renderer::render`] each
//! time the device wants audio. The driver owns everything behind it.

use crate::audio::PcmFormat;
use crate::error::Result;
use segplay_common::PlaybackEvent;
use std::sync::Arc;

/// One device buffer handed to the renderer
#[derive(Debug)]
pub struct RenderTarget<'a> {
    /// Interleaved device bytes in the activated format; length is the
    /// frames the hardware accepts now
    pub buffer: &'a mut [u8],

    /// Frames already queued in the engine and not yet played
    pub padding_frames: usize,
}

impl<'a> RenderTarget<'a> {
    pub fn new(buffer: &'a mut [u8], padding_frames: usize) -> Self {
        Self {
            buffer,
            padding_frames,
        }
    }
}

/// What the engine should do after a render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// Keep scheduling callbacks
    Continue,

    /// End of data: stop scheduling callbacks until the next `start()`
    Idle,
}

/// Real-time render handler
///
/// Called on the engine's audio thread: implementations must not block,
/// allocate or log.
pub trait Renderer: Send + Sync {
    fn render(&self, target: &mut RenderTarget<'_>) -> RenderStatus;
}

/// Completion of asynchronous activation; `Err` carries a description
pub type ActivationCallback = Box<dyn FnOnce(std::result::Result<(), String>) + Send>;

/// OS audio engine
pub trait OutputEngine {
    /// Prepare the device for `format` and register `renderer`
    ///
    /// `on_activated` may run on any thread, before or after this returns.
    fn activate(
        &mut self,
        format: PcmFormat,
        renderer: Arc<dyn Renderer>,
        on_activated: ActivationCallback,
    ) -> Result<()>;

    /// Begin (or resume) scheduling render callbacks
    fn start(&mut self) -> Result<()>;

    /// Stop scheduling render callbacks
    fn stop(&mut self) -> Result<()>;

    /// Drop audio queued inside the engine
    fn flush(&mut self) -> Result<()>;
}

/// Receiver of playback notifications
///
/// Invoked on whichever thread produced the event; position and end-of-data
/// arrive on the render thread, so implementations must be real-time safe.
pub trait PlaybackListener: Send + Sync {
    fn on_event(&self, event: PlaybackEvent);
}

impl<F> PlaybackListener for F
where
    F: Fn(PlaybackEvent) + Send + Sync,
{
    fn on_event(&self, event: PlaybackEvent) {
        self(event)
    }
}
