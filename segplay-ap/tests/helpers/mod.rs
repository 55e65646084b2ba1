//! Test helpers for segplay-ap integration tests
//!
//! Provides reusable test infrastructure:
//! - ManualEngine: output engine driven by the test (activation, renders)
//! - CollectingListener: records every playback event
//! - Test pipelines: stalling, failing, slow and gated upstream sources

#![allow(dead_code)]

use segplay_ap::audio::{PcmFormat, SampleFormat};
use segplay_ap::playback::{
    ActivationCallback, AudioPipeline, OutputEngine, PipelineError, PlaybackListener, Pulled,
    RenderStatus, RenderTarget, Renderer,
};
use segplay_ap::{Error, Result};
use segplay_common::PlaybackEvent;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// 1 kHz mono i16: one frame per millisecond, two bytes per frame
pub fn test_format() -> PcmFormat {
    PcmFormat::new(1000, 1, SampleFormat::I16)
}

/// Mono i16 samples whose value is `scale * frame index`
pub fn i16_ramp(frames: usize, scale: i16) -> Vec<u8> {
    (0..frames)
        .flat_map(|i| (i as i16 * scale).to_ne_bytes())
        .collect()
}

pub fn decode_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_ne_bytes([c[0], c[1]]))
        .collect()
}

/// Poll `condition` for up to five seconds
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[derive(Default)]
struct EngineInner {
    format: Option<PcmFormat>,
    renderer: Option<Arc<dyn Renderer>>,
    on_activated: Option<ActivationCallback>,
    auto_activate: bool,
    fail_activate: bool,
    fail_start: bool,
    running: bool,
    starts: usize,
    stops: usize,
    flushes: usize,
}

/// Output engine whose callbacks are issued by the test
pub struct ManualEngine {
    inner: Arc<Mutex<EngineInner>>,
}

/// Test-side handle of a [`ManualEngine`]
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Mutex<EngineInner>>,
}

impl ManualEngine {
    /// Engine that waits for `EngineHandle::complete_activation`
    pub fn new() -> (Self, EngineHandle) {
        let inner = Arc::new(Mutex::new(EngineInner::default()));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            EngineHandle { inner },
        )
    }

    /// Engine that reports activation synchronously from `activate`
    pub fn auto_activating() -> (Self, EngineHandle) {
        let (engine, handle) = Self::new();
        handle.inner.lock().unwrap().auto_activate = true;
        (engine, handle)
    }

    /// Engine whose `activate` call fails
    pub fn failing_activation() -> (Self, EngineHandle) {
        let (engine, handle) = Self::new();
        handle.inner.lock().unwrap().fail_activate = true;
        (engine, handle)
    }
}

impl OutputEngine for ManualEngine {
    fn activate(
        &mut self,
        format: PcmFormat,
        renderer: Arc<dyn Renderer>,
        on_activated: ActivationCallback,
    ) -> Result<()> {
        let auto = {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_activate {
                return Err(Error::AudioOutput("test device unavailable".to_string()));
            }
            inner.format = Some(format);
            inner.renderer = Some(renderer);
            inner.auto_activate
        };

        if auto {
            on_activated(Ok(()));
        } else {
            self.inner.lock().unwrap().on_activated = Some(on_activated);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_start {
            return Err(Error::AudioOutput("test start failure".to_string()));
        }
        inner.running = true;
        inner.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.running = false;
        inner.stops += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.lock().unwrap().flushes += 1;
        Ok(())
    }
}

impl EngineHandle {
    /// Deliver the pending activation result
    pub fn complete_activation(&self, result: std::result::Result<(), String>) {
        let callback = self.inner.lock().unwrap().on_activated.take();
        if let Some(callback) = callback {
            callback(result);
        }
    }

    /// Run one render callback for `frames` frames
    pub fn render(&self, frames: usize, padding_frames: usize) -> (Vec<u8>, RenderStatus) {
        let (renderer, format) = {
            let inner = self.inner.lock().unwrap();
            (
                inner.renderer.clone().expect("engine not activated"),
                inner.format.expect("engine not activated"),
            )
        };
        // Garbage so tests notice bytes the renderer failed to write
        let mut buffer = vec![0xAAu8; format.frames_to_bytes(frames)];
        let mut target = RenderTarget::new(&mut buffer, padding_frames);
        let status = renderer.render(&mut target);
        (buffer, status)
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.inner.lock().unwrap().fail_start = fail;
    }

    pub fn running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    pub fn starts(&self) -> usize {
        self.inner.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.inner.lock().unwrap().stops
    }

    pub fn flushes(&self) -> usize {
        self.inner.lock().unwrap().flushes
    }
}

/// Listener recording every event
#[derive(Default)]
pub struct CollectingListener {
    events: Mutex<Vec<PlaybackEvent>>,
}

impl CollectingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn end_of_data_count(&self) -> usize {
        self.count(|e| matches!(e, PlaybackEvent::EndOfData { .. }))
    }

    pub fn position_updates(&self) -> Vec<Duration> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PlaybackEvent::PositionUpdated { position } => Some(position),
                _ => None,
            })
            .collect()
    }

    pub fn last_position_update(&self) -> Option<Duration> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|e| match e {
                PlaybackEvent::PositionUpdated { position } => Some(*position),
                _ => None,
            })
    }

    pub fn upstream_failed_count(&self) -> usize {
        self.count(|e| matches!(e, PlaybackEvent::UpstreamFailed { .. }))
    }

    pub fn session_failed_count(&self) -> usize {
        self.count(|e| matches!(e, PlaybackEvent::SessionFailed))
    }

    fn count(&self, predicate: impl Fn(&PlaybackEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl PlaybackListener for CollectingListener {
    fn on_event(&self, event: PlaybackEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Delivers a fixed ramp, then reports "nothing yet" forever
pub struct StallingPipeline {
    data: Vec<u8>,
    cursor: usize,
}

impl StallingPipeline {
    pub fn new(frames: usize) -> Self {
        Self {
            data: i16_ramp(frames, 1),
            cursor: 0,
        }
    }
}

impl AudioPipeline for StallingPipeline {
    fn format(&self) -> PcmFormat {
        test_format()
    }

    fn fill(&mut self, dest: &mut [u8]) -> std::result::Result<Pulled, PipelineError> {
        let n = dest.len().min(self.data.len() - self.cursor) / 2 * 2;
        dest[..n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(Pulled::Frames(n / 2))
    }

    fn seek(&mut self, position: Duration) -> std::result::Result<(), PipelineError> {
        self.cursor = (position.as_millis() as usize * 2).min(self.data.len());
        Ok(())
    }
}

/// Delivers `good_frames` frames of silence, then fails every pull
pub struct FailingPipeline {
    remaining: usize,
    pub pulls: Arc<AtomicUsize>,
}

impl FailingPipeline {
    pub fn new(good_frames: usize) -> Self {
        Self {
            remaining: good_frames,
            pulls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AudioPipeline for FailingPipeline {
    fn format(&self) -> PcmFormat {
        test_format()
    }

    fn fill(&mut self, dest: &mut [u8]) -> std::result::Result<Pulled, PipelineError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.remaining == 0 {
            return Err(PipelineError::Decode("corrupt packet".to_string()));
        }
        let frames = (dest.len() / 2).min(self.remaining);
        dest[..frames * 2].fill(0);
        self.remaining -= frames;
        Ok(Pulled::Frames(frames))
    }

    fn seek(&mut self, _position: Duration) -> std::result::Result<(), PipelineError> {
        Ok(())
    }
}

/// Endless pipeline that sleeps inside every pull and tracks concurrency
pub struct SlowPipeline {
    pub in_fill: Arc<AtomicUsize>,
    pub pulls: Arc<AtomicUsize>,
}

impl SlowPipeline {
    pub fn new() -> Self {
        Self {
            in_fill: Arc::new(AtomicUsize::new(0)),
            pulls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl AudioPipeline for SlowPipeline {
    fn format(&self) -> PcmFormat {
        test_format()
    }

    fn fill(&mut self, dest: &mut [u8]) -> std::result::Result<Pulled, PipelineError> {
        self.in_fill.fetch_add(1, Ordering::SeqCst);
        self.pulls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        let frames = (dest.len() / 2).min(4);
        dest[..frames * 2].fill(1);
        self.in_fill.fetch_sub(1, Ordering::SeqCst);
        Ok(Pulled::Frames(frames))
    }

    fn seek(&mut self, _position: Duration) -> std::result::Result<(), PipelineError> {
        Ok(())
    }
}

/// Gate the test opens to release a blocked pull
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn open(&self) {
        let (open, cvar) = &*self.inner;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (open, cvar) = &*self.inner;
        let guard = open.lock().unwrap();
        drop(cvar.wait_while(guard, |open| !*open).unwrap());
    }
}

/// First pull blocks on a gate and then reports end of data; after any
/// seek every pull reports "nothing yet"
pub struct GatedEndPipeline {
    gate: Gate,
    seeked: bool,
    pub in_fill: Arc<AtomicBool>,
    pub pulls: Arc<AtomicUsize>,
}

impl GatedEndPipeline {
    pub fn new() -> (Self, Gate) {
        let gate = Gate::default();
        (
            Self {
                gate: gate.clone(),
                seeked: false,
                in_fill: Arc::new(AtomicBool::new(false)),
                pulls: Arc::new(AtomicUsize::new(0)),
            },
            gate,
        )
    }
}

impl AudioPipeline for GatedEndPipeline {
    fn format(&self) -> PcmFormat {
        test_format()
    }

    fn fill(&mut self, _dest: &mut [u8]) -> std::result::Result<Pulled, PipelineError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.seeked {
            return Ok(Pulled::Frames(0));
        }
        self.in_fill.store(true, Ordering::SeqCst);
        self.gate.wait();
        self.in_fill.store(false, Ordering::SeqCst);
        Ok(Pulled::EndOfData)
    }

    fn seek(&mut self, _position: Duration) -> std::result::Result<(), PipelineError> {
        self.seeked = true;
        Ok(())
    }
}
