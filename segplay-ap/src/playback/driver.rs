//! Playback driver
//!
//! Owns one playback session: the segmented ring buffer, the buffer fill
//! thread, the render handler the engine calls on its real-time thread, and
//! the control state machine.
//!
//! ```text
//! Initializing → Initialized → Starting → Playing → Resetting → Initialized
//!                         (any) ──engine failure──→ Error (absorbing)
//! ```
//!
//! **Real-time path:** [`Renderer::render`] only uses atomics and
//! `Mutex::try_lock` on the reader half. Control operations that must keep
//! the render path out of the ring buffer (seek, reset) take the reader mutex
//! on the caller thread; a render that loses the `try_lock` outputs silence.

use crate::audio::{GainTable, PcmFormat, MAX_GAIN_CHANNELS};
use crate::config::PlaybackConfig;
use crate::error::{Error, Result};
use crate::playback::callback_monitor::{CallbackMonitor, CallbackStats, MonitorHandle};
use crate::playback::fill_thread::{BufferFillThread, FillErrorCallback, FillObserver, FillStats};
use crate::playback::pipeline::{AudioPipeline, PipelineError};
use crate::playback::render::{
    OutputEngine, PlaybackListener, RenderStatus, RenderTarget, Renderer,
};
use crate::playback::segmented_ring::{RingObserver, RingStats, SegmentReader, SegmentedRingBuffer};
use crate::playback::state::{AtomicPlaybackState, PlaybackState};
use segplay_common::PlaybackEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Snapshot of session counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverStats {
    pub state: PlaybackState,
    pub position: Duration,
    pub callback: CallbackStats,
    pub fill: FillStats,
    pub ring: RingStats,
}

/// Control-plane bookkeeping, guarded by the control mutex
#[derive(Debug, Default)]
struct ControlState {
    play_requested: bool,
    scrubbing: bool,
    scrub_position: Option<Duration>,
}

/// Everything the render thread touches
struct RenderShared {
    format: PcmFormat,
    reader: Mutex<SegmentReader>,
    fill: FillObserver,
    gain: GainTable,
    monitor: Arc<CallbackMonitor>,
    listener: Arc<dyn PlaybackListener>,
    state: AtomicPlaybackState,

    /// Control plane allows reading from the ring buffer
    sending: AtomicBool,
    /// Next sending callback is the first after a (re)start
    restarted: AtomicBool,
    /// Render returned `Idle`; the engine needs `start()` again
    engine_idle: AtomicBool,
    scrubbing: AtomicBool,
    preview_frames_remaining: AtomicU64,
    /// Shared with the fill thread's error callback
    position_frames: Arc<AtomicU64>,
    max_frames_per_callback: usize,

    activation: Mutex<()>,
    activated: Condvar,
}

impl RenderShared {
    fn position(&self) -> Duration {
        self.format
            .frames_to_duration(self.position_frames.load(Ordering::Acquire))
    }

    /// Move to `next`, notifying the listener of real changes
    fn transition(&self, next: PlaybackState) {
        let previous = self.state.transition(next);
        if previous != next && previous != PlaybackState::Error {
            debug!("Playback state: {} -> {}", previous, next);
            self.listener.on_event(PlaybackEvent::StateChanged {
                from: previous.into(),
                to: next.into(),
            });
        }
    }

    /// Enter the absorbing `Error` state
    fn fail(&self, reason: &str) {
        self.sending.store(false, Ordering::Release);
        let previous = self.state.transition(PlaybackState::Error);
        if previous == PlaybackState::Error {
            return;
        }

        error!("Playback session failed in state {}: {}", previous, reason);
        self.listener.on_event(PlaybackEvent::StateChanged {
            from: previous.into(),
            to: PlaybackState::Error.into(),
        });
        self.listener.on_event(PlaybackEvent::SessionFailed);

        let _guard = self.activation.lock().unwrap_or_else(|e| e.into_inner());
        self.activated.notify_all();
    }

    fn on_activated(&self) {
        let _guard = self.activation.lock().unwrap_or_else(|e| e.into_inner());
        if self
            .state
            .compare_transition(PlaybackState::Initializing, PlaybackState::Initialized)
        {
            info!("Output engine activated: {}", self.format);
            self.listener.on_event(PlaybackEvent::StateChanged {
                from: PlaybackState::Initializing.into(),
                to: PlaybackState::Initialized.into(),
            });
        }
        self.activated.notify_all();
    }
}

impl Renderer for RenderShared {
    fn render(&self, target: &mut RenderTarget<'_>) -> RenderStatus {
        self.monitor.record_callback();

        if !self.sending.load(Ordering::Acquire) {
            target.buffer.fill(0);
            self.monitor.record_silence();
            return RenderStatus::Continue;
        }

        let mut reader = match self.reader.try_lock() {
            Ok(reader) => reader,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                target.buffer.fill(0);
                self.monitor.record_silence();
                return RenderStatus::Continue;
            }
        };

        // A reposition clears `sending` before taking the reader, so a render
        // that wins the lock afterwards must not read the refilled ring
        if !self.sending.load(Ordering::Acquire) {
            drop(reader);
            target.buffer.fill(0);
            self.monitor.record_silence();
            return RenderStatus::Continue;
        }

        // Loaded before reading so a short read with either flag set is expected
        let reached_end = self.fill.did_reach_end();
        let upstream_failed = self.fill.did_fail();
        let first_after_start = self.restarted.swap(false, Ordering::AcqRel);
        let scrubbing = self.scrubbing.load(Ordering::Acquire);

        let bytes_per_frame = self.format.bytes_per_frame();
        let frames_available = target.buffer.len() / bytes_per_frame;
        let frame_cap = if scrubbing {
            self.preview_frames_remaining.load(Ordering::Acquire) as usize
        } else {
            self.max_frames_per_callback
        };
        let wanted = frames_available.min(frame_cap) * bytes_per_frame;

        let mut copied = 0;
        while copied < wanted {
            let region = reader.request_read();
            if region.is_empty() {
                break;
            }
            let n = region.len().min(wanted - copied);
            self.gain.copy_with_gain(
                &region.as_slice()[..n],
                &mut target.buffer[copied..copied + n],
                &self.format,
            );
            region.commit(n);
            copied += n;
        }

        // Accounted while the reader is held so a reposition's counter reset
        // lands strictly before or after this render's frames
        let frames = (copied / bytes_per_frame) as u64;
        if scrubbing {
            let _ = self.preview_frames_remaining.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |remaining| Some(remaining.saturating_sub(frames)),
            );
        }
        let total = self.position_frames.fetch_add(frames, Ordering::AcqRel) + frames;
        drop(reader);
        target.buffer[copied..].fill(0);

        if copied < wanted && !reached_end && !upstream_failed {
            if first_after_start || target.padding_frames > 0 {
                self.monitor.record_transient_short_read();
            } else {
                self.monitor.record_glitch();
            }
        }

        if scrubbing {
            return RenderStatus::Continue;
        }

        if reached_end && wanted > 0 && copied == 0 && self.sending.swap(false, Ordering::AcqRel) {
            self.engine_idle.store(true, Ordering::Release);
            self.listener.on_event(PlaybackEvent::EndOfData {
                position: self.position(),
            });
            return RenderStatus::Idle;
        }

        if frames > 0 {
            self.listener.on_event(PlaybackEvent::PositionUpdated {
                position: self.format.frames_to_duration(total),
            });
        }

        RenderStatus::Continue
    }
}

/// One playback session
///
/// Control methods take `&self` and serialize on an internal mutex. Once the
/// session enters `Error` every control method returns
/// [`Error::SessionFailed`] without side effects.
pub struct PlaybackDriver {
    shared: Arc<RenderShared>,
    engine: Mutex<Box<dyn OutputEngine>>,
    fill: BufferFillThread,
    ring: RingObserver,
    control: Mutex<ControlState>,
    monitor_thread: MonitorHandle,
    config: PlaybackConfig,
}

impl PlaybackDriver {
    /// Create a session and begin engine activation
    ///
    /// The fill thread starts pre-buffering immediately. Activation completes
    /// asynchronously; an engine that fails to activate leaves the session in
    /// `Error` rather than failing construction.
    pub fn new(
        config: PlaybackConfig,
        pipeline: Box<dyn AudioPipeline>,
        mut engine: Box<dyn OutputEngine>,
        listener: Arc<dyn PlaybackListener>,
    ) -> Result<Self> {
        let format = pipeline.format();
        if format.bytes_per_frame() == 0 || format.sample_rate == 0 {
            return Err(Error::Config(format!("Unusable PCM format: {}", format)));
        }

        let layout = config.ring_layout(&format);
        let (writer, reader) =
            SegmentedRingBuffer::new(layout.capacity_bytes, layout.segment_count).split();
        let ring = reader.observer();

        let position_frames = Arc::new(AtomicU64::new(0));
        let on_error: FillErrorCallback = {
            let listener = Arc::clone(&listener);
            let position_frames = Arc::clone(&position_frames);
            Arc::new(move |e: &PipelineError| {
                let position = format.frames_to_duration(position_frames.load(Ordering::Acquire));
                error!("Upstream pipeline failure at {:?}: {}", position, e);
                listener.on_event(PlaybackEvent::UpstreamFailed { position });
            })
        };
        let fill = BufferFillThread::new(writer, pipeline, config.fill_settings(), on_error)?;

        let monitor = Arc::new(CallbackMonitor::new());
        let monitor_thread = monitor.spawn_monitoring_thread()?;

        let shared = Arc::new(RenderShared {
            format,
            reader: Mutex::new(reader),
            fill: fill.observer(),
            gain: GainTable::new(config.gain),
            monitor,
            listener,
            state: AtomicPlaybackState::new(PlaybackState::Initializing),
            sending: AtomicBool::new(false),
            restarted: AtomicBool::new(true),
            engine_idle: AtomicBool::new(false),
            scrubbing: AtomicBool::new(false),
            preview_frames_remaining: AtomicU64::new(0),
            position_frames,
            max_frames_per_callback: config.max_frames_per_callback.max(1),
            activation: Mutex::new(()),
            activated: Condvar::new(),
        });

        fill.start()?;

        let activation_target = Arc::clone(&shared);
        let on_activated = Box::new(move |result: std::result::Result<(), String>| match result {
            Ok(()) => activation_target.on_activated(),
            Err(reason) => activation_target.fail(&format!("activation failed: {}", reason)),
        });
        let renderer: Arc<dyn Renderer> = Arc::clone(&shared) as Arc<dyn Renderer>;
        if let Err(e) = engine.activate(format, renderer, on_activated) {
            shared.fail(&e.to_string());
        }

        info!(
            "Playback driver created: {}, ring {} bytes in {} segments",
            format, layout.capacity_bytes, layout.segment_count
        );

        Ok(Self {
            shared,
            engine: Mutex::new(engine),
            fill,
            ring,
            control: Mutex::new(ControlState::default()),
            monitor_thread,
            config,
        })
    }

    /// Start or resume sending audio
    pub fn play(&self) -> Result<()> {
        let mut control = self.ready()?;
        control.play_requested = true;
        self.start_sending();
        self.ensure_playing()?;
        info!("Playback started at {:?}", self.position());
        Ok(())
    }

    /// Stop sending audio; the engine keeps running and renders silence
    pub fn pause(&self) -> Result<()> {
        let mut control = self.ready()?;
        control.play_requested = false;
        self.shared.sending.store(false, Ordering::Release);
        info!("Playback paused at {:?}", self.position());
        Ok(())
    }

    /// Reposition playback to `position`
    ///
    /// While scrubbing only a short preview window is sent afterwards.
    pub fn seek(&self, position: Duration) -> Result<()> {
        let mut control = self.ready()?;

        self.reposition(position)?;

        if control.scrubbing {
            control.scrub_position = Some(position);
            let preview = self.shared.format.duration_to_frames(self.config.preview_window);
            self.shared
                .preview_frames_remaining
                .store(preview, Ordering::Release);
            self.start_sending();
            self.ensure_playing()?;
        } else if control.play_requested {
            self.start_sending();
            self.ensure_playing()?;
        }

        debug!("Seeked to {:?}", position);
        Ok(())
    }

    /// Enter scrubbing mode
    pub fn start_seek(&self) -> Result<()> {
        let mut control = self.ready()?;
        control.scrubbing = true;
        control.scrub_position = None;
        self.shared
            .preview_frames_remaining
            .store(0, Ordering::Release);
        self.shared.scrubbing.store(true, Ordering::Release);
        self.ensure_playing()?;
        debug!("Scrubbing started");
        Ok(())
    }

    /// Leave scrubbing mode at the last scrub position
    pub fn finish_seek(&self) -> Result<()> {
        let mut control = self.ready()?;
        if !control.scrubbing {
            debug!("finish_seek without start_seek ignored");
            return Ok(());
        }

        control.scrubbing = false;
        self.shared.scrubbing.store(false, Ordering::Release);
        let target = control
            .scrub_position
            .take()
            .unwrap_or_else(|| self.position());

        self.flush_to(target)?;

        if control.play_requested {
            self.start_sending();
            self.ensure_playing()?;
        }
        debug!("Scrubbing finished at {:?}", target);
        Ok(())
    }

    /// Flush all buffered audio and return to `Initialized`
    ///
    /// Playback resumes from the current position on the next `play()`.
    pub fn reset(&self) -> Result<()> {
        let mut control = self.ready()?;
        control.play_requested = false;
        control.scrubbing = false;
        control.scrub_position = None;
        self.shared.scrubbing.store(false, Ordering::Release);

        self.flush_to(self.position())?;
        info!("Playback reset at {:?}", self.position());
        Ok(())
    }

    /// Apply one gain to every channel
    pub fn set_gain(&self, gain: f32) -> Result<()> {
        self.ensure_not_failed()?;
        validate_gain(gain)?;
        self.shared.gain.set_scalar(gain);
        debug!("Gain set to {:.3}", gain);
        Ok(())
    }

    /// Apply per-channel gains; channel `c` uses `gains[c % gains.len()]`
    pub fn set_channel_gains(&self, gains: &[f32]) -> Result<()> {
        self.ensure_not_failed()?;
        for &gain in gains {
            validate_gain(gain)?;
        }
        if gains.len() > MAX_GAIN_CHANNELS {
            warn!(
                "{} channel gains given, only the first {} are used",
                gains.len(),
                MAX_GAIN_CHANNELS
            );
        }
        self.shared.gain.set_channels(gains);
        debug!("Channel gains set: {:?}", self.shared.gain.snapshot());
        Ok(())
    }

    /// Position of the last rendered frame
    pub fn position(&self) -> Duration {
        self.shared.position()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.load()
    }

    pub fn format(&self) -> PcmFormat {
        self.shared.format
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            state: self.state(),
            position: self.position(),
            callback: self.shared.monitor.stats(),
            fill: self.fill.stats(),
            ring: self.ring.stats(),
        }
    }

    /// Stop the engine and the worker threads
    ///
    /// Safe to call more than once; also performed on drop.
    pub fn shutdown(&self) {
        self.shared.sending.store(false, Ordering::Release);
        if self.shared.state.load() != PlaybackState::Error {
            let mut engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = engine.stop() {
                warn!("Failed to stop output engine: {}", e);
            }
        }
        self.fill.shutdown();
        self.monitor_thread.stop();
    }

    fn ensure_not_failed(&self) -> Result<()> {
        if self.shared.state.load() == PlaybackState::Error {
            return Err(Error::SessionFailed);
        }
        Ok(())
    }

    /// Fail fast in `Error`, wait for activation, then take the control lock
    fn ready(&self) -> Result<MutexGuard<'_, ControlState>> {
        self.ensure_not_failed()?;
        self.wait_for_activation()?;
        Ok(self.control.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn wait_for_activation(&self) -> Result<()> {
        let guard = self
            .shared
            .activation
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let _guard = self
            .shared
            .activated
            .wait_timeout_while(guard, self.config.activation_timeout, |_| {
                self.shared.state.load() == PlaybackState::Initializing
            })
            .unwrap_or_else(|e| e.into_inner());

        match self.shared.state.load() {
            PlaybackState::Error => Err(Error::SessionFailed),
            PlaybackState::Initializing => {
                warn!(
                    "Output engine not activated after {:?}",
                    self.config.activation_timeout
                );
                Err(Error::ActivationTimeout(
                    self.config.activation_timeout.as_millis() as u64,
                ))
            }
            _ => Ok(()),
        }
    }

    fn start_sending(&self) {
        self.shared.restarted.store(true, Ordering::Release);
        self.shared.sending.store(true, Ordering::Release);
    }

    /// Get the engine scheduling callbacks and enter `Playing`
    fn ensure_playing(&self) -> Result<()> {
        let idle = self.shared.engine_idle.swap(false, Ordering::AcqRel);
        if self.shared.state.load() == PlaybackState::Playing && !idle {
            return Ok(());
        }

        self.shared.transition(PlaybackState::Starting);
        let started = self
            .engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .start();
        if let Err(e) = started {
            self.shared.fail(&format!("engine start failed: {}", e));
            return Err(e);
        }
        self.shared.transition(PlaybackState::Playing);
        Ok(())
    }

    /// Stop sending, quiesce the render path and refill from `position`
    fn reposition(&self, position: Duration) -> Result<()> {
        self.shared.sending.store(false, Ordering::Release);

        // An in-flight render holds the reader; wait it out here
        let mut reader = self
            .shared
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        self.fill.pause();
        let result = self.fill.reposition(&mut reader, position);
        self.shared.position_frames.store(
            self.shared.format.duration_to_frames(position),
            Ordering::Release,
        );
        self.fill.resume();
        result
    }

    /// `Resetting`: stop and flush the engine, refill from `position`, back to `Initialized`
    fn flush_to(&self, position: Duration) -> Result<()> {
        self.shared.sending.store(false, Ordering::Release);
        self.shared.transition(PlaybackState::Resetting);

        {
            let mut engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = engine.stop().and_then(|()| engine.flush()) {
                self.shared.fail(&format!("engine flush failed: {}", e));
                return Err(e);
            }
        }
        self.shared.engine_idle.store(false, Ordering::Release);

        self.reposition(position)?;
        self.shared.transition(PlaybackState::Initialized);
        Ok(())
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn validate_gain(gain: f32) -> Result<()> {
    if !gain.is_finite() || gain < 0.0 {
        return Err(Error::Playback(format!("Invalid gain {}", gain)));
    }
    Ok(())
}
