//! Buffer fill thread
//!
//! Dedicated std thread that keeps the ring buffer as full as possible by
//! pulling PCM from the upstream [`AudioPipeline`] straight into write regions.
//!
//! **Threading:**
//! - Control (`start`/`pause`/`resume`/`shutdown`) happens on the owner's
//!   thread through a `Mutex` + `Condvar` pair.
//! - The writer half and the pipeline live together in a worker mutex held
//!   for exactly one fill step, so `pause()` returning means the thread is
//!   outside its fill step.
//! - The render callback only ever reads the lock-free [`FillObserver`].

use crate::audio::PcmFormat;
use crate::error::{Error, Result};
use crate::playback::pipeline::{AudioPipeline, PipelineError, Pulled};
use crate::playback::segmented_ring::{SegmentReader, SegmentWriter, SegmentedRingBuffer};
use crate::playback::state::FillThreadState;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Callback invoked on the fill thread when the pipeline fails
pub type FillErrorCallback = Arc<dyn Fn(&PipelineError) + Send + Sync>;

/// Fill loop tuning
#[derive(Debug, Clone, Copy)]
pub struct FillSettings {
    /// Maximum frames pulled per fill step
    pub chunk_frames: usize,

    /// Sleep when the ring buffer is full or the pipeline has nothing yet
    pub backoff: Duration,
}

impl Default for FillSettings {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            backoff: Duration::from_millis(2),
        }
    }
}

/// Fill thread counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillStats {
    pub bytes_written: u64,
    pub pulls: u64,
    pub backoffs: u64,
}

struct Worker {
    writer: SegmentWriter,
    pipeline: Box<dyn AudioPipeline>,
}

/// Outcome of a single fill step
enum Step {
    Filled,
    Backoff,
    Skipped,
    EndOfData,
    Failed(PipelineError),
}

struct Shared {
    /// Requested state; the condvar is signalled on every change
    control: Mutex<FillThreadState>,
    wake: Condvar,

    /// Lock-free mirror of `control`
    state: AtomicU8,

    worker: Mutex<Worker>,
    reached_end: AtomicBool,
    error_latched: AtomicBool,

    bytes_written: AtomicU64,
    pulls: AtomicU64,
    backoffs: AtomicU64,

    format: PcmFormat,
    settings: FillSettings,
    on_error: FillErrorCallback,
}

impl Shared {
    fn lock_control(&self) -> MutexGuard<'_, FillThreadState> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_worker(&self) -> MutexGuard<'_, Worker> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, control: &mut FillThreadState, next: FillThreadState) {
        *control = next;
        self.state.store(next as u8, Ordering::Release);
        self.wake.notify_all();
    }

    fn current_state(&self) -> FillThreadState {
        FillThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Nothing to do until an explicit resume or reposition
    fn is_idle(&self) -> bool {
        self.reached_end.load(Ordering::Acquire) || self.error_latched.load(Ordering::Acquire)
    }
}

/// Lock-free view of fill progress for the render callback
#[derive(Clone)]
pub struct FillObserver {
    shared: Arc<Shared>,
}

impl FillObserver {
    /// True once the pipeline reported end-of-data after its final bytes were committed
    pub fn did_reach_end(&self) -> bool {
        self.shared.reached_end.load(Ordering::Acquire)
    }

    /// True while a pipeline failure is latched and nothing is being pulled
    pub fn did_fail(&self) -> bool {
        self.shared.error_latched.load(Ordering::Acquire)
    }

    pub fn state(&self) -> FillThreadState {
        self.shared.current_state()
    }
}

/// Owner handle of the fill thread
pub struct BufferFillThread {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BufferFillThread {
    /// Create the fill thread in the `Created` state; nothing runs until [`start`](Self::start)
    ///
    /// Every segment must hold a whole number of frames in the pipeline's
    /// format, otherwise the writer could never be handed a full frame at a
    /// segment tail.
    pub fn new(
        writer: SegmentWriter,
        pipeline: Box<dyn AudioPipeline>,
        settings: FillSettings,
        on_error: FillErrorCallback,
    ) -> Result<Self> {
        let format = pipeline.format();
        let bytes_per_frame = format.bytes_per_frame();
        if bytes_per_frame == 0 {
            return Err(Error::Config(format!("Unusable PCM format: {}", format)));
        }
        if writer.segment_size() % bytes_per_frame != 0
            || writer.capacity() % bytes_per_frame != 0
        {
            return Err(Error::Config(format!(
                "Ring buffer of {} bytes in {}-byte segments does not hold whole {}-byte frames",
                writer.capacity(),
                writer.segment_size(),
                bytes_per_frame
            )));
        }

        let settings = FillSettings {
            chunk_frames: settings.chunk_frames.max(1),
            ..settings
        };

        Ok(Self {
            shared: Arc::new(Shared {
                control: Mutex::new(FillThreadState::Created),
                wake: Condvar::new(),
                state: AtomicU8::new(FillThreadState::Created as u8),
                worker: Mutex::new(Worker { writer, pipeline }),
                reached_end: AtomicBool::new(false),
                error_latched: AtomicBool::new(false),
                bytes_written: AtomicU64::new(0),
                pulls: AtomicU64::new(0),
                backoffs: AtomicU64::new(0),
                format,
                settings,
                on_error,
            }),
            thread: Mutex::new(None),
        })
    }

    /// Spawn the thread if needed and enter `Running`
    pub fn start(&self) -> Result<()> {
        let mut control = self.shared.lock_control();
        if *control == FillThreadState::ShuttingDown {
            return Err(Error::InvalidState("fill thread is shut down".to_string()));
        }

        let mut thread = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        if thread.is_none() {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name("segplay-fill".to_string())
                .spawn(move || worker_loop(shared))?;
            *thread = Some(handle);
            info!(
                "Buffer fill thread started: {}, chunk={} frames",
                self.shared.format, self.shared.settings.chunk_frames
            );
        }

        self.shared.set_state(&mut control, FillThreadState::Running);
        Ok(())
    }

    /// Stop pulling; returns once the thread is outside its fill step
    pub fn pause(&self) {
        {
            let mut control = self.shared.lock_control();
            if *control != FillThreadState::Running {
                return;
            }
            self.shared.set_state(&mut control, FillThreadState::Paused);
        }

        // Waits out an in-flight step; later steps observe Paused and skip.
        drop(self.shared.lock_worker());
        debug!("Buffer fill thread paused");
    }

    /// Resume pulling after `pause()`, clearing a latched pipeline error
    pub fn resume(&self) {
        let mut control = self.shared.lock_control();
        if *control != FillThreadState::Paused {
            return;
        }
        self.shared.error_latched.store(false, Ordering::Release);
        self.shared.set_state(&mut control, FillThreadState::Running);
        debug!("Buffer fill thread resumed");
    }

    /// Reset the ring buffer and seek the pipeline to `position`
    ///
    /// The thread must be paused. Clears the end-of-data and error latches.
    pub fn reposition(&self, reader: &mut SegmentReader, position: Duration) -> Result<()> {
        let state = self.shared.current_state();
        if !matches!(state, FillThreadState::Paused | FillThreadState::Created) {
            return Err(Error::InvalidState(format!(
                "fill thread must be paused to reposition (state: {:?})",
                state
            )));
        }

        let mut worker = self.shared.lock_worker();
        SegmentedRingBuffer::reset(&mut worker.writer, reader);
        worker
            .pipeline
            .seek(position)
            .map_err(|e| Error::Decode(e.to_string()))?;
        self.shared.reached_end.store(false, Ordering::Release);
        self.shared.error_latched.store(false, Ordering::Release);

        debug!("Buffer fill thread repositioned to {:?}", position);
        Ok(())
    }

    /// Enter `ShuttingDown`, wake the thread and join it
    pub fn shutdown(&self) {
        {
            let mut control = self.shared.lock_control();
            if *control == FillThreadState::ShuttingDown {
                return;
            }
            self.shared.set_state(&mut control, FillThreadState::ShuttingDown);
        }

        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            match handle.join() {
                Ok(()) => debug!("Buffer fill thread joined"),
                Err(e) => error!("Buffer fill thread panicked: {:?}", e),
            }
        }
        info!("Buffer fill thread shut down");
    }

    pub fn state(&self) -> FillThreadState {
        self.shared.current_state()
    }

    pub fn did_reach_end(&self) -> bool {
        self.shared.reached_end.load(Ordering::Acquire)
    }

    pub fn did_fail(&self) -> bool {
        self.shared.error_latched.load(Ordering::Acquire)
    }

    /// Lock-free observer for the render callback
    pub fn observer(&self) -> FillObserver {
        FillObserver {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> FillStats {
        FillStats {
            bytes_written: self.shared.bytes_written.load(Ordering::Relaxed),
            pulls: self.shared.pulls.load(Ordering::Relaxed),
            backoffs: self.shared.backoffs.load(Ordering::Relaxed),
        }
    }
}

impl Drop for BufferFillThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    debug!("Buffer fill worker started");

    loop {
        {
            let mut control = shared.lock_control();
            loop {
                match *control {
                    FillThreadState::ShuttingDown => {
                        debug!("Buffer fill worker received shutdown signal");
                        return;
                    }
                    FillThreadState::Running if !shared.is_idle() => break,
                    _ => {
                        control = shared.wake.wait(control).unwrap_or_else(|e| e.into_inner());
                    }
                }
            }
        }

        let step = {
            let mut worker = shared.lock_worker();
            fill_step(&shared, &mut worker)
        };

        match step {
            Step::Filled | Step::Skipped => {}
            Step::Backoff => {
                shared.backoffs.fetch_add(1, Ordering::Relaxed);
                let control = shared.lock_control();
                if *control == FillThreadState::Running {
                    let _ = shared
                        .wake
                        .wait_timeout(control, shared.settings.backoff)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
            Step::EndOfData => {
                info!(
                    "Pipeline reached end of data after {} bytes",
                    shared.bytes_written.load(Ordering::Relaxed)
                );
            }
            Step::Failed(e) => {
                warn!("Pipeline failed, fill thread idling: {}", e);
                (shared.on_error)(&e);
            }
        }
    }
}

/// Pull one chunk into the next write region
///
/// Runs with the worker locked. The end-of-data and error latches are set
/// here so a `reposition()` waiting on the worker always clears them after
/// this step, never before.
fn fill_step(shared: &Shared, worker: &mut Worker) -> Step {
    // pause() may have landed between the control check and taking the worker
    if shared.current_state() != FillThreadState::Running {
        return Step::Skipped;
    }

    let bytes_per_frame = shared.format.bytes_per_frame();
    let chunk_bytes = shared.settings.chunk_frames * bytes_per_frame;
    let Worker { writer, pipeline } = worker;

    let mut region = writer.request_write(bytes_per_frame);
    let len = region.len().min(chunk_bytes) / bytes_per_frame * bytes_per_frame;
    if len == 0 {
        return Step::Backoff;
    }

    shared.pulls.fetch_add(1, Ordering::Relaxed);
    match pipeline.fill(&mut region.as_mut_slice()[..len]) {
        Ok(Pulled::Frames(0)) => Step::Backoff,
        Ok(Pulled::Frames(frames)) => {
            let bytes = (frames * bytes_per_frame).min(len);
            let offset = region.offset();
            region.commit(bytes);
            shared.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
            trace!(offset, bytes, "Filled ring buffer chunk");
            Step::Filled
        }
        Ok(Pulled::EndOfData) => {
            shared.reached_end.store(true, Ordering::Release);
            Step::EndOfData
        }
        // Already latched: reported once, stay quiet until cleared
        Err(_) if shared.error_latched.swap(true, Ordering::AcqRel) => Step::Skipped,
        Err(e) => Step::Failed(e),
    }
}
