//! Playback core
//!
//! Segmented ring buffer, buffer fill thread, render callback monitor and the
//! playback driver that ties them to an output engine.

pub mod callback_monitor;
pub mod driver;
pub mod fill_thread;
pub mod pipeline;
pub mod render;
pub mod segmented_ring;
pub mod state;

pub use callback_monitor::{CallbackMonitor, CallbackStats};
pub use driver::{DriverStats, PlaybackDriver};
pub use fill_thread::{BufferFillThread, FillErrorCallback, FillObserver, FillSettings, FillStats};
pub use pipeline::{AudioPipeline, MemoryPipeline, PipelineError, Pulled};
pub use render::{
    ActivationCallback, OutputEngine, PlaybackListener, RenderStatus, RenderTarget, Renderer,
};
pub use segmented_ring::{
    ReadRegion, RingObserver, RingStats, SegmentReader, SegmentWriter, SegmentedRingBuffer,
    WriteRegion,
};
pub use state::{FillThreadState, PlaybackState};
