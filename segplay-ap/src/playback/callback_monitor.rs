//! Render callback monitor for glitch detection
//!
//! The render callback only bumps atomic counters here. A low-priority
//! monitoring thread polls the counters every 100ms and does all logging,
//! so the real-time thread never formats strings or touches a subscriber.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Monitoring thread poll interval
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Render callback counters
///
/// **REAL-TIME SAFE**: every `record_*` method is a single relaxed atomic add.
#[derive(Debug, Default)]
pub struct CallbackMonitor {
    callbacks: AtomicU64,
    glitches: AtomicU64,
    transient_short_reads: AtomicU64,
    silence_callbacks: AtomicU64,
}

impl CallbackMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Short read during steady playback
    pub fn record_glitch(&self) {
        self.glitches.fetch_add(1, Ordering::Relaxed);
    }

    /// Short read right after a (re)start or while the engine still had padding queued
    pub fn record_transient_short_read(&self) {
        self.transient_short_reads.fetch_add(1, Ordering::Relaxed);
    }

    /// Callback rendered silence because sending was disabled
    pub fn record_silence(&self) {
        self.silence_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CallbackStats {
        CallbackStats {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            glitches: self.glitches.load(Ordering::Relaxed),
            transient_short_reads: self.transient_short_reads.load(Ordering::Relaxed),
            silence_callbacks: self.silence_callbacks.load(Ordering::Relaxed),
        }
    }

    /// Spawn the thread that logs counter changes
    ///
    /// The returned handle stops and joins the thread on `stop()` or drop.
    pub fn spawn_monitoring_thread(self: &Arc<Self>) -> std::io::Result<MonitorHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let monitor = Arc::clone(self);

        let handle = thread::Builder::new()
            .name("segplay-monitor".to_string())
            .spawn(move || {
                let mut last = CallbackStats::default();
                debug!("CallbackMonitor: monitoring thread started");

                while !shutdown_flag.load(Ordering::Relaxed) {
                    thread::sleep(POLL_INTERVAL);
                    let stats = monitor.stats();

                    if stats.glitches > last.glitches {
                        warn!(
                            "Render callback glitch: {} total (+{} since last check), {} callbacks",
                            stats.glitches,
                            stats.glitches - last.glitches,
                            stats.callbacks
                        );
                    }

                    if stats.transient_short_reads > last.transient_short_reads {
                        trace!(
                            "Transient short reads: {} total",
                            stats.transient_short_reads
                        );
                    }

                    // Roughly every 30s at 10ms callbacks
                    if stats.callbacks / 3000 > last.callbacks / 3000 {
                        debug!(
                            "Render callback health: {} callbacks, {} glitches, {} silent",
                            stats.callbacks, stats.glitches, stats.silence_callbacks
                        );
                    }

                    last = stats;
                }

                info!("CallbackMonitor: monitoring thread stopped");
            })?;

        Ok(MonitorHandle {
            shutdown,
            thread: Mutex::new(Some(handle)),
        })
    }
}

/// Stops the monitoring thread
pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                error!("Monitoring thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Callback statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackStats {
    pub callbacks: u64,
    pub glitches: u64,
    pub transient_short_reads: u64,
    pub silence_callbacks: u64,
}
