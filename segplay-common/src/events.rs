//! Playback events
//!
//! Events emitted by the playback driver to its listener. Position and
//! end-of-data events are produced on the real-time render thread, so the
//! type is `Copy` and carries no heap data.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event delivered to a playback listener
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    /// Playback position advanced
    PositionUpdated {
        /// Current playback position
        position: Duration,
    },

    /// All buffered audio has been rendered and the upstream source is exhausted
    EndOfData {
        /// Position at which playback ran out of data
        position: Duration,
    },

    /// Playback state changed
    StateChanged {
        /// Previous state name
        from: StateName,
        /// New state name
        to: StateName,
    },

    /// The upstream pipeline failed; buffering stops until the next seek,
    /// reset or resume. The session itself stays usable.
    UpstreamFailed {
        /// Playback position when the failure was reported
        position: Duration,
    },

    /// The session failed and can no longer play
    SessionFailed,
}

/// Serializable mirror of the driver's playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateName {
    Initializing,
    Initialized,
    Starting,
    Playing,
    Resetting,
    Error,
}

impl std::fmt::Display for StateName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateName::Initializing => write!(f, "initializing"),
            StateName::Initialized => write!(f, "initialized"),
            StateName::Starting => write!(f, "starting"),
            StateName::Playing => write!(f, "playing"),
            StateName::Resetting => write!(f, "resetting"),
            StateName::Error => write!(f, "error"),
        }
    }
}
