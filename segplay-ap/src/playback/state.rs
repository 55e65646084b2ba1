//! Playback and fill-thread state machines
//!
//! Both states are stored as `u8` in atomics so the render callback can
//! observe them without locking.

use segplay_common::events::StateName;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Driver playback state
///
/// `Initializing → Initialized → Starting → Playing → Resetting → Initialized`,
/// with `Error` absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PlaybackState {
    Initializing = 0,
    Initialized = 1,
    Starting = 2,
    Playing = 3,
    Resetting = 4,
    Error = 5,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PlaybackState::Initializing,
            1 => PlaybackState::Initialized,
            2 => PlaybackState::Starting,
            3 => PlaybackState::Playing,
            4 => PlaybackState::Resetting,
            _ => PlaybackState::Error,
        }
    }

    /// True once the engine has reported activation and no failure occurred
    pub fn is_activated(self) -> bool {
        !matches!(self, PlaybackState::Initializing | PlaybackState::Error)
    }
}

impl From<PlaybackState> for StateName {
    fn from(state: PlaybackState) -> Self {
        match state {
            PlaybackState::Initializing => StateName::Initializing,
            PlaybackState::Initialized => StateName::Initialized,
            PlaybackState::Starting => StateName::Starting,
            PlaybackState::Playing => StateName::Playing,
            PlaybackState::Resetting => StateName::Resetting,
            PlaybackState::Error => StateName::Error,
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", StateName::from(*self))
    }
}

/// Lock-free cell holding a [`PlaybackState`]
#[derive(Debug)]
pub struct AtomicPlaybackState(AtomicU8);

impl AtomicPlaybackState {
    pub fn new(state: PlaybackState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> PlaybackState {
        PlaybackState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store `next` unless the current state is `Error`; returns the previous state
    pub fn transition(&self, next: PlaybackState) -> PlaybackState {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == PlaybackState::Error as u8 {
                return PlaybackState::Error;
            }
            match self.0.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return PlaybackState::from_u8(previous),
                Err(actual) => current = actual,
            }
        }
    }

    /// Move from `expected` to `next`; false if the state was something else
    pub fn compare_transition(&self, expected: PlaybackState, next: PlaybackState) -> bool {
        if expected == PlaybackState::Error {
            return false;
        }
        self.0
            .compare_exchange(expected as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Buffer fill thread state
///
/// `Created → Running ⇄ Paused → ShuttingDown` (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FillThreadState {
    Created = 0,
    Running = 1,
    Paused = 2,
    ShuttingDown = 3,
}

impl FillThreadState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => FillThreadState::Created,
            1 => FillThreadState::Running,
            2 => FillThreadState::Paused,
            _ => FillThreadState::ShuttingDown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_returns_previous() {
        let state = AtomicPlaybackState::new(PlaybackState::Initializing);
        assert_eq!(state.transition(PlaybackState::Initialized), PlaybackState::Initializing);
        assert_eq!(state.load(), PlaybackState::Initialized);
    }

    #[test]
    fn test_error_is_absorbing() {
        let state = AtomicPlaybackState::new(PlaybackState::Playing);
        state.transition(PlaybackState::Error);
        assert_eq!(state.transition(PlaybackState::Initialized), PlaybackState::Error);
        assert!(!state.compare_transition(PlaybackState::Error, PlaybackState::Playing));
        assert_eq!(state.load(), PlaybackState::Error);
    }

    #[test]
    fn test_compare_transition() {
        let state = AtomicPlaybackState::new(PlaybackState::Starting);
        assert!(!state.compare_transition(PlaybackState::Initialized, PlaybackState::Playing));
        assert!(state.compare_transition(PlaybackState::Starting, PlaybackState::Playing));
        assert_eq!(state.load(), PlaybackState::Playing);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(StateName::from(PlaybackState::Resetting), StateName::Resetting);
        assert!(PlaybackState::Starting.is_activated());
        assert!(!PlaybackState::Initializing.is_activated());
    }
}
