//! # segplay common library
//!
//! Shared code for the segplay crates:
//! - Error type
//! - TOML bootstrap configuration and config-file resolution
//! - Playback event types delivered to listeners
//! - Frame/time conversions

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use config::TomlConfig;
pub use error::{Error, Result};
pub use events::{PlaybackEvent, StateName};
