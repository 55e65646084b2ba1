//! Error types for segplay-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

use crate::media::PacketSourceError;

/// Main error type for segplay-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Playback engine errors
    #[error("Playback error: {0}")]
    Playback(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The playback session hit an unrecoverable failure; recreate it
    #[error("Playback session failed")]
    SessionFailed,

    /// Output activation did not complete in time
    #[error("Output activation timed out after {0} ms")]
    ActivationTimeout(u64),

    /// Packet source errors
    #[error("Packet source error: {0}")]
    PacketSource(#[from] PacketSourceError),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the common crate (config loading)
    #[error(transparent)]
    Common(#[from] segplay_common::Error),
}

/// Convenience Result type using segplay-ap Error
pub type Result<T> = std::result::Result<T, Error>;
