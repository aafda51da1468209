//! Error types for cuedeck-player
//!
//! Variants follow the failure classes of the playback session: resolution,
//! playback, transport, transcoding, and synchronous validation.

use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug)]
pub enum Error {
    /// No playable source exists, or the platform is unsupported
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// A playback attempt could not be started or was lost
    #[error("Playback error: {0}")]
    Playback(String),

    /// Transport connect/reconnect failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// External transcoder failure
    #[error("Transcode error: {0}")]
    Transcode(String),

    /// Operation not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request argument
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Command sent to a session that has been destroyed
    #[error("Session closed")]
    SessionClosed,

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] cuedeck_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP fetch errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenience Result type using cuedeck-player Error
pub type Result<T> = std::result::Result<T, Error>;
