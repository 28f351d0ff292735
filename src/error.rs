//! Winder protocol errors

use thiserror::Error;

/// Errors that can occur while talking to the winder firmware
#[derive(Error, Debug)]
pub enum WinderError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid revolution count reply: {reply:?}")]
    Parse { reply: String },

    #[error("Speed {0} rps does not fit in a single byte (0-255)")]
    SpeedOutOfRange(u32),

    #[error("Timed out waiting for reply")]
    Timeout,

    #[error("Connection already closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, WinderError>;
