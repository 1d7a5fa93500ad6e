//! Error and status types for amix-engine
//!
//! Flow-control conditions (`NEED_MORE`, `OUTPUT_ALMOST_FULL`, ...) are not
//! errors: they are returned as [`AudioStatus`] values and drive the decode
//! request loop. Everything that aborts an operation is an [`Error`].
//! Both expose the numeric code reported to upper layers.

use std::fmt;
use thiserror::Error;

/// Non-fatal outcome of a decode or buffer query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioStatus {
    /// Steady state: neither starved nor nearly full
    Ok,
    /// Request accepted, result arrives later
    Pending,
    /// Plenty of room; the caller should keep feeding
    NeedMore,
    /// Input side cannot take more data right now
    InputAlmostFull,
    /// Mix buffer is nearly full at this decoder's cursor; back off
    OutputAlmostFull,
}

impl AudioStatus {
    pub fn code(self) -> i32 {
        match self {
            AudioStatus::Ok => 0,
            AudioStatus::Pending => 1,
            AudioStatus::NeedMore => 2,
            AudioStatus::InputAlmostFull => 3,
            AudioStatus::OutputAlmostFull => 4,
        }
    }
}

impl fmt::Display for AudioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioStatus::Ok => "OK",
            AudioStatus::Pending => "PENDING",
            AudioStatus::NeedMore => "NEED_MORE",
            AudioStatus::InputAlmostFull => "INPUT_ALMOST_FULL",
            AudioStatus::OutputAlmostFull => "OUTPUT_ALMOST_FULL",
        };
        f.write_str(name)
    }
}

/// Main error type for amix-engine
#[derive(Error, Debug)]
pub enum Error {
    /// Creation or allocation failure
    #[error("Operation failed: {0}")]
    Failed(String),

    /// The mixing session (or another singleton) is already initialized
    #[error("Already created: {0}")]
    AlreadyCreated(String),

    /// No resampler can bridge the decoder's rate to the mix rate
    #[error("Unacceptable sample rate: {from} Hz cannot be converted to {to} Hz")]
    UnacceptableSampleRate { from: u32, to: u32 },

    /// Operation not permitted in the current state (e.g. after destroy)
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// Codec reported a failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Resampler reported a failure
    #[error("Resample error: {0}")]
    Resample(String),

    /// Hardware binding errors, including duplicate bindings
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Unsupported format or parameter combination
    #[error("Configuration error: {0}")]
    Config(String),

    /// Handle does not name a live decoder, output or scene
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Errors bubbled up from amix-common
    #[error(transparent)]
    Common(#[from] amix_common::Error),
}

impl Error {
    /// Numeric code reported upward
    pub fn code(&self) -> i32 {
        match self {
            Error::AlreadyCreated(_) => -2,
            Error::UnacceptableSampleRate { .. } => -3,
            Error::NotAllowed(_) => -4,
            _ => -1,
        }
    }
}

/// Convenience Result type using amix-engine Error
pub type Result<T> = std::result::Result<T, Error>;
