//! Common error types for AMIX

use thiserror::Error;

/// Common result type for AMIX operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the AMIX crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed TOML document
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization failure
    #[error("TOML write error: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    /// Invalid caller-supplied value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
