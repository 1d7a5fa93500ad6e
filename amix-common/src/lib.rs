//! # AMIX Common Library
//!
//! Shared code for the AMIX mixing engine and its tools:
//! - Error types
//! - Audio format vocabulary (`AudioType`, `Channels`)
//! - Mix buffer timing parameters
//! - TOML configuration loading
//! - Millisecond/sample conversions

pub mod config;
pub mod error;
pub mod params;
pub mod timing;
pub mod types;

pub use error::{Error, Result};
pub use params::{MixParams, MixThresholds};
pub use types::{AudioType, Channels};
