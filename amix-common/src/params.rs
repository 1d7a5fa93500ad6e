//! Mix buffer timing parameters
//!
//! The mix buffer is sized and throttled in milliseconds so the same
//! configuration works at any sample rate. [`MixParams::thresholds`] turns the
//! millisecond values into sample counts for one session.
//!
//! ```text
//!   rd_ptr                                   wr_ptr
//!     |<-- reserve -->|                        |
//!     [================ buffer_ms ============================]
//!                      free space >= request_data  -> NEED_MORE
//!                      free space <  almost_full   -> OUTPUT_ALMOST_FULL
//! ```

use crate::timing::ms_to_samples;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Millisecond-valued tuning knobs for a mixing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixParams {
    /// Total mix buffer duration
    ///
    /// Default: 120 ms
    pub buffer_ms: u32,

    /// Silence placed between the read and write frontiers at init, and the
    /// minimum headroom a newly started decoder is given
    ///
    /// Default: 40 ms
    pub reserve_ms: u32,

    /// Free space at or above which a decoder is asked for more input
    ///
    /// Default: 60 ms
    pub request_data_ms: u32,

    /// Free space below which a decoder is told to back off
    ///
    /// Default: 5 ms
    pub almost_full_ms: u32,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            buffer_ms: 120,
            reserve_ms: 40,
            request_data_ms: 60,
            almost_full_ms: 5,
        }
    }
}

/// Sample-count thresholds derived from [`MixParams`] for one sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixThresholds {
    pub capacity: u32,
    pub reserve: u32,
    pub request_data: u32,
    pub almost_full: u32,
}

impl MixParams {
    /// Check the ordering constraints between the durations
    pub fn validate(&self) -> Result<()> {
        if self.buffer_ms == 0 {
            return Err(Error::Config("buffer_ms must be non-zero".to_string()));
        }
        if self.almost_full_ms == 0 || self.almost_full_ms >= self.request_data_ms {
            return Err(Error::Config(format!(
                "almost_full_ms ({}) must be non-zero and below request_data_ms ({})",
                self.almost_full_ms, self.request_data_ms
            )));
        }
        if self.request_data_ms >= self.buffer_ms {
            return Err(Error::Config(format!(
                "request_data_ms ({}) must be below buffer_ms ({})",
                self.request_data_ms, self.buffer_ms
            )));
        }
        if self.reserve_ms >= self.buffer_ms {
            return Err(Error::Config(format!(
                "reserve_ms ({}) must be below buffer_ms ({})",
                self.reserve_ms, self.buffer_ms
            )));
        }
        Ok(())
    }

    /// Convert to sample counts at `sample_rate`
    ///
    /// Fails if the parameters are inconsistent or if the rate is so low that
    /// a threshold rounds down to zero samples.
    pub fn thresholds(&self, sample_rate: u32) -> Result<MixThresholds> {
        self.validate()?;
        if sample_rate == 0 {
            return Err(Error::Config("sample rate must be non-zero".to_string()));
        }

        let thresholds = MixThresholds {
            capacity: ms_to_samples(self.buffer_ms, sample_rate),
            reserve: ms_to_samples(self.reserve_ms, sample_rate),
            request_data: ms_to_samples(self.request_data_ms, sample_rate),
            almost_full: ms_to_samples(self.almost_full_ms, sample_rate),
        };

        if thresholds.almost_full == 0 || thresholds.capacity < 2 {
            return Err(Error::Config(format!(
                "sample rate {} Hz is too low for the configured mix timings",
                sample_rate
            )));
        }

        Ok(thresholds)
    }
}
