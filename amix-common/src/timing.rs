//! Millisecond/sample conversions
//!
//! A *sample* here is one frame across all channels, so the conversions
//! depend only on the sample rate. Conversions truncate.

/// Convert a duration in milliseconds to a sample count at `sample_rate`
pub fn ms_to_samples(ms: u32, sample_rate: u32) -> u32 {
    ((sample_rate as u64 * ms as u64) / 1000) as u32
}

/// Convert a sample count at `sample_rate` back to whole milliseconds
///
/// Returns 0 for a zero sample rate instead of dividing by zero.
pub fn samples_to_ms(samples: u32, sample_rate: u32) -> u32 {
    if sample_rate == 0 {
        return 0;
    }
    ((samples as u64 * 1000) / sample_rate as u64) as u32
}
