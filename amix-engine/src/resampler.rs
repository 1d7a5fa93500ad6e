//! Sample rate conversion inside the decode path
//!
//! A decoder whose codec reports a rate different from the mix rate gets a
//! streaming resampler. Decoded blocks arrive in arbitrary sizes while the
//! rubato fixed-input resampler wants exact chunks, so input frames are
//! carried between calls until a full chunk is available.

use crate::error::{Error, Result};
use amix_common::Channels;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::debug;

/// Lowest and highest rates accepted on either side of a conversion
const MIN_RATE: u32 = 4_000;
const MAX_RATE: u32 = 192_000;

/// Streaming converter for interleaved i16 PCM
pub trait Resample: Send {
    /// Feed interleaved input; returns whatever output is ready
    fn process(&mut self, input: &[i16]) -> Result<Vec<i16>>;

    /// Convert whatever input is still carried, padding the last chunk
    ///
    /// Called once at end of stream; the output is trimmed to the length the
    /// carried input maps to.
    fn flush(&mut self) -> Result<Vec<i16>>;
}

/// Build the default resampler for `from` → `to`
///
/// Rates outside the supported range are rejected rather than coerced.
pub fn create_resampler(from: u32, to: u32, channels: Channels) -> Result<Box<dyn Resample>> {
    if !(MIN_RATE..=MAX_RATE).contains(&from) || !(MIN_RATE..=MAX_RATE).contains(&to) {
        return Err(Error::UnacceptableSampleRate { from, to });
    }
    Ok(Box::new(RubatoResampler::new(from, to, channels)?))
}

/// [`Resample`] backed by rubato's polynomial fixed-input resampler
pub struct RubatoResampler {
    inner: FastFixedIn<f32>,
    from: u32,
    to: u32,
    channels: usize,
    /// Planar input frames waiting for a full chunk
    carry: Vec<Vec<f32>>,
}

impl RubatoResampler {
    pub fn new(from: u32, to: u32, channels: Channels) -> Result<Self> {
        // 10 ms chunks keep the added latency small
        let chunk_size = (from / 100).max(16) as usize;
        let inner = FastFixedIn::<f32>::new(
            to as f64 / from as f64,
            1.0,
            PolynomialDegree::Septic,
            chunk_size,
            channels.count(),
        )
        .map_err(|_| Error::UnacceptableSampleRate { from, to })?;

        debug!(
            "Created resampler {}Hz -> {}Hz ({} channels, chunk {})",
            from,
            to,
            channels.count(),
            chunk_size
        );

        Ok(Self {
            inner,
            from,
            to,
            channels: channels.count(),
            carry: vec![Vec::with_capacity(chunk_size * 2); channels.count()],
        })
    }
}

impl Resample for RubatoResampler {
    fn process(&mut self, input: &[i16]) -> Result<Vec<i16>> {
        deinterleave_into(input, self.channels, &mut self.carry);

        let mut output = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.carry[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .carry
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let planar = self
                .inner
                .process(&chunk, None)
                .map_err(|e| Error::Resample(e.to_string()))?;
            interleave_into(&planar, &mut output);
        }
        Ok(output)
    }

    fn flush(&mut self) -> Result<Vec<i16>> {
        let carried = self.carry[0].len();
        if carried == 0 {
            return Ok(Vec::new());
        }
        let keep = (carried as u64 * self.to as u64 / self.from as u64) as usize;

        let mut planar = self
            .inner
            .process_partial(Some(self.carry.as_slice()), None)
            .map_err(|e| Error::Resample(e.to_string()))?;
        for channel in self.carry.iter_mut() {
            channel.clear();
        }
        for channel in planar.iter_mut() {
            channel.truncate(keep);
        }

        let mut output = Vec::new();
        interleave_into(&planar, &mut output);
        debug!("Resampler flushed {} carried frames into {}", carried, keep);
        Ok(output)
    }
}

/// Append interleaved i16 frames to planar f32 channels
fn deinterleave_into(samples: &[i16], channels: usize, planar: &mut [Vec<f32>]) {
    for frame in samples.chunks_exact(channels) {
        for (ch, &sample) in frame.iter().enumerate() {
            planar[ch].push(sample as f32 / 32768.0);
        }
    }
}

/// Append planar f32 channels to an interleaved i16 buffer, clamping
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<i16>) {
    let frames = planar.first().map_or(0, |ch| ch.len());
    out.reserve(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            let scaled = (channel[i] * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32);
            out.push(scaled as i16);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_stereo() {
        let mut planar = vec![Vec::new(), Vec::new()];
        deinterleave_into(&[16384, -16384, 0, 8192], 2, &mut planar);
        assert_eq!(planar[0], vec![0.5, 0.0]);
        assert_eq!(planar[1], vec![-0.5, 0.25]);
    }

    #[test]
    fn test_interleave_clamps() {
        let mut out = Vec::new();
        interleave_into(&[vec![2.0, -0.5], vec![-2.0, 0.5]], &mut out);
        assert_eq!(out, vec![i16::MAX, i16::MIN, -16384, 16384]);
    }

    #[test]
    fn test_out_of_range_rate_rejected() {
        let err = create_resampler(1_000, 16_000, Channels::Mono).err().unwrap();
        assert_eq!(err.code(), -3);
        let err = create_resampler(16_000, 400_000, Channels::Mono).err().unwrap();
        assert_eq!(err.code(), -3);
    }

    #[test]
    fn test_output_length_tracks_ratio() {
        let mut resampler = create_resampler(48_000, 16_000, Channels::Stereo).unwrap();

        // 100 ms of a 440 Hz tone, fed in uneven pieces
        let frames = 4_800;
        let mut input = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f32 / 48_000.0;
            let s = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8_000.0) as i16;
            input.push(s);
            input.push(s);
        }

        let mut output = Vec::new();
        for piece in input.chunks(2 * 333) {
            output.extend(resampler.process(piece).unwrap());
        }

        let out_frames = output.len() / 2;
        // everything but the final partial chunk has been converted
        assert!(out_frames >= 1_400 && out_frames <= 1_610, "got {} frames", out_frames);
    }

    #[test]
    fn test_small_input_is_carried() {
        let mut resampler = create_resampler(32_000, 16_000, Channels::Mono).unwrap();
        // chunk is 320 frames; 100 frames are not enough yet
        assert!(resampler.process(&[0; 100]).unwrap().is_empty());
        let out = resampler.process(&[0; 300]).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn test_flush_converts_the_carried_tail() {
        let mut resampler = create_resampler(48_000, 16_000, Channels::Mono).unwrap();
        // ten full 480-frame chunks plus 100 carried frames
        let input = vec![4_000i16; 4_900];

        let mut output = Vec::new();
        for piece in input.chunks(700) {
            output.extend(resampler.process(piece).unwrap());
        }
        assert!((1_590..=1_610).contains(&output.len()), "got {} frames", output.len());

        // 100 frames at a third of the rate
        let tail = resampler.flush().unwrap();
        assert_eq!(tail.len(), 33);
        output.extend(tail);
        assert!((1_623..=1_643).contains(&output.len()), "got {} frames", output.len());

        // nothing is left behind
        assert!(resampler.flush().unwrap().is_empty());
    }
}
