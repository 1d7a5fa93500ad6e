//! Compressed-data sources for the playback scenes

use crate::error::{AudioStatus, Result};
use crate::mix::{DecodeInput, DecoderInstance, MixSession};
use amix_common::Channels;
use tracing::trace;

/// Bytes pulled from a source per decode call
pub const RAW_CHUNK_BYTES: usize = 128;

/// Pull-style byte source (file, flash region, generator)
pub trait RawDataSource: Send {
    /// Fill `buf` as far as possible; 0 means the source is exhausted
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// Source over an in-memory byte buffer
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Little-endian encoding of `samples`
    pub fn from_samples(samples: &[i16]) -> Self {
        Self::new(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

impl RawDataSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Sine tone rendered as little-endian i16 PCM
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    sample_rate: u32,
    channels: Channels,
    frequency: f32,
    amplitude: f32,
    remaining_frames: u64,
    frame: u64,
    /// Bytes of a frame that did not fit the last read
    spill: Vec<u8>,
}

impl ToneGenerator {
    pub fn new(sample_rate: u32, channels: Channels, frequency: u32, duration_ms: u32) -> Self {
        Self {
            sample_rate,
            channels,
            frequency: frequency as f32,
            amplitude: 8_000.0,
            remaining_frames: duration_ms as u64 * sample_rate as u64 / 1000,
            frame: 0,
            spill: Vec::new(),
        }
    }

    pub fn with_amplitude(mut self, amplitude: i16) -> Self {
        self.amplitude = amplitude as f32;
        self
    }

    fn next_frame(&mut self) -> Vec<u8> {
        let t = self.frame as f32 / self.sample_rate.max(1) as f32;
        let value = ((2.0 * std::f32::consts::PI * self.frequency * t).sin() * self.amplitude) as i16;
        self.frame += 1;
        self.remaining_frames -= 1;
        std::iter::repeat(value.to_le_bytes())
            .take(self.channels.count())
            .flatten()
            .collect()
    }
}

impl RawDataSource for ToneGenerator {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            if self.spill.is_empty() {
                if self.remaining_frames == 0 {
                    break;
                }
                self.spill = self.next_frame();
            }
            let take = self.spill.len().min(buf.len() - n);
            buf[n..n + take].copy_from_slice(&self.spill[..take]);
            self.spill.drain(..take);
            n += take;
        }
        n
    }
}

/// Outcome of one feeding round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pump {
    /// Buffer is full enough for now
    Satisfied,
    /// The source returned no bytes
    SourceEmpty,
}

/// Poll the decoder, then feed 128-byte chunks while it asks for more
pub(crate) fn pump(
    session: &MixSession,
    decoder: &mut DecoderInstance,
    source: &mut dyn RawDataSource,
) -> Result<Pump> {
    let mut outcome = session.decode(decoder, DecodeInput::Poll)?;
    if outcome.status == AudioStatus::OutputAlmostFull {
        return Ok(Pump::Satisfied);
    }

    let mut chunk = [0u8; RAW_CHUNK_BYTES];
    while outcome.status == AudioStatus::NeedMore {
        let n = source.read(&mut chunk);
        if n == 0 {
            return Ok(Pump::SourceEmpty);
        }
        outcome = session.decode(decoder, DecodeInput::Frame(&chunk[..n]))?;
        trace!("Fed {} bytes to {}, status {}", n, decoder.id(), outcome.status);
    }
    Ok(Pump::Satisfied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_reads_in_chunks() {
        let mut source = MemorySource::new((0..200u8).collect());
        let mut buf = [0u8; RAW_CHUNK_BYTES];
        assert_eq!(source.read(&mut buf), 128);
        assert_eq!(source.read(&mut buf), 72);
        assert_eq!(buf[0], 128);
        assert_eq!(source.read(&mut buf), 0);
    }

    #[test]
    fn test_tone_length_matches_duration() {
        let mut tone = ToneGenerator::new(8_000, Channels::Stereo, 1_000, 10);
        let mut total = 0;
        let mut buf = [0u8; 50];
        loop {
            let n = tone.read(&mut buf);
            if n == 0 {
                break;
            }
            total += n;
        }
        // 80 frames of 2 channels, 2 bytes each
        assert_eq!(total, 320);
    }

    #[test]
    fn test_tone_starts_at_zero_crossing() {
        let mut tone = ToneGenerator::new(16_000, Channels::Mono, 1_000, 1);
        let mut buf = [0u8; 4];
        assert_eq!(tone.read(&mut buf), 4);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 0);
        assert!(i16::from_le_bytes([buf[2], buf[3]]) > 0);
    }
}
