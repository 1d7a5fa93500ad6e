//! Raw PCM pass-through codec
//!
//! Input bytes are little-endian i16 samples, interleaved per the configured
//! channel layout. A trailing partial frame is carried into the next call so
//! callers can feed arbitrary chunk sizes.

use super::{Codec, Decoded, DecoderConfig, Drained, StreamParams};
use crate::error::{Error, Result};

pub struct PcmCodec {
    params: StreamParams,
    plc_samples: u32,
    carry: Vec<u8>,
}

impl PcmCodec {
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        if config.sample_rate == 0 {
            return Err(Error::Config("PCM stream needs a non-zero sample rate".to_string()));
        }
        Ok(Self {
            params: StreamParams {
                sample_rate: config.sample_rate,
                channels: config.channels,
            },
            plc_samples: config.plc_samples,
            carry: Vec::new(),
        })
    }

    fn frame_bytes(&self) -> usize {
        2 * self.params.channels.count()
    }
}

impl Codec for PcmCodec {
    fn decode(&mut self, input: &[u8]) -> Result<Decoded> {
        let frame_bytes = self.frame_bytes();
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(input);

        let whole = bytes.len() - bytes.len() % frame_bytes;
        let pcm = bytes[..whole]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.carry = bytes[whole..].to_vec();

        Ok(Decoded {
            consumed: input.len(),
            pcm,
        })
    }

    fn plc(&mut self) -> Result<Vec<i16>> {
        Ok(vec![0; self.plc_samples as usize * self.params.channels.count()])
    }

    fn input_over(&mut self) -> Result<Drained> {
        // a partial frame can never be completed now
        self.carry.clear();
        Ok(Drained {
            pcm: Vec::new(),
            done: true,
        })
    }

    fn params(&self) -> StreamParams {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amix_common::Channels;

    fn bytes_of(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_whole_frames() {
        let mut codec = PcmCodec::new(&DecoderConfig::new(16_000, Channels::Stereo)).unwrap();
        let out = codec.decode(&bytes_of(&[1, -1, 2, -2])).unwrap();
        assert_eq!(out.consumed, 8);
        assert_eq!(out.pcm, vec![1, -1, 2, -2]);
    }

    #[test]
    fn test_partial_frame_carried() {
        let mut codec = PcmCodec::new(&DecoderConfig::new(16_000, Channels::Stereo)).unwrap();
        let input = bytes_of(&[10, 20, 30]);

        let out = codec.decode(&input[..5]).unwrap();
        assert_eq!(out.consumed, 5);
        assert_eq!(out.pcm, vec![10, 20]);

        let out = codec.decode(&input[5..]).unwrap();
        assert!(out.pcm.is_empty());

        let out = codec.decode(&bytes_of(&[40])).unwrap();
        assert_eq!(out.pcm, vec![30, 40]);
    }

    #[test]
    fn test_plc_is_silence_block() {
        let mut codec = PcmCodec::new(&DecoderConfig::new(8_000, Channels::Mono)).unwrap();
        let block = codec.plc().unwrap();
        assert_eq!(block.len(), 80);
        assert!(block.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_input_over_finishes_immediately() {
        let mut codec = PcmCodec::new(&DecoderConfig::new(8_000, Channels::Mono)).unwrap();
        codec.decode(&[1]).unwrap();
        let drained = codec.input_over().unwrap();
        assert!(drained.done);
        assert!(drained.pcm.is_empty());
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(PcmCodec::new(&DecoderConfig::new(0, Channels::Mono)).is_err());
    }
}
