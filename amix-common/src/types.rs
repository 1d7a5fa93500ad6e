//! Audio format vocabulary shared across the engine and its configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compressed (or raw) audio formats a decoder can be created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioType {
    Pcm,
    Sbc,
    Mp3,
    Aac,
    Cvsd,
    Msbc,
    Lc3,
    SbcV2,
    OpusV2,
}

impl AudioType {
    pub const ALL: [AudioType; 9] = [
        AudioType::Pcm,
        AudioType::Sbc,
        AudioType::Mp3,
        AudioType::Aac,
        AudioType::Cvsd,
        AudioType::Msbc,
        AudioType::Lc3,
        AudioType::SbcV2,
        AudioType::OpusV2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AudioType::Pcm => "pcm",
            AudioType::Sbc => "sbc",
            AudioType::Mp3 => "mp3",
            AudioType::Aac => "aac",
            AudioType::Cvsd => "cvsd",
            AudioType::Msbc => "msbc",
            AudioType::Lc3 => "lc3",
            AudioType::SbcV2 => "sbc_v2",
            AudioType::OpusV2 => "opus_v2",
        }
    }
}

impl fmt::Display for AudioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        AudioType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| Error::InvalidInput(format!("unknown audio type '{}'", s)))
    }
}

/// Channel layout of interleaved PCM
///
/// Only mono and stereo are supported; anything else is rejected when the
/// value is parsed rather than coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Channels {
    Mono,
    Stereo,
}

impl Channels {
    /// Number of interleaved values per sample frame
    pub fn count(self) -> usize {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }
}

impl TryFrom<u8> for Channels {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Channels::Mono),
            2 => Ok(Channels::Stereo),
            other => Err(Error::InvalidInput(format!(
                "unsupported channel count {} (expected 1 or 2)",
                other
            ))),
        }
    }
}

impl From<Channels> for u8 {
    fn from(channels: Channels) -> u8 {
        channels.count() as u8
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channels::Mono => f.write_str("mono"),
            Channels::Stereo => f.write_str("stereo"),
        }
    }
}

impl FromStr for Channels {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "mono" => Ok(Channels::Mono),
            "2" | "stereo" => Ok(Channels::Stereo),
            other => Err(Error::InvalidInput(format!("unknown channel layout '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_type_parse_round_trip() {
        for t in AudioType::ALL {
            assert_eq!(t.as_str().parse::<AudioType>().unwrap(), t);
        }
        assert_eq!("SBC".parse::<AudioType>().unwrap(), AudioType::Sbc);
        assert!("flac".parse::<AudioType>().is_err());
    }

    #[test]
    fn test_channels_rejects_surround() {
        assert_eq!(Channels::try_from(1).unwrap(), Channels::Mono);
        assert_eq!(Channels::try_from(2).unwrap(), Channels::Stereo);
        assert!(Channels::try_from(6).is_err());
        assert!(Channels::try_from(0).is_err());
    }

    #[test]
    fn test_channels_count() {
        assert_eq!(Channels::Mono.count(), 1);
        assert_eq!(Channels::Stereo.count(), 2);
        assert_eq!(u8::from(Channels::Stereo), 2);
    }
}
