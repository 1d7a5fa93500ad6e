//! Codec contract and registry
//!
//! Real codecs (SBC, AAC, LC3, ...) run out of process and are reached
//! through a synchronous call that may take a while; the engine only ever
//! calls them from task context. [`CodecRegistry`] maps an [`AudioType`] to
//! a factory so decoder creation stays data-driven.

mod pcm;

pub use pcm::PcmCodec;

use crate::error::{Error, Result};
use amix_common::{AudioType, Channels};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Rate and layout of the PCM a codec currently produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: Channels,
}

/// Result of one `decode` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Input bytes consumed
    pub consumed: usize,
    /// Interleaved PCM produced (may be empty)
    pub pcm: Vec<i16>,
}

/// Result of one `input_over` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drained {
    pub pcm: Vec<i16>,
    /// No further output will follow
    pub done: bool,
}

/// A decoder for one compressed stream
pub trait Codec: Send {
    /// Decode as much of `input` as the codec accepts in one call
    fn decode(&mut self, input: &[u8]) -> Result<Decoded>;

    /// Synthesize a block in place of a lost frame
    fn plc(&mut self) -> Result<Vec<i16>>;

    /// Flush internal state after the last frame
    fn input_over(&mut self) -> Result<Drained>;

    /// Rate and layout of the most recent output
    fn params(&self) -> StreamParams;
}

/// Codec-specific creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Declared stream rate (required for raw PCM, a hint for others)
    pub sample_rate: u32,
    pub channels: Channels,
    /// Samples synthesized per concealment block
    pub plc_samples: u32,
}

impl DecoderConfig {
    /// Config for a stream at `sample_rate`, with 10 ms concealment blocks
    pub fn new(sample_rate: u32, channels: Channels) -> Self {
        Self {
            sample_rate,
            channels,
            plc_samples: sample_rate / 100,
        }
    }
}

/// Constructor for one audio type
pub type CodecFactory = Box<dyn Fn(&DecoderConfig) -> Result<Box<dyn Codec>> + Send + Sync>;

/// Audio type → codec factory table
pub struct CodecRegistry {
    factories: HashMap<AudioType, CodecFactory>,
}

impl CodecRegistry {
    /// Registry with no codecs at all
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the in-process codecs (raw PCM)
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(
            AudioType::Pcm,
            Box::new(|config| Ok(Box::new(PcmCodec::new(config)?) as Box<dyn Codec>)),
        );
        registry
    }

    /// Register (or replace) the factory for `audio_type`
    pub fn register(&mut self, audio_type: AudioType, factory: CodecFactory) {
        debug!("Registering codec factory for {}", audio_type);
        self.factories.insert(audio_type, factory);
    }

    pub fn supports(&self, audio_type: AudioType) -> bool {
        self.factories.contains_key(&audio_type)
    }

    /// Instantiate a codec
    pub fn create(&self, audio_type: AudioType, config: &DecoderConfig) -> Result<Box<dyn Codec>> {
        let factory = self
            .factories
            .get(&audio_type)
            .ok_or_else(|| Error::Failed(format!("no codec registered for {}", audio_type)))?;
        factory(config)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort();
        f.debug_struct("CodecRegistry").field("types", &types).finish()
    }
}
