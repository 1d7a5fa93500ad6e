//! Mix buffer engine
//!
//! Decoders write into one circular PCM buffer per session; outputs read it
//! back. See [`session`] for the cursor discipline.

mod decoder;
mod engine;
mod output;
pub mod ring;
mod session;

pub use decoder::{
    adapt_channels, DecodeInput, DecodeOutcome, DecoderEvent, DecoderEventHandler, DecoderId,
    DecoderInstance, DecoderState,
};
pub use engine::MixEngine;
pub use output::OutputId;
pub use ring::Ring;
pub use session::{CursorSnapshot, MixSession};
