//! Decoder instances: one compressed source feeding the mix buffer
//!
//! A [`DecoderInstance`] is owned by the scene that created it and carries
//! the slow, task-context state (codec, resampler). The session keeps a
//! matching slot with the cursor and lifecycle state that the output path
//! also reads. The pending-PCM queue is shared between the two so a
//! finalizing decoder can be drained from either side.
//!
//! ```text
//! IDLE --start--> DECODING --stop--> IDLE
//!                    |
//!                    +--input over, PCM queued--> INPUT_OVER
//!                                                    |
//!                        queue drained --------------+--> PCM_ALL_MIXED
//!                                                           |
//!                        last sample consumed --------------+--> IDLE (awaiting removal)
//! ```

use super::session::MixSession;
use crate::codec::{Codec, DecoderConfig, StreamParams};
use crate::error::{AudioStatus, Error, Result};
use crate::resampler::{create_resampler, Resample};
use amix_common::{AudioType, Channels};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on `input_over` calls for one finalization
const MAX_DRAIN_CALLS: usize = 64;

/// Stable handle of a decoder within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderId(pub(super) u32);

impl fmt::Display for DecoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dec#{}", self.0)
    }
}

/// Lifecycle state of a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderState {
    Idle,
    Decoding,
    /// Finalization requested, decoded PCM still waiting to be mixed
    InputOver,
    /// Everything mixed; waiting for outputs to pass the last sample
    PcmAllMixed,
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderState::Idle => write!(f, "Idle"),
            DecoderState::Decoding => write!(f, "Decoding"),
            DecoderState::InputOver => write!(f, "InputOver"),
            DecoderState::PcmAllMixed => write!(f, "PcmAllMixed"),
        }
    }
}

/// Which session list a decoder slot is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DecoderList {
    Waiting,
    Active,
    AwaitingConsume,
    AwaitingRemoval,
}

/// Notifications raised from the output path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderEvent {
    /// Headroom is available; feed more compressed input
    ReqRawData,
    /// The finalized decoder's last sample has been consumed; it can be removed
    PcmConsumed,
}

/// Callback for [`DecoderEvent`]s
///
/// Invoked from whatever context pulls PCM, so it must not block.
pub type DecoderEventHandler = Arc<dyn Fn(DecoderId, DecoderEvent) + Send + Sync>;

/// Decoded PCM not yet folded into the buffer
#[derive(Debug, Clone)]
pub(super) struct PcmChunk {
    data: Vec<i16>,
    /// Frames already mixed
    offset: usize,
}

impl PcmChunk {
    fn new(data: Vec<i16>) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self, channels: usize) -> u32 {
        (self.data.len() / channels - self.offset) as u32
    }

    pub fn unread(&self, channels: usize) -> &[i16] {
        &self.data[self.offset * channels..]
    }

    pub fn consume(&mut self, frames: u32) {
        self.offset += frames as usize;
    }
}

pub(super) type PendingQueue = VecDeque<PcmChunk>;

/// Session-side view of a decoder
pub(super) struct DecoderSlot {
    pub wr_ptr: u32,
    pub state: DecoderState,
    pub list: DecoderList,
    pub pending: Arc<Mutex<PendingQueue>>,
    pub on_event: DecoderEventHandler,
    /// While quarantined: samples between the read frontier and `wr_ptr`
    pub unconsumed: u32,
}

/// One input to [`MixSession::decode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeInput<'a> {
    /// Compressed bytes
    Frame(&'a [u8]),
    /// A frame was lost; synthesize a replacement
    Plc,
    /// No more input will follow
    InputOver,
    /// No input; mix anything pending and report status
    Poll,
}

/// Result of a decode call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOutcome {
    pub status: AudioStatus,
    /// Input bytes consumed
    pub consumed: usize,
}

impl DecodeOutcome {
    fn throttled() -> Self {
        Self {
            status: AudioStatus::OutputAlmostFull,
            consumed: 0,
        }
    }
}

/// Owned handle to a decoder; removing it consumes the handle
pub struct DecoderInstance {
    id: DecoderId,
    audio_type: AudioType,
    codec: Box<dyn Codec>,
    resampler: Option<Box<dyn Resample>>,
    /// Rate and layout the resampler (if any) was built for
    current: StreamParams,
    pending: Arc<Mutex<PendingQueue>>,
}

impl DecoderInstance {
    pub fn id(&self) -> DecoderId {
        self.id
    }

    pub fn audio_type(&self) -> AudioType {
        self.audio_type
    }

    /// Decoded samples queued but not yet mixed
    pub fn pending_samples(&self, channels: Channels) -> u32 {
        self.pending
            .lock()
            .iter()
            .map(|chunk| chunk.remaining(channels.count()))
            .sum()
    }
}

impl fmt::Debug for DecoderInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderInstance")
            .field("id", &self.id)
            .field("audio_type", &self.audio_type)
            .field("current", &self.current)
            .field("resampling", &self.resampler.is_some())
            .finish()
    }
}

/// Convert interleaved PCM between mono and stereo
///
/// Mono is duplicated into both channels; stereo keeps the left channel.
pub fn adapt_channels(pcm: Vec<i16>, from: Channels, to: Channels) -> Vec<i16> {
    match (from, to) {
        (Channels::Mono, Channels::Stereo) => pcm.iter().flat_map(|&s| [s, s]).collect(),
        (Channels::Stereo, Channels::Mono) => pcm.chunks_exact(2).map(|frame| frame[0]).collect(),
        _ => pcm,
    }
}

impl MixSession {
    /// Create a decoder for `audio_type`, parked on the waiting list
    pub fn decoder_add(
        &self,
        audio_type: AudioType,
        config: &DecoderConfig,
        on_event: DecoderEventHandler,
    ) -> Result<DecoderInstance> {
        self.ensure_open("decoder_add")?;
        let codec = self.codecs.create(audio_type, config)?;

        let id = DecoderId(self.next_id());
        let pending = Arc::new(Mutex::new(PendingQueue::new()));

        {
            let mut cursors = self.cursors.lock();
            let slot = DecoderSlot {
                wr_ptr: cursors.wr_ptr,
                state: DecoderState::Idle,
                list: DecoderList::Waiting,
                pending: Arc::clone(&pending),
                on_event,
                unconsumed: 0,
            };
            cursors.decoders.insert(id, slot);
        }
        debug!("Decoder {} added ({})", id, audio_type);

        Ok(DecoderInstance {
            id,
            audio_type,
            codec,
            resampler: None,
            current: StreamParams {
                sample_rate: self.sample_rate,
                channels: self.channels,
            },
            pending,
        })
    }

    /// Stop (if needed) and free a decoder
    pub fn decoder_remove(&self, decoder: DecoderInstance) {
        let mut cursors = self.cursors.lock();
        if let Some(slot) = cursors.decoders.remove(&decoder.id) {
            if slot.list == DecoderList::Active {
                cursors.update_wr_ptr(&self.ring);
            }
            debug!("Decoder {} removed in state {}", decoder.id, slot.state);
        }
    }

    /// Feed one input to a decoder and mix what it produces
    ///
    /// Returns `OUTPUT_ALMOST_FULL` without touching the input when the
    /// decoder is not running or the buffer ahead of it is nearly full.
    pub fn decode(&self, decoder: &mut DecoderInstance, input: DecodeInput<'_>) -> Result<DecodeOutcome> {
        let id = decoder.id;
        match self.decoder_state(id) {
            Some(DecoderState::Decoding) => {}
            Some(_) => return Ok(DecodeOutcome::throttled()),
            None => return Err(Error::InvalidState(format!("decoder {} is not registered", id))),
        }

        if !decoder.pending.lock().is_empty() {
            self.mix(id, &decoder.pending);
            if self.pcm_buffer_status(id) == AudioStatus::OutputAlmostFull {
                return Ok(DecodeOutcome::throttled());
            }
        }

        let mut consumed = 0;
        match input {
            DecodeInput::Poll => {}
            DecodeInput::Frame(bytes) => {
                while consumed < bytes.len() {
                    let out = decoder.codec.decode(&bytes[consumed..])?;
                    consumed += out.consumed;
                    if !out.pcm.is_empty() {
                        let params = decoder.codec.params();
                        self.store_decoded(decoder, out.pcm, params)?;
                    }
                    if out.consumed == 0 {
                        warn!("Decoder {} codec consumed nothing, dropping frame tail", id);
                        break;
                    }
                }
            }
            DecodeInput::Plc => {
                let pcm = decoder.codec.plc()?;
                if !pcm.is_empty() {
                    let params = StreamParams {
                        sample_rate: decoder.current.sample_rate,
                        channels: decoder.codec.params().channels,
                    };
                    self.store_decoded(decoder, pcm, params)?;
                }
            }
            DecodeInput::InputOver => {
                let mut finished = false;
                for _ in 0..MAX_DRAIN_CALLS {
                    let drained = decoder.codec.input_over()?;
                    if !drained.pcm.is_empty() {
                        let params = decoder.codec.params();
                        self.store_decoded(decoder, drained.pcm, params)?;
                    }
                    if drained.done {
                        finished = true;
                        break;
                    }
                }
                if !finished {
                    warn!("Decoder {} codec never finished draining, forcing input over", id);
                }
                self.flush_resampler(decoder)?;
                if let Some(slot) = self.cursors.lock().decoders.get_mut(&id) {
                    slot.state = DecoderState::InputOver;
                }
                debug!("Decoder {} input over", id);
                // quarantines immediately if nothing is left to mix
                self.mix(id, &decoder.pending);
            }
        }

        Ok(DecodeOutcome {
            status: self.pcm_buffer_status(id),
            consumed,
        })
    }

    /// Resample, adapt channels, queue and mix one decoded block
    fn store_decoded(
        &self,
        decoder: &mut DecoderInstance,
        pcm: Vec<i16>,
        params: StreamParams,
    ) -> Result<()> {
        if params != decoder.current {
            self.flush_resampler(decoder)?;
            decoder.resampler = if params.sample_rate == self.sample_rate {
                None
            } else {
                Some(create_resampler(params.sample_rate, self.sample_rate, params.channels)?)
            };
            debug!(
                "Decoder {} stream now {} Hz {} (resampling: {})",
                decoder.id,
                params.sample_rate,
                params.channels,
                decoder.resampler.is_some()
            );
            decoder.current = params;
        }

        let pcm = match decoder.resampler.as_mut() {
            Some(resampler) => resampler.process(&pcm)?,
            None => pcm,
        };
        let pcm = adapt_channels(pcm, params.channels, self.channels);
        if !pcm.is_empty() {
            decoder.pending.lock().push_back(PcmChunk::new(pcm));
        }

        self.mix(decoder.id, &decoder.pending);
        Ok(())
    }

    /// Queue the resampler's carried tail, in the layout it was built for
    fn flush_resampler(&self, decoder: &mut DecoderInstance) -> Result<()> {
        let Some(resampler) = decoder.resampler.as_mut() else {
            return Ok(());
        };
        let tail = adapt_channels(resampler.flush()?, decoder.current.channels, self.channels);
        if !tail.is_empty() {
            decoder.pending.lock().push_back(PcmChunk::new(tail));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapt_mono_to_stereo() {
        let out = adapt_channels(vec![1, 2, 3], Channels::Mono, Channels::Stereo);
        assert_eq!(out, vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_adapt_stereo_to_mono_keeps_left() {
        let out = adapt_channels(vec![1, -1, 2, -2], Channels::Stereo, Channels::Mono);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_adapt_same_layout_untouched() {
        let out = adapt_channels(vec![5, 6], Channels::Stereo, Channels::Stereo);
        assert_eq!(out, vec![5, 6]);
    }

    #[test]
    fn test_chunk_consumption() {
        let mut chunk = PcmChunk::new(vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(chunk.remaining(2), 3);
        chunk.consume(2);
        assert_eq!(chunk.remaining(2), 1);
        assert_eq!(chunk.unread(2), &[5, 6]);
    }

    #[test]
    fn test_decoder_state_display() {
        assert_eq!(DecoderState::PcmAllMixed.to_string(), "PcmAllMixed");
        assert_eq!(DecoderId(7).to_string(), "dec#7");
    }
}
