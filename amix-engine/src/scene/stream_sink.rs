//! Sink for a streamed (A2DP-style) source
//!
//! Frames arrive from the radio at their own pace and queue up here. The
//! decoder starts once a few frames are buffered, and drops back to waiting
//! whenever the output underruns, so playback restarts with fresh headroom
//! instead of stuttering.

use super::{EncodedFrame, Scene, SceneContext, SceneEvent};
use crate::codec::DecoderConfig;
use crate::error::{AudioStatus, Result};
use crate::hw::{HwConfig, HwHandle};
use crate::mix::{DecodeInput, DecoderId, DecoderInstance, MixSession, OutputId};
use amix_common::{AudioType, Channels};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Frames buffered before the decoder starts
pub const SINK_START_FRAMES: usize = 4;

/// Frames buffered at most; later arrivals are dropped
pub const SINK_MAX_FRAMES: usize = 10;

pub struct StreamSinkParams {
    pub audio_type: AudioType,
    pub decoder: DecoderConfig,
    pub hw: HwConfig,
}

pub struct StreamSinkScene {
    params: StreamSinkParams,
    frames: VecDeque<EncodedFrame>,
    session: Option<Arc<MixSession>>,
    decoder: Option<DecoderInstance>,
    output: Option<OutputId>,
    hw: Option<HwHandle>,
    /// Underrun stops performed by the output callback
    underruns: Arc<AtomicU32>,
    underruns_seen: u32,
}

impl StreamSinkScene {
    pub fn new(params: StreamSinkParams) -> Self {
        Self {
            params,
            frames: VecDeque::with_capacity(SINK_MAX_FRAMES),
            session: None,
            decoder: None,
            output: None,
            hw: None,
            underruns: Arc::new(AtomicU32::new(0)),
            underruns_seen: 0,
        }
    }

    fn is_started(&self) -> bool {
        match (&self.session, &self.decoder) {
            (Some(session), Some(decoder)) => session.decoder_is_started(decoder.id()),
            _ => false,
        }
    }

    fn start(&mut self) -> Result<()> {
        if let (Some(session), Some(decoder)) = (&self.session, &self.decoder) {
            session.decoder_start(decoder.id());
            debug!("Sink decoder {} started with {} frames queued", decoder.id(), self.frames.len());
        }
        self.decode_queued()
    }

    /// Decode queued frames until the buffer pushes back
    fn decode_queued(&mut self) -> Result<()> {
        let (Some(session), Some(decoder)) = (self.session.as_ref(), self.decoder.as_mut()) else {
            return Ok(());
        };

        while !self.frames.is_empty() {
            if session.decode(decoder, DecodeInput::Poll)?.status == AudioStatus::OutputAlmostFull {
                break;
            }
            let Some(frame) = self.frames.pop_front() else {
                break;
            };
            let input = match &frame {
                EncodedFrame::Valid(bytes) => DecodeInput::Frame(bytes.as_slice()),
                EncodedFrame::Lost => DecodeInput::Plc,
            };
            match session.decode(decoder, input) {
                Ok(outcome) if outcome.status == AudioStatus::OutputAlmostFull => break,
                Ok(_) => {}
                Err(e) => warn!("Sink decoder {} dropped a frame: {}", decoder.id(), e),
            }
        }
        Ok(())
    }

    pub fn queued_frames(&self) -> usize {
        self.frames.len()
    }
}

impl Scene for StreamSinkScene {
    fn name(&self) -> &'static str {
        "stream_sink"
    }

    fn init(&mut self, ctx: &SceneContext) -> Result<()> {
        let hw_config = self.params.hw;
        let session = ctx.engine().init(hw_config.channels, hw_config.sample_rate)?;
        self.session = Some(Arc::clone(&session));

        let decoder = session.decoder_add(self.params.audio_type, &self.params.decoder, ctx.request_forwarder())?;
        let decoder_id = decoder.id();
        self.decoder = Some(decoder);

        let output = session.output_add(true, hw_config.channels)?;
        self.output = Some(output);

        let pull = Arc::clone(&session);
        let underruns = Arc::clone(&self.underruns);
        self.hw = Some(ctx.hardware().open(
            hw_config,
            Some(Box::new(move |buf: &mut [i16], channels: Channels| {
                pull.get_pcm(output, buf, channels);
                if pull.missed_samples(output) > 0 {
                    if pull.decoder_is_started(decoder_id) {
                        pull.decoder_stop(decoder_id);
                        underruns.fetch_add(1, Ordering::Relaxed);
                    }
                    pull.clear_missed_samples(output);
                }
            })),
        )?);
        Ok(())
    }

    fn destroy(&mut self, ctx: &SceneContext) {
        self.hw = None;
        self.frames.clear();
        if let Some(session) = self.session.take() {
            if let Some(output) = self.output.take() {
                session.output_remove(output);
            }
            if let Some(decoder) = self.decoder.take() {
                session.decoder_remove(decoder);
            }
            ctx.engine().destroy();
        }
    }

    fn handle_event(&mut self, _ctx: &SceneContext, event: SceneEvent) -> Result<()> {
        let underruns = self.underruns.load(Ordering::Relaxed);
        if underruns != self.underruns_seen {
            warn!(
                "Sink underrun, decoder re-armed ({} recoveries so far)",
                underruns
            );
            self.underruns_seen = underruns;
        }

        match event {
            SceneEvent::RecvEncodedFrame(frame) => {
                if self.frames.len() >= SINK_MAX_FRAMES {
                    warn!("Sink queue full, dropping frame");
                    if !self.is_started() {
                        info!("Sink kicked by overflow");
                        return self.start();
                    }
                    return Ok(());
                }
                self.frames.push_back(frame);
                if !self.is_started() && self.frames.len() >= SINK_START_FRAMES {
                    return self.start();
                }
                Ok(())
            }
            SceneEvent::ReqEncodedFrame(_) => {
                if self.is_started() {
                    self.decode_queued()?;
                }
                Ok(())
            }
            SceneEvent::HwInNewSamples(_) => Ok(()),
        }
    }

    fn supports_tone(&self) -> bool {
        true
    }

    fn tracked_decoder(&self) -> Option<DecoderId> {
        self.decoder.as_ref().map(DecoderInstance::id)
    }
}
