//! Notification tone, either standalone or layered over the main scene

use super::source::{pump, Pump, RawDataSource};
use super::{Scene, SceneContext, SceneEvent, SceneRole, ToneDestroyedHook};
use crate::codec::DecoderConfig;
use crate::error::{Error, Result};
use crate::hw::{HwConfig, HwHandle};
use crate::mix::{DecodeInput, DecoderEvent, DecoderId, DecoderInstance, MixSession, OutputId};
use amix_common::{AudioType, Channels};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ToneParams {
    pub source: Box<dyn RawDataSource>,
    pub audio_type: AudioType,
    pub decoder: DecoderConfig,
    /// Output hardware used when the tone plays as the main scene
    pub hw: HwConfig,
    pub on_destroyed: Option<ToneDestroyedHook>,
}

pub struct ToneScene {
    source: Box<dyn RawDataSource>,
    audio_type: AudioType,
    decoder_config: DecoderConfig,
    hw_config: HwConfig,
    on_destroyed: Option<ToneDestroyedHook>,
    session: Option<Arc<MixSession>>,
    decoder: Option<DecoderInstance>,
    output: Option<OutputId>,
    hw: Option<HwHandle>,
    finished: bool,
}

impl ToneScene {
    pub fn new(params: ToneParams) -> Self {
        Self {
            source: params.source,
            audio_type: params.audio_type,
            decoder_config: params.decoder,
            hw_config: params.hw,
            on_destroyed: params.on_destroyed,
            session: None,
            decoder: None,
            output: None,
            hw: None,
            finished: false,
        }
    }
}

impl Scene for ToneScene {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn init(&mut self, ctx: &SceneContext) -> Result<()> {
        let session = match ctx.role() {
            SceneRole::Main => ctx.engine().init(self.hw_config.channels, self.hw_config.sample_rate)?,
            SceneRole::Overlay => ctx
                .engine()
                .session()
                .ok_or_else(|| Error::NotAllowed("tone overlay without a mix session".to_string()))?,
        };
        self.session = Some(Arc::clone(&session));

        let scene = ctx.id();
        let events = ctx.events().clone();
        let on_event = Arc::new(move |decoder: DecoderId, event: DecoderEvent| match event {
            DecoderEvent::ReqRawData => {
                events.send_event(scene, SceneEvent::ReqEncodedFrame(decoder));
            }
            DecoderEvent::PcmConsumed => {
                debug!("Tone {} fully played", scene);
                events.request_destroy(scene);
            }
        });

        let decoder = session.decoder_add(self.audio_type, &self.decoder_config, on_event)?;
        let decoder_id = decoder.id();
        self.decoder = Some(decoder);

        if ctx.role() == SceneRole::Main {
            let output = session.output_add(true, self.hw_config.channels)?;
            self.output = Some(output);
            let pull = Arc::clone(&session);
            self.hw = Some(ctx.hardware().open(
                self.hw_config,
                Some(Box::new(move |buf: &mut [i16], channels: Channels| {
                    pull.get_pcm(output, buf, channels);
                })),
            )?);
        }

        session.decoder_start(decoder_id);
        ctx.events().send_event(scene, SceneEvent::ReqEncodedFrame(decoder_id));
        Ok(())
    }

    fn destroy(&mut self, ctx: &SceneContext) {
        // hardware first so nothing pulls from a half-torn session
        self.hw = None;
        if let Some(session) = self.session.take() {
            if let Some(output) = self.output.take() {
                session.output_remove(output);
            }
            if let Some(decoder) = self.decoder.take() {
                session.decoder_remove(decoder);
            }
            if ctx.role() == SceneRole::Main {
                ctx.engine().destroy();
            }
        }
    }

    fn handle_event(&mut self, _ctx: &SceneContext, event: SceneEvent) -> Result<()> {
        let SceneEvent::ReqEncodedFrame(_) = event else {
            return Ok(());
        };
        if self.finished {
            return Ok(());
        }
        let (Some(session), Some(decoder)) = (self.session.as_ref(), self.decoder.as_mut()) else {
            return Ok(());
        };

        if pump(session, decoder, self.source.as_mut())? == Pump::SourceEmpty {
            let outcome = session.decode(decoder, DecodeInput::InputOver)?;
            self.finished = true;
            debug!("Tone source exhausted ({})", outcome.status);
        }
        Ok(())
    }

    fn tracked_decoder(&self) -> Option<DecoderId> {
        self.decoder.as_ref().map(DecoderInstance::id)
    }

    fn take_destroyed_hook(&mut self) -> Option<ToneDestroyedHook> {
        self.on_destroyed.take()
    }
}

impl Drop for ToneScene {
    fn drop(&mut self) {
        if self.decoder.is_some() {
            warn!("Tone scene dropped without destroy");
        }
    }
}
