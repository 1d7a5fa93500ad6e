//! Playback of a locally stored stream

use super::source::{pump, Pump, RawDataSource};
use super::{Scene, SceneContext, SceneEvent};
use crate::codec::DecoderConfig;
use crate::error::Result;
use crate::hw::{HwConfig, HwHandle};
use crate::mix::{DecoderId, DecoderInstance, MixSession, OutputId};
use amix_common::{AudioType, Channels};
use std::sync::Arc;
use tracing::trace;

pub struct LocalPlaybackParams {
    pub source: Box<dyn RawDataSource>,
    pub audio_type: AudioType,
    pub decoder: DecoderConfig,
    pub hw: HwConfig,
}

pub struct LocalPlaybackScene {
    params: LocalPlaybackParams,
    session: Option<Arc<MixSession>>,
    decoder: Option<DecoderInstance>,
    output: Option<OutputId>,
    hw: Option<HwHandle>,
}

impl LocalPlaybackScene {
    pub fn new(params: LocalPlaybackParams) -> Self {
        Self {
            params,
            session: None,
            decoder: None,
            output: None,
            hw: None,
        }
    }
}

impl Scene for LocalPlaybackScene {
    fn name(&self) -> &'static str {
        "local_playback"
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
        self.hw = Some(ctx.hardware().open(
            hw_config,
            Some(Box::new(move |buf: &mut [i16], channels: Channels| {
                pull.get_pcm(output, buf, channels);
            })),
        )?);

        session.decoder_start(decoder_id);
        ctx.events()
            .send_event(ctx.id(), SceneEvent::ReqEncodedFrame(decoder_id));
        Ok(())
    }

    fn destroy(&mut self, ctx: &SceneContext) {
        self.hw = None;
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
        if !matches!(event, SceneEvent::ReqEncodedFrame(_)) {
            return Ok(());
        }
        let (Some(session), Some(decoder)) = (self.session.as_ref(), self.decoder.as_mut()) else {
            return Ok(());
        };
        // an empty source just waits for the next request
        if pump(session, decoder, self.params.source.as_mut())? == Pump::SourceEmpty {
            trace!("Local source empty, {} idle", decoder.id());
        }
        Ok(())
    }

    fn tracked_decoder(&self) -> Option<DecoderId> {
        self.decoder.as_ref().map(DecoderInstance::id)
    }
}
