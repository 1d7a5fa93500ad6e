//! Shared fixtures for amix-engine integration tests
//!
//! - `ScriptedCodec`: one constant output frame per input byte, plus a drain tail
//! - `RecordingScene`: logs every lifecycle call into a shared journal
//! - `eventually`: polls a condition while the orchestrator task runs

#![allow(dead_code)]

use amix_common::{AudioType, Channels, MixParams};
use amix_engine::codec::{Codec, CodecRegistry, Decoded, DecoderConfig, Drained, StreamParams};
use amix_engine::hw::{HardwareBackend, HardwareRegistry, SimulatedBackend};
use amix_engine::mix::{DecoderEvent, DecoderEventHandler, DecoderId};
use amix_engine::scene::{Scene, SceneContext, SceneEvent};
use amix_engine::{MixEngine, Result, SceneOrchestrator};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const RATE: u32 = 16_000;

/// How a [`ScriptedCodec`] registered for one audio type behaves
#[derive(Debug, Clone, Copy)]
pub struct Script {
    pub audio_type: AudioType,
    /// Sample value of every produced frame
    pub value: i16,
    /// Frames produced by `input_over`
    pub tail: u32,
}

pub const fn script(audio_type: AudioType, value: i16, tail: u32) -> Script {
    Script {
        audio_type,
        value,
        tail,
    }
}

/// Codec that turns every input byte into one frame of `value`
///
/// `input_over` yields `tail` more frames, then reports done.
pub struct ScriptedCodec {
    value: i16,
    tail: u32,
    params: StreamParams,
    plc_frames: u32,
}

impl Codec for ScriptedCodec {
    fn decode(&mut self, input: &[u8]) -> Result<Decoded> {
        Ok(Decoded {
            consumed: input.len(),
            pcm: vec![self.value; input.len() * self.params.channels.count()],
        })
    }

    fn plc(&mut self) -> Result<Vec<i16>> {
        Ok(vec![0; self.plc_frames as usize * self.params.channels.count()])
    }

    fn input_over(&mut self) -> Result<Drained> {
        let pcm = vec![self.value; self.tail as usize * self.params.channels.count()];
        self.tail = 0;
        Ok(Drained { pcm, done: true })
    }

    fn params(&self) -> StreamParams {
        self.params
    }
}

/// Builtin codecs plus one [`ScriptedCodec`] per script
pub fn codecs(scripts: &[Script]) -> CodecRegistry {
    let mut registry = CodecRegistry::with_builtin();
    for script in scripts.iter().copied() {
        registry.register(
            script.audio_type,
            Box::new(move |config: &DecoderConfig| {
                Ok(Box::new(ScriptedCodec {
                    value: script.value,
                    tail: script.tail,
                    params: StreamParams {
                        sample_rate: config.sample_rate,
                        channels: config.channels,
                    },
                    plc_frames: config.plc_samples,
                }) as Box<dyn Codec>)
            }),
        );
    }
    registry
}

pub fn config(channels: Channels) -> DecoderConfig {
    DecoderConfig::new(RATE, channels)
}

pub fn engine(scripts: &[Script]) -> MixEngine {
    MixEngine::new(MixParams::default(), codecs(scripts)).unwrap()
}

/// Per-decoder event counters
#[derive(Default)]
pub struct EventCounts {
    pub requests: AtomicU32,
    pub consumed: AtomicU32,
}

impl EventCounts {
    pub fn handler(self: &Arc<Self>) -> DecoderEventHandler {
        let counts = Arc::clone(self);
        Arc::new(move |_: DecoderId, event: DecoderEvent| match event {
            DecoderEvent::ReqRawData => {
                counts.requests.fetch_add(1, Ordering::SeqCst);
            }
            DecoderEvent::PcmConsumed => {
                counts.consumed.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn consumed(&self) -> u32 {
        self.consumed.load(Ordering::SeqCst)
    }
}

pub fn noop_handler() -> DecoderEventHandler {
    Arc::new(|_: DecoderId, _: DecoderEvent| {})
}

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Scene that records its lifecycle
///
/// With `owns_session` it initializes the mix engine like a real main scene
/// and destroys it again. Its destroy entry notes how many decoders were
/// still registered at that moment.
pub struct RecordingScene {
    pub name: String,
    pub journal: Journal,
    pub supports_tone: bool,
    pub owns_session: bool,
    inited: bool,
}

impl RecordingScene {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            supports_tone: false,
            owns_session: false,
            inited: false,
        }
    }

    pub fn with_session(mut self) -> Self {
        self.owns_session = true;
        self.supports_tone = true;
        self
    }

    pub fn boxed(self) -> Box<dyn Scene> {
        Box::new(self)
    }
}

impl Scene for RecordingScene {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn init(&mut self, ctx: &SceneContext) -> Result<()> {
        if self.owns_session {
            ctx.engine().init(Channels::Mono, RATE)?;
        }
        self.inited = true;
        self.journal.lock().push(format!("create:{}", self.name));
        Ok(())
    }

    fn destroy(&mut self, ctx: &SceneContext) {
        let decoders = ctx
            .engine()
            .session()
            .map_or(0, |session| session.snapshot().decoders.len());
        self.journal
            .lock()
            .push(format!("destroy:{} decoders={}", self.name, decoders));
        if self.owns_session && self.inited {
            ctx.engine().destroy();
        }
    }

    fn handle_event(&mut self, _ctx: &SceneContext, event: SceneEvent) -> Result<()> {
        let kind = match event {
            SceneEvent::RecvEncodedFrame(_) => "frame",
            SceneEvent::ReqEncodedFrame(_) => "request",
            SceneEvent::HwInNewSamples(_) => "samples",
        };
        self.journal.lock().push(format!("event:{}:{}", self.name, kind));
        Ok(())
    }

    fn supports_tone(&self) -> bool {
        self.supports_tone
    }
}

/// Manual-clock backend plus orchestrator wired to it
pub fn orchestrator(half_depth: u32) -> (SceneOrchestrator, Arc<SimulatedBackend>) {
    orchestrator_with(SimulatedBackend::manual(half_depth))
}

pub fn orchestrator_with(backend: SimulatedBackend) -> (SceneOrchestrator, Arc<SimulatedBackend>) {
    let backend = Arc::new(backend);
    let hardware = HardwareRegistry::new(Arc::clone(&backend) as Arc<dyn HardwareBackend>);
    (SceneOrchestrator::spawn(engine(&[]), hardware), backend)
}

/// Poll `condition` for up to one second
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Little-endian bytes for `frames` mono frames of `value`
pub fn pcm_bytes(frames: usize, value: i16) -> Vec<u8> {
    std::iter::repeat(value.to_le_bytes()).take(frames).flatten().collect()
}
