//! Scenes and their orchestrator
//!
//! A scene bundles decoders, outputs and hardware bindings for one use case
//! (local playback, a streamed sink, a tone, loopback). All lifecycle calls
//! and domain events for scenes run on the orchestrator's single task, in
//! the order they were raised.

mod loopback;
mod local_playback;
mod orchestrator;
mod source;
mod stream_sink;
mod tone;

pub use loopback::{LoopbackParams, LoopbackScene};
pub use local_playback::{LocalPlaybackParams, LocalPlaybackScene};
pub use orchestrator::{OrchestratorHandle, SceneOrchestrator};
pub use source::{MemorySource, RawDataSource, ToneGenerator, RAW_CHUNK_BYTES};
pub use stream_sink::{StreamSinkParams, StreamSinkScene, SINK_MAX_FRAMES, SINK_START_FRAMES};
pub use tone::{ToneParams, ToneScene};

use crate::error::Result;
use crate::hw::HardwareRegistry;
use crate::mix::{DecoderEvent, DecoderEventHandler, DecoderId, MixEngine};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::warn;

/// Identity of one scene instance; never reused within an orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(pub(crate) u64);

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scene#{}", self.0)
    }
}

/// How a scene was created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneRole {
    /// Owns the mixing session and the output hardware
    Main,
    /// Tone layered over the main scene's session
    Overlay,
}

/// One received compressed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedFrame {
    Valid(Vec<u8>),
    /// Lost in transit; decoded through packet-loss concealment
    Lost,
}

/// Domain events routed to the current scenes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneEvent {
    RecvEncodedFrame(EncodedFrame),
    /// A decoder has room for more input
    ReqEncodedFrame(DecoderId),
    /// An input binding captured this many new samples
    HwInNewSamples(u32),
}

/// Called once the tone it belongs to has been torn down
pub type ToneDestroyedHook = Box<dyn FnOnce() + Send>;

/// Lifecycle contract every scene implements
///
/// All methods run on the orchestrator task.
pub trait Scene: Send {
    fn name(&self) -> &'static str;

    /// Acquire sessions, decoders and hardware
    fn init(&mut self, ctx: &SceneContext) -> Result<()>;

    /// Release everything `init` acquired; must tolerate a failed `init`
    fn destroy(&mut self, ctx: &SceneContext);

    fn handle_event(&mut self, ctx: &SceneContext, event: SceneEvent) -> Result<()>;

    /// Whether a tone may be layered over this scene
    fn supports_tone(&self) -> bool {
        false
    }

    /// Decoder reported by `decoder_started`
    fn tracked_decoder(&self) -> Option<DecoderId> {
        None
    }

    fn take_destroyed_hook(&mut self) -> Option<ToneDestroyedHook> {
        None
    }
}

pub(crate) enum Command {
    Create {
        id: SceneId,
        role: SceneRole,
        scene: Box<dyn Scene>,
        permit: Option<OwnedSemaphorePermit>,
    },
    Destroy {
        id: SceneId,
        permit: Option<OwnedSemaphorePermit>,
    },
    Event {
        scene: SceneId,
        event: SceneEvent,
    },
    Shutdown(Option<tokio::sync::oneshot::Sender<()>>),
}

/// Non-blocking way into the orchestrator queue, usable from any thread
#[derive(Clone)]
pub struct EventSender {
    pub(crate) tx: mpsc::UnboundedSender<Command>,
    pub(crate) transition: Arc<Semaphore>,
}

impl EventSender {
    pub(crate) fn send(&self, command: Command) -> bool {
        if self.tx.send(command).is_err() {
            warn!("Orchestrator stopped, dropping command");
            return false;
        }
        true
    }

    /// Queue a domain event for `scene`
    pub fn send_event(&self, scene: SceneId, event: SceneEvent) -> bool {
        self.send(Command::Event { scene, event })
    }

    /// Ask for `scene` to be destroyed without waiting
    ///
    /// Takes the transition permit if it is free; otherwise the request goes
    /// out without it and is ordered by the queue alone.
    pub fn request_destroy(&self, scene: SceneId) -> bool {
        let permit = Arc::clone(&self.transition).try_acquire_owned().ok();
        self.send(Command::Destroy { id: scene, permit })
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// What a scene gets to work with
#[derive(Clone)]
pub struct SceneContext {
    id: SceneId,
    role: SceneRole,
    engine: MixEngine,
    hardware: HardwareRegistry,
    events: EventSender,
}

impl SceneContext {
    pub(crate) fn new(
        id: SceneId,
        role: SceneRole,
        engine: MixEngine,
        hardware: HardwareRegistry,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            role,
            engine,
            hardware,
            events,
        }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn role(&self) -> SceneRole {
        self.role
    }

    pub fn engine(&self) -> &MixEngine {
        &self.engine
    }

    pub fn hardware(&self) -> &HardwareRegistry {
        &self.hardware
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Decoder callback that turns data requests into `ReqEncodedFrame`
    /// events for this scene and drops everything else
    pub fn request_forwarder(&self) -> DecoderEventHandler {
        let events = self.events.clone();
        let scene = self.id;
        Arc::new(move |decoder: DecoderId, event: DecoderEvent| {
            if event == DecoderEvent::ReqRawData {
                events.send_event(scene, SceneEvent::ReqEncodedFrame(decoder));
            }
        })
    }
}

impl fmt::Debug for SceneContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneContext")
            .field("id", &self.id)
            .field("role", &self.role)
            .finish()
    }
}
