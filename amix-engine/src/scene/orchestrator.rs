//! Scene orchestrator: one task, one FIFO queue
//!
//! **Transition permit:** scene creation and destruction are serialized by a
//! one-permit semaphore. The permit is moved into the `Create`/`Destroy`
//! command and released when the loop drops it after the transition, so a
//! caller that re-acquires it knows the previous transition has finished.
//!
//! **Current scenes:** at most one main scene and one tone. A tone played
//! with no main scene becomes the main scene and both references name it.
//! Events for any other scene are stale and dropped.

use super::tone::{ToneParams, ToneScene};
use super::{Command, EncodedFrame, EventSender, Scene, SceneContext, SceneEvent, SceneId, SceneRole};
use crate::error::{Error, Result};
use crate::hw::HardwareRegistry;
use crate::mix::{DecoderId, MixEngine};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
struct MainRef {
    id: SceneId,
    supports_tone: bool,
    tracked_decoder: Option<DecoderId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CurrentScenes {
    main: Option<MainRef>,
    tone: Option<SceneId>,
}

impl CurrentScenes {
    fn is_current(&self, id: SceneId) -> bool {
        self.main.map(|m| m.id) == Some(id) || self.tone == Some(id)
    }
}

struct Shared {
    events: EventSender,
    current: Mutex<CurrentScenes>,
    next_id: AtomicU64,
    engine: MixEngine,
    hardware: HardwareRegistry,
}

/// Cloneable API surface of a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    shared: Arc<Shared>,
}

/// Owns the orchestrator task
pub struct SceneOrchestrator {
    handle: OrchestratorHandle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SceneOrchestrator {
    /// Start the loop on the current tokio runtime
    pub fn spawn(engine: MixEngine, hardware: HardwareRegistry) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            events: EventSender {
                tx,
                transition: Arc::new(Semaphore::new(1)),
            },
            current: Mutex::new(CurrentScenes::default()),
            next_id: AtomicU64::new(1),
            engine,
            hardware,
        });

        let task = tokio::spawn(run_loop(rx, Arc::clone(&shared)));
        info!("Scene orchestrator started");

        Self {
            handle: OrchestratorHandle { shared },
            task: Mutex::new(Some(task)),
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    /// Destroy the current scenes, stop the loop and wait for it
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.handle.shared.events.send(Command::Shutdown(Some(done_tx))) {
            let _ = done_rx.await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Orchestrator task ended abnormally: {}", e);
            }
        }
    }
}

impl std::ops::Deref for SceneOrchestrator {
    type Target = OrchestratorHandle;

    fn deref(&self) -> &OrchestratorHandle {
        &self.handle
    }
}

impl Drop for SceneOrchestrator {
    fn drop(&mut self) {
        if self.task.lock().is_some() {
            let _ = self.handle.shared.events.tx.send(Command::Shutdown(None));
        }
    }
}

impl OrchestratorHandle {
    fn next_id(&self) -> SceneId {
        SceneId(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.shared.events.transition)
            .acquire_owned()
            .await
            .map_err(|_| Error::NotAllowed("scene orchestrator is shut down".to_string()))
    }

    pub fn events(&self) -> EventSender {
        self.shared.events.clone()
    }

    pub fn engine(&self) -> &MixEngine {
        &self.shared.engine
    }

    pub fn main_scene(&self) -> Option<SceneId> {
        self.shared.current.lock().main.map(|m| m.id)
    }

    pub fn tone_scene(&self) -> Option<SceneId> {
        self.shared.current.lock().tone
    }

    /// Replace the current scenes with a newly allocated main scene
    ///
    /// `allocate` runs in the caller's context while the old scene is torn
    /// down. If it fails the old scene is still gone.
    pub async fn create<F>(&self, allocate: F) -> Result<SceneId>
    where
        F: FnOnce(SceneId) -> Result<Box<dyn Scene>>,
    {
        let permit = self.acquire().await?;
        let old = {
            let current = self.shared.current.lock();
            current.main.map(|m| m.id).or(current.tone)
        };
        match old {
            Some(old) => {
                self.shared.events.send(Command::Destroy {
                    id: old,
                    permit: Some(permit),
                });
            }
            None => drop(permit),
        }

        let id = self.next_id();
        let scene = allocate(id)?;

        // waits for the Destroy above to complete
        let mut permit = self.acquire().await?;

        // a concurrent create may have installed its scene while `allocate` ran
        loop {
            let installed = {
                let current = self.shared.current.lock();
                current.main.map(|m| m.id).or(current.tone)
            };
            let Some(installed) = installed else {
                break;
            };
            debug!("{} was installed during allocation of {}, replacing it", installed, id);
            self.shared.events.send(Command::Destroy {
                id: installed,
                permit: Some(permit),
            });
            permit = self.acquire().await?;
        }

        self.install_main(id, scene, permit, false);
        Ok(id)
    }

    fn install_main(&self, id: SceneId, scene: Box<dyn Scene>, permit: OwnedSemaphorePermit, as_tone: bool) {
        {
            let mut current = self.shared.current.lock();
            current.main = Some(MainRef {
                id,
                supports_tone: scene.supports_tone(),
                tracked_decoder: None,
            });
            current.tone = as_tone.then_some(id);
        }
        info!("Creating {} scene {}", scene.name(), id);
        self.shared.events.send(Command::Create {
            id,
            role: SceneRole::Main,
            scene,
            permit: Some(permit),
        });
    }

    /// Destroy `scene` if it is current
    pub async fn destroy(&self, scene: SceneId) -> Result<()> {
        if !self.shared.current.lock().is_current(scene) {
            debug!("Destroy of non-current {} ignored", scene);
            return Ok(());
        }
        let permit = self.acquire().await?;
        self.shared.events.send(Command::Destroy {
            id: scene,
            permit: Some(permit),
        });
        Ok(())
    }

    /// Non-blocking destroy, usable from callbacks
    pub fn request_destroy(&self, scene: SceneId) -> bool {
        self.shared.events.request_destroy(scene)
    }

    /// Play a tone over the main scene, or as the main scene if there is none
    ///
    /// Returns `None` when the main scene refuses tones or already has one.
    pub async fn tone_play(&self, params: ToneParams) -> Result<Option<SceneId>> {
        let permit = self.acquire().await?;
        let current = *self.shared.current.lock();

        match current.main {
            Some(main) if main.supports_tone && current.tone.is_none() => {
                let id = self.next_id();
                self.shared.current.lock().tone = Some(id);
                info!("Creating tone overlay {} over {}", id, main.id);
                self.shared.events.send(Command::Create {
                    id,
                    role: SceneRole::Overlay,
                    scene: Box::new(ToneScene::new(params)),
                    permit: Some(permit),
                });
                Ok(Some(id))
            }
            Some(main) => {
                debug!(
                    "Tone refused: {} supports tone {}, tone present {}",
                    main.id,
                    main.supports_tone,
                    current.tone.is_some()
                );
                Ok(None)
            }
            None => {
                let id = self.next_id();
                self.install_main(id, Box::new(ToneScene::new(params)), permit, true);
                Ok(Some(id))
            }
        }
    }

    /// Stop the current tone
    ///
    /// A non-immediate stop lets the tone run to its own completion.
    pub async fn tone_stop(&self, immediate: bool) -> Result<()> {
        let tone = self.shared.current.lock().tone;
        match tone {
            Some(tone) if immediate => self.destroy(tone).await,
            Some(tone) => {
                debug!("Tone {} left to finish on its own", tone);
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn send_event(&self, scene: SceneId, event: SceneEvent) -> bool {
        self.shared.events.send_event(scene, event)
    }

    /// Queue a received frame for `scene`; invalid frames are concealed
    pub fn recv_encoded_data(&self, scene: SceneId, valid: bool, bytes: Vec<u8>) -> bool {
        let frame = if valid {
            EncodedFrame::Valid(bytes)
        } else {
            EncodedFrame::Lost
        };
        self.send_event(scene, SceneEvent::RecvEncodedFrame(frame))
    }

    /// True if `scene` is the main scene and its decoder is running
    pub fn decoder_started(&self, scene: SceneId) -> bool {
        let tracked = self
            .shared
            .current
            .lock()
            .main
            .filter(|m| m.id == scene)
            .and_then(|m| m.tracked_decoder);
        match (tracked, self.shared.engine.session()) {
            (Some(decoder), Some(session)) => session.decoder_is_started(decoder),
            _ => false,
        }
    }
}

struct SceneEntry {
    scene: Box<dyn Scene>,
    ctx: SceneContext,
}

async fn run_loop(mut rx: mpsc::UnboundedReceiver<Command>, shared: Arc<Shared>) {
    let mut scenes: HashMap<SceneId, SceneEntry> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Create {
                id,
                role,
                scene,
                permit,
            } => handle_create(&shared, &mut scenes, id, role, scene, permit),
            Command::Destroy { id, permit } => handle_destroy(&shared, &mut scenes, id, permit),
            Command::Event { scene, event } => dispatch(&shared, &mut scenes, scene, event),
            Command::Shutdown(done) => {
                let current = *shared.current.lock();
                if let Some(id) = current.main.map(|m| m.id).or(current.tone) {
                    handle_destroy(&shared, &mut scenes, id, None);
                }
                shared.events.transition.close();
                rx.close();
                info!("Scene orchestrator stopped");
                if let Some(done) = done {
                    let _ = done.send(());
                }
                break;
            }
        }
    }
}

fn handle_create(
    shared: &Shared,
    scenes: &mut HashMap<SceneId, SceneEntry>,
    id: SceneId,
    role: SceneRole,
    mut scene: Box<dyn Scene>,
    permit: Option<OwnedSemaphorePermit>,
) {
    if !shared.current.lock().is_current(id) {
        debug!("Dropping create for superseded {}", id);
        return;
    }

    let ctx = SceneContext::new(
        id,
        role,
        shared.engine.clone(),
        shared.hardware.clone(),
        shared.events.clone(),
    );
    match scene.init(&ctx) {
        Ok(()) => info!("{} scene {} initialized ({:?})", scene.name(), id, role),
        Err(e) => error!("{} scene {} failed to initialize: {}", scene.name(), id, e),
    }

    refresh_tracked(shared, id, scene.as_ref());
    scenes.insert(id, SceneEntry { scene, ctx });
    drop(permit);
}

fn handle_destroy(
    shared: &Shared,
    scenes: &mut HashMap<SceneId, SceneEntry>,
    id: SceneId,
    permit: Option<OwnedSemaphorePermit>,
) {
    let current = *shared.current.lock();
    let is_main = current.main.map(|m| m.id) == Some(id);
    let is_tone = current.tone == Some(id);
    if !is_main && !is_tone {
        debug!("Dropping destroy for stale {}", id);
        return;
    }

    let mut hook = None;

    // tone overlay goes first
    if let Some(tone) = current.tone.filter(|&tone| tone != id) {
        if let Some(mut entry) = scenes.remove(&tone) {
            hook = entry.scene.take_destroyed_hook();
            entry.scene.destroy(&entry.ctx);
            info!("Tone {} destroyed with {}", tone, id);
        }
        shared.current.lock().tone = None;
    }

    if let Some(mut entry) = scenes.remove(&id) {
        if is_tone {
            hook = hook.or_else(|| entry.scene.take_destroyed_hook());
        }
        entry.scene.destroy(&entry.ctx);
        info!("{} scene {} destroyed", entry.scene.name(), id);
    }

    {
        let mut current = shared.current.lock();
        if is_main {
            current.main = None;
        }
        if is_tone {
            current.tone = None;
        }
    }

    if let Some(hook) = hook {
        hook();
    }
    drop(permit);
}

fn dispatch(shared: &Shared, scenes: &mut HashMap<SceneId, SceneEntry>, id: SceneId, event: SceneEvent) {
    if !shared.current.lock().is_current(id) {
        debug!("Dropping {:?} for stale {}", event, id);
        return;
    }
    let Some(entry) = scenes.get_mut(&id) else {
        debug!("Dropping {:?} for {} before its init", event, id);
        return;
    };
    if let Err(e) = entry.scene.handle_event(&entry.ctx, event) {
        warn!("{} scene {} event failed: {}", entry.scene.name(), id, e);
    }
    refresh_tracked(shared, id, entry.scene.as_ref());
}

fn refresh_tracked(shared: &Shared, id: SceneId, scene: &dyn Scene) {
    let mut current = shared.current.lock();
    if let Some(main) = current.main.as_mut().filter(|m| m.id == id) {
        main.tracked_decoder = scene.tracked_decoder();
    }
}
