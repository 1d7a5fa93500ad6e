//! # AMIX Mixing Engine (amix-engine)
//!
//! Mixes decoded audio from several sources into one circular PCM buffer
//! and schedules the scenes that produce and consume it.
//!
//! **Architecture:**
//! - [`mix`]: the shared mix buffer, decoder instances and output readers
//! - [`scene`]: the single-task orchestrator and the example scenes
//! - [`hw`]: hardware binding contract plus a simulated backend
//! - [`codec`] / [`resampler`]: collaborators used on the decode path

pub mod build_info;
pub mod codec;
pub mod error;
pub mod hw;
pub mod mix;
pub mod resampler;
pub mod scene;

pub use error::{AudioStatus, Error, Result};
pub use mix::{MixEngine, MixSession};
pub use scene::{SceneId, SceneOrchestrator};
