//! Hardware bindings
//!
//! A binding is an interrupt-driven PCM pump. Output bindings call a request
//! callback that must fill the buffer synchronously (usually via
//! `MixSession::get_pcm`). Input bindings write into a [`CaptureRing`] and
//! notify registered readers of how many new samples arrived.
//!
//! Backends implement [`HardwareBackend`]; [`HardwareRegistry`] sits in
//! front of one and refuses to open the same hardware twice.

mod capture;
mod registry;
mod simulated;

pub use capture::{CaptureOutputId, CaptureRing};
pub use registry::{HardwareRegistry, HwHandle};
pub use simulated::{CaptureSignal, SimulatedBackend};

use crate::error::Result;
use amix_common::Channels;
use std::fmt;
use std::sync::Arc;

/// Physical interface kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HwType {
    I2s,
    Codec,
    Pdm,
    Spdif,
    PsdDac,
}

impl fmt::Display for HwType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HwType::I2s => "i2s",
            HwType::Codec => "codec",
            HwType::Pdm => "pdm",
            HwType::Spdif => "spdif",
            HwType::PsdDac => "psd_dac",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwDirection {
    In,
    Out,
    InOut,
}

impl HwDirection {
    pub fn is_input(self) -> bool {
        matches!(self, HwDirection::In | HwDirection::InOut)
    }

    pub fn is_output(self) -> bool {
        matches!(self, HwDirection::Out | HwDirection::InOut)
    }
}

/// Parameters for opening a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwConfig {
    pub hw_type: HwType,
    pub direction: HwDirection,
    pub sample_rate: u32,
    pub channels: Channels,
    /// Register base of the peripheral (opaque to the simulated backend)
    pub base_addr: u32,
}

impl HwConfig {
    pub fn output(hw_type: HwType, sample_rate: u32, channels: Channels) -> Self {
        Self {
            hw_type,
            direction: HwDirection::Out,
            sample_rate,
            channels,
            base_addr: 0,
        }
    }

    pub fn input(hw_type: HwType, sample_rate: u32, channels: Channels) -> Self {
        Self {
            direction: HwDirection::In,
            ..Self::output(hw_type, sample_rate, channels)
        }
    }

    pub fn with_direction(self, direction: HwDirection) -> Self {
        Self { direction, ..self }
    }
}

/// Fills one hardware FIFO half with interleaved PCM
///
/// Runs in interrupt context: it must not block.
pub type RequestCallback = Box<dyn FnMut(&mut [i16], Channels) + Send>;

/// Told how many new samples a capture ring received (interrupt context)
pub type NotifyCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// An open hardware stream; dropping or stopping it halts the pump
pub trait HardwareBinding: Send {
    fn config(&self) -> &HwConfig;

    /// Capture ring of an input binding
    fn capture(&self) -> Option<Arc<CaptureRing>>;

    /// Halt the pump; no callback runs after this returns
    fn stop(&mut self);
}

/// Source of bindings
pub trait HardwareBackend: Send + Sync {
    /// Open a binding; output directions need `request`
    fn open(&self, config: &HwConfig, request: Option<RequestCallback>) -> Result<Box<dyn HardwareBinding>>;
}
