//! Exclusive access to hardware types

use super::{CaptureRing, HardwareBackend, HardwareBinding, HwConfig, HwType, RequestCallback};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Front for a backend that allows one live binding per [`HwType`]
#[derive(Clone)]
pub struct HardwareRegistry {
    backend: Arc<dyn HardwareBackend>,
    in_use: Arc<Mutex<HashSet<HwType>>>,
}

impl HardwareRegistry {
    pub fn new(backend: Arc<dyn HardwareBackend>) -> Self {
        Self {
            backend,
            in_use: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Open a binding, failing if its hardware type is already bound
    pub fn open(&self, config: HwConfig, request: Option<RequestCallback>) -> Result<HwHandle> {
        if !self.in_use.lock().insert(config.hw_type) {
            warn!("Hardware {} already bound, refusing second binding", config.hw_type);
            return Err(Error::Config(format!("hardware {} is already in use", config.hw_type)));
        }

        match self.backend.open(&config, request) {
            Ok(binding) => {
                info!(
                    "Opened {} {:?} at {} Hz {}",
                    config.hw_type, config.direction, config.sample_rate, config.channels
                );
                Ok(HwHandle {
                    binding,
                    in_use: Arc::clone(&self.in_use),
                })
            }
            Err(e) => {
                self.in_use.lock().remove(&config.hw_type);
                Err(e)
            }
        }
    }

    pub fn is_bound(&self, hw_type: HwType) -> bool {
        self.in_use.lock().contains(&hw_type)
    }
}

impl fmt::Debug for HardwareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareRegistry")
            .field("in_use", &*self.in_use.lock())
            .finish()
    }
}

/// A live binding; dropping it stops the hardware and frees its type
pub struct HwHandle {
    binding: Box<dyn HardwareBinding>,
    in_use: Arc<Mutex<HashSet<HwType>>>,
}

impl HwHandle {
    pub fn config(&self) -> &HwConfig {
        self.binding.config()
    }

    pub fn capture(&self) -> Option<Arc<CaptureRing>> {
        self.binding.capture()
    }
}

impl Drop for HwHandle {
    fn drop(&mut self) {
        self.binding.stop();
        let hw_type = self.binding.config().hw_type;
        self.in_use.lock().remove(&hw_type);
        info!("Closed {}", hw_type);
    }
}

impl fmt::Debug for HwHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwHandle").field("config", self.config()).finish()
    }
}
