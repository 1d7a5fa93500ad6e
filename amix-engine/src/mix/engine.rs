//! Holder of the (at most one) live mixing session

use super::session::MixSession;
use crate::codec::CodecRegistry;
use crate::error::{Error, Result};
use amix_common::{Channels, MixParams};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

struct Inner {
    params: MixParams,
    codecs: Arc<CodecRegistry>,
    session: Mutex<Option<Arc<MixSession>>>,
}

/// Cloneable handle shared by scenes and hardware callbacks
#[derive(Clone)]
pub struct MixEngine {
    inner: Arc<Inner>,
}

impl MixEngine {
    pub fn new(params: MixParams, codecs: CodecRegistry) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                params,
                codecs: Arc::new(codecs),
                session: Mutex::new(None),
            }),
        })
    }

    pub fn params(&self) -> &MixParams {
        &self.inner.params
    }

    /// Create the session; fails with `AlreadyCreated` if one is live
    pub fn init(&self, channels: Channels, sample_rate: u32) -> Result<Arc<MixSession>> {
        let mut slot = self.inner.session.lock();
        if let Some(existing) = slot.as_ref() {
            return Err(Error::AlreadyCreated(format!(
                "mix session already running ({} {} Hz)",
                existing.channels(),
                existing.sample_rate()
            )));
        }
        let session = Arc::new(MixSession::new(
            &self.inner.params,
            channels,
            sample_rate,
            Arc::clone(&self.inner.codecs),
        )?);
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// The live session, if any
    pub fn session(&self) -> Option<Arc<MixSession>> {
        self.inner.session.lock().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Drop the live session
    ///
    /// Handles still held elsewhere see a closed session: adds fail and
    /// reads return silence.
    pub fn destroy(&self) {
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.close();
            info!("Mix session destroyed");
        }
    }
}

impl std::fmt::Debug for MixEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixEngine")
            .field("params", &self.inner.params)
            .field("codecs", &self.inner.codecs)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MixEngine {
        MixEngine::new(MixParams::default(), CodecRegistry::with_builtin()).unwrap()
    }

    #[test]
    fn test_double_init_rejected() {
        let engine = engine();
        engine.init(Channels::Stereo, 16_000).unwrap();
        let err = engine.init(Channels::Mono, 8_000).unwrap_err();
        assert_eq!(err.code(), -2);
    }

    #[test]
    fn test_destroy_closes_outstanding_handles() {
        let engine = engine();
        let session = engine.init(Channels::Mono, 16_000).unwrap();
        engine.destroy();
        assert!(!engine.is_initialized());
        assert!(session.is_closed());
        assert_eq!(session.output_add(true, Channels::Mono).unwrap_err().code(), -4);

        // a fresh session can be created afterwards
        engine.init(Channels::Mono, 16_000).unwrap();
    }

    #[test]
    fn test_zero_rate_rejected() {
        let engine = engine();
        assert!(engine.init(Channels::Mono, 0).is_err());
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = MixParams {
            reserve_ms: 500,
            ..MixParams::default()
        };
        assert!(MixEngine::new(params, CodecRegistry::with_builtin()).is_err());
    }
}
