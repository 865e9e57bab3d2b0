//! Process-scoped handle to the media engine.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tracerr::Traced;

use crate::platform::MediaEngine;

use super::SessionError;

/// Shared handle to the process-wide [`MediaEngine`].
///
/// The engine is created once by the embedding application, wrapped into a
/// [`MediaEngineHandle`] and injected into every [`CallSession`]. It's
/// disposed exactly once, either explicitly via [`MediaEngineHandle::dispose`]
/// or by [`CallSession::cleanup`]. After that no session can use it anymore.
///
/// [`CallSession`]: super::CallSession
/// [`CallSession::cleanup`]: super::CallSession::cleanup
#[derive(Clone)]
pub struct MediaEngineHandle(Arc<Inner>);

struct Inner {
    engine: Arc<dyn MediaEngine>,
    disposed: AtomicBool,
}

impl MediaEngineHandle {
    /// Wraps the provided [`MediaEngine`].
    #[inline]
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self(Arc::new(Inner {
            engine,
            disposed: AtomicBool::new(false),
        }))
    }

    /// Returns the wrapped [`MediaEngine`].
    ///
    /// # Errors
    ///
    /// With [`SessionError::EngineDisposed`] if the engine has been disposed.
    pub fn engine(&self) -> Result<Arc<dyn MediaEngine>, Traced<SessionError>> {
        if self.is_disposed() {
            return Err(tracerr::new!(SessionError::EngineDisposed));
        }
        Ok(Arc::clone(&self.0.engine))
    }

    /// Indicates whether the engine has been disposed.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.0.disposed.load(Ordering::SeqCst)
    }

    /// Disposes the engine. Does nothing if it's already disposed.
    pub fn dispose(&self) {
        if !self.0.disposed.swap(true, Ordering::SeqCst) {
            log::info!("Disposing media engine");
            self.0.engine.dispose();
        }
    }
}

impl fmt::Debug for MediaEngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaEngineHandle")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
