//! Single exclusion domain around the mapping engine.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::mapping::MappingEngine;

/// Shared handle to the engine. Every engine call goes through
/// [`MapGuard::with_map`], which holds the lock for the whole call.
pub struct MapGuard<E: ?Sized> {
    engine: Arc<Mutex<E>>,
}

impl<E: MappingEngine> MapGuard<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }
}

impl<E: MappingEngine + ?Sized> MapGuard<E> {
    /// Run `f` with exclusive access to the engine.
    pub fn with_map<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        let mut engine = self.engine.lock();
        f(&mut *engine)
    }
}

impl<E: ?Sized> Clone for MapGuard<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}
