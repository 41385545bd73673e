use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{HttpError, Result};

/// Owner of the pooled keep-alive transport of one handler.
///
/// The client is created once, handed out as cheap clones sharing the same
/// connection pool, and released exactly once by [`ConnectionPool::close`].
#[derive(Debug)]
pub(crate) struct ConnectionPool<C> {
    client: Mutex<Option<C>>,
}

impl<C: Clone> ConnectionPool<C> {
    pub(crate) fn new(client: C) -> Self {
        Self {
            client: Mutex::new(Some(client)),
        }
    }

    /// Returns a handle to the shared pool, or `Closed` after `close()`.
    pub(crate) fn acquire(&self) -> Result<C> {
        self.lock().as_ref().cloned().ok_or(HttpError::Closed)
    }

    /// Releases the pool. Returns `false` when it was already released.
    ///
    /// In-flight requests keep their own handle and finish normally; idle
    /// connections are dropped once the last handle goes away.
    pub(crate) fn close(&self) -> bool {
        let released = self.lock().take();
        released.is_some()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    // A panic while holding the lock cannot leave the `Option` half-written.
    fn lock(&self) -> MutexGuard<'_, Option<C>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
