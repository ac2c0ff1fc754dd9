//! Dispatch lock: the serialization point between callers and the clock

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;
use crate::host::{Host, HostInner};

/// Mutual exclusion between external callers and refill-callback dispatch
///
/// The clock driver acquires this lock around every refill-callback
/// invocation and releases it as soon as the callback returns. Holding a
/// [`DispatchGuard`] on your own thread therefore guarantees that no
/// callback for any stream bound to this lock runs until you drop the guard.
/// That is the supported way to read or mutate callback-adjacent state from
/// outside the callback.
///
/// Release is RAII (guard drop), so "release without hold" cannot be
/// expressed and the lock cannot be dropped while a guard borrows it.
pub struct DispatchLock {
    shared: Arc<DispatchShared>,
    host: Arc<HostInner>,
}

/// The mutex itself, shared between lock handles, streams, and drivers
#[derive(Default)]
pub(crate) struct DispatchShared {
    mutex: Mutex<()>,
}

impl DispatchShared {
    /// Block until the dispatch path is exclusively ours
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock()
    }

    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.mutex.try_lock()
    }
}

/// Proof of dispatch-lock ownership; callbacks are blocked while it lives
pub struct DispatchGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl DispatchLock {
    /// Create a lock bound to `host`
    ///
    /// Fails with [`Error::HostClosed`](crate::Error::HostClosed) if the
    /// host has been shut down.
    pub fn new(host: &Host) -> Result<Self> {
        let host = host.inner().clone();
        host.attach()?;
        Ok(Self {
            shared: Arc::new(DispatchShared::default()),
            host,
        })
    }

    /// Block the calling thread until the lock is free, then hold it
    pub fn lock(&self) -> DispatchGuard<'_> {
        DispatchGuard {
            _guard: self.shared.lock(),
        }
    }

    /// Take the lock only if it is currently free
    pub fn try_lock(&self) -> Option<DispatchGuard<'_>> {
        self.shared.try_lock().map(|guard| DispatchGuard { _guard: guard })
    }

    pub(crate) fn shared(&self) -> Arc<DispatchShared> {
        self.shared.clone()
    }

    pub(crate) fn host(&self) -> &Arc<HostInner> {
        &self.host
    }
}

impl Drop for DispatchLock {
    fn drop(&mut self) {
        self.host.detach();
    }
}
