//! Host runtime that clock drivers run on

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Builder as RuntimeBuilder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};

/// The execution context every virtual sink runs on
///
/// A `Host` embeds a small multi-thread tokio runtime. One clock driver task
/// per stream is spawned onto it; the public API never requires the caller to
/// be inside an async context.
///
/// A host must outlive every [`DispatchLock`](crate::DispatchLock) and
/// [`Stream`](crate::Stream) created against it. [`Host::shutdown`] refuses
/// with [`Error::InUse`] while dependents are alive, so teardown order
/// violations fail loudly instead of corrupting anything.
pub struct Host {
    inner: Arc<HostInner>,
}

pub(crate) struct HostInner {
    /// `None` once the host is shut down
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    /// Live locks + streams
    dependents: AtomicUsize,
    closed: AtomicBool,
}

impl Host {
    /// Build a host with a fresh runtime
    ///
    /// Fails with [`Error::RuntimeCreation`] if the OS refuses the worker
    /// threads.
    pub fn new() -> Result<Self> {
        // One worker drives clock ticks, the second gives refill callbacks
        // headroom so a slow callback doesn't stall other streams' clocks.
        let runtime = RuntimeBuilder::new_multi_thread()
            .worker_threads(2)
            .thread_name("lautlos-host")
            .enable_time()
            .build()?;

        let handle = runtime.handle().clone();
        debug!("host runtime created");

        Ok(Self {
            inner: Arc::new(HostInner {
                runtime: Mutex::new(Some(runtime)),
                handle,
                dependents: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Tear down the runtime
    ///
    /// Errors with [`Error::InUse`] while any lock or stream created from
    /// this host is still alive (close streams first, then locks, then the
    /// host), and with [`Error::AlreadyShutDown`] on a second call.
    pub fn shutdown(&self) -> Result<()> {
        if self.inner.dependents.load(Ordering::Acquire) != 0 {
            return Err(Error::InUse);
        }

        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyShutDown);
        }

        if let Some(runtime) = self.inner.runtime.lock().take() {
            // Don't block: there are no dependents, so no task left matters.
            runtime.shutdown_background();
        }
        debug!("host runtime shut down");
        Ok(())
    }

    /// Number of live locks and streams created from this host
    #[inline]
    pub fn dependents(&self) -> usize {
        self.inner.dependents.load(Ordering::Acquire)
    }

    pub(crate) fn inner(&self) -> &Arc<HostInner> {
        &self.inner
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        // Best effort; a host dropped with live dependents stays alive
        // through their Arc clones until they detach.
        let _ = self.shutdown();
    }
}

impl HostInner {
    /// Register a dependent (lock or stream)
    pub(crate) fn attach(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::HostClosed);
        }
        self.dependents.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub(crate) fn detach(&self) {
        self.dependents.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}
