//! Error types for the virtual sink

use std::io;

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong when driving a virtual sink
///
/// Underruns are deliberately *not* an `Err`: a clock that wants more bytes
/// than are buffered keeps running and the shortfall shows up in
/// [`Stream::underruns`](crate::Stream::underruns) instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The tokio runtime backing a [`Host`](crate::Host) could not be built
    #[error("failed to build host runtime: {0}")]
    RuntimeCreation(#[from] io::Error),

    /// A settings field is zero, overflows, or yields an unusable buffer
    #[error("invalid stream settings: {0}")]
    InvalidSettings(&'static str),

    /// `start()` on a stream that already left the `Created` state
    #[error("stream already started")]
    AlreadyStarted,

    /// Operation on a stream that has been stopped/closed
    #[error("stream is stopped")]
    Stopped,

    /// A write did not fit in the buffer's free space; nothing was written
    #[error("write of {requested} bytes exceeds free buffer space ({available} available)")]
    BufferOverflow {
        requested: usize,
        available: usize,
    },

    /// Non-blocking operation found the dispatch lock held elsewhere
    #[error("dispatch lock is held elsewhere")]
    LockHeld,

    /// Shutting down a host that still has live locks or streams
    #[error("host still has live dependents")]
    InUse,

    /// `shutdown()` on a host that was already shut down
    #[error("host already shut down")]
    AlreadyShutDown,

    /// Creating a lock or stream against a host that was shut down
    #[error("host is shut down")]
    HostClosed,

    /// A stream and a lock passed together belong to different hosts
    #[error("lock is bound to a different host")]
    HostMismatch,

    /// Non-blocking callback swap would conflict with an in-flight dispatch
    #[error("a refill callback is currently being dispatched")]
    Busy,

    /// The clock driver task is gone; the stream is unusable
    #[error("clock driver is not responding")]
    Disconnected,
}
