//! lautlos - a deterministic virtual audio sink
//!
//! Audio code is hard to test: real playback needs hardware and a running
//! sound server, and "did my pipeline keep the device fed?" is invisible
//! without both. lautlos stands in for the output device. A [`Stream`] is a
//! simulated sink with a bounded byte ring that drains on a wall-clock
//! schedule at the configured byte rate, asks for more data through a refill
//! callback when it runs low, and tracks underruns - bytes go in, silence
//! comes out.
//!
//! Design principles:
//! - Bytes are opaque; no sample format, resampling, or mixing
//! - One clock driver task per stream, on a shared [`Host`] runtime
//! - Callbacks only ever run while the dispatch lock is held, structurally;
//!   holding a [`DispatchLock`] from outside blocks all dispatch
//! - `play`/`pause`/`close` are blocking rendezvous with the clock driver,
//!   never fire-and-forget flags
//!
//! ```no_run
//! use lautlos::{Stream, StreamSettings};
//!
//! let stream = Stream::open(StreamSettings {
//!     sample_size: 2,
//!     n_channels: 1,
//!     sample_rate: 44100,
//!     buffer_ms: 250,
//! })?;
//!
//! stream.set_refill(|refill| {
//!     let silence = vec![0u8; refill.requested()];
//!     let _ = refill.write(&silence);
//! });
//! stream.start()?;
//! # Ok::<(), lautlos::Error>(())
//! ```

mod error;
mod host;
mod lock;
mod stream;

pub use error::{Error, Result};
pub use host::Host;
pub use lock::{DispatchGuard, DispatchLock};
pub use stream::{Refill, Stream, StreamSettings, StreamState};
