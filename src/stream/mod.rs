//! The virtual sink: settings, state machine, buffer, and clock handle

mod buffer;
mod driver;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};
use crate::host::{Host, HostInner};
use crate::lock::{DispatchLock, DispatchShared};

use buffer::FrameBuffer;

/// Playback parameters, fixed once a stream is built
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSettings {
    /// Byte size of one audio sample (e.g. 2 for 16-bit samples)
    pub sample_size: u8,
    /// Number of channels to simulate
    pub n_channels: u32,
    /// Sample rate in Hz, e.g. 44100
    pub sample_rate: u32,
    /// Milliseconds of audio to buffer
    pub buffer_ms: u32,
}

impl StreamSettings {
    /// Bytes in one frame: `sample_size * n_channels`
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.sample_size as usize * self.n_channels as usize
    }

    /// Ring capacity in bytes, rounded down to a whole frame
    ///
    /// `sample_rate * n_channels * sample_size * buffer_ms / 1000`, or
    /// `None` if the arithmetic overflows `usize`.
    pub fn capacity_bytes(&self) -> Option<usize> {
        let frame = self.frame_size();
        if frame == 0 {
            return Some(0);
        }
        let raw = frame
            .checked_mul(self.sample_rate as usize)?
            .checked_mul(self.buffer_ms as usize)?
            / 1000;
        Some(raw / frame * frame)
    }
}

/// Where a stream is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Built but never started; the clock is not ticking
    Created,
    /// The clock is draining the buffer
    Playing,
    /// The clock is stopped; buffered bytes are retained
    Paused,
    /// Terminal; the clock driver has exited
    Stopped,
}

/// Handed to the refill callback while the dispatch lock is held
///
/// Writing through this is the reentrancy-safe path: the buffer is already
/// under exclusive access, so no extra locking happens (and calling
/// [`Stream::write`] from inside the callback would deadlock).
pub struct Refill<'a> {
    buffer: &'a FrameBuffer,
    producer_seen: &'a AtomicBool,
    requested: usize,
}

impl<'a> Refill<'a> {
    pub(crate) fn new(
        buffer: &'a FrameBuffer,
        producer_seen: &'a AtomicBool,
        requested: usize,
    ) -> Self {
        Self {
            buffer,
            producer_seen,
            requested,
        }
    }

    /// Bytes the sink would like: free space up to capacity
    #[inline]
    pub fn requested(&self) -> usize {
        self.requested
    }

    /// Append bytes to the buffer tail, all or nothing
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.producer_seen.store(true, Ordering::Relaxed);
        self.buffer.write(bytes)
    }
}

type RefillFn = Box<dyn FnMut(&mut Refill<'_>) + Send + 'static>;

/// State shared between a stream handle and its clock driver task
pub(crate) struct StreamShared {
    settings: StreamSettings,
    buffer: FrameBuffer,
    state: Mutex<StreamState>,
    dispatch: Arc<DispatchShared>,
    /// The callback slot lives behind its own mutex, but both the driver and
    /// the setters take the dispatch mutex first, so a swap can never
    /// overlap an in-flight dispatch.
    refill: Mutex<Option<RefillFn>>,
    refill_set: AtomicBool,
    /// Whether anything was ever written; pure silence mode (no producer)
    /// does not count underruns.
    producer_seen: AtomicBool,
    underruns: AtomicU64,
    bytes_consumed: AtomicU64,
}

/// Control messages for the clock driver, each acked for the blocking
/// rendezvous in [`Stream::play`] and [`Stream::close`]
pub(crate) enum Command {
    SetPlaying(bool, oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// A simulated audio sink
///
/// Bytes written to the stream are drained on a wall-clock schedule at the
/// configured byte rate, exactly as a real output device would consume them.
/// When occupancy falls below half the capacity the refill callback is
/// invoked (under the dispatch lock) to ask for more.
///
/// Control methods block and must be called from outside the host runtime
/// (i.e. from ordinary threads, like a C audio API).
pub struct Stream {
    shared: Arc<StreamShared>,
    commands: mpsc::UnboundedSender<Command>,
    driver: JoinHandle<()>,
    host: Arc<HostInner>,
    /// Present in self-contained mode; shut down when the stream closes
    own_host: Option<Host>,
    /// Serializes start/play/close against each other across threads
    control: Mutex<()>,
    closed: bool,
}

impl Stream {
    /// Self-contained mode: open a stream on a private host
    pub fn open(settings: StreamSettings) -> Result<Self> {
        let host = Host::new()?;
        let inner = host.inner().clone();
        Self::build(inner, None, Some(host), settings)
    }

    /// Open a stream on a shared host with a private dispatch lock
    pub fn open_on(host: &Host, settings: StreamSettings) -> Result<Self> {
        Self::build(host.inner().clone(), None, None, settings)
    }

    /// Open a stream whose callbacks are serialized by `lock`
    ///
    /// Fails with [`Error::HostMismatch`] if `lock` was created from a
    /// different host.
    pub fn open_with(host: &Host, lock: &DispatchLock, settings: StreamSettings) -> Result<Self> {
        if !Arc::ptr_eq(host.inner(), lock.host()) {
            return Err(Error::HostMismatch);
        }
        Self::build(host.inner().clone(), Some(lock.shared()), None, settings)
    }

    fn build(
        host: Arc<HostInner>,
        dispatch: Option<Arc<DispatchShared>>,
        own_host: Option<Host>,
        settings: StreamSettings,
    ) -> Result<Self> {
        let buffer = FrameBuffer::new(&settings)?;
        host.attach()?;

        let shared = Arc::new(StreamShared {
            settings,
            buffer,
            state: Mutex::new(StreamState::Created),
            dispatch: dispatch.unwrap_or_default(),
            refill: Mutex::new(None),
            refill_set: AtomicBool::new(false),
            producer_seen: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            bytes_consumed: AtomicU64::new(0),
        });

        let (commands, command_rx) = mpsc::unbounded_channel();
        let driver = host.spawn(driver::run(shared.clone(), command_rx));
        debug!(?settings, capacity = shared.buffer.capacity(), "stream opened");

        Ok(Self {
            shared,
            commands,
            driver,
            host,
            own_host,
            control: Mutex::new(()),
            closed: false,
        })
    }

    /// Begin playback from the `Created` state
    ///
    /// Returns once the clock is actually ticking. Fails with
    /// [`Error::AlreadyStarted`] if the stream ever left `Created`.
    pub fn start(&self) -> Result<()> {
        let _control = self.control.lock();
        match self.state() {
            StreamState::Created => self.rendezvous(true),
            StreamState::Stopped => Err(Error::Stopped),
            _ => Err(Error::AlreadyStarted),
        }
    }

    /// Resume (`true`) or pause (`false`) playback
    ///
    /// Blocks until the clock driver has applied the transition, so a state
    /// read on any thread after this returns sees the new state. Idempotent
    /// when the stream is already in the requested state.
    pub fn play(&self, play: bool) -> Result<()> {
        let _control = self.control.lock();
        match (self.state(), play) {
            (StreamState::Stopped, _) => Err(Error::Stopped),
            (StreamState::Playing, true) => Ok(()),
            (StreamState::Paused | StreamState::Created, false) => Ok(()),
            _ => self.rendezvous(play),
        }
    }

    /// Send a command to the clock driver and wait for the ack
    fn rendezvous(&self, play: bool) -> Result<()> {
        let (ack, applied) = oneshot::channel();
        self.commands
            .send(Command::SetPlaying(play, ack))
            .map_err(|_| Error::Disconnected)?;
        applied.blocking_recv().map_err(|_| Error::Disconnected)
    }

    /// Append bytes to the buffer tail, all or nothing
    ///
    /// Blocks on the dispatch lock first, so a write from outside the refill
    /// callback is serialized against callback dispatch. From *inside* the
    /// callback use [`Refill::write`] instead; this method would deadlock
    /// there, since the driver already holds the lock.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.state() == StreamState::Stopped {
            return Err(Error::Stopped);
        }
        let _lock = self.shared.dispatch.lock();
        self.shared.producer_seen.store(true, Ordering::Relaxed);
        self.shared.buffer.write(bytes)
    }

    /// Like [`write`](Stream::write) but fails with [`Error::LockHeld`]
    /// instead of blocking when the dispatch lock is taken
    pub fn try_write(&self, bytes: &[u8]) -> Result<()> {
        if self.state() == StreamState::Stopped {
            return Err(Error::Stopped);
        }
        let _lock = self.shared.dispatch.try_lock().ok_or(Error::LockHeld)?;
        self.shared.producer_seen.store(true, Ordering::Relaxed);
        self.shared.buffer.write(bytes)
    }

    /// Install the refill callback, replacing any previous one
    ///
    /// Takes the dispatch lock first, so this blocks until an in-flight
    /// dispatch of the old callback has returned.
    pub fn set_refill<F>(&self, callback: F)
    where
        F: FnMut(&mut Refill<'_>) + Send + 'static,
    {
        let _lock = self.shared.dispatch.lock();
        *self.shared.refill.lock() = Some(Box::new(callback));
        self.shared.refill_set.store(true, Ordering::Relaxed);
    }

    /// Non-blocking [`set_refill`](Stream::set_refill); fails with
    /// [`Error::Busy`] while a dispatch is in flight
    pub fn try_set_refill<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&mut Refill<'_>) + Send + 'static,
    {
        let _lock = self.shared.dispatch.try_lock().ok_or(Error::Busy)?;
        *self.shared.refill.lock() = Some(Box::new(callback));
        self.shared.refill_set.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Remove the refill callback; the stream plays silence from then on
    pub fn clear_refill(&self) {
        let _lock = self.shared.dispatch.lock();
        self.shared.refill_set.store(false, Ordering::Relaxed);
        *self.shared.refill.lock() = None;
    }

    /// Stop the clock and release the stream's resources
    ///
    /// Blocks until the driver has confirmed it stopped: after this returns
    /// no tick runs and no callback fires. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let _control = self.control.lock();
        if self.closed {
            return Ok(());
        }

        let (ack, stopped) = oneshot::channel();
        if self.commands.send(Command::Stop(ack)).is_ok() {
            let _ = stopped.blocking_recv();
        } else {
            // Driver is already gone; record the terminal state ourselves.
            *self.shared.state.lock() = StreamState::Stopped;
        }
        self.driver.abort();

        // Drop the user's closure while the stream is provably quiescent.
        self.shared.refill_set.store(false, Ordering::Relaxed);
        *self.shared.refill.lock() = None;

        self.closed = true;
        self.host.detach();
        if let Some(host) = self.own_host.take() {
            let _ = host.shutdown();
        }
        debug!("stream closed");
        Ok(())
    }

    /// Current lifecycle state
    #[inline]
    pub fn state(&self) -> StreamState {
        *self.shared.state.lock()
    }

    /// The settings this stream was built with
    #[inline]
    pub fn settings(&self) -> StreamSettings {
        self.shared.settings
    }

    /// Bytes currently buffered
    #[inline]
    pub fn occupancy(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Ring capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.buffer.capacity()
    }

    /// Occupancy threshold below which a refill is requested
    #[inline]
    pub fn low_water(&self) -> usize {
        self.shared.buffer.low_water()
    }

    /// Ticks on which the clock wanted more bytes than were buffered
    #[inline]
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Total bytes the clock has consumed
    #[inline]
    pub fn bytes_consumed(&self) -> u64 {
        self.shared.bytes_consumed.load(Ordering::Relaxed)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
