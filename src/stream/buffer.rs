//! Bounded byte ring holding not-yet-consumed audio

use crossbeam_queue::ArrayQueue;

use crate::error::{Error, Result};
use crate::stream::StreamSettings;

/// How often the clock fires
pub(crate) const TICK_MS: u64 = 10;
const TICKS_PER_SECOND: usize = (1000 / TICK_MS) as usize;

/// Ring buffer of raw PCM bytes plus the sizing derived from settings
///
/// All producers are serialized through the dispatch lock, so the free-space
/// check in [`write`](FrameBuffer::write) cannot race another writer; the
/// clock draining concurrently only ever *grows* free space.
pub(crate) struct FrameBuffer {
    data: ArrayQueue<u8>,
    /// sample_size * n_channels, the minimum unit we account in
    frame_size: usize,
    /// Bytes the clock consumes per tick
    tick_bytes: usize,
    /// Occupancy below this requests a refill
    low_water: usize,
}

impl FrameBuffer {
    /// Validate `settings` and size the ring from them
    pub(crate) fn new(settings: &StreamSettings) -> Result<Self> {
        if settings.sample_size == 0 {
            return Err(Error::InvalidSettings("sample_size must be nonzero"));
        }
        if settings.n_channels == 0 {
            return Err(Error::InvalidSettings("n_channels must be nonzero"));
        }
        if settings.sample_rate == 0 {
            return Err(Error::InvalidSettings("sample_rate must be nonzero"));
        }

        let frame_size = settings.sample_size as usize * settings.n_channels as usize;
        let capacity = settings
            .capacity_bytes()
            .ok_or(Error::InvalidSettings("buffer size overflows"))?;
        if capacity == 0 {
            return Err(Error::InvalidSettings(
                "buffer_ms too small to hold one frame",
            ));
        }

        let tick_bytes = (settings.sample_rate as usize / TICKS_PER_SECOND) * frame_size;
        let low_water = (capacity / 2 / frame_size) * frame_size;

        Ok(Self {
            data: ArrayQueue::new(capacity),
            frame_size,
            tick_bytes,
            low_water,
        })
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Bytes that can still be written before the ring is full
    #[inline]
    pub(crate) fn free(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    #[inline]
    pub(crate) fn frame_size(&self) -> usize {
        self.frame_size
    }

    #[inline]
    pub(crate) fn tick_bytes(&self) -> usize {
        self.tick_bytes
    }

    #[inline]
    pub(crate) fn low_water(&self) -> usize {
        self.low_water
    }

    /// Append `bytes` to the tail, all or nothing
    pub(crate) fn write(&self, bytes: &[u8]) -> Result<()> {
        let available = self.free();
        if bytes.len() > available {
            return Err(Error::BufferOverflow {
                requested: bytes.len(),
                available,
            });
        }

        for &b in bytes {
            // Cannot fail: producers are serialized and we checked above.
            let _ = self.data.push(b);
        }
        Ok(())
    }

    /// Remove up to `n` bytes from the front, returning how many existed
    pub(crate) fn drain(&self, n: usize) -> usize {
        let mut drained = 0;
        while drained < n {
            if self.data.pop().is_none() {
                break;
            }
            drained += 1;
        }
        drained
    }
}
