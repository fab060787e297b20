// this_file: src/bufpool.rs

//! Bounded pool of reusable tile iteration buffers.
//!
//! A worker leases a buffer before computing a tile; the lease travels with
//! the finished tile through the completion queue and returns to the pool
//! when the controller drops it after compositing. The pool therefore bounds
//! how many tiles can be in flight at once: with a capacity of 1 only one
//! tile is ever mid-compute or awaiting compositing, whatever the worker
//! count.

use crate::error::{Error, Result};
use crate::queue::{Closed, ControlledQueue};
use log::{debug, trace};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Square grid of per-sample iteration counts, row-major.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationBuffer {
    side: usize,
    counts: Vec<u32>,
}

impl IterationBuffer {
    /// Allocate a zeroed `side` x `side` buffer.
    pub fn new(side: usize) -> Result<Self> {
        let len = side.checked_mul(side).ok_or(Error::Allocation { bytes: usize::MAX })?;
        let mut counts = Vec::new();
        counts
            .try_reserve_exact(len)
            .map_err(|_| Error::Allocation {
                bytes: len.saturating_mul(std::mem::size_of::<u32>()),
            })?;
        counts.resize(len, 0);
        Ok(Self { side, counts })
    }

    /// Edge length in samples.
    #[inline]
    pub fn side(&self) -> usize {
        self.side
    }

    /// All counts, row-major.
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.counts
    }

    /// Count at (x, y).
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<u32> {
        if x >= self.side || y >= self.side {
            return None;
        }
        self.counts.get(y * self.side + x).copied()
    }

    /// One row of counts.
    #[inline]
    pub fn row(&self, y: usize) -> Option<&[u32]> {
        let start = y.checked_mul(self.side)?;
        self.counts.get(start..start + self.side)
    }

    /// One row of counts, writable.
    #[inline]
    pub fn row_mut(&mut self, y: usize) -> Option<&mut [u32]> {
        let start = y.checked_mul(self.side)?;
        self.counts.get_mut(start..start + self.side)
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Buffers owned by the pool
    pub capacity: usize,
    /// Buffers sitting in the pool
    pub available: usize,
    /// Buffers currently leased out
    pub leased: usize,
}

struct PoolShared {
    free: ControlledQueue<IterationBuffer>,
    capacity: usize,
    leased: AtomicUsize,
}

/// Fixed-capacity pool of [`IterationBuffer`]s.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
    tile_size: usize,
}

impl BufferPool {
    /// Create a pool pre-seeded with `capacity` buffers of `tile_size`^2 samples.
    pub fn new(capacity: usize, tile_size: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "Buffer pool capacity must be at least 1".into(),
            ));
        }
        let free = ControlledQueue::new();
        for _ in 0..capacity {
            free.send(IterationBuffer::new(tile_size)?)
                .map_err(|_| Error::Closed)?;
        }
        debug!("Buffer pool ready: {} x {}^2 samples", capacity, tile_size);
        Ok(Self {
            shared: Arc::new(PoolShared {
                free,
                capacity,
                leased: AtomicUsize::new(0),
            }),
            tile_size,
        })
    }

    /// Lease a buffer, blocking until one is free.
    pub fn acquire(&self) -> std::result::Result<PooledBuffer, Closed> {
        let buf = self.shared.free.recv()?;
        Ok(self.lease(buf))
    }

    /// Lease a buffer if one is free right now.
    pub fn try_acquire(&self) -> std::result::Result<Option<PooledBuffer>, Closed> {
        Ok(self.shared.free.try_recv()?.map(|buf| self.lease(buf)))
    }

    fn lease(&self, buf: IterationBuffer) -> PooledBuffer {
        self.shared.leased.fetch_add(1, Ordering::AcqRel);
        trace!("Buffer leased");
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.shared),
        }
    }

    /// Close the pool. Blocked and future `acquire` calls return `Closed`;
    /// leases dropped afterwards free their buffer instead of returning it.
    pub fn close(&self) -> bool {
        self.shared.free.close()
    }

    /// Number of buffers the pool was seeded with.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Edge length of each buffer.
    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.shared.capacity,
            available: self.shared.free.len(),
            leased: self.shared.leased.load(Ordering::Acquire),
        }
    }
}

/// RAII lease that returns its buffer to the pool on drop.
pub struct PooledBuffer {
    buf: IterationBuffer,
    pool: Arc<PoolShared>,
}

impl PooledBuffer {
    /// Give the buffer back to the pool now.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.leased.fetch_sub(1, Ordering::AcqRel);
        if self.pool.free.send(buf).is_err() {
            trace!("Buffer pool closed, discarding buffer");
        }
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = IterationBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("side", &self.buf.side())
            .finish()
    }
}
