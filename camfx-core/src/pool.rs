//! # Buffer Pool - Bounded Output Buffer Recycling
//!
//! Every rendered frame lands in a buffer checked out of a pool that was
//! sized when the engine was prepared. Sinks hold on to a `PooledBuffer`
//! for as long as they need it (display, encode, persist); dropping it hands
//! the storage back for the next frame.
//!
//! ```text
//!  prepare ──► allocate(threshold) ──► preallocate ──► [free list]
//!                                                        │     ▲
//!                                              checkout  ▼     │ drop
//!                                                   PooledBuffer (sink)
//! ```
//!
//! At most `threshold` buffers are out at once. Past that, `checkout` fails
//! immediately with `Exhausted`; the caller drops the frame.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::format::{ColorSpace, FormatDescription, PixelBuffer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Pool needs room for at least one buffer")]
    ZeroCapacity,
    #[error("Buffer allocation failed: {0}")]
    AllocationFailed(String),
    #[error("Buffer pool exhausted ({threshold} buffers in flight)")]
    Exhausted { threshold: usize },
}

/// Allocation limits applied when a pool is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOptions {
    /// Upper bound on the bytes a single pool may hold
    pub max_bytes: Option<usize>,
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub generation: u64,
    pub threshold: usize,
    /// Buffers currently checked out
    pub outstanding: usize,
    /// Buffers resident in the free list
    pub available: usize,
    pub total_allocated: u64,
    pub total_recycled: u64,
    /// Checkouts refused because the threshold was reached
    pub exhausted: u64,
}

struct Slots {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

struct PoolShared {
    format: FormatDescription,
    color_space: ColorSpace,
    threshold: usize,
    buffer_len: usize,
    generation: u64,
    slots: Mutex<Slots>,
    allocated: AtomicU64,
    recycled: AtomicU64,
    exhausted: AtomicU64,
}

impl PoolShared {
    fn recycle(&self, data: Vec<u8>) {
        let mut slots = self.slots.lock();
        slots.outstanding = slots.outstanding.saturating_sub(1);
        if data.len() == self.buffer_len {
            slots.free.push(data);
        }
    }

    fn release_slot(&self) {
        let mut slots = self.slots.lock();
        slots.outstanding = slots.outstanding.saturating_sub(1);
    }
}

/// Fixed-format pool of reusable output buffers
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create an empty pool for `format` that allows `count_hint` buffers in flight.
    ///
    /// Nothing is allocated yet; call [`BufferPool::preallocate`] to do that
    /// up front.
    pub fn allocate(
        format: FormatDescription,
        color_space: ColorSpace,
        count_hint: usize,
        options: PoolOptions,
    ) -> Result<Self, PoolError> {
        static GENERATION: AtomicU64 = AtomicU64::new(0);

        if count_hint == 0 {
            return Err(PoolError::ZeroCapacity);
        }

        let buffer_len = format
            .buffer_len()
            .map_err(|e| PoolError::AllocationFailed(e.to_string()))?;
        let total = buffer_len.checked_mul(count_hint).ok_or_else(|| {
            PoolError::AllocationFailed(format!(
                "{} buffers of {} bytes overflow the address space",
                count_hint, buffer_len
            ))
        })?;
        if let Some(max_bytes) = options.max_bytes {
            if total > max_bytes {
                return Err(PoolError::AllocationFailed(format!(
                    "{} bytes requested, pool budget is {} bytes",
                    total, max_bytes
                )));
            }
        }

        let mut free = Vec::new();
        free.try_reserve_exact(count_hint).map_err(|e| {
            PoolError::AllocationFailed(format!("free list for {} buffers: {}", count_hint, e))
        })?;

        let generation = GENERATION.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Buffer pool generation {}: {}x{} {}, {} buffers of {} bytes",
            generation,
            format.width,
            format.height,
            format.layout,
            count_hint,
            buffer_len
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                format,
                color_space,
                threshold: count_hint,
                buffer_len,
                generation,
                slots: Mutex::new(Slots {
                    free,
                    outstanding: 0,
                }),
                allocated: AtomicU64::new(0),
                recycled: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
            }),
        })
    }

    /// Draw up to `count` buffers and release them straight away, so the
    /// storage exists before the first frame arrives.
    ///
    /// Returns how many buffers are now resident in the free list.
    pub fn preallocate(&self, count: usize) -> Result<usize, PoolError> {
        let target = count.min(self.shared.threshold);
        let mut drawn = Vec::new();
        drawn
            .try_reserve_exact(target)
            .map_err(|e| PoolError::AllocationFailed(e.to_string()))?;
        for _ in 0..target {
            match self.try_checkout()? {
                Some(buffer) => drawn.push(buffer),
                None => break,
            }
        }
        drop(drawn);
        Ok(self.shared.slots.lock().free.len())
    }

    /// Take a buffer out of the pool, allocating one if the free list is empty.
    ///
    /// Fails fast with `Exhausted` once `threshold` buffers are checked out.
    pub fn checkout(&self) -> Result<PooledBuffer, PoolError> {
        match self.try_checkout()? {
            Some(buffer) => Ok(buffer),
            None => {
                self.shared.exhausted.fetch_add(1, Ordering::Relaxed);
                Err(PoolError::Exhausted {
                    threshold: self.shared.threshold,
                })
            }
        }
    }

    fn try_checkout(&self) -> Result<Option<PooledBuffer>, PoolError> {
        let reused = {
            let mut slots = self.shared.slots.lock();
            if slots.outstanding >= self.shared.threshold {
                return Ok(None);
            }
            slots.outstanding += 1;
            slots.free.pop()
        };

        let data = match reused {
            Some(data) => {
                self.shared.recycled.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => match allocate_storage(self.shared.buffer_len) {
                Ok(data) => {
                    self.shared.allocated.fetch_add(1, Ordering::Relaxed);
                    data
                }
                Err(e) => {
                    self.shared.release_slot();
                    return Err(e);
                }
            },
        };

        Ok(Some(PooledBuffer {
            buffer: Some(PixelBuffer::from_pool_storage(self.shared.format, data)),
            pool: Arc::clone(&self.shared),
        }))
    }

    pub fn format(&self) -> &FormatDescription {
        &self.shared.format
    }

    pub fn color_space(&self) -> ColorSpace {
        self.shared.color_space
    }

    /// Maximum number of buffers checked out at once
    pub fn threshold(&self) -> usize {
        self.shared.threshold
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation
    }

    pub fn stats(&self) -> PoolStats {
        let (outstanding, available) = {
            let slots = self.shared.slots.lock();
            (slots.outstanding, slots.free.len())
        };
        PoolStats {
            generation: self.shared.generation,
            threshold: self.shared.threshold,
            outstanding,
            available,
            total_allocated: self.shared.allocated.load(Ordering::Relaxed),
            total_recycled: self.shared.recycled.load(Ordering::Relaxed),
            exhausted: self.shared.exhausted.load(Ordering::Relaxed),
        }
    }
}

fn allocate_storage(len: usize) -> Result<Vec<u8>, PoolError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|e| PoolError::AllocationFailed(e.to_string()))?;
    data.resize(len, 0);
    Ok(data)
}

// ============================================================================
// Pooled Buffer
// ============================================================================

/// A checked-out output buffer. Dropping it returns the storage to the
/// pool generation it came from.
pub struct PooledBuffer {
    buffer: Option<PixelBuffer>,
    pool: Arc<PoolShared>,
}

impl PooledBuffer {
    pub fn generation(&self) -> u64 {
        self.pool.generation
    }

    /// Color space the pool renders into
    pub fn color_space(&self) -> ColorSpace {
        self.pool.color_space
    }
}

impl Deref for PooledBuffer {
    type Target = PixelBuffer;

    fn deref(&self) -> &PixelBuffer {
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer used after release"),
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut PixelBuffer {
        match &mut self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("pooled buffer used after release"),
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.recycle(buffer.into_data());
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("generation", &self.pool.generation)
            .field("format", &self.buffer.as_ref().map(|b| *b.format()))
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(threshold: usize) -> BufferPool {
        BufferPool::allocate(
            FormatDescription::bgra(64, 32),
            ColorSpace::DeviceRgb,
            threshold,
            PoolOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_preallocate_then_checkout() {
        for n in 1..=4 {
            let pool = pool(n);
            assert_eq!(pool.preallocate(n).unwrap(), n);

            let held: Vec<_> = (0..n).map(|_| pool.checkout().unwrap()).collect();
            assert_eq!(
                pool.checkout().unwrap_err(),
                PoolError::Exhausted { threshold: n }
            );

            let stats = pool.stats();
            assert_eq!(stats.total_allocated, n as u64);
            assert_eq!(stats.total_recycled, n as u64);
            assert_eq!(stats.outstanding, n);
            assert_eq!(stats.exhausted, 1);
            drop(held);
        }
    }

    #[test]
    fn test_release_makes_room() {
        let pool = pool(2);
        pool.preallocate(2).unwrap();

        let a = pool.checkout().unwrap();
        let _b = pool.checkout().unwrap();
        assert!(pool.checkout().is_err());

        drop(a);
        let c = pool.checkout().unwrap();
        assert_eq!(c.width(), 64);
        assert_eq!(c.height(), 32);
        assert_eq!(pool.stats().total_allocated, 2);
    }

    #[test]
    fn test_preallocate_is_capped_by_threshold() {
        let pool = pool(3);
        assert_eq!(pool.preallocate(10).unwrap(), 3);
        assert_eq!(pool.stats().exhausted, 0);
    }

    #[test]
    fn test_live_buffers_never_exceed_threshold() {
        let pool = pool(2);
        assert_eq!(pool.threshold(), 2);

        let live: Vec<_> = (0..10).filter_map(|_| pool.checkout().ok()).collect();
        assert_eq!(live.len(), 2);

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 2);
        assert_eq!(stats.exhausted, 8);
    }

    #[test]
    fn test_oversized_hint_is_an_allocation_failure() {
        let err = BufferPool::allocate(
            FormatDescription::bgra(1, 1),
            ColorSpace::DeviceRgb,
            1 << 40,
            PoolOptions::default(),
        )
        .err();
        assert!(matches!(err, Some(PoolError::AllocationFailed(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = BufferPool::allocate(
            FormatDescription::bgra(8, 8),
            ColorSpace::DeviceRgb,
            0,
            PoolOptions::default(),
        )
        .err();
        assert_eq!(err, Some(PoolError::ZeroCapacity));
    }

    #[test]
    fn test_memory_budget() {
        let format = FormatDescription::bgra(100, 100);
        let options = PoolOptions {
            max_bytes: Some(100 * 100 * 4 * 2),
        };
        assert!(BufferPool::allocate(format, ColorSpace::DeviceRgb, 2, options).is_ok());
        assert!(matches!(
            BufferPool::allocate(format, ColorSpace::DeviceRgb, 3, options),
            Err(PoolError::AllocationFailed(_))
        ));
    }

    #[test]
    fn test_buffers_outlive_pool() {
        let pool = pool(2);
        let buffer = pool.checkout().unwrap();
        let generation = pool.generation();
        drop(pool);
        assert_eq!(buffer.generation(), generation);
        drop(buffer);
    }

    #[test]
    fn test_concurrent_checkout_respects_threshold() {
        use std::sync::Barrier;

        let pool = Arc::new(pool(4));
        pool.preallocate(4).unwrap();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let result = pool.checkout();
                    // hold whatever we got until every thread has tried
                    barrier.wait();
                    result.is_ok()
                })
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 4);
        let stats = pool.stats();
        assert_eq!(stats.total_allocated, 4);
        assert_eq!(stats.exhausted, 4);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.available, 4);
    }
}
