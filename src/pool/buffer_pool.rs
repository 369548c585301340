//! Size-class buffer pool with a global byte budget.
//!
//! Requests are rounded up to `initial_buffer_size * 2^k`. Each class keeps a
//! lock-free free list of idle buffers. New memory is only allocated when the
//! free list is empty and the budget counter can be raised without crossing
//! `max_buffer_size`; otherwise the pool drains idle buffers and answers
//! [`Acquire::Full`].
//!
//! # Thread Safety
//!
//! [`BufferPool`] is `Send + Sync` and cheap to clone. The free lists are
//! lock-free queues, the budget is a single atomic updated by
//! compare-and-swap, and the class table is a fixed array of `OnceLock`
//! slots, so neither acquire nor release takes a lock once a class exists.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::budget::Budget;
use super::buffer::Buffer;
use super::config::PoolConfig;
use super::size_class::SizeClasses;
use crate::error::{Error, Result};
use crate::metrics::{PoolMetrics, PoolStats};

/// Outcome of [`BufferPool::acquire`].
#[must_use]
#[derive(Debug)]
pub enum Acquire {
    /// A buffer with `position == 0` and `limit == capacity`
    Ready(Buffer),
    /// The budget does not allow growth. Back off and try again later.
    Full,
}

impl Acquire {
    /// Convert into an `Option`, mapping `Full` to `None`.
    pub fn ready(self) -> Option<Buffer> {
        match self {
            Acquire::Ready(buffer) => Some(buffer),
            Acquire::Full => None,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Acquire::Full)
    }
}

/// State shared between the pool handles and every buffer they hand out.
pub(crate) struct PoolShared {
    config: PoolConfig,
    classes: SizeClasses,
    budget: Budget,
    metrics: PoolMetrics,
}

impl PoolShared {
    /// Put a buffer's storage back on its class's free list.
    ///
    /// The budget is not touched: the bytes stay allocated until a bulk
    /// release frees them.
    pub(crate) fn recycle(&self, data: Box<[u8]>) -> Result<()> {
        let capacity = data.len();
        let Some(class) = self.classes.get(capacity) else {
            self.metrics.inc(&self.metrics.integrity_violations);
            error!("No size class for returned buffer of {} bytes", capacity);
            return Err(Error::IntegrityViolation { capacity });
        };
        class.push(data);
        self.metrics.inc(&self.metrics.returns);
        Ok(())
    }

    pub(crate) fn note_implicit_return(&self) {
        self.metrics.inc(&self.metrics.implicit_returns);
    }

    /// Drain every free list, shrinking the budget by what was freed.
    /// Returns `(buffers, bytes)` reclaimed.
    fn release_idle(&self) -> (usize, usize) {
        let mut buffers = 0;
        let mut bytes = 0;
        for class in self.classes.iter() {
            while let Some(data) = class.pop() {
                self.budget.shrink(data.len());
                bytes += data.len();
                buffers += 1;
            }
        }

        if buffers > 0 {
            self.metrics.add(&self.metrics.reclaimed_buffers, buffers as u64);
            self.metrics.add(&self.metrics.reclaimed_bytes, bytes as u64);
            debug!("Released {} idle buffers ({} bytes)", buffers, bytes);
        }
        (buffers, bytes)
    }
}

/// Allocate a zeroed block, reporting allocator refusal instead of aborting.
fn allocate(size: usize) -> Result<Box<[u8]>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|_| Error::Alloc { size })?;
    data.resize(size, 0);
    Ok(data.into_boxed_slice())
}

/// Recycling pool of fixed-size buffers bounded by a global byte budget.
///
/// Construct one explicitly and share it (it is `Clone`) with every
/// collaborator that needs scratch memory.
///
/// # Example
///
/// ```
/// use logship_pool::{Acquire, BufferPool, PoolConfig};
///
/// let pool = BufferPool::new(PoolConfig::new(64, 128)).unwrap();
/// let Acquire::Ready(buf) = pool.acquire(50).unwrap() else {
///     panic!("pool should have room");
/// };
/// assert_eq!(buf.capacity(), 64);
/// assert_eq!(pool.allocated(), 64);
/// pool.release(buf).unwrap();
/// assert_eq!(pool.allocated(), 64);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.shared.config)
            .field("allocated", &self.shared.budget.current())
            .field("size_classes", &self.shared.classes.len())
            .finish()
    }
}

impl BufferPool {
    /// Create a pool. No memory is allocated up front.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                classes: SizeClasses::new(config.initial_buffer_size),
                budget: Budget::new(config.max_buffer_size),
                metrics: PoolMetrics::new(),
            }),
        })
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Smallest size class that can hold `requested` bytes.
    pub fn normalize(&self, requested: usize) -> Result<usize> {
        self.shared.classes.normalize(requested)
    }

    /// Get a buffer of at least `requested` bytes.
    ///
    /// An idle buffer of the matching class is reused when one exists.
    /// Otherwise fresh memory is allocated if the budget allows it. When it
    /// does not, idle buffers of every class are freed and `Full` is
    /// returned; the freed room only benefits later calls.
    ///
    /// # Errors
    ///
    /// - [`Error::SizeOverflow`]: the size class does not fit in `usize`
    /// - [`Error::Alloc`]: the system allocator refused the memory
    pub fn acquire(&self, requested: usize) -> Result<Acquire> {
        let shared = &self.shared;
        let class = shared.classes.class_for(requested)?;
        let size = class.size();

        if let Some(data) = class.pop() {
            shared.metrics.inc(&shared.metrics.hits);
            return Ok(Acquire::Ready(self.wrap(data)));
        }

        if !shared.budget.try_grow(size) {
            shared.metrics.inc(&shared.metrics.full);
            let (buffers, bytes) = shared.release_idle();
            warn!(
                "Buffer pool full: class={} allocated={} max={} reclaimed_buffers={} reclaimed_bytes={}",
                size,
                shared.budget.current(),
                shared.budget.max(),
                buffers,
                bytes
            );
            return Ok(Acquire::Full);
        }

        match allocate(size) {
            Ok(data) => {
                shared.metrics.inc(&shared.metrics.misses);
                Ok(Acquire::Ready(self.wrap(data)))
            }
            Err(e) => {
                shared.budget.shrink(size);
                error!("Failed to allocate {} byte buffer", size);
                Err(e)
            }
        }
    }

    /// Return a buffer acquired from this pool.
    ///
    /// The cursor is reset and the memory goes back on its class's free
    /// list. The budget counter is unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::IntegrityViolation`] if the buffer came from another pool.
    /// The rejected buffer goes back to the pool that created it.
    pub fn release(&self, mut buffer: Buffer) -> Result<()> {
        if !buffer.belongs_to(&self.shared) {
            let capacity = buffer.capacity();
            self.shared.metrics.inc(&self.shared.metrics.integrity_violations);
            error!(
                "Rejected release of foreign buffer ({} bytes) into pool",
                capacity
            );
            return Err(Error::IntegrityViolation { capacity });
        }

        match buffer.take_storage() {
            Some(data) => self.shared.recycle(data),
            None => Ok(()),
        }
    }

    /// Free every idle buffer and shrink the budget accordingly.
    ///
    /// Buffers currently checked out are unaffected and stay counted.
    /// Returns the number of bytes reclaimed.
    pub fn release_idle(&self) -> usize {
        self.shared.release_idle().1
    }

    /// Free idle memory at shutdown and log final statistics.
    ///
    /// Buffers still checked out keep working and return to the pool when
    /// released or dropped.
    pub fn shutdown(&self) -> usize {
        let reclaimed = self.release_idle();
        let stats = self.stats();
        info!(
            "Buffer pool shut down: reclaimed={} still_allocated={} hits={} misses={} full={}",
            reclaimed, stats.allocated_bytes, stats.hits, stats.misses, stats.full
        );
        reclaimed
    }

    /// Bytes allocated by the pool: checked out plus idle.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.shared.budget.current()
    }

    /// Idle buffer count per size class, ordered by class size.
    pub fn idle_buffers(&self) -> Vec<(usize, usize)> {
        self.shared
            .classes
            .iter()
            .map(|class| (class.size(), class.idle()))
            .collect()
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let m = &shared.metrics;
        let idle = self.idle_buffers();
        PoolStats {
            allocated_bytes: shared.budget.current() as u64,
            max_bytes: shared.budget.max() as u64,
            idle_buffers: idle.iter().map(|(_, n)| *n as u64).sum(),
            idle_bytes: idle.iter().map(|(size, n)| (size * n) as u64).sum(),
            size_classes: idle.len() as u64,
            hits: m.get(&m.hits),
            misses: m.get(&m.misses),
            full: m.get(&m.full),
            returns: m.get(&m.returns),
            implicit_returns: m.get(&m.implicit_returns),
            integrity_violations: m.get(&m.integrity_violations),
            reclaimed_buffers: m.get(&m.reclaimed_buffers),
            reclaimed_bytes: m.get(&m.reclaimed_bytes),
        }
    }

    fn wrap(&self, data: Box<[u8]>) -> Buffer {
        Buffer::new(data, Arc::downgrade(&self.shared))
    }

    #[cfg(test)]
    fn home(&self) -> std::sync::Weak<PoolShared> {
        Arc::downgrade(&self.shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use std::thread;

    fn pool(initial: usize, max: usize) -> BufferPool {
        BufferPool::new(PoolConfig::new(initial, max)).unwrap()
    }

    fn ready(pool: &BufferPool, size: usize) -> Buffer {
        match pool.acquire(size).unwrap() {
            Acquire::Ready(buf) => buf,
            Acquire::Full => panic!("pool unexpectedly full for {} bytes", size),
        }
    }

    #[test]
    fn test_acquire_normalizes_to_size_class() {
        let pool = pool(1024, 1 << 20);
        assert_eq!(ready(&pool, 1025).capacity(), 2048);
        assert_eq!(ready(&pool, 1).capacity(), 1024);
        assert_eq!(ready(&pool, 5000).capacity(), 8192);
    }

    #[test]
    fn test_budget_scenario() {
        let pool = pool(64, 128);

        let first = ready(&pool, 50);
        assert_eq!(first.capacity(), 64);
        assert_eq!(pool.allocated(), 64);

        let _second = ready(&pool, 50);
        assert_eq!(pool.allocated(), 128);

        assert!(pool.acquire(50).unwrap().is_full());

        pool.release(first).unwrap();
        assert_eq!(pool.allocated(), 128);
        assert_eq!(pool.idle_buffers(), vec![(64, 1)]);

        let reused = ready(&pool, 50);
        assert_eq!(reused.capacity(), 64);
        assert_eq!(pool.allocated(), 128);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.full, 1);
    }

    #[test]
    fn test_reuse_resets_cursor() {
        let pool = pool(64, 1024);

        let mut buf = ready(&pool, 64);
        buf.put_slice(b"stale record");
        buf.flip();
        pool.release(buf).unwrap();

        let buf = ready(&pool, 64);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit_pos(), buf.capacity());
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_budget_ceiling_without_returns() {
        let pool = pool(64, 1000);
        let mut held = Vec::new();
        let mut total = 0;

        for size in [10, 100, 200, 64, 300, 64, 64, 64] {
            match pool.acquire(size).unwrap() {
                Acquire::Ready(buf) => {
                    total += buf.capacity();
                    held.push(buf);
                }
                Acquire::Full => {
                    let class = pool.normalize(size).unwrap();
                    assert!(total + class > 1000);
                }
            }
            assert!(total <= 1000);
        }
        assert_eq!(pool.allocated(), total);
    }

    #[test]
    fn test_full_reclaims_idle_buffers_without_retry() {
        let pool = pool(64, 128);

        let small = ready(&pool, 64);
        pool.release(small).unwrap();
        let _held = ready(&pool, 64);
        let idle = ready(&pool, 64);
        pool.release(idle).unwrap();
        assert_eq!(pool.allocated(), 128);

        // Needs 128 bytes: no room, so the idle 64-byte buffer is freed
        // and this call still reports Full.
        assert!(pool.acquire(100).unwrap().is_full());
        assert_eq!(pool.allocated(), 64);
        assert_eq!(pool.idle_buffers(), vec![(64, 0), (128, 0)]);

        assert!(pool.acquire(30).unwrap().ready().is_some());
        assert_eq!(pool.allocated(), 128);
    }

    #[test]
    fn test_release_idle_drops_counter_by_idle_capacity() {
        let pool = pool(64, 1 << 20);
        let held = ready(&pool, 200);

        let bufs: Vec<_> = [64, 64, 100, 1000].iter().map(|&s| ready(&pool, s)).collect();
        let idle_bytes: usize = bufs.iter().map(|b| b.capacity()).sum();
        for buf in bufs {
            pool.release(buf).unwrap();
        }

        let before = pool.allocated();
        assert_eq!(pool.release_idle(), idle_bytes);
        assert_eq!(pool.allocated(), before - idle_bytes);
        assert_eq!(pool.allocated(), held.capacity());

        let misses = pool.stats().misses;
        let _fresh = ready(&pool, 64);
        assert_eq!(pool.stats().misses, misses + 1);
        assert_eq!(pool.stats().reclaimed_buffers, 4);
    }

    #[test]
    fn test_release_foreign_buffer_is_integrity_violation() {
        let a = pool(64, 1024);
        let b = pool(64, 1024);

        let buf = ready(&b, 64);
        assert_eq!(
            a.release(buf),
            Err(Error::IntegrityViolation { capacity: 64 })
        );
        assert_eq!(a.stats().integrity_violations, 1);
        assert_eq!(a.allocated(), 0);

        // The rejected buffer went home to `b`.
        assert_eq!(b.idle_buffers(), vec![(64, 1)]);
        assert_eq!(b.allocated(), 64);
    }

    #[test]
    fn test_release_with_unknown_class_is_integrity_violation() {
        let pool = pool(64, 1024);
        let forged = Buffer::new(vec![0u8; 96].into_boxed_slice(), pool.home());
        assert_eq!(
            pool.release(forged),
            Err(Error::IntegrityViolation { capacity: 96 })
        );
        assert_eq!(pool.allocated(), 0);
        assert!(pool.idle_buffers().is_empty());
    }

    #[test]
    fn test_dropped_buffer_with_unknown_class_is_not_counted_as_return() {
        let pool = pool(64, 1024);
        drop(Buffer::new(vec![0u8; 96].into_boxed_slice(), pool.home()));

        let stats = pool.stats();
        assert_eq!(stats.implicit_returns, 0);
        assert_eq!(stats.returns, 0);
        assert_eq!(stats.integrity_violations, 1);
    }

    #[test]
    fn test_release_into_class_not_yet_created_is_integrity_violation() {
        let pool = pool(64, 1024);
        let _held = ready(&pool, 64);
        let forged = Buffer::new(vec![0u8; 256].into_boxed_slice(), pool.home());
        assert_eq!(
            pool.release(forged),
            Err(Error::IntegrityViolation { capacity: 256 })
        );
        assert_eq!(pool.idle_buffers(), vec![(64, 0)]);
    }

    #[test]
    fn test_drop_returns_buffer_to_pool() {
        let pool = pool(64, 1024);
        {
            let _buf = ready(&pool, 64);
        }
        assert_eq!(pool.idle_buffers(), vec![(64, 1)]);
        assert_eq!(pool.allocated(), 64);

        let stats = pool.stats();
        assert_eq!(stats.returns, 1);
        assert_eq!(stats.implicit_returns, 1);
    }

    #[test]
    fn test_buffer_release_routes_to_home_pool() {
        let pool = pool(64, 1024);
        let buf = ready(&pool, 64);
        buf.release().unwrap();
        assert_eq!(pool.idle_buffers(), vec![(64, 1)]);
        assert_eq!(pool.stats().implicit_returns, 0);
    }

    #[test]
    fn test_buffer_outlives_pool() {
        let pool = pool(64, 1024);
        let mut buf = ready(&pool, 64);
        drop(pool);

        buf.put_slice(b"still usable");
        assert!(buf.release().is_ok());
    }

    #[test]
    fn test_oversized_request_is_error() {
        let pool = pool(3, usize::MAX);
        assert!(matches!(
            pool.acquire(usize::MAX - 1),
            Err(Error::SizeOverflow { .. })
        ));
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_request_above_budget_is_full() {
        let pool = pool(64, 128);
        assert!(pool.acquire(129).unwrap().is_full());
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            BufferPool::new(PoolConfig::new(0, 128)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_shutdown_keeps_borrowed_buffers_counted() {
        let pool = pool(64, 1024);
        let held = ready(&pool, 64);
        let idle = ready(&pool, 128);
        pool.release(idle).unwrap();

        assert_eq!(pool.shutdown(), 128);
        assert_eq!(pool.allocated(), 64);

        pool.release(held).unwrap();
        assert_eq!(pool.allocated(), 64);
        assert_eq!(pool.release_idle(), 64);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_concurrent_cycles_account_every_byte() {
        const THREADS: usize = 8;
        const CYCLES: usize = 500;

        let pool = pool(64, 64 << 20);
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for i in 0..CYCLES {
                        let size = 1 + (t * 131 + i * 37) % 4000;
                        let mut buf = ready(&pool, size);
                        assert_eq!(buf.position(), 0);
                        assert_eq!(buf.limit_pos(), buf.capacity());
                        buf.put_u64(i as u64);
                        if i % 10 == 0 {
                            held.push(buf);
                        } else {
                            pool.release(buf).unwrap();
                        }
                    }
                    held
                })
            })
            .collect();

        let outstanding: Vec<Buffer> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let outstanding_bytes: usize = outstanding.iter().map(|b| b.capacity()).sum();
        let stats = pool.stats();

        assert_eq!(stats.full, 0);
        assert_eq!(pool.allocated(), outstanding_bytes + stats.idle_bytes as usize);

        pool.release_idle();
        assert_eq!(pool.allocated(), outstanding_bytes);

        for buf in outstanding {
            pool.release(buf).unwrap();
        }
        pool.release_idle();
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn test_concurrent_release_idle_keeps_accounting() {
        use std::sync::atomic::{AtomicBool, Ordering};

        const THREADS: usize = 8;
        const CYCLES: usize = 2000;

        let pool = pool(64, 64 << 20);
        let stop = Arc::new(AtomicBool::new(false));

        let reaper = {
            let pool = pool.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut reclaimed = 0;
                while !stop.load(Ordering::Acquire) {
                    reclaimed += pool.release_idle();
                    thread::yield_now();
                }
                reclaimed
            })
        };

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for i in 0..CYCLES {
                        let size = 1 + (t * 977 + i * 53) % 8192;
                        let mut buf = ready(&pool, size);
                        assert_eq!(buf.position(), 0);
                        assert_eq!(buf.limit_pos(), buf.capacity());
                        buf.put_u32(i as u32);
                        if i % 25 == 0 {
                            held.push(buf);
                        } else {
                            pool.release(buf).unwrap();
                        }
                    }
                    held
                })
            })
            .collect();

        let outstanding: Vec<Buffer> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        stop.store(true, Ordering::Release);
        reaper.join().unwrap();

        let outstanding_bytes: usize = outstanding.iter().map(|b| b.capacity()).sum();
        let idle_bytes = pool.stats().idle_bytes as usize;
        assert_eq!(pool.allocated(), outstanding_bytes + idle_bytes);

        pool.release_idle();
        assert_eq!(pool.allocated(), outstanding_bytes);
        assert_eq!(pool.stats().full, 0);
    }

    #[test]
    fn test_concurrent_acquire_respects_budget() {
        let pool = pool(64, 64 * 32);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    (0..16)
                        .filter_map(|_| pool.acquire(64).unwrap().ready())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let granted: Vec<Buffer> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(granted.len(), 32);
        assert_eq!(pool.allocated(), 64 * 32);
    }
}
