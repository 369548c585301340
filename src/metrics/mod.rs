//! Lock-free counters for buffer pool activity.
//!
//! Each pool owns its own [`PoolMetrics`]; there is no process-wide
//! instance. Counters use relaxed ordering since they are advisory.

use std::sync::atomic::{AtomicU64, Ordering};

/// Relaxed ordering for counters (eventual visibility is fine for metrics).
const RELAXED: Ordering = Ordering::Relaxed;

/// Counters updated on the pool's hot paths.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Acquires served from a free list
    pub hits: AtomicU64,
    /// Acquires that allocated fresh memory
    pub misses: AtomicU64,
    /// Acquires answered with `Full`
    pub full: AtomicU64,
    /// Buffers pushed back onto a free list
    pub returns: AtomicU64,
    /// Returns that happened through `Drop` rather than an explicit release
    pub implicit_returns: AtomicU64,
    /// Releases rejected as not belonging to the pool
    pub integrity_violations: AtomicU64,
    /// Idle buffers freed by bulk release
    pub reclaimed_buffers: AtomicU64,
    /// Bytes freed by bulk release
    pub reclaimed_bytes: AtomicU64,
}

impl PoolMetrics {
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            full: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            implicit_returns: AtomicU64::new(0),
            integrity_violations: AtomicU64::new(0),
            reclaimed_buffers: AtomicU64::new(0),
            reclaimed_bytes: AtomicU64::new(0),
        }
    }

    /// Increment a counter.
    #[inline]
    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, RELAXED);
    }

    /// Add to a counter.
    #[inline]
    pub fn add(&self, counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, RELAXED);
    }

    /// Get counter value.
    #[inline]
    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(RELAXED)
    }
}

/// Point-in-time snapshot of a pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub allocated_bytes: u64,
    pub max_bytes: u64,
    pub idle_buffers: u64,
    pub idle_bytes: u64,
    pub size_classes: u64,

    pub hits: u64,
    pub misses: u64,
    pub full: u64,
    pub returns: u64,
    pub implicit_returns: u64,
    pub integrity_violations: u64,
    pub reclaimed_buffers: u64,
    pub reclaimed_bytes: u64,
}

impl PoolStats {
    /// Fraction of successful acquires served from a free list (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Share of the budget currently allocated (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        self.allocated_bytes as f64 / self.max_bytes as f64
    }

    /// Format as INFO-style `key:value` lines.
    pub fn to_info_string(&self) -> String {
        let mut out = String::with_capacity(512);

        out.push_str("# Memory\r\n");
        out.push_str(&format!("allocated_bytes:{}\r\n", self.allocated_bytes));
        out.push_str(&format!("max_bytes:{}\r\n", self.max_bytes));
        out.push_str(&format!("utilization:{:.4}\r\n", self.utilization()));
        out.push_str(&format!("idle_buffers:{}\r\n", self.idle_buffers));
        out.push_str(&format!("idle_bytes:{}\r\n", self.idle_bytes));
        out.push_str(&format!("size_classes:{}\r\n", self.size_classes));
        out.push_str("\r\n");

        out.push_str("# Stats\r\n");
        out.push_str(&format!("hits:{}\r\n", self.hits));
        out.push_str(&format!("misses:{}\r\n", self.misses));
        out.push_str(&format!("hit_rate:{:.4}\r\n", self.hit_rate()));
        out.push_str(&format!("full:{}\r\n", self.full));
        out.push_str(&format!("returns:{}\r\n", self.returns));
        out.push_str(&format!("implicit_returns:{}\r\n", self.implicit_returns));
        out.push_str(&format!(
            "integrity_violations:{}\r\n",
            self.integrity_violations
        ));
        out.push_str(&format!("reclaimed_buffers:{}\r\n", self.reclaimed_buffers));
        out.push_str(&format!("reclaimed_bytes:{}\r\n", self.reclaimed_bytes));
        out.push_str("\r\n");

        out
    }
}
