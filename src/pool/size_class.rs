//! Size-class normalization and the fixed class table.
//!
//! Classes are `initial << k`. Since `k < usize::BITS`, the table is a fixed
//! array indexed by `k`. Each slot is filled on first demand and never
//! emptied, so a capacity maps to the same free list for the pool's
//! lifetime. After a class exists, looking it up is a single atomic load.

use std::sync::OnceLock;

use crossbeam::queue::SegQueue;
use tracing::debug;

use crate::error::{Error, Result};

/// One slot per possible exponent.
const CLASS_SLOTS: usize = usize::BITS as usize;

/// Idle buffers of one capacity.
pub(crate) struct SizeClass {
    size: usize,
    free: SegQueue<Box<[u8]>>,
}

impl SizeClass {
    fn new(size: usize) -> Self {
        Self {
            size,
            free: SegQueue::new(),
        }
    }

    /// Capacity of every buffer in this class.
    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Take an idle buffer, if any. Never blocks.
    #[inline]
    pub(crate) fn pop(&self) -> Option<Box<[u8]>> {
        self.free.pop()
    }

    /// Park an idle buffer. The caller guarantees `data.len() == self.size()`.
    #[inline]
    pub(crate) fn push(&self, data: Box<[u8]>) {
        debug_assert_eq!(data.len(), self.size);
        self.free.push(data);
    }

    /// Number of idle buffers (racy snapshot).
    #[inline]
    pub(crate) fn idle(&self) -> usize {
        self.free.len()
    }
}

/// Table of size classes indexed by exponent.
///
/// Creation goes through `OnceLock::get_or_init`, so racing first callers
/// all end up with the single installed instance.
pub(crate) struct SizeClasses {
    initial: usize,
    classes: [OnceLock<SizeClass>; CLASS_SLOTS],
}

impl SizeClasses {
    pub(crate) fn new(initial: usize) -> Self {
        Self {
            initial,
            classes: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// Exponent `k` of the smallest `initial << k` that is `>= requested`.
    ///
    /// A zero request maps to the initial size.
    fn exponent(&self, requested: usize) -> Result<u32> {
        if requested <= self.initial {
            return Ok(0);
        }
        requested
            .div_ceil(self.initial)
            .checked_next_power_of_two()
            .filter(|factor| factor.checked_mul(self.initial).is_some())
            .map(|factor| factor.trailing_zeros())
            .ok_or(Error::SizeOverflow { requested })
    }

    /// Exponent of an exact class capacity, if `capacity` is one.
    fn exponent_of(&self, capacity: usize) -> Option<u32> {
        if capacity < self.initial || capacity % self.initial != 0 {
            return None;
        }
        let factor = capacity / self.initial;
        factor.is_power_of_two().then(|| factor.trailing_zeros())
    }

    /// Smallest `initial * 2^k` that is `>= requested`.
    pub(crate) fn normalize(&self, requested: usize) -> Result<usize> {
        self.exponent(requested).map(|k| self.initial << k)
    }

    /// Class able to hold `requested` bytes, created on first use.
    pub(crate) fn class_for(&self, requested: usize) -> Result<&SizeClass> {
        let k = self.exponent(requested)?;
        let size = self.initial << k;
        Ok(self.classes[k as usize].get_or_init(|| {
            debug!("Created size class {} bytes", size);
            SizeClass::new(size)
        }))
    }

    /// Existing class whose capacity is exactly `capacity`.
    pub(crate) fn get(&self, capacity: usize) -> Option<&SizeClass> {
        let k = self.exponent_of(capacity)?;
        self.classes[k as usize].get()
    }

    /// Every class created so far, smallest first.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &SizeClass> {
        self.classes.iter().filter_map(OnceLock::get)
    }

    /// Number of classes created so far.
    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }
}
