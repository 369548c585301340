//! Global allocation budget.
//!
//! Tracks bytes of every buffer the pool created and has not yet freed.
//! Growth is an optimistic compare-and-swap loop, never a held lock.

use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) struct Budget {
    allocated: AtomicUsize,
    max: usize,
}

impl Budget {
    pub(crate) const fn new(max: usize) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            max,
        }
    }

    /// Reserve `size` bytes if the ceiling allows it.
    ///
    /// Returns false without changing the counter when `allocated + size`
    /// would exceed the ceiling. Retries on contention with no iteration cap.
    #[inline]
    pub(crate) fn try_grow(&self, size: usize) -> bool {
        let mut current = self.allocated.load(Ordering::Acquire);
        loop {
            let next = match current.checked_add(size) {
                Some(next) if next <= self.max => next,
                _ => return false,
            };
            match self.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Give back `size` bytes previously reserved with [`Self::try_grow`].
    #[inline]
    pub(crate) fn shrink(&self, size: usize) {
        let prev = self.allocated.fetch_sub(size, Ordering::AcqRel);
        debug_assert!(prev >= size, "budget underflow");
    }

    #[inline]
    pub(crate) fn current(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn max(&self) -> usize {
        self.max
    }
}
