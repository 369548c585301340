//! Fixed-capacity pooled buffer with a read/write cursor.
//!
//! A [`Buffer`] is the only handle to a block of pool memory while it is
//! checked out. It is not `Clone`, and every way of giving it back consumes
//! it, so a buffer cannot be returned twice or used after return.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::buf::UninitSlice;
use bytes::{Buf, BufMut};
use tracing::error;

use super::buffer_pool::PoolShared;
use crate::error::Result;

/// A borrowed block of pool memory.
///
/// The cursor follows the usual position/limit model: writes and reads
/// both happen at `position` and stop at the limit. A freshly acquired
/// buffer has `position == 0` and `limit_pos() == capacity`.
///
/// Dropping a buffer returns its memory to the pool it came from. Use
/// [`Buffer::release`] or [`BufferPool::release`](super::BufferPool::release)
/// to return it explicitly and observe errors.
pub struct Buffer {
    /// Always `Some` until the storage is handed back to the pool
    data: Option<Box<[u8]>>,
    position: usize,
    limit: usize,
    home: Weak<PoolShared>,
}

impl Buffer {
    pub(crate) fn new(data: Box<[u8]>, home: Weak<PoolShared>) -> Self {
        let limit = data.len();
        Self {
            data: Some(data),
            position: 0,
            limit,
            home,
        }
    }

    #[inline]
    fn storage(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    #[inline]
    fn storage_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or_default()
    }

    /// Total size of the block. Fixed for the buffer's lifetime.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage().len()
    }

    /// Current cursor.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// End of the valid region.
    #[inline]
    pub fn limit_pos(&self) -> usize {
        self.limit
    }

    /// Bytes between the cursor and the limit.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Move the cursor.
    ///
    /// # Panics
    ///
    /// Panics if `position > limit`.
    pub fn set_position(&mut self, position: usize) {
        assert!(
            position <= self.limit,
            "position {} beyond limit {}",
            position,
            self.limit
        );
        self.position = position;
    }

    /// Move the limit, pulling the cursor back if it would fall outside.
    ///
    /// # Panics
    ///
    /// Panics if `limit > capacity`.
    pub fn set_limit(&mut self, limit: usize) {
        assert!(
            limit <= self.capacity(),
            "limit {} beyond capacity {}",
            limit,
            self.capacity()
        );
        self.limit = limit;
        self.position = self.position.min(limit);
    }

    /// Switch from filling to draining: the written bytes become readable.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Make the whole block writable again. Contents are left untouched.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    /// Bytes before the cursor.
    pub fn filled(&self) -> &[u8] {
        &self.storage()[..self.position]
    }

    /// The whole block, ignoring the cursor.
    pub fn as_slice(&self) -> &[u8] {
        self.storage()
    }

    /// The whole block, ignoring the cursor. Pair with [`Self::set_position`]
    /// after writing directly.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.storage_mut()
    }

    /// Return the buffer to the pool it was acquired from.
    ///
    /// If that pool no longer exists the memory is simply freed.
    pub fn release(mut self) -> Result<()> {
        match (self.data.take(), self.home.upgrade()) {
            (Some(data), Some(pool)) => pool.recycle(data),
            _ => Ok(()),
        }
    }

    /// Whether this buffer was acquired from `pool`.
    pub(crate) fn belongs_to(&self, pool: &Arc<PoolShared>) -> bool {
        std::ptr::eq(self.home.as_ptr(), Arc::as_ptr(pool))
    }

    /// Detach the storage for recycling. The buffer is inert afterwards.
    pub(crate) fn take_storage(&mut self) -> Option<Box<[u8]>> {
        self.data.take()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let Some(data) = self.data.take() else {
            return;
        };
        if let Some(pool) = self.home.upgrade() {
            match pool.recycle(data) {
                Ok(()) => pool.note_implicit_return(),
                Err(e) => error!("Dropped buffer could not be recycled: {}", e),
            }
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("position", &self.position)
            .field("limit", &self.limit)
            .finish()
    }
}

impl Buf for Buffer {
    #[inline]
    fn remaining(&self) -> usize {
        Buffer::remaining(self)
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        &self.storage()[self.position..self.limit]
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= Buffer::remaining(self),
            "cannot advance past limit: {} > {}",
            cnt,
            Buffer::remaining(self)
        );
        self.position += cnt;
    }
}

// SAFETY: `chunk_mut` only exposes initialized bytes between position and
// limit, and `advance_mut` never moves the cursor past the limit.
unsafe impl BufMut for Buffer {
    #[inline]
    fn remaining_mut(&self) -> usize {
        Buffer::remaining(self)
    }

    #[inline]
    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining_mut(),
            "cannot advance past limit: {} > {}",
            cnt,
            self.remaining_mut()
        );
        self.position += cnt;
    }

    #[inline]
    fn chunk_mut(&mut self) -> &mut UninitSlice {
        let (start, end) = (self.position, self.limit);
        UninitSlice::new(&mut self.storage_mut()[start..end])
    }
}
