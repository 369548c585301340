use crate::error::{Error, Result};

/// Default smallest size class (1 MiB).
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 1024 * 1024;

/// Default global byte budget (512 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 512 * 1024 * 1024;

/// Construction-time configuration for a [`BufferPool`](super::BufferPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Smallest size class in bytes; every class is this value times a power of two
    pub initial_buffer_size: usize,

    /// Global ceiling on bytes allocated by the pool (checked out plus idle)
    pub max_buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

impl PoolConfig {
    /// Create a config with the given smallest class and byte budget.
    pub fn new(initial_buffer_size: usize, max_buffer_size: usize) -> Self {
        Self {
            initial_buffer_size,
            max_buffer_size,
        }
    }

    /// Reject configurations the pool cannot work with.
    ///
    /// A budget smaller than the initial size is accepted: such a pool
    /// answers every growth attempt with `Full`.
    pub fn validate(&self) -> Result<()> {
        if self.initial_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "initial_buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
