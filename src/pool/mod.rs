//! Buffer pooling for record serialization.
//!
//! Callers borrow fixed-size buffers from power-of-two size classes and hand
//! them back when the batch has been sent. Total memory is capped by a
//! global byte budget; hitting it yields [`Acquire::Full`] rather than
//! blocking.

mod budget;
mod buffer;
mod buffer_pool;
mod config;
mod size_class;

pub use buffer::Buffer;
pub use buffer_pool::{Acquire, BufferPool};
pub use config::{PoolConfig, DEFAULT_INITIAL_BUFFER_SIZE, DEFAULT_MAX_BUFFER_SIZE};
