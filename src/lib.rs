pub mod config;
pub mod emitter;
pub mod error;
pub mod metrics;
pub mod pool;

pub use config::Config;
pub use emitter::{run_sender, Chunk, EmitOutcome, Emitter, EmitterConfig, SenderStats};
pub use error::{Error, Result};
pub use metrics::PoolStats;
pub use pool::{Acquire, Buffer, BufferPool, PoolConfig};
