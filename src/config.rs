use clap::Parser;
use std::time::Duration;

use crate::emitter::EmitterConfig;
use crate::pool::{PoolConfig, DEFAULT_INITIAL_BUFFER_SIZE, DEFAULT_MAX_BUFFER_SIZE};

/// logship-pool - load generator for the record buffer pool
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Number of concurrent emitter tasks
    #[arg(short, long, default_value = "20")]
    pub workers: usize,

    /// Records emitted by each worker
    #[arg(short, long, default_value = "4000")]
    pub records: usize,

    /// Smallest record payload in bytes
    #[arg(long, default_value = "16")]
    pub min_record_size: usize,

    /// Largest record payload in bytes
    #[arg(long, default_value = "512")]
    pub max_record_size: usize,

    /// Smallest buffer size class in bytes
    #[arg(long, default_value_t = DEFAULT_INITIAL_BUFFER_SIZE)]
    pub initial_buffer_size: usize,

    /// Global buffer budget in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
    pub max_buffer_size: usize,

    /// Bytes requested per batch buffer
    #[arg(long, default_value = "65536")]
    pub chunk_size: usize,

    /// Acquire attempts before a record is dropped under backpressure
    #[arg(long, default_value = "50")]
    pub max_attempts: usize,

    /// Delay in milliseconds between acquire attempts when the pool is full
    #[arg(long, default_value = "2")]
    pub retry_delay_ms: u64,

    /// Capacity of the emitter-to-sender channel in batches
    #[arg(long, default_value = "64")]
    pub channel_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse_args() -> Self {
        Config::parse()
    }

    /// Buffer pool settings derived from this config
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new(self.initial_buffer_size, self.max_buffer_size)
    }

    /// Emitter settings derived from this config
    pub fn emitter_config(&self) -> EmitterConfig {
        EmitterConfig {
            chunk_size: self.chunk_size,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 20,
            records: 4000,
            min_record_size: 16,
            max_record_size: 512,
            initial_buffer_size: DEFAULT_INITIAL_BUFFER_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            chunk_size: 64 * 1024,
            max_attempts: 50,
            retry_delay_ms: 2,
            channel_capacity: 64,
            log_level: "info".to_string(),
        }
    }
}
