use std::time::Instant;

use logship_pool::config::Config;
use logship_pool::emitter::{run_sender, EmitOutcome, Emitter};
use logship_pool::pool::BufferPool;

use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration
    let config = Config::parse_args();

    // Initialize tracing
    let log_level = match config.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("logship-pool v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: {} workers x {} records, initial_buffer_size={}, max_buffer_size={}",
        config.workers, config.records, config.initial_buffer_size, config.max_buffer_size
    );

    let pool = BufferPool::new(config.pool_config())?;
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let sender = tokio::spawn(run_sender(rx));

    let start = Instant::now();
    let mut workers = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        let mut emitter = Emitter::new(pool.clone(), tx.clone(), config.emitter_config());
        let records = config.records;
        let min = config.min_record_size;
        let span = config.max_record_size.saturating_sub(min) + 1;

        workers.push(tokio::spawn(async move {
            let mut dropped = 0usize;
            for i in 0..records {
                let tag = format!("worker{}.tag{}", worker, i % 4);
                let size = min + (worker * 7919 + i * 104_729) % span;
                let payload = vec![b'x'; size];
                if emitter.emit(&tag, &payload).await? == EmitOutcome::Dropped {
                    dropped += 1;
                }
            }
            emitter.flush().await?;
            Ok::<usize, logship_pool::Error>(dropped)
        }));
    }
    drop(tx);

    let mut dropped = 0;
    for worker in workers {
        dropped += worker.await??;
    }
    let sent = sender.await?;
    let elapsed = start.elapsed();

    info!(
        "Sent {} records in {} chunks ({} bytes) in {:?}, dropped {}",
        sent.records, sent.chunks, sent.bytes, elapsed, dropped
    );

    pool.shutdown();
    info!("Pool statistics:\n{}", pool.stats().to_info_string());

    Ok(())
}
