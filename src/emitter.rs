//! Record batching on top of the buffer pool.
//!
//! An [`Emitter`] frames records into a pooled batch buffer and hands the
//! buffer to a sender task once the next record no longer fits. The sender
//! ([`run_sender`]) drains the channel and releases every buffer it gets,
//! whether or not the transmission succeeded.
//!
//! Record framing (big-endian):
//!
//! ```text
//! +---------+-----+-------------+---------+
//! | tag_len | tag | payload_len | payload |
//! |   u16   |     |     u32     |         |
//! +---------+-----+-------------+---------+
//! ```

use std::time::Duration;

use bytes::{Buf, BufMut};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::pool::{Acquire, Buffer, BufferPool};

const TAG_LEN_BYTES: usize = 2;
const PAYLOAD_LEN_BYTES: usize = 4;

/// Tuning for an [`Emitter`].
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Bytes requested for each batch buffer
    pub chunk_size: usize,

    /// Acquire attempts before giving up on a record while the pool is full
    pub max_attempts: usize,

    /// Pause between acquire attempts
    pub retry_delay: Duration,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_attempts: 50,
            retry_delay: Duration::from_millis(2),
        }
    }
}

/// A filled batch on its way to the sender. The buffer is flipped, so its
/// readable region is exactly the encoded records.
#[derive(Debug)]
pub struct Chunk {
    pub buffer: Buffer,
    pub records: usize,
}

/// What happened to an emitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Appended to the current batch
    Buffered,
    /// The pool stayed full for every attempt; the record was discarded
    Dropped,
}

/// Frames records into pooled buffers and forwards full batches.
pub struct Emitter {
    pool: BufferPool,
    tx: mpsc::Sender<Chunk>,
    config: EmitterConfig,
    current: Option<Buffer>,
    records: usize,
}

impl Emitter {
    pub fn new(pool: BufferPool, tx: mpsc::Sender<Chunk>, config: EmitterConfig) -> Self {
        Self {
            pool,
            tx,
            config,
            current: None,
            records: 0,
        }
    }

    /// Append one record to the current batch.
    ///
    /// Sends the current batch first if the record does not fit. A full
    /// pool is treated as backpressure: the emitter waits and retries, and
    /// reports [`EmitOutcome::Dropped`] once its attempts run out.
    pub async fn emit(&mut self, tag: &str, payload: &[u8]) -> Result<EmitOutcome> {
        let len = encoded_len(tag, payload)?;

        let mut buffer = match self.current.take() {
            Some(buffer) if buffer.remaining_mut() >= len => buffer,
            stale => {
                if let Some(buffer) = stale {
                    self.send(buffer).await?;
                }
                match self.acquire(len.max(self.config.chunk_size)).await? {
                    Some(buffer) => buffer,
                    None => return Ok(EmitOutcome::Dropped),
                }
            }
        };

        encode(&mut buffer, tag, payload);
        self.records += 1;
        self.current = Some(buffer);
        Ok(EmitOutcome::Buffered)
    }

    /// Send whatever is buffered.
    pub async fn flush(&mut self) -> Result<()> {
        match self.current.take() {
            Some(buffer) => self.send(buffer).await,
            None => Ok(()),
        }
    }

    /// Records in the batch not yet sent.
    pub fn pending_records(&self) -> usize {
        self.records
    }

    async fn acquire(&self, size: usize) -> Result<Option<Buffer>> {
        for attempt in 1..=self.config.max_attempts {
            match self.pool.acquire(size)? {
                Acquire::Ready(buffer) => return Ok(Some(buffer)),
                Acquire::Full => {
                    trace!("Pool full for {} bytes, attempt {}", size, attempt);
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        warn!(
            "Dropping record: pool full after {} attempts",
            self.config.max_attempts
        );
        Ok(None)
    }

    async fn send(&mut self, mut buffer: Buffer) -> Result<()> {
        let records = std::mem::take(&mut self.records);
        if records == 0 {
            return buffer.release();
        }

        buffer.flip();
        // On failure the chunk comes back inside the error and is dropped,
        // which returns the buffer to its pool.
        self.tx
            .send(Chunk { buffer, records })
            .await
            .map_err(|_| Error::SenderClosed)
    }
}

/// Encoded size of a record, or an error if it cannot be framed.
pub fn encoded_len(tag: &str, payload: &[u8]) -> Result<usize> {
    if tag.len() > u16::MAX as usize {
        return Err(Error::InvalidRecord(format!(
            "tag of {} bytes exceeds {}",
            tag.len(),
            u16::MAX
        )));
    }
    if payload.len() > u32::MAX as usize {
        return Err(Error::InvalidRecord(format!(
            "payload of {} bytes exceeds {}",
            payload.len(),
            u32::MAX
        )));
    }
    Ok(TAG_LEN_BYTES + tag.len() + PAYLOAD_LEN_BYTES + payload.len())
}

fn encode(buf: &mut impl BufMut, tag: &str, payload: &[u8]) {
    buf.put_u16(tag.len() as u16);
    buf.put_slice(tag.as_bytes());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

/// Walk framed records, returning how many complete ones were found.
pub fn decode_records(buf: &mut impl Buf) -> usize {
    let mut count = 0;
    loop {
        if buf.remaining() < TAG_LEN_BYTES {
            break;
        }
        let tag_len = buf.get_u16() as usize;
        if buf.remaining() < tag_len + PAYLOAD_LEN_BYTES {
            break;
        }
        buf.advance(tag_len);
        let payload_len = buf.get_u32() as usize;
        if buf.remaining() < payload_len {
            break;
        }
        buf.advance(payload_len);
        count += 1;
    }
    if buf.has_remaining() {
        warn!("Truncated record with {} trailing bytes", buf.remaining());
    }
    count
}

/// Totals reported by [`run_sender`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub chunks: u64,
    pub records: u64,
    pub bytes: u64,
}

/// Drain batches until every emitter has gone away, releasing each buffer
/// after it has been "transmitted".
pub async fn run_sender(mut rx: mpsc::Receiver<Chunk>) -> SenderStats {
    let mut stats = SenderStats::default();

    while let Some(Chunk {
        mut buffer,
        records,
    }) = rx.recv().await
    {
        stats.chunks += 1;
        stats.bytes += buffer.remaining() as u64;

        let decoded = decode_records(&mut buffer);
        if decoded != records {
            warn!("Chunk declared {} records, decoded {}", records, decoded);
        }
        stats.records += decoded as u64;

        if let Err(e) = buffer.release() {
            error!("Failed to release sent buffer: {}", e);
        }
    }

    debug!(
        "Sender finished: {} chunks, {} records, {} bytes",
        stats.chunks, stats.records, stats.bytes
    );
    stats
}
