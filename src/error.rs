use std::fmt;

/// Unified error type for buffer pool operations.
///
/// Running out of budget is not an error; see [`crate::pool::Acquire::Full`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Pool configuration rejected at construction time
    InvalidConfig(String),

    /// The size class needed for a request does not fit in `usize`
    SizeOverflow { requested: usize },

    /// A buffer was released to a pool that did not create it, or its
    /// capacity matches no size class of this pool
    IntegrityViolation { capacity: usize },

    /// The system allocator refused to provide memory for a new buffer
    Alloc { size: usize },

    /// A record cannot be framed (tag or payload too long)
    InvalidRecord(String),

    /// The sender side of the batch channel has shut down
    SenderClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            Error::SizeOverflow { requested } => {
                write!(f, "Size class overflow for request of {} bytes", requested)
            }
            Error::IntegrityViolation { capacity } => write!(
                f,
                "Integrity violation: buffer of capacity {} does not belong to this pool",
                capacity
            ),
            Error::Alloc { size } => write!(f, "Allocation of {} bytes failed", size),
            Error::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            Error::SenderClosed => write!(f, "Sender closed"),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for buffer pool operations
pub type Result<T> = std::result::Result<T, Error>;
