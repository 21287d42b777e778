//! Error types of fenced-core.

use std::io;

use thiserror::Error;

/// Failure of a `Transport` to create a backing region.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote executor, or the connection to it, is gone.
    #[error("connection to the remote executor lost")]
    Disconnected,

    /// The transport cannot share any more memory.
    #[error("transport exhausted: {requested} bytes requested, {available} bytes available")]
    Exhausted {
        /// The size of the requested region.
        requested: usize,
        /// The number of bytes the transport could still share.
        available: usize,
    },

    /// The operating system refused to create the region.
    #[error("system error: {0}")]
    Os(#[from] io::Error),
}

/// Failure to allocate from a `PoolManager`.
///
/// Transient memory pressure is resolved within the pool, by waiting or growing; an error means that the request
/// cannot be satisfied at all. The pool never retries on its own.
#[derive(Debug, Error)]
pub enum AllocError {
    /// A zero-sized allocation was requested; no memory is ever handed out for it.
    #[error("zero-sized allocation requested")]
    ZeroSize,

    /// No chunk could satisfy the request, and no new chunk could be sized for it.
    #[error("out of memory: {requested} bytes requested")]
    OutOfMemory {
        /// The requested size.
        requested: usize,
    },

    /// The transport failed to create a new backing region.
    #[error("failed to create a backing region for {requested} bytes")]
    ConnectionLost {
        /// The requested size.
        requested: usize,
        /// The failure reported by the transport.
        #[source]
        source: TransportError,
    },
}

impl AllocError {
    /// Returns whether the failure is attributable to the loss of the remote executor.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, AllocError::ConnectionLost { source: TransportError::Disconnected, .. })
    }
}
