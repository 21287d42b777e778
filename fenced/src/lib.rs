#![deny(missing_docs)]

//! A client-side allocator for transfer memory, shared with a remote executor.
//!
//! Memory handed out by the `TransferMemory` pool may be freed immediately, or pending a token: the memory is then
//! only reused once the remote executor has passed the token, that is once it is done reading the memory.
//!
//! This crate provides the concrete collaborators of the pool:
//!
//! -   `Timeline`, a token source, either retiring tokens on flush or driven by an `Executor` on another thread.
//! -   `HeapTransport`, sharing memory from the process heap, suitable for in-process executors.
//! -   `MemfdTransport`, on Linux, sharing memory through file descriptors, suitable for out-of-process executors.
//!
//! The building blocks themselves are re-exported from `fenced-core`.

mod platform;
mod timeline;

pub use fenced_core::*;

pub use platform::HeapTransport;
#[cfg(target_os = "linux")]
pub use platform::MemfdTransport;
pub use timeline::{Executor, Timeline};

/// A ready-made pool, with the default alignment.
pub type TransferMemory<T = Timeline, R = HeapTransport> = PoolManager<DefaultConfiguration, T, R>;
