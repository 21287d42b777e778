//! Abstraction over OS differences.

mod heap;

pub use heap::HeapTransport;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::MemfdTransport;
