//! The internals of fenced-core.
//!
//! The internals provide all the heavy-lifting.

pub mod block_allocator;
pub mod chunk;
