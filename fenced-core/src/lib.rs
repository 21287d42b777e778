#![deny(missing_docs)]

//! Building blocks for a fenced transfer-memory allocator.
//!
//! fenced-core manages the client side of memory shared with a remote executor which consumes commands
//! asynchronously. Memory handed to the executor cannot be reused until the executor has signalled, via a token, that
//! it is done reading it. It contains:
//!
//! -   A block allocator, managing offsets within a single fixed-size region, with deferred ("fenced") free.
//! -   A region wrapper, binding a block allocator to an externally provided memory region.
//! -   A pool manager, growing and shrinking a set of regions on demand.
//! -   The collaborator traits, `TokenSource` and `Transport`, abstracting the command stream and the shared memory
//!     provider respectively.

mod api;
mod internals;
mod utils;

pub use api::*;
pub use internals::block_allocator::{BlockAllocator, BlockInfo, BlockStatus};
pub use internals::chunk::Chunk;
pub use utils::PowerOf2;
