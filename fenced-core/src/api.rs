//! The API of fenced-core.

mod configuration;
mod error;
mod poll;
mod pool;
mod region;
mod scoped;
mod token;
mod transport;

pub use configuration::{Configuration, DefaultConfiguration, MaxFreeBytes, PoolSettings, Properties};
pub use configuration::DEFAULT_CHUNK_SIZE_MULTIPLE;
pub use error::{AllocError, TransportError};
pub use poll::{NoPoll, Poll, Release, Releases};
pub use pool::{Allocation, PoolManager, PoolStats};
pub use region::Region;
pub use scoped::ScopedAllocation;
pub use token::{Token, TokenSource};
pub use transport::{BackingRegion, RegionId, Transport};
