//! The configuration of fenced-core.
//!
//! The configuration comes in two flavors:
//!
//! -   Compile-time: the `Configuration` trait fixes the alignment of every block, and thus of every allocation.
//! -   Run-time: the `PoolSettings` fix how a `PoolManager` grows, and how much idle memory it tolerates before it
//!     prefers waiting on the remote executor over growing.

use std::marker::PhantomData;

use crate::PowerOf2;
use crate::utils;

/// Default rounding multiple of the size of new chunks: 1 MB.
pub const DEFAULT_CHUNK_SIZE_MULTIPLE: usize = 1024 * 1024;

/// Configuration
///
/// The Configuration instance fixes the alignment of blocks.
pub trait Configuration {
    /// The alignment of the offset and size of every block.
    ///
    /// Requested sizes are rounded up to a multiple of this alignment.
    const ALIGNMENT: PowerOf2;
}

/// The default configuration, aligning blocks on 16 bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfiguration;

impl Configuration for DefaultConfiguration {
    //  Safety:
    //  -   16 is a power of 2.
    const ALIGNMENT: PowerOf2 = unsafe { PowerOf2::new_unchecked(16) };
}

/// Properties
///
/// Properties of a given Configuration.
///
/// Work-around for the inability to implement static methods directly on a trait.
pub struct Properties<C>(PhantomData<C>);

impl<C> Properties<C>
    where
        C: Configuration,
{
    /// Returns the alignment of blocks.
    pub fn alignment() -> usize { C::ALIGNMENT.value() }

    /// Returns whether `n` is a multiple of the alignment.
    pub fn is_aligned(n: usize) -> bool { n % C::ALIGNMENT == 0 }

    /// Returns the size of the block needed to fulfill a request of `size` bytes.
    ///
    /// Returns None if `size` is 0, as no block is ever handed out for 0 bytes, or if rounding overflows.
    pub fn block_size_of(size: usize) -> Option<usize> {
        if size == 0 {
            return None;
        }

        C::ALIGNMENT.checked_round_up(size)
    }

    /// Returns the usable size of a region of `size` bytes, that is `size` rounded down to the alignment.
    pub fn usable_size_of(size: usize) -> usize { C::ALIGNMENT.round_down(size) }
}

/// The ceiling on idle memory, above which a `PoolManager` waits for pending blocks rather than growing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MaxFreeBytes {
    /// Never wait, always grow.
    Unlimited,
    /// Wait once the idle memory, that is allocated but not in use, reaches this many bytes.
    Limit(usize),
}

impl MaxFreeBytes {
    /// Returns whether `idle` bytes of memory reach the ceiling.
    pub fn is_reached_by(&self, idle: usize) -> bool {
        match *self {
            MaxFreeBytes::Unlimited => false,
            MaxFreeBytes::Limit(limit) => idle >= limit,
        }
    }
}

impl Default for MaxFreeBytes {
    fn default() -> Self { MaxFreeBytes::Unlimited }
}

impl From<Option<usize>> for MaxFreeBytes {
    fn from(limit: Option<usize>) -> Self { limit.map(MaxFreeBytes::Limit).unwrap_or(MaxFreeBytes::Unlimited) }
}

/// Run-time settings of a `PoolManager`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolSettings {
    chunk_size_multiple: usize,
    max_free_bytes: MaxFreeBytes,
}

impl PoolSettings {
    /// Creates settings with the default chunk size multiple and no ceiling.
    pub const fn new() -> Self {
        Self { chunk_size_multiple: DEFAULT_CHUNK_SIZE_MULTIPLE, max_free_bytes: MaxFreeBytes::Unlimited }
    }

    /// Sets the rounding multiple of the size of new chunks.
    ///
    /// #   Panics
    ///
    /// If `multiple` is 0.
    pub fn with_chunk_size_multiple(mut self, multiple: usize) -> Self {
        assert!(multiple > 0, "The chunk size multiple cannot be 0");

        self.chunk_size_multiple = multiple;
        self
    }

    /// Sets the ceiling on idle memory.
    pub fn with_max_free_bytes(mut self, max_free_bytes: MaxFreeBytes) -> Self {
        self.max_free_bytes = max_free_bytes;
        self
    }

    /// Returns the rounding multiple of the size of new chunks.
    pub fn chunk_size_multiple(&self) -> usize { self.chunk_size_multiple }

    /// Returns the ceiling on idle memory.
    pub fn max_free_bytes(&self) -> MaxFreeBytes { self.max_free_bytes }

    /// Returns the size of the chunk to create to fulfill a request of `size` bytes.
    ///
    /// The result is the smallest multiple of the chunk size multiple greater than or equal to `size`, further rounded
    /// up to the alignment of `C`, or None on overflow.
    pub fn chunk_size_for<C>(&self, size: usize) -> Option<usize>
        where
            C: Configuration,
    {
        let size = utils::checked_round_up(size, self.chunk_size_multiple)?;

        C::ALIGNMENT.checked_round_up(size)
    }
}

impl Default for PoolSettings {
    fn default() -> Self { Self::new() }
}
