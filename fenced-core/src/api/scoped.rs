//! Scoped Allocation.
//!
//! An RAII guard over an allocation from a `PoolManager`, released pending a fresh token when dropped.
//!
//! Guards share the pool through a `RefCell`, so that any number of them may be live at once, alongside direct use of
//! the pool. The pool is only borrowed for the duration of each operation.

use std::{cell::RefCell, ptr::NonNull};

use crate::{AllocError, Allocation, Configuration, PoolManager, TokenSource, Transport};

/// An allocation, released pending a freshly inserted token once no longer needed.
///
/// The memory is expected to be consumed by the remote executor once the commands written before the release are
/// executed, hence the release is fenced rather than immediate.
///
/// #   Panics
///
/// Allocating and releasing borrow the pool mutably, and panic if it is already borrowed.
pub struct ScopedAllocation<'a, C, T, R>
    where
        C: Configuration,
        T: TokenSource,
        R: Transport,
{
    pool: &'a RefCell<PoolManager<C, T, R>>,
    allocation: Option<Allocation>,
    size: usize,
    //  Flush generation at the time of the allocation.
    generation: u32,
    flush_after_release: bool,
}

impl<'a, C, T, R> ScopedAllocation<'a, C, T, R>
    where
        C: Configuration,
        T: TokenSource,
        R: Transport,
{
    /// Allocates `size` bytes from `pool`.
    pub fn new(pool: &'a RefCell<PoolManager<C, T, R>>, size: usize) -> Result<Self, AllocError> {
        let mut result = Self { pool, allocation: None, size: 0, generation: 0, flush_after_release: false };

        result.reset(size)?;

        Ok(result)
    }

    /// Returns whether the guard holds an allocation.
    pub fn is_valid(&self) -> bool { self.allocation.is_some() }

    /// Returns the allocation, if any.
    pub fn allocation(&self) -> Option<Allocation> { self.allocation }

    /// Returns the address of the allocation, if any.
    pub fn pointer(&self) -> Option<NonNull<u8>> { self.allocation.map(|allocation| allocation.pointer()) }

    /// Returns the requested size, or 0 if the guard holds no allocation.
    pub fn size(&self) -> usize { self.size }

    /// Sets whether the token source should be flushed after the release, unless a flush already happened since the
    /// allocation.
    pub fn set_flush_after_release(&mut self, flush_after_release: bool) {
        self.flush_after_release = flush_after_release;
    }

    /// Releases the allocation, if any, pending a freshly inserted token.
    pub fn release(&mut self) {
        let allocation = match self.allocation.take() {
            Some(allocation) => allocation,
            None => return,
        };

        self.size = 0;

        let mut pool = self.pool.borrow_mut();

        let token = pool.tokens().insert_token();
        pool.free_pending_token(allocation.pointer(), token);

        if self.flush_after_release && pool.tokens().flush_generation() == self.generation {
            pool.tokens().flush();
        }
    }

    /// Releases the current allocation, if any, then allocates `size` bytes.
    ///
    /// On failure, the guard is left without allocation.
    pub fn reset(&mut self, size: usize) -> Result<(), AllocError> {
        self.release();

        let mut pool = self.pool.borrow_mut();

        let allocation = pool.alloc(size)?;

        self.allocation = Some(allocation);
        self.size = size;
        self.generation = pool.tokens().flush_generation();

        Ok(())
    }

    /// Relinquishes the allocation, which the caller is now responsible for freeing.
    pub fn into_inner(mut self) -> Option<Allocation> {
        self.size = 0;
        self.allocation.take()
    }
}

impl<'a, C, T, R> Drop for ScopedAllocation<'a, C, T, R>
    where
        C: Configuration,
        T: TokenSource,
        R: Transport,
{
    fn drop(&mut self) { self.release(); }
}
