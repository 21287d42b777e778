//! Region
//!
//! A Region binds a `BlockAllocator` to a range of memory supplied by the user, translating offsets into addresses
//! and back.
//!
//! The memory itself is neither owned nor touched by the Region.

use std::{fmt, ptr::NonNull};

use crate::{BlockAllocator, BlockInfo, Configuration, NoPoll, Poll, Releases, Token, TokenSource};

/// A fenced allocator over a single range of memory.
pub struct Region<C> {
    base: NonNull<u8>,
    allocator: BlockAllocator<C>,
}

impl<C> Region<C>
    where
        C: Configuration,
{
    /// Creates a Region managing `size` bytes from `base`.
    ///
    /// `size` is rounded down to the alignment of `C`.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `base` points to at least `size` bytes, for as long as addresses produced by this region are
    ///     in use.
    pub unsafe fn new(base: NonNull<u8>, size: usize) -> Self {
        let allocator = BlockAllocator::new(size);

        Self { base, allocator }
    }

    /// Returns the base address.
    pub fn base(&self) -> NonNull<u8> { self.base }

    /// Returns the number of bytes managed.
    pub fn size(&self) -> usize { self.allocator.size() }

    /// Returns the number of bytes in use.
    pub fn bytes_in_use(&self) -> usize { self.allocator.bytes_in_use() }

    /// Returns whether any memory is in use or pending a token.
    pub fn in_use(&self) -> bool { self.allocator.in_use() }

    /// Returns the blocks, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ { self.allocator.blocks() }

    /// Allocates at least `size` bytes, and returns their address.
    ///
    /// Returns None if `size` is 0, or if not enough memory is available, even after waiting for pending tokens.
    pub fn alloc<T>(&mut self, size: usize, tokens: &T) -> Option<NonNull<u8>>
        where
            T: TokenSource + ?Sized,
    {
        let offset = self.allocator.allocate(size, tokens);

        self.pointer_of(offset)
    }

    /// Frees the memory at `pointer`, immediately.
    ///
    /// #   Panics
    ///
    /// If `pointer` was not returned by `alloc`, or was already freed.
    pub fn free(&mut self, pointer: NonNull<u8>) {
        let offset = self.expect_offset_of(pointer);

        self.allocator.free(offset);
    }

    /// Frees the memory at `pointer`, once `token` has passed.
    ///
    /// #   Panics
    ///
    /// If `pointer` was not returned by `alloc`, or was already freed.
    pub fn free_pending_token(&mut self, pointer: NonNull<u8>, token: Token) {
        let offset = self.expect_offset_of(pointer);

        self.allocator.free_pending_token(offset, token);
    }

    /// Reclaims unused memory, without blocking.
    ///
    /// The releases queued by `poll` are applied first; they must all target this region.
    pub fn free_unused<T, P>(&mut self, tokens: &T, poll: &mut P)
        where
            T: TokenSource + ?Sized,
            P: Poll<NonNull<u8>> + ?Sized,
    {
        self.apply_poll(poll);

        self.allocator.free_unused(tokens, &mut NoPoll);
    }

    /// Returns the size of the largest allocation possible without waiting, after reclaiming unused memory.
    pub fn largest_free_size<T, P>(&mut self, tokens: &T, poll: &mut P) -> usize
        where
            T: TokenSource + ?Sized,
            P: Poll<NonNull<u8>> + ?Sized,
    {
        self.apply_poll(poll);

        self.allocator.largest_free_size_without_waiting(tokens, &mut NoPoll)
    }

    /// Returns the size of the largest allocation possible, if waiting for pending tokens.
    pub fn largest_free_or_pending_size(&self) -> usize { self.allocator.largest_free_size_with_waiting() }

    /// Returns the total number of bytes available without waiting, after reclaiming unused memory.
    pub fn total_free_size<T, P>(&mut self, tokens: &T, poll: &mut P) -> usize
        where
            T: TokenSource + ?Sized,
            P: Poll<NonNull<u8>> + ?Sized,
    {
        self.apply_poll(poll);

        self.allocator.total_free_size(tokens, &mut NoPoll)
    }

    /// Returns whether `pointer` lies within the region.
    pub fn contains(&self, pointer: NonNull<u8>) -> bool {
        let base = self.base.as_ptr() as usize;
        let pointer = pointer.as_ptr() as usize;

        pointer >= base && pointer - base < self.size()
    }

    /// Returns the offset of `pointer` within the region.
    ///
    /// None maps to None, as the null address of a failed allocation maps to the sentinel offset.
    ///
    /// #   Panics
    ///
    /// If `pointer` is outside the region.
    pub fn offset_of(&self, pointer: Option<NonNull<u8>>) -> Option<usize> {
        pointer.map(|pointer| self.expect_offset_of(pointer))
    }

    /// Returns the address at `offset` within the region.
    ///
    /// None maps to None, as the sentinel offset of a failed allocation maps to the null address.
    ///
    /// #   Panics
    ///
    /// If `offset` is outside the region.
    pub fn pointer_of(&self, offset: Option<usize>) -> Option<NonNull<u8>> {
        let offset = offset?;

        assert!(offset < self.size(), "Offset {} outside region of {} bytes", offset, self.size());

        //  Safety:
        //  -   `offset` is within the region, as per the assert above.
        //  -   A non-null base plus an in-bounds offset is non-null.
        Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) })
    }

    /// Checks the invariants of the block sequence, see `BlockAllocator::check_consistency`.
    pub fn check_consistency(&self) -> bool { self.allocator.check_consistency() }

    /// Waits for all pending tokens, then checks that no memory is in use any longer.
    ///
    /// In debug builds, memory still in use is a contract violation, and panics.
    pub fn close<T>(self, tokens: &T) -> bool
        where
            T: TokenSource + ?Sized,
    {
        self.allocator.close(tokens)
    }

    //  Internal; applies the releases queued by `poll`, translated to offsets.
    fn apply_poll<P>(&mut self, poll: &mut P)
        where
            P: Poll<NonNull<u8>> + ?Sized,
    {
        let mut releases = Releases::new();
        poll.poll(&mut releases);

        for release in releases.drain() {
            let release = release.map(|pointer| self.expect_offset_of(pointer));
            self.allocator.release(release);
        }
    }

    //  Internal; returns the offset of `pointer`, or panics.
    fn expect_offset_of(&self, pointer: NonNull<u8>) -> usize {
        assert!(self.contains(pointer), "{:?} outside region at {:?} of {} bytes", pointer, self.base, self.size());

        pointer.as_ptr() as usize - self.base.as_ptr() as usize
    }
}

impl<C> fmt::Debug for Region<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("base", &self.base)
            .field("allocator", &self.allocator)
            .finish()
    }
}

//  Safety:
//  -   The Region never accesses the memory it points to, and is exclusively owned.
unsafe impl<C> Send for Region<C> {}
