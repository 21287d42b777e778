//! A Chunk of the pool: a backing region, and the Region allocating within it.

use std::ptr::NonNull;

use crate::{BackingRegion, BlockInfo, Configuration, NoPoll, Region, RegionId, Token, TokenSource};

/// Chunk.
///
/// A Chunk is the unit of growth of the `PoolManager`: one backing region, created by the transport, and the Region
/// allocating within it.
#[derive(Debug)]
pub struct Chunk<C> {
    id: RegionId,
    region: Region<C>,
}

impl<C> Chunk<C>
    where
        C: Configuration,
{
    /// Creates a Chunk spanning the whole backing region.
    pub(crate) fn new(backing: BackingRegion) -> Self {
        //  Safety:
        //  -   The backing region remains valid until destroyed, which only happens once the chunk is closed.
        let region = unsafe { Region::new(backing.base(), backing.size()) };

        Self { id: backing.id(), region }
    }

    /// Returns the identity of the backing region.
    pub fn id(&self) -> RegionId { self.id }

    /// Returns the capacity of the chunk.
    pub fn size(&self) -> usize { self.region.size() }

    /// Returns the number of bytes in use.
    pub fn bytes_in_use(&self) -> usize { self.region.bytes_in_use() }

    /// Returns whether any memory is in use or pending a token.
    pub fn in_use(&self) -> bool { self.region.in_use() }

    /// Returns the blocks, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ { self.region.blocks() }

    /// Returns whether `pointer` lies within the chunk.
    pub fn contains(&self, pointer: NonNull<u8>) -> bool { self.region.contains(pointer) }

    /// Returns the offset of `pointer` within the chunk; None maps to None.
    pub fn offset_of(&self, pointer: Option<NonNull<u8>>) -> Option<usize> { self.region.offset_of(pointer) }

    /// Returns the address at `offset` within the chunk; None maps to None.
    pub fn pointer_of(&self, offset: Option<usize>) -> Option<NonNull<u8>> { self.region.pointer_of(offset) }

    /// Returns the size of the largest allocation possible if waiting for pending tokens.
    pub fn largest_free_size_with_waiting(&self) -> usize { self.region.largest_free_or_pending_size() }

    /// Checks the invariants of the block sequence.
    pub fn check_consistency(&self) -> bool { self.region.check_consistency() }

    //  Allocates at least `size` bytes.
    pub(crate) fn alloc<T>(&mut self, size: usize, tokens: &T) -> Option<NonNull<u8>>
        where
            T: TokenSource + ?Sized,
    {
        self.region.alloc(size, tokens)
    }

    //  Frees the memory at `pointer`, immediately.
    pub(crate) fn free(&mut self, pointer: NonNull<u8>) { self.region.free(pointer) }

    //  Frees the memory at `pointer`, once `token` has passed.
    pub(crate) fn free_pending_token(&mut self, pointer: NonNull<u8>, token: Token) {
        self.region.free_pending_token(pointer, token)
    }

    //  Reclaims the memory whose token passed.
    //
    //  The poll step is handled by the pool, as its releases may target any chunk.
    pub(crate) fn free_unused<T>(&mut self, tokens: &T)
        where
            T: TokenSource + ?Sized,
    {
        self.region.free_unused(tokens, &mut NoPoll)
    }

    //  Returns the size of the largest allocation possible without waiting.
    pub(crate) fn largest_free_size_without_waiting<T>(&mut self, tokens: &T) -> usize
        where
            T: TokenSource + ?Sized,
    {
        self.region.largest_free_size(tokens, &mut NoPoll)
    }

    //  Returns the total size available without waiting.
    pub(crate) fn total_free_size<T>(&mut self, tokens: &T) -> usize
        where
            T: TokenSource + ?Sized,
    {
        self.region.total_free_size(tokens, &mut NoPoll)
    }

    //  Resolves pending blocks, and returns the identity of the backing region, now ready to be destroyed.
    pub(crate) fn close<T>(self, tokens: &T) -> RegionId
        where
            T: TokenSource + ?Sized,
    {
        let id = self.id;

        if !self.region.close(tokens) {
            tracing::error!(%id, "closing chunk with memory still in use");
        }

        id
    }
}
