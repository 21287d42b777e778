//! Block Allocator.
//!
//! The Block Allocator manages the allocation state of a fixed-size linear range of offsets, without owning the bytes
//! themselves.
//!
//! The range is partitioned into a sequence of contiguous blocks, ordered by offset, each of which is either:
//!
//! -   InUse: handed out to the user.
//! -   Free: available for allocation.
//! -   FreePendingToken: released by the user, yet possibly still read by the remote executor until its token passes.
//!
//! Adjacent Free blocks are always merged; a Free block is never merged with a FreePendingToken block, however, as
//! the latter only becomes Free once its token is known to have passed.

use std::{cmp, fmt, marker::PhantomData};

use tracing::trace;

use crate::{Configuration, Poll, Properties, Release, Releases, Token, TokenSource};

/// Status of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    /// Handed out to the user.
    InUse,
    /// Available for allocation.
    Free,
    /// Released, pending the token.
    FreePendingToken(Token),
}

impl BlockStatus {
    /// Returns the token the block is pending on, if any.
    pub fn token(&self) -> Option<Token> {
        match *self {
            BlockStatus::FreePendingToken(token) => Some(token),
            _ => None,
        }
    }
}

/// A block, as exposed for introspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    offset: usize,
    size: usize,
    status: BlockStatus,
}

impl BlockInfo {
    /// Returns the offset of the block within the region.
    pub fn offset(&self) -> usize { self.offset }

    /// Returns the size of the block.
    pub fn size(&self) -> usize { self.size }

    /// Returns the status of the block.
    pub fn status(&self) -> BlockStatus { self.status }

    //  Returns the offset past the end of the block.
    fn end(&self) -> usize { self.offset + self.size }
}

/// Block Allocator.
///
/// Allocation is first-fit, over Free blocks first, and then over FreePendingToken blocks, in address order, waiting
/// for each of their tokens in turn until a large enough block is obtained.
pub struct BlockAllocator<C> {
    //  Invariants:
    //  -   Never empty.
    //  -   The first block starts at offset 0, the last ends at `size`.
    //  -   Each block starts where the previous ends.
    //  -   No two adjacent blocks are Free.
    blocks: Vec<BlockInfo>,
    size: usize,
    bytes_in_use: usize,
    _configuration: PhantomData<fn() -> C>,
}

impl<C> BlockAllocator<C>
    where
        C: Configuration,
{
    /// Creates an allocator managing `size` bytes.
    ///
    /// `size` is rounded down to the alignment; the allocator starts as a single Free block.
    pub fn new(size: usize) -> Self {
        let size = Properties::<C>::usable_size_of(size);
        let blocks = vec!(BlockInfo { offset: 0, size, status: BlockStatus::Free });

        Self { blocks, size, bytes_in_use: 0, _configuration: PhantomData }
    }

    /// Returns the number of bytes managed.
    pub fn size(&self) -> usize { self.size }

    /// Returns the number of bytes in InUse blocks.
    ///
    /// Blocks pending a token are not in use, even though they cannot be reused yet.
    pub fn bytes_in_use(&self) -> usize { self.bytes_in_use }

    /// Returns whether any block is not Free, that is whether the allocator is not a single Free block.
    pub fn in_use(&self) -> bool { self.blocks.len() != 1 || self.blocks[0].status != BlockStatus::Free }

    /// Returns the blocks, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ { self.blocks.iter().copied() }

    /// Allocates a block of at least `size` bytes, and returns its offset.
    ///
    /// Returns None if `size` is 0, or if no block can be obtained, even after waiting for all pending tokens.
    ///
    /// May block on `tokens`, if no Free block is large enough.
    pub fn allocate<T>(&mut self, size: usize, tokens: &T) -> Option<usize>
        where
            T: TokenSource + ?Sized,
    {
        let size = Properties::<C>::block_size_of(size)?;

        //  First pass: first-fit, without waiting.
        let free = self.blocks.iter().position(|block| block.status == BlockStatus::Free && block.size >= size);

        if let Some(index) = free {
            return Some(self.allocate_in_block(index, size));
        }

        //  Second pass: wait on pending blocks, in address order, until one is large enough once merged with its Free
        //  neighbours.
        let mut index = 0;

        while index < self.blocks.len() {
            if let BlockStatus::FreePendingToken(token) = self.blocks[index].status {
                index = self.wait_for_token_and_free_block(index, token, tokens);

                if self.blocks[index].size >= size {
                    return Some(self.allocate_in_block(index, size));
                }
            }

            index += 1;
        }

        None
    }

    /// Frees the block starting at `offset`, making it available immediately.
    ///
    /// #   Panics
    ///
    /// If no InUse or FreePendingToken block starts at `offset`.
    pub fn free(&mut self, offset: usize) {
        let index = self.find_block(offset);
        let block = &mut self.blocks[index];

        match block.status {
            BlockStatus::InUse => self.bytes_in_use -= block.size,
            BlockStatus::FreePendingToken(_) => (),
            BlockStatus::Free => panic!("Block at offset {} is already free", offset),
        }

        block.status = BlockStatus::Free;

        self.collapse_free_block(index);
    }

    /// Frees the block starting at `offset`, making it available once `token` has passed.
    ///
    /// The block no longer counts as in use, immediately.
    ///
    /// #   Panics
    ///
    /// If no InUse or FreePendingToken block starts at `offset`.
    pub fn free_pending_token(&mut self, offset: usize, token: Token) {
        let index = self.find_block(offset);
        let block = &mut self.blocks[index];

        match block.status {
            BlockStatus::InUse => self.bytes_in_use -= block.size,
            BlockStatus::FreePendingToken(_) => (),
            BlockStatus::Free => panic!("Block at offset {} is already free", offset),
        }

        block.status = BlockStatus::FreePendingToken(token);
    }

    /// Applies a release.
    pub fn release(&mut self, release: Release<usize>) {
        match release {
            Release::Free(offset) => self.free(offset),
            Release::FreePendingToken(offset, token) => self.free_pending_token(offset, token),
        }
    }

    /// Reclaims unused memory, without blocking.
    ///
    /// The releases queued by `poll` are applied first, then every FreePendingToken block whose token has passed
    /// becomes Free.
    pub fn free_unused<T, P>(&mut self, tokens: &T, poll: &mut P)
        where
            T: TokenSource + ?Sized,
            P: Poll<usize> + ?Sized,
    {
        let mut releases = Releases::new();
        poll.poll(&mut releases);

        for release in releases.drain() {
            self.release(release);
        }

        let mut index = 0;

        while index < self.blocks.len() {
            if let BlockStatus::FreePendingToken(token) = self.blocks[index].status {
                if tokens.has_token_passed(token) {
                    self.blocks[index].status = BlockStatus::Free;
                    index = self.collapse_free_block(index);
                }
            }

            index += 1;
        }
    }

    /// Returns the size of the largest block which can be allocated without waiting.
    ///
    /// Reclaims unused memory first, see `free_unused`.
    pub fn largest_free_size_without_waiting<T, P>(&mut self, tokens: &T, poll: &mut P) -> usize
        where
            T: TokenSource + ?Sized,
            P: Poll<usize> + ?Sized,
    {
        self.free_unused(tokens, poll);

        self.blocks.iter()
            .filter(|block| block.status == BlockStatus::Free)
            .map(|block| block.size)
            .max()
            .unwrap_or(0)
    }

    /// Returns the size of the largest block which could be allocated after waiting for pending tokens.
    ///
    /// This is the largest run of contiguous blocks which are either Free or FreePendingToken.
    pub fn largest_free_size_with_waiting(&self) -> usize {
        let mut largest = 0;
        let mut current = 0;

        for block in &self.blocks {
            if block.status == BlockStatus::InUse {
                largest = cmp::max(largest, current);
                current = 0;
            } else {
                current += block.size;
            }
        }

        cmp::max(largest, current)
    }

    /// Returns the total size of Free blocks.
    ///
    /// Reclaims unused memory first, see `free_unused`.
    pub fn total_free_size<T, P>(&mut self, tokens: &T, poll: &mut P) -> usize
        where
            T: TokenSource + ?Sized,
            P: Poll<usize> + ?Sized,
    {
        self.free_unused(tokens, poll);

        self.blocks.iter()
            .filter(|block| block.status == BlockStatus::Free)
            .map(|block| block.size)
            .sum()
    }

    /// Waits for all pending tokens, leaving no FreePendingToken block.
    pub fn resolve_pending<T>(&mut self, tokens: &T)
        where
            T: TokenSource + ?Sized,
    {
        let mut index = 0;

        while index < self.blocks.len() {
            if let BlockStatus::FreePendingToken(token) = self.blocks[index].status {
                index = self.wait_for_token_and_free_block(index, token, tokens);
            }

            index += 1;
        }
    }

    /// Checks the invariants of the block sequence.
    ///
    /// Returns false if any is violated:
    ///
    /// -   Blocks partition `[0, size)` exactly, with strictly increasing offsets.
    /// -   No two adjacent blocks are Free.
    /// -   Offsets and sizes are aligned.
    /// -   `bytes_in_use` is the sum of the sizes of InUse blocks.
    pub fn check_consistency(&self) -> bool {
        let (first, last) = match (self.blocks.first(), self.blocks.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return false,
        };

        if first.offset != 0 || last.end() != self.size {
            return false;
        }

        for pair in self.blocks.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);

            //  Not implied by the contiguity check, as zero-sized blocks would pass it.
            if next.offset <= current.offset {
                return false;
            }

            if next.offset != current.end() {
                return false;
            }

            if current.status == BlockStatus::Free && next.status == BlockStatus::Free {
                return false;
            }
        }

        let aligned = self.blocks.iter()
            .all(|block| Properties::<C>::is_aligned(block.offset) && Properties::<C>::is_aligned(block.size));

        let in_use: usize = self.blocks.iter()
            .filter(|block| block.status == BlockStatus::InUse)
            .map(|block| block.size)
            .sum();

        aligned && in_use == self.bytes_in_use
    }

    /// Resolves all pending blocks, then checks that the allocator is a single Free block.
    ///
    /// In debug builds, a block still in use is a contract violation, and panics.
    pub fn close<T>(mut self, tokens: &T) -> bool
        where
            T: TokenSource + ?Sized,
    {
        self.resolve_pending(tokens);

        let closed = !self.in_use();

        debug_assert!(closed || std::thread::panicking(),
            "Closing allocator with {} bytes still in use: {:?}", self.bytes_in_use, self);

        closed
    }

    //  Internal; returns the index of the block starting at `offset`.
    //
    //  #   Panics
    //
    //  If no block starts at `offset`.
    fn find_block(&self, offset: usize) -> usize {
        match self.blocks.binary_search_by_key(&offset, |block| block.offset) {
            Ok(index) => index,
            Err(_) => panic!("No block starts at offset {}", offset),
        }
    }

    //  Internal; splits the Free block at `index`, marking its first `size` bytes InUse.
    //
    //  Returns the offset of the allocation.
    fn allocate_in_block(&mut self, index: usize, size: usize) -> usize {
        let block = &mut self.blocks[index];

        debug_assert_eq!(BlockStatus::Free, block.status);
        debug_assert!(block.size >= size, "{} < {}", block.size, size);

        let offset = block.offset;
        let remainder = block.size - size;

        self.bytes_in_use += size;

        block.status = BlockStatus::InUse;
        block.size = size;

        if remainder > 0 {
            let tail = BlockInfo { offset: offset + size, size: remainder, status: BlockStatus::Free };
            self.blocks.insert(index + 1, tail);
        }

        offset
    }

    //  Internal; waits for `token`, then frees the block at `index` and merges it with its Free neighbours.
    //
    //  Returns the index of the resulting Free block.
    fn wait_for_token_and_free_block<T>(&mut self, index: usize, token: Token, tokens: &T) -> usize
        where
            T: TokenSource + ?Sized,
    {
        debug_assert_eq!(BlockStatus::FreePendingToken(token), self.blocks[index].status);

        trace!(%token, offset = self.blocks[index].offset, size = self.blocks[index].size, "waiting for pending block");

        tokens.wait_for_token(token);

        self.blocks[index].status = BlockStatus::Free;
        self.collapse_free_block(index)
    }

    //  Internal; merges the Free block at `index` with its Free neighbours, the right one first.
    //
    //  Returns the index of the resulting Free block.
    fn collapse_free_block(&mut self, index: usize) -> usize {
        debug_assert_eq!(BlockStatus::Free, self.blocks[index].status);

        if index + 1 < self.blocks.len() && self.blocks[index + 1].status == BlockStatus::Free {
            let after = self.blocks.remove(index + 1);
            self.blocks[index].size += after.size;
        }

        if index > 0 && self.blocks[index - 1].status == BlockStatus::Free {
            let current = self.blocks.remove(index);
            self.blocks[index - 1].size += current.size;
            return index - 1;
        }

        index
    }
}

impl<C> fmt::Debug for BlockAllocator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("size", &self.size)
            .field("bytes_in_use", &self.bytes_in_use)
            .field("blocks", &self.blocks)
            .finish()
    }
}

#[cfg(test)]
mod tests {

use proptest::prelude::*;

use crate::{DefaultConfiguration, NoPoll};
use crate::internals::test::ScriptedTokens;

use super::*;

type Allocator = BlockAllocator<DefaultConfiguration>;

const SIZE: usize = 1024;

fn statuses(allocator: &Allocator) -> Vec<(usize, usize, BlockStatus)> {
    allocator.blocks().map(|block| (block.offset(), block.size(), block.status())).collect()
}

fn largest_without_waiting(allocator: &mut Allocator, tokens: &ScriptedTokens) -> usize {
    allocator.largest_free_size_without_waiting(tokens, &mut NoPoll)
}

#[test]
fn block_allocator_new() {
    let allocator = Allocator::new(SIZE);

    assert_eq!(SIZE, allocator.size());
    assert_eq!(0, allocator.bytes_in_use());
    assert!(!allocator.in_use());
    assert!(allocator.check_consistency());
    assert_eq!(vec!((0, SIZE, BlockStatus::Free)), statuses(&allocator));
}

#[test]
fn block_allocator_new_unaligned() {
    let allocator = Allocator::new(SIZE + 15);

    assert_eq!(SIZE, allocator.size());
    assert!(allocator.check_consistency());
}

#[test]
fn block_allocator_allocate_zero() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(SIZE);

    assert_eq!(None, allocator.allocate(0, &tokens));
    assert!(!allocator.in_use());

    //  Even when full.
    assert_eq!(Some(0), allocator.allocate(SIZE, &tokens));
    assert_eq!(None, allocator.allocate(0, &tokens));
}

#[test]
fn block_allocator_allocate_first_fit() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(SIZE);

    assert_eq!(Some(0), allocator.allocate(16, &tokens));
    assert_eq!(Some(16), allocator.allocate(1, &tokens));
    assert_eq!(Some(32), allocator.allocate(17, &tokens));
    assert_eq!(Some(64), allocator.allocate(64, &tokens));

    assert_eq!(128, allocator.bytes_in_use());
    assert!(allocator.check_consistency());

    //  Hole of 32 bytes at 32: a first-fit request lands in the hole, a larger one after.
    allocator.free(32);

    assert_eq!(Some(128), allocator.allocate(48, &tokens));
    assert_eq!(Some(32), allocator.allocate(16, &tokens));
    assert_eq!(Some(48), allocator.allocate(16, &tokens));

    assert!(allocator.check_consistency());
}

#[test]
fn block_allocator_allocate_free_round_trip() {
    let tokens = ScriptedTokens::new();

    for size in [1, 16, 100, SIZE - 1, SIZE] {
        let mut allocator = Allocator::new(SIZE);

        let offset = allocator.allocate(size, &tokens).expect("Allocated");
        allocator.free(offset);

        assert_eq!(vec!((0, SIZE, BlockStatus::Free)), statuses(&allocator), "{}", size);
        assert_eq!(0, allocator.bytes_in_use());
    }
}

#[test]
fn block_allocator_out_of_memory() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    assert_eq!(Some(0), allocator.allocate(64, &tokens));
    assert_eq!(None, allocator.allocate(1, &tokens));
    assert_eq!(None, allocator.allocate(16, &tokens));

    allocator.free(0);

    assert_eq!(Some(0), allocator.allocate(64, &tokens));
    assert_eq!(None, allocator.allocate(65, &tokens));
}

#[test]
fn block_allocator_free_coalesces() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    let offsets: Vec<_> = (0..4).map(|_| allocator.allocate(16, &tokens).expect("Allocated")).collect();

    assert_eq!(vec!(0, 16, 32, 48), offsets);

    allocator.free(16);
    allocator.free(48);

    assert_eq!(
        vec!(
            (0, 16, BlockStatus::InUse),
            (16, 16, BlockStatus::Free),
            (32, 16, BlockStatus::InUse),
            (48, 16, BlockStatus::Free),
        ),
        statuses(&allocator)
    );

    //  Merges with both neighbours.
    allocator.free(32);

    assert_eq!(vec!((0, 16, BlockStatus::InUse), (16, 48, BlockStatus::Free)), statuses(&allocator));

    allocator.free(0);

    assert_eq!(vec!((0, 64, BlockStatus::Free)), statuses(&allocator));
}

#[test]
#[should_panic]
fn block_allocator_free_unknown_offset() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(SIZE);

    allocator.allocate(32, &tokens).expect("Allocated");

    allocator.free(16);
}

#[test]
#[should_panic]
fn block_allocator_free_twice() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(SIZE);

    let offset = allocator.allocate(32, &tokens).expect("Allocated");

    allocator.free(offset);
    allocator.free(offset);
}

#[test]
fn block_allocator_free_pending_token() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    assert_eq!(Some(0), allocator.allocate(32, &tokens));
    assert_eq!(Some(32), allocator.allocate(32, &tokens));

    let token = tokens.insert_token();
    allocator.free_pending_token(0, token);

    //  No longer in use, yet not reusable.
    assert_eq!(32, allocator.bytes_in_use());
    assert!(allocator.in_use());
    assert_eq!(0, largest_without_waiting(&mut allocator, &tokens));
    assert_eq!(32, allocator.largest_free_size_with_waiting());

    //  Free never merges with FreePendingToken.
    allocator.free(32);

    assert_eq!(
        vec!((0, 32, BlockStatus::FreePendingToken(token)), (32, 32, BlockStatus::Free)),
        statuses(&allocator)
    );
    assert!(allocator.check_consistency());

    //  Once passed, reclaimed and merged.
    tokens.pass(token);

    assert_eq!(64, largest_without_waiting(&mut allocator, &tokens));
    assert_eq!(vec!((0, 64, BlockStatus::Free)), statuses(&allocator));
    assert!(tokens.waits().is_empty());
}

#[test]
fn block_allocator_free_pending_token_then_free() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    let offset = allocator.allocate(16, &tokens).expect("Allocated");

    allocator.free_pending_token(offset, tokens.insert_token());
    allocator.free(offset);

    assert_eq!(0, allocator.bytes_in_use());
    assert!(!allocator.in_use());
}

#[test]
fn block_allocator_allocate_waits_on_first_pending() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    let offsets: Vec<_> = (0..4).map(|_| allocator.allocate(16, &tokens).expect("Allocated")).collect();

    let first = tokens.insert_token();
    let second = tokens.insert_token();

    allocator.free_pending_token(offsets[3], first);
    allocator.free_pending_token(offsets[1], second);

    //  Address order, not token order: the block at 16 is waited on first.
    assert_eq!(Some(16), allocator.allocate(16, &tokens));
    assert_eq!(vec!(second), tokens.waits());

    assert!(allocator.check_consistency());
}

#[test]
fn block_allocator_allocate_waits_until_large_enough() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    let offsets: Vec<_> = (0..4).map(|_| allocator.allocate(16, &tokens).expect("Allocated")).collect();

    let (a, b, c) = (tokens.insert_token(), tokens.insert_token(), tokens.insert_token());

    allocator.free_pending_token(offsets[0], a);
    allocator.free_pending_token(offsets[1], b);
    allocator.free_pending_token(offsets[2], c);

    assert_eq!(48, allocator.largest_free_size_with_waiting());

    //  Waits on 0, then 16, merging them, which suffices.
    assert_eq!(Some(0), allocator.allocate(32, &tokens));
    assert_eq!(vec!(a, b), tokens.waits());

    assert_eq!(
        vec!(
            (0, 32, BlockStatus::InUse),
            (32, 16, BlockStatus::FreePendingToken(c)),
            (48, 16, BlockStatus::InUse),
        ),
        statuses(&allocator)
    );
}

#[test]
fn block_allocator_allocate_fails_after_waiting() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    let offsets: Vec<_> = (0..4).map(|_| allocator.allocate(16, &tokens).expect("Allocated")).collect();

    let (a, b) = (tokens.insert_token(), tokens.insert_token());

    allocator.free_pending_token(offsets[0], a);
    allocator.free_pending_token(offsets[2], b);

    assert_eq!(None, allocator.allocate(32, &tokens));
    assert_eq!(vec!(a, b), tokens.waits());

    //  The waits were not in vain.
    assert_eq!(
        vec!(
            (0, 16, BlockStatus::Free),
            (16, 16, BlockStatus::InUse),
            (32, 16, BlockStatus::Free),
            (48, 16, BlockStatus::InUse),
        ),
        statuses(&allocator)
    );
}

#[test]
fn block_allocator_free_unused_poll() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    let first = allocator.allocate(32, &tokens).expect("Allocated");
    let second = allocator.allocate(32, &tokens).expect("Allocated");

    let token = tokens.insert_token();
    tokens.pass(token);

    let mut poll = |releases: &mut Releases<usize>| {
        releases.free(first);
        releases.free_pending_token(second, token);
    };

    allocator.free_unused(&tokens, &mut poll);

    assert_eq!(vec!((0, 64, BlockStatus::Free)), statuses(&allocator));
    assert_eq!(0, allocator.bytes_in_use());
}

#[test]
fn block_allocator_largest_free_size() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(128);

    let offsets: Vec<_> = (0..8).map(|_| allocator.allocate(16, &tokens).expect("Allocated")).collect();

    assert_eq!(0, largest_without_waiting(&mut allocator, &tokens));
    assert_eq!(0, allocator.largest_free_size_with_waiting());

    allocator.free(offsets[1]);
    allocator.free_pending_token(offsets[2], tokens.insert_token());
    allocator.free(offsets[3]);
    allocator.free(offsets[6]);

    assert_eq!(16, largest_without_waiting(&mut allocator, &tokens));
    assert_eq!(48, allocator.largest_free_size_with_waiting());
    assert_eq!(48, allocator.total_free_size(&tokens, &mut NoPoll));

    tokens.pass_all();

    assert_eq!(48, largest_without_waiting(&mut allocator, &tokens));
    assert_eq!(64, allocator.total_free_size(&tokens, &mut NoPoll));
}

#[test]
fn block_allocator_resolve_pending_and_close() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    let offsets: Vec<_> = (0..2).map(|_| allocator.allocate(32, &tokens).expect("Allocated")).collect();

    for offset in offsets {
        allocator.free_pending_token(offset, tokens.insert_token());
    }

    allocator.resolve_pending(&tokens);

    assert_eq!(2, tokens.waits().len());
    assert!(!allocator.in_use());
    assert!(allocator.close(&tokens));
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "still in use")]
fn block_allocator_close_in_use() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    allocator.allocate(32, &tokens).expect("Allocated");

    allocator.close(&tokens);
}

#[cfg(not(debug_assertions))]
#[test]
fn block_allocator_close_in_use() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(64);

    let offset = allocator.allocate(32, &tokens).expect("Allocated");
    allocator.allocate(32, &tokens).expect("Allocated");

    //  Pending blocks are resolved, InUse ones are not.
    allocator.free_pending_token(offset, tokens.insert_token());

    assert!(!allocator.close(&tokens));
    assert_eq!(1, tokens.waits().len());
}

#[test]
fn block_allocator_zero_sized() {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(8);

    assert_eq!(0, allocator.size());
    assert!(allocator.check_consistency());
    assert_eq!(None, allocator.allocate(1, &tokens));
}

//
//  Properties
//

#[derive(Clone, Debug)]
enum Operation {
    Allocate(usize),
    Free(usize),
    FreePendingToken(usize),
    PassTokens(u64),
    FreeUnused,
}

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => (0usize..=160).prop_map(Operation::Allocate),
        2 => any::<usize>().prop_map(Operation::Free),
        2 => any::<usize>().prop_map(Operation::FreePendingToken),
        1 => (0u64..4).prop_map(Operation::PassTokens),
        1 => Just(Operation::FreeUnused),
    ]
}

proptest! {

#[test]
fn block_allocator_operations_preserve_invariants(operations in prop::collection::vec(operation(), 1..64)) {
    let tokens = ScriptedTokens::new();
    let mut allocator = Allocator::new(512);
    let mut live: Vec<(usize, usize)> = vec!();

    for operation in operations {
        match operation {
            Operation::Allocate(size) => {
                if let Some(offset) = allocator.allocate(size, &tokens) {
                    prop_assert!(size > 0);
                    prop_assert_eq!(0, offset % 16);

                    live.push((offset, Properties::<DefaultConfiguration>::block_size_of(size).unwrap()));
                }
            },
            Operation::Free(index) if !live.is_empty() => {
                let (offset, _) = live.swap_remove(index % live.len());
                allocator.free(offset);
            },
            Operation::FreePendingToken(index) if !live.is_empty() => {
                let (offset, _) = live.swap_remove(index % live.len());
                allocator.free_pending_token(offset, tokens.insert_token());
            },
            Operation::PassTokens(count) => {
                let target = tokens.insert_token().value().saturating_sub(4 - count);
                tokens.pass(Token::new(target));
            },
            Operation::FreeUnused => allocator.free_unused(&tokens, &mut NoPoll),
            _ => (),
        }

        prop_assert!(allocator.check_consistency(), "{:?}", allocator);
        prop_assert_eq!(live.iter().map(|(_, size)| size).sum::<usize>(), allocator.bytes_in_use());

        let largest_free = allocator.blocks()
            .filter(|block| block.status() == BlockStatus::Free)
            .map(|block| block.size())
            .max()
            .unwrap_or(0);

        prop_assert!(allocator.largest_free_size_with_waiting() >= largest_free);
    }

    for (offset, _) in live.drain(..) {
        allocator.free(offset);
    }

    prop_assert!(allocator.close(&tokens));
}

}

}
