//! Pool Manager.
//!
//! The Pool Manager presents a single logical allocator over a growable set of chunks, each backed by a region
//! created by the `Transport`.
//!
//! Allocation follows a three-step policy:
//!
//! 1.  Scan the chunks, in creation order, for memory available without waiting.
//! 2.  If the memory allocated yet not in use reaches the configured ceiling, scan the chunks again for memory
//!     available after waiting for pending tokens, and wait.
//! 3.  Create a new chunk.
//!
//! Growing never blocks, but increases the footprint; waiting never increases the footprint, but may block. The
//! ceiling bounds the footprint of streaming workloads, such as per-frame uploads, whilst avoiding stalls when memory
//! is not under pressure.

use std::{fmt, ptr::NonNull};

use tracing::{debug, trace, warn};

use crate::{AllocError, Chunk, Configuration, MaxFreeBytes, Poll, PoolSettings, RegionId, Release, Releases};
use crate::{BlockStatus, Token, TokenSource, Transport, TransportError};

/// An allocation handed out by a `PoolManager`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Allocation {
    pointer: NonNull<u8>,
    region: RegionId,
    offset: usize,
}

impl Allocation {
    /// Returns the address of the allocation.
    pub fn pointer(&self) -> NonNull<u8> { self.pointer }

    /// Returns the identity of the backing region containing the allocation.
    pub fn region(&self) -> RegionId { self.region }

    /// Returns the offset of the allocation within its backing region.
    ///
    /// Together with `region`, this is how the remote executor locates the allocation.
    pub fn offset(&self) -> usize { self.offset }
}

/// A snapshot of the memory usage of a `PoolManager`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PoolStats {
    /// Number of chunks.
    pub chunks: usize,
    /// Sum of the capacities of the chunks.
    pub allocated_memory: usize,
    /// Number of bytes in use.
    pub bytes_in_use: usize,
    /// Number of bytes immediately available, without reclaiming.
    pub free_size: usize,
    /// Number of bytes pending a token.
    pub pending_size: usize,
}

/// Pool Manager.
///
/// Not thread-safe: a single instance is meant to be used from a single thread, though it may be sent to another.
pub struct PoolManager<C, T, R>
    where
        C: Configuration,
        T: TokenSource,
        R: Transport,
{
    //  In creation order.
    chunks: Vec<Chunk<C>>,
    settings: PoolSettings,
    //  Sum of the sizes of `chunks`.
    allocated_memory: usize,
    tokens: T,
    transport: R,
    poller: Option<Box<dyn Poll<NonNull<u8>> + Send>>,
}

impl<C, T, R> PoolManager<C, T, R>
    where
        C: Configuration,
        T: TokenSource,
        R: Transport,
{
    /// Creates an empty pool; no memory is allocated until the first request.
    pub fn new(tokens: T, transport: R, settings: PoolSettings) -> Self {
        Self { chunks: Vec::new(), settings, allocated_memory: 0, tokens, transport, poller: None }
    }

    /// Returns a reference to the token source.
    pub fn tokens(&self) -> &T { &self.tokens }

    /// Returns a reference to the transport.
    pub fn transport(&self) -> &R { &self.transport }

    /// Returns the settings.
    pub fn settings(&self) -> &PoolSettings { &self.settings }

    /// Sets the rounding multiple of the size of new chunks.
    ///
    /// Existing chunks are unaffected.
    pub fn set_chunk_size_multiple(&mut self, multiple: usize) {
        self.settings = self.settings.with_chunk_size_multiple(multiple);
    }

    /// Sets the ceiling on idle memory.
    pub fn set_max_free_bytes(&mut self, max_free_bytes: MaxFreeBytes) {
        self.settings = self.settings.with_max_free_bytes(max_free_bytes);
    }

    /// Sets the poll step, invoked before memory is reclaimed.
    ///
    /// The releases it queues may target any chunk of the pool.
    pub fn set_poller<P>(&mut self, poller: P)
        where
            P: Poll<NonNull<u8>> + Send + 'static,
    {
        self.poller = Some(Box::new(poller));
    }

    /// Removes the poll step, if any.
    pub fn clear_poller(&mut self) { self.poller = None; }

    /// Returns the number of chunks.
    pub fn num_chunks(&self) -> usize { self.chunks.len() }

    /// Returns the sum of the capacities of the chunks.
    pub fn allocated_memory(&self) -> usize { self.allocated_memory }

    /// Returns the number of bytes in use, across all chunks.
    pub fn bytes_in_use(&self) -> usize { self.chunks.iter().map(|chunk| chunk.bytes_in_use()).sum() }

    /// Returns the chunk at `index`, in creation order.
    pub fn chunk(&self, index: usize) -> Option<&Chunk<C>> { self.chunks.get(index) }

    /// Returns the chunks, in creation order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk<C>> + '_ { self.chunks.iter() }

    /// Returns a snapshot of the memory usage, without reclaiming anything.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats { chunks: self.chunks.len(), allocated_memory: self.allocated_memory, ..PoolStats::default() };

        for block in self.chunks.iter().flat_map(|chunk| chunk.blocks()) {
            match block.status() {
                BlockStatus::InUse => stats.bytes_in_use += block.size(),
                BlockStatus::Free => stats.free_size += block.size(),
                BlockStatus::FreePendingToken(_) => stats.pending_size += block.size(),
            }
        }

        stats
    }

    /// Returns the number of bytes available without waiting, across all chunks, after reclaiming unused memory.
    pub fn total_free_size(&mut self) -> usize {
        self.poll();

        let tokens = &self.tokens;

        self.chunks.iter_mut().map(|chunk| chunk.total_free_size(tokens)).sum()
    }

    /// Checks the invariants of every chunk, and of the pool accounting.
    pub fn check_consistency(&self) -> bool {
        let capacity: usize = self.chunks.iter().map(|chunk| chunk.size()).sum();

        capacity == self.allocated_memory && self.chunks.iter().all(|chunk| chunk.check_consistency())
    }

    /// Allocates at least `size` bytes.
    ///
    /// May block on the token source, if the idle memory reaches the ceiling; see the module documentation.
    ///
    /// A failure leaves the pool unchanged, and is not retried.
    pub fn alloc(&mut self, size: usize) -> Result<Allocation, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        self.poll();

        if size <= self.allocated_memory {
            let mut total_bytes_in_use = 0;

            for chunk in &mut self.chunks {
                //  Reclaims the memory whose token passed, once per chunk.
                let largest = chunk.largest_free_size_without_waiting(&self.tokens);

                total_bytes_in_use += chunk.bytes_in_use();

                if largest >= size {
                    if let Some(allocation) = Self::allocate_in_chunk(chunk, size, &self.tokens) {
                        return Ok(allocation);
                    }
                }
            }

            let idle = self.allocated_memory - total_bytes_in_use;

            if self.settings.max_free_bytes().is_reached_by(idle) {
                trace!(size, idle, "idle memory over ceiling, waiting for pending memory");

                for chunk in &mut self.chunks {
                    if chunk.largest_free_size_with_waiting() >= size {
                        if let Some(allocation) = Self::allocate_in_chunk(chunk, size, &self.tokens) {
                            return Ok(allocation);
                        }
                    }
                }
            }
        }

        self.grow(size)
    }

    /// Frees the memory at `pointer`, immediately.
    ///
    /// #   Panics
    ///
    /// If `pointer` was not allocated by this pool, or was already freed.
    pub fn free(&mut self, pointer: NonNull<u8>) {
        let index = self.find_chunk(pointer);

        self.chunks[index].free(pointer);
    }

    /// Frees the memory at `pointer`, once `token` has passed.
    ///
    /// #   Panics
    ///
    /// If `pointer` was not allocated by this pool, or was already freed.
    pub fn free_pending_token(&mut self, pointer: NonNull<u8>, token: Token) {
        let index = self.find_chunk(pointer);

        self.chunks[index].free_pending_token(pointer, token);
    }

    /// Reclaims unused memory, without blocking, and destroys the chunks left entirely unused.
    pub fn free_unused(&mut self) {
        self.poll();

        let mut index = 0;

        while index < self.chunks.len() {
            self.chunks[index].free_unused(&self.tokens);

            if self.chunks[index].in_use() {
                index += 1;
                continue;
            }

            let chunk = self.chunks.remove(index);
            self.destroy_chunk(chunk);
        }
    }

    //  Internal; allocates from `chunk`, which is expected to have enough space.
    fn allocate_in_chunk(chunk: &mut Chunk<C>, size: usize, tokens: &T) -> Option<Allocation> {
        let pointer = chunk.alloc(size, tokens);

        debug_assert!(pointer.is_some(), "Chunk {} failed to allocate {} bytes", chunk.id(), size);

        let pointer = pointer?;
        let offset = chunk.offset_of(Some(pointer))?;

        Some(Allocation { pointer, region: chunk.id(), offset })
    }

    //  Internal; creates a new chunk, sized for `size`, and allocates from it.
    #[cold]
    fn grow(&mut self, size: usize) -> Result<Allocation, AllocError> {
        let chunk_size = self.settings.chunk_size_for::<C>(size)
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        let backing = match self.transport.create_region(chunk_size) {
            Ok(backing) => backing,
            Err(TransportError::Exhausted { requested, available }) => {
                warn!(size, requested, available, "transport exhausted");
                return Err(AllocError::OutOfMemory { requested: size });
            },
            Err(source) => {
                warn!(size, chunk_size, error = %source, "failed to create backing region");
                return Err(AllocError::ConnectionLost { requested: size, source });
            },
        };

        let mut chunk = Chunk::new(backing);

        debug!(id = %chunk.id(), size = chunk.size(), "created chunk");

        let allocation = Self::allocate_in_chunk(&mut chunk, size, &self.tokens);

        self.allocated_memory += chunk.size();
        self.chunks.push(chunk);

        allocation.ok_or(AllocError::OutOfMemory { requested: size })
    }

    //  Internal; runs the poll step, and applies the releases it queued.
    fn poll(&mut self) {
        let poller = match self.poller.as_mut() {
            Some(poller) => poller,
            None => return,
        };

        let mut releases = Releases::new();
        poller.poll(&mut releases);

        for release in releases.drain() {
            match release {
                Release::Free(pointer) => self.free(pointer),
                Release::FreePendingToken(pointer, token) => self.free_pending_token(pointer, token),
            }
        }
    }

    //  Internal; returns the index of the chunk containing `pointer`.
    //
    //  #   Panics
    //
    //  If no chunk contains `pointer`.
    fn find_chunk(&self, pointer: NonNull<u8>) -> usize {
        match self.chunks.iter().position(|chunk| chunk.contains(pointer)) {
            Some(index) => index,
            None => panic!("{:?} does not belong to any chunk", pointer),
        }
    }

    //  Internal; closes the chunk, and destroys its backing region.
    fn destroy_chunk(&mut self, chunk: Chunk<C>) {
        self.allocated_memory -= chunk.size();

        let id = chunk.close(&self.tokens);

        debug!(%id, "destroying chunk");

        //  Safety:
        //  -   `id` was created by `self.transport`, and is destroyed once.
        //  -   The chunk no longer hands out addresses within the region.
        unsafe { self.transport.destroy_region(id) };
    }
}

impl<C, T, R> Drop for PoolManager<C, T, R>
    where
        C: Configuration,
        T: TokenSource,
        R: Transport,
{
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..) {
            let id = chunk.close(&self.tokens);

            //  Safety:
            //  -   `id` was created by `self.transport`, and is destroyed once.
            unsafe { self.transport.destroy_region(id) };
        }

        self.allocated_memory = 0;
    }
}

impl<C, T, R> fmt::Debug for PoolManager<C, T, R>
    where
        C: Configuration,
        T: TokenSource,
        R: Transport,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("settings", &self.settings)
            .field("allocated_memory", &self.allocated_memory)
            .field("chunks", &self.chunks.iter().map(|chunk| (chunk.id(), chunk.size())).collect::<Vec<_>>())
            .finish()
    }
}
