//! Transport
//!
//! The Transport trait is used to create and destroy the backing regions shared with the remote executor. By
//! abstracting the underlying transport, the pool is agnostic to whether memory is shared via memfd, a GPU driver, or
//! merely the local heap in tests.

use std::{fmt, ptr::NonNull};

use crate::TransportError;

/// Identity of a backing region, as understood by the remote executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(u32);

impl RegionId {
    /// Creates a RegionId.
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Retrieves the value.
    pub const fn value(&self) -> u32 { self.0 }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "region-{}", self.0) }
}

/// A backing region, created by a `Transport`.
///
/// The region is owned by the transport; this is merely a description of it.
#[derive(Debug)]
pub struct BackingRegion {
    id: RegionId,
    base: NonNull<u8>,
    size: usize,
}

impl BackingRegion {
    /// Creates a BackingRegion.
    ///
    /// #   Safety
    ///
    /// -   Assumes that `base` points to `size` bytes, readable and writable, until the region `id` is destroyed.
    pub unsafe fn new(id: RegionId, base: NonNull<u8>, size: usize) -> Self { Self { id, base, size } }

    /// Returns the identity of the region.
    pub fn id(&self) -> RegionId { self.id }

    /// Returns the base address of the region.
    pub fn base(&self) -> NonNull<u8> { self.base }

    /// Returns the size of the region, in bytes.
    pub fn size(&self) -> usize { self.size }
}

/// Abstraction of the creation and destruction of regions shared with the remote executor.
pub trait Transport {
    /// Creates a fresh region of at least `size` bytes.
    ///
    /// Fails if the remote executor is unreachable, or if no more memory can be shared.
    fn create_region(&self, size: usize) -> Result<BackingRegion, TransportError>;

    /// Destroys the region.
    ///
    /// #   Safety
    ///
    /// The caller should no longer reference the memory of the region after calling this function.
    ///
    /// `destroy_region` assumes that:
    /// -   `id` was created by this instance of `Transport`, and not yet destroyed.
    unsafe fn destroy_region(&self, id: RegionId);
}

impl<T> Transport for &T
    where
        T: Transport + ?Sized,
{
    fn create_region(&self, size: usize) -> Result<BackingRegion, TransportError> { (**self).create_region(size) }

    unsafe fn destroy_region(&self, id: RegionId) { (**self).destroy_region(id) }
}

impl<T> Transport for std::rc::Rc<T>
    where
        T: Transport + ?Sized,
{
    fn create_region(&self, size: usize) -> Result<BackingRegion, TransportError> { (**self).create_region(size) }

    unsafe fn destroy_region(&self, id: RegionId) { (**self).destroy_region(id) }
}

impl<T> Transport for std::sync::Arc<T>
    where
        T: Transport + ?Sized,
{
    fn create_region(&self, size: usize) -> Result<BackingRegion, TransportError> { (**self).create_region(size) }

    unsafe fn destroy_region(&self, id: RegionId) { (**self).destroy_region(id) }
}
