//! Transport sharing memory from the process heap.

use std::{
    alloc::{self, Layout},
    collections::HashMap,
    io,
    ptr::NonNull,
    sync::{Mutex, MutexGuard, PoisonError},
};

use fenced_core::{BackingRegion, RegionId, Transport, TransportError};

/// A Transport sharing memory from the process heap.
///
/// Suitable for a remote executor running within the same process, such as on another thread, and for tests.
///
/// Regions are zeroed, and aligned on `HeapTransport::ALIGNMENT`. Regions not destroyed by the time the transport is
/// dropped are released then.
#[derive(Debug, Default)]
pub struct HeapTransport {
    state: Mutex<HeapState>,
}

impl HeapTransport {
    /// Alignment of the regions.
    pub const ALIGNMENT: usize = 4096;

    /// Creates an instance, without limit.
    pub fn new() -> Self { Self::default() }

    /// Creates an instance, which refuses to share more than `limit` bytes at any one time.
    pub fn with_limit(limit: usize) -> Self {
        let state = HeapState { limit: Some(limit), ..HeapState::default() };

        Self { state: Mutex::new(state) }
    }

    /// Makes any further creation fail, as if the remote executor was lost.
    ///
    /// Existing regions remain valid until destroyed.
    pub fn disconnect(&self) { self.lock().disconnected = true; }

    /// Returns whether `disconnect` was called.
    pub fn is_disconnected(&self) -> bool { self.lock().disconnected }

    /// Returns the number of live regions.
    pub fn number_regions(&self) -> usize { self.lock().regions.len() }

    /// Returns the number of bytes currently shared.
    pub fn shared_bytes(&self) -> usize { self.lock().shared }

    //  Internal; the state is consistent at any point a panic may occur, hence poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HeapState> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }
}

impl Transport for HeapTransport {
    fn create_region(&self, size: usize) -> Result<BackingRegion, TransportError> {
        let mut state = self.lock();

        if state.disconnected {
            return Err(TransportError::Disconnected);
        }

        if let Some(limit) = state.limit {
            let available = limit.saturating_sub(state.shared);

            if size > available {
                return Err(TransportError::Exhausted { requested: size, available });
            }
        }

        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-sized region").into());
        }

        let layout = Layout::from_size_align(size, Self::ALIGNMENT)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

        //  Safety:
        //  -   `layout` has a non-zero size.
        let base = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(base).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;

        let id = RegionId::new(state.next_id);

        state.next_id += 1;
        state.shared += size;
        state.regions.insert(id, (base.as_ptr() as usize, layout));

        //  Safety:
        //  -   `base` points to `size` bytes, until `id` is destroyed or `self` is dropped.
        Ok(unsafe { BackingRegion::new(id, base, size) })
    }

    unsafe fn destroy_region(&self, id: RegionId) {
        let mut state = self.lock();

        let (address, layout) = match state.regions.remove(&id) {
            Some(region) => region,
            None => panic!("Unknown {}", id),
        };

        state.shared -= layout.size();

        alloc::dealloc(address as *mut u8, layout);
    }
}

impl Drop for HeapTransport {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        for (_, (address, layout)) in state.regions.drain() {
            //  Safety:
            //  -   `address` was allocated with `layout`, and the region was not destroyed.
            unsafe { alloc::dealloc(address as *mut u8, layout) };
        }
    }
}

//  Addresses are stored as `usize` so the transport may be shared across threads.
#[derive(Debug, Default)]
struct HeapState {
    regions: HashMap<RegionId, (usize, Layout)>,
    next_id: u32,
    shared: usize,
    limit: Option<usize>,
    disconnected: bool,
}
