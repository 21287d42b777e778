//! Transport sharing memory through memfd, for Linux.

use std::{
    collections::HashMap,
    ffi::CStr,
    io,
    os::unix::io::RawFd,
    ptr::{self, NonNull},
    sync::{Mutex, MutexGuard, PoisonError},
};

use fenced_core::{BackingRegion, RegionId, Transport, TransportError};

/// A Transport sharing memory through anonymous files, created with `memfd_create`.
///
/// The file descriptor of each region may be passed to a remote executor in another process, over a Unix socket, for
/// it to map the same memory.
#[derive(Debug, Default)]
pub struct MemfdTransport {
    state: Mutex<MemfdState>,
}

impl MemfdTransport {
    /// Creates an instance.
    pub fn new() -> Self { Self::default() }

    /// Returns the file descriptor backing the region `id`, if alive.
    ///
    /// The file descriptor remains owned by the transport, and is closed when the region is destroyed.
    pub fn fd(&self, id: RegionId) -> Option<RawFd> { self.lock().regions.get(&id).map(|region| region.fd) }

    /// Returns the number of live regions.
    pub fn number_regions(&self) -> usize { self.lock().regions.len() }

    //  Internal; the state is consistent at any point a panic may occur, hence poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, MemfdState> { self.state.lock().unwrap_or_else(PoisonError::into_inner) }
}

impl Transport for MemfdTransport {
    fn create_region(&self, size: usize) -> Result<BackingRegion, TransportError> {
        let mut state = self.lock();

        let region = MemfdRegion::create(size)?;
        let base = region.base();

        let id = RegionId::new(state.next_id);

        state.next_id += 1;
        state.regions.insert(id, region);

        //  Safety:
        //  -   `base` points to `size` bytes mapped read-write, until `id` is destroyed or `self` is dropped.
        Ok(unsafe { BackingRegion::new(id, base, size) })
    }

    unsafe fn destroy_region(&self, id: RegionId) {
        let region = self.lock().regions.remove(&id);

        match region {
            Some(region) => region.release(),
            None => panic!("Unknown {}", id),
        }
    }
}

impl Drop for MemfdTransport {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);

        for (_, region) in state.regions.drain() {
            //  Safety:
            //  -   The region was not destroyed, and the transport is going away.
            unsafe { region.release() };
        }
    }
}

#[derive(Debug, Default)]
struct MemfdState {
    regions: HashMap<RegionId, MemfdRegion>,
    next_id: u32,
}

//  Addresses are stored as `usize` so the transport may be shared across threads.
#[derive(Debug)]
struct MemfdRegion {
    fd: RawFd,
    address: usize,
    size: usize,
}

impl MemfdRegion {
    const NAME: &'static [u8] = b"fenced-transfer-memory\0";

    //  Creates a file of `size` bytes, and maps it.
    fn create(size: usize) -> Result<Self, TransportError> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "zero-sized region").into());
        }

        let length = libc::off_t::try_from(size)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

        let name = CStr::from_bytes_with_nul(Self::NAME)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

        //  Safety:
        //  -   `name` is NUL-terminated.
        let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };

        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        //  Safety:
        //  -   `fd` is a valid file descriptor, owned here.
        if unsafe { libc::ftruncate(fd, length) } != 0 {
            let error = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(error.into());
        }

        let address = match mmap_shared(fd, size) {
            Some(address) => address,
            None => {
                let error = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(error.into());
            },
        };

        Ok(Self { fd, address: address.as_ptr() as usize, size })
    }

    fn base(&self) -> NonNull<u8> {
        //  Safety:
        //  -   `address` was returned by a successful `mmap`, hence is non-null.
        unsafe { NonNull::new_unchecked(self.address as *mut u8) }
    }

    //  Unmaps the memory, and closes the file.
    //
    //  #   Safety
    //
    //  -   Assumes that the memory is no longer in use.
    unsafe fn release(self) {
        munmap_deallocate(self.address as *mut u8, self.size);

        let result = libc::close(self.fd);
        assert!(result == 0, "Could not close {}: {}", self.fd, io::Error::last_os_error());
    }
}

//  Wrapper around `mmap`, mapping `size` bytes of `fd` in shared mode.
fn mmap_shared(fd: RawFd, size: usize) -> Option<NonNull<u8>> {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_SHARED;

    //  No specific address hint.
    let addr = ptr::null_mut();
    //  The whole file is mapped.
    let offset = 0;

    //  Safety:
    //  -   `fd` is a valid file descriptor, of at least `size` bytes.
    let result = unsafe { libc::mmap(addr, size, prot, flags, fd, offset) };

    let result = if result != libc::MAP_FAILED { result as *mut u8 } else { ptr::null_mut() };
    NonNull::new(result)
}

//  Wrapper around `munmap`.
//
//  #   Panics
//
//  If `munmap` returns a non-0 result.
//
//  #   Safety
//
//  -   Assumes that `addr` points to a `mmap`ed area of at least `size` bytes.
//  -   Assumes that the range `[addr, addr + size)` is no longer in use.
unsafe fn munmap_deallocate(addr: *mut u8, size: usize) {
    let result = libc::munmap(addr as *mut libc::c_void, size);
    assert!(result == 0, "Could not munmap {:x}, {}: {}", addr as usize, size, result);
}
