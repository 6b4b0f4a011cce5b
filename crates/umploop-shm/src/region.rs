use std::ptr::NonNull;

use tracing::debug;

use crate::error::{Result, ShmError};

/// A zero-initialised, shareable memory region.
///
/// On Unix this is an anonymous `MAP_SHARED` mapping (it stays shared with
/// forked children); elsewhere it is an aligned heap allocation. The mapping
/// is released on drop.
///
/// The region hands out raw access only. Callers coordinate who touches which
/// bytes; see [`copy_in`](Self::copy_in) and [`copy_out`](Self::copy_out).
pub struct SharedRegion {
    ptr: NonNull<u8>,
    len: usize,
    mapped_len: usize,
}

// SAFETY: the region is plain memory with no thread affinity. Concurrent access
// is coordinated by the owners through atomics in the position registers.
unsafe impl Send for SharedRegion {}
// SAFETY: see above; `&SharedRegion` only exposes raw pointers and unsafe copies.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Alignment of the region start on non-Unix targets.
    pub const ALIGNMENT: usize = 64;

    /// Map a region of at least `len` bytes. The usable length is exactly `len`;
    /// the mapping itself is rounded up to whole pages.
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(ShmError::ZeroSize);
        }
        let region = Self::map(len)?;
        debug!(len, mapped_len = region.mapped_len, "mapped shared region");
        Ok(region)
    }

    #[cfg(unix)]
    fn map(len: usize) -> Result<Self> {
        let page = page_size();
        let mapped_len = len.div_ceil(page) * page;

        // SAFETY: anonymous mapping with no address hint; the kernel zero-fills it.
        let mem = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(ShmError::Map {
                len,
                source: std::io::Error::last_os_error(),
            });
        }

        let ptr = NonNull::new(mem.cast::<u8>()).ok_or_else(|| ShmError::Map {
            len,
            source: std::io::Error::other("mmap returned null"),
        })?;
        Ok(Self {
            ptr,
            len,
            mapped_len,
        })
    }

    #[cfg(not(unix))]
    fn map(len: usize) -> Result<Self> {
        let layout = std::alloc::Layout::from_size_align(len, Self::ALIGNMENT).map_err(|err| {
            ShmError::Map {
                len,
                source: std::io::Error::other(err.to_string()),
            }
        })?;
        // SAFETY: layout has non-zero size (checked in `new`).
        let mem = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(mem).ok_or_else(|| ShmError::Map {
            len,
            source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
        })?;
        Ok(Self {
            ptr,
            len,
            mapped_len: len,
        })
    }

    /// Usable length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length regions are rejected at creation.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length actually mapped (page rounded on Unix).
    pub fn mapped_len(&self) -> usize {
        self.mapped_len
    }

    /// Base address of the region.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Copy `src` into the region at `offset`.
    ///
    /// # Safety
    ///
    /// `offset + src.len()` must not exceed [`len`](Self::len), and no other
    /// thread may read or write that byte range concurrently.
    pub unsafe fn copy_in(&self, offset: usize, src: &[u8]) {
        debug_assert!(offset + src.len() <= self.len);
        std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len());
    }

    /// Copy bytes at `offset` out of the region into `dst`.
    ///
    /// # Safety
    ///
    /// `offset + dst.len()` must not exceed [`len`](Self::len), and no other
    /// thread may write that byte range concurrently.
    pub unsafe fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        debug_assert!(offset + dst.len() <= self.len);
        std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            // SAFETY: ptr/mapped_len come from a successful mmap in `map`.
            let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.mapped_len) };
            if rc != 0 {
                debug!(
                    error = %std::io::Error::last_os_error(),
                    "munmap failed for shared region"
                );
            }
        }
        #[cfg(not(unix))]
        {
            // SAFETY: same layout as the allocation in `map`.
            unsafe {
                let layout = std::alloc::Layout::from_size_align_unchecked(self.len, Self::ALIGNMENT);
                std::alloc::dealloc(self.ptr.as_ptr(), layout);
            }
        }
        debug!(len = self.len, "released shared region");
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("len", &self.len)
            .field("mapped_len", &self.mapped_len)
            .finish()
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}
