//! Heap-backed pixel storage.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::resource::ResourceGrant;

/// Alignment of heap cache blocks (one cache line).
const ALIGNMENT: usize = 64;

/// Zero-initialized, cache-line aligned heap block.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the buffer exclusively owns its allocation; concurrent access is
// coordinated by the cache (disjoint regions per thread).
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates `len` zeroed bytes. Returns `None` when `len` is zero or the
    /// allocator refuses.
    pub fn zeroed(len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let layout = Layout::from_size_align(len, ALIGNMENT).ok()?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).map(|ptr| Self { ptr, layout })
    }

    /// Start of the block.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always `false`; empty buffers are never allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// A heap block charged against the memory budget.
#[derive(Debug)]
pub struct MemoryStore {
    buffer: AlignedBuffer,
    _grant: ResourceGrant,
}

impl MemoryStore {
    /// Wraps an allocated block and the grant that paid for it.
    pub fn new(buffer: AlignedBuffer, grant: ResourceGrant) -> Self {
        Self {
            buffer,
            _grant: grant,
        }
    }

    /// Start of the pixel plane.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.buffer.as_ptr()
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Always `false`.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_and_aligned() {
        let buf = AlignedBuffer::zeroed(1000).unwrap();
        assert_eq!(buf.len(), 1000);
        assert_eq!(buf.as_ptr().as_ptr() as usize % ALIGNMENT, 0);
        // SAFETY: buffer is 1000 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(buf.as_ptr().as_ptr(), 1000) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length_refused() {
        assert!(AlignedBuffer::zeroed(0).is_none());
    }
}
