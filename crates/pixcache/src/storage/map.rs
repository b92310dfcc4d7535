//! Memory-mapped pixel storage.
//!
//! Two flavours share one type: anonymous maps stand in for heap blocks when
//! the policy prefers them, and file-backed maps put a disk cache file into
//! the address space so windows can alias it like memory.

use std::fmt;
use std::fs::File;
use std::io;
use std::ptr::NonNull;

use memmap2::{MmapMut, MmapOptions};
use pixcache_core::{Error, Result};

use super::disk::CacheFile;
use crate::resource::ResourceGrant;

/// A writable memory map holding both pixel planes.
pub struct MapStore {
    // declared before `file` so the mapping is torn down before a temporary
    // file is unlinked
    mmap: MmapMut,
    base: NonNull<u8>,
    file: Option<CacheFile>,
    _grants: Vec<ResourceGrant>,
}

// SAFETY: the mapping is owned by the store and outlives every pointer
// handed out through `base`; the cache coordinates concurrent access.
unsafe impl Send for MapStore {}
unsafe impl Sync for MapStore {}

impl MapStore {
    /// Maps `length` zeroed anonymous bytes.
    pub fn anonymous(length: usize, grant: ResourceGrant) -> Result<Self> {
        let mmap = MmapMut::map_anon(length)
            .map_err(|e| Error::cache(format!("anonymous map of {length} bytes failed: {e}")))?;
        Ok(Self::from_parts(mmap, None, vec![grant]))
    }

    /// Maps `length` bytes of `handle` starting at `offset`.
    ///
    /// The file must already be at least `offset + length` bytes long.
    pub fn map_file(handle: &File, offset: u64, length: usize) -> io::Result<MmapMut> {
        // SAFETY: cache files are private to this process; the mapping lives
        // exactly as long as the store and all access is bounds-checked by
        // the cache geometry.
        unsafe { MmapOptions::new().offset(offset).len(length).map_mut(handle) }
    }

    /// Wraps a mapping of `file` produced by [`map_file`](Self::map_file).
    pub fn file_backed(mmap: MmapMut, file: CacheFile, grants: Vec<ResourceGrant>) -> Self {
        Self::from_parts(mmap, Some(file), grants)
    }

    fn from_parts(mut mmap: MmapMut, file: Option<CacheFile>, grants: Vec<ResourceGrant>) -> Self {
        // a successful map is never null
        let base = NonNull::new(mmap.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            mmap,
            base,
            file,
            _grants: grants,
        }
    }

    /// Start of the pixel plane.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Backing file, if any.
    pub fn file(&self) -> Option<&CacheFile> {
        self.file.as_ref()
    }

    /// Mapped bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns `true` if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Flushes dirty pages of a file-backed map.
    pub fn flush(&self) -> Result<()> {
        match &self.file {
            Some(file) => self
                .mmap
                .flush()
                .map_err(|e| Error::io("flush", file.path(), e)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MapStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapStore")
            .field("len", &self.len())
            .field("file", &self.file)
            .finish()
    }
}
