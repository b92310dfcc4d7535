//! Nexus: the staging window between callers and a backing store.
//!
//! A nexus describes one rectangular region and where its pixels currently
//! live. When the region is a contiguous run of a memory-resident store the
//! nexus aliases the store directly ("authentic"); otherwise it points into
//! its own staging buffer and the cache copies pixels in on read and out on
//! sync.
//!
//! Each cache keeps one [`NexusSlot`] per worker thread, so concurrent
//! callers never share staging memory.

use std::ptr;

use parking_lot::{Mutex, MutexGuard};
use pixcache_core::{IndexPacket, PixelPacket, Region};

/// A region plus the memory currently holding its pixels.
pub struct Nexus {
    region: Region,
    buffer: Vec<PixelPacket>,
    index_buffer: Vec<IndexPacket>,
    pixels: *mut PixelPacket,
    indexes: *mut IndexPacket,
    authentic: bool,
}

// SAFETY: the raw pointers target either the nexus's own buffers or a
// backing store that outlives every window handed out over it.
unsafe impl Send for Nexus {}

impl Default for Nexus {
    fn default() -> Self {
        Self {
            region: Region::default(),
            buffer: Vec::new(),
            index_buffer: Vec::new(),
            pixels: ptr::null_mut(),
            indexes: ptr::null_mut(),
            authentic: false,
        }
    }
}

impl Nexus {
    /// Creates an empty nexus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Region the nexus currently describes.
    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Returns `true` if the pixels alias the backing store.
    #[inline]
    pub fn is_authentic(&self) -> bool {
        self.authentic
    }

    /// Points the nexus at its staging buffer, growing it to hold at least
    /// `max(region.area(), extent)` packets.
    pub(crate) fn stage(&mut self, region: Region, extent: usize, with_indexes: bool) {
        let length = region.area().max(extent);
        if self.buffer.len() < length {
            self.buffer.resize(length, PixelPacket::default());
        }
        self.pixels = self.buffer.as_mut_ptr();
        self.indexes = if with_indexes {
            if self.index_buffer.len() < length {
                self.index_buffer.resize(length, 0);
            }
            self.index_buffer.as_mut_ptr()
        } else {
            ptr::null_mut()
        };
        self.region = region;
        self.authentic = false;
    }

    /// Points the nexus straight at store memory.
    ///
    /// # Safety
    ///
    /// `pixels` (and `indexes` when non-null) must be valid for
    /// `region.area()` elements for as long as the nexus describes `region`.
    pub(crate) unsafe fn alias(&mut self, region: Region, pixels: *mut PixelPacket, indexes: *mut IndexPacket) {
        self.region = region;
        self.pixels = pixels;
        self.indexes = indexes;
        self.authentic = true;
    }

    /// Pixels of the region in row-major order.
    pub fn pixels(&self) -> &[PixelPacket] {
        if self.pixels.is_null() {
            return &[];
        }
        // SAFETY: `stage`/`alias` guarantee `area()` valid packets.
        unsafe { std::slice::from_raw_parts(self.pixels, self.region.area()) }
    }

    /// Mutable pixels of the region.
    pub fn pixels_mut(&mut self) -> &mut [PixelPacket] {
        if self.pixels.is_null() {
            return &mut [];
        }
        // SAFETY: as for `pixels`; `&mut self` makes the borrow unique.
        unsafe { std::slice::from_raw_parts_mut(self.pixels, self.region.area()) }
    }

    /// Index samples, when the cache has an active index channel.
    pub fn indexes(&self) -> Option<&[IndexPacket]> {
        if self.indexes.is_null() {
            return None;
        }
        // SAFETY: as for `pixels`.
        Some(unsafe { std::slice::from_raw_parts(self.indexes, self.region.area()) })
    }

    /// Mutable index samples.
    pub fn indexes_mut(&mut self) -> Option<&mut [IndexPacket]> {
        if self.indexes.is_null() {
            return None;
        }
        // SAFETY: as for `pixels_mut`.
        Some(unsafe { std::slice::from_raw_parts_mut(self.indexes, self.region.area()) })
    }

    /// Pixel and index slices borrowed together.
    pub(crate) fn planes_mut(&mut self) -> (&mut [PixelPacket], Option<&mut [IndexPacket]>) {
        let area = self.region.area();
        if self.pixels.is_null() {
            return (&mut [], None);
        }
        // SAFETY: pixel and index memory never overlap.
        unsafe {
            let pixels = std::slice::from_raw_parts_mut(self.pixels, area);
            let indexes = (!self.indexes.is_null())
                .then(|| std::slice::from_raw_parts_mut(self.indexes, area));
            (pixels, indexes)
        }
    }

    /// Bytes held in staging buffers.
    pub fn staged_bytes(&self) -> usize {
        self.buffer.capacity() * PixelPacket::SIZE
            + self.index_buffer.capacity() * std::mem::size_of::<IndexPacket>()
    }
}

impl std::fmt::Debug for Nexus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nexus")
            .field("region", &self.region)
            .field("authentic", &self.authentic)
            .field("staged_bytes", &self.staged_bytes())
            .finish()
    }
}

/// A nexus for the caller's window plus a scratch nexus the virtual pixel
/// resolver reads single cells and runs through.
#[derive(Debug, Default)]
pub struct NexusSlot {
    /// Window handed to the caller.
    pub nexus: Nexus,
    /// Scratch window for virtual pixel resolution.
    pub scratch: Nexus,
}

/// A slot borrowed from a slot array, or a private one when the thread's
/// slot is busy.
pub enum SlotGuard<'a> {
    /// Borrowed from the owner's per-thread array.
    Shared(MutexGuard<'a, NexusSlot>),
    /// Allocated for this call only.
    Owned(Box<NexusSlot>),
}

impl std::ops::Deref for SlotGuard<'_> {
    type Target = NexusSlot;

    fn deref(&self) -> &NexusSlot {
        match self {
            Self::Shared(guard) => &**guard,
            Self::Owned(slot) => &**slot,
        }
    }
}

impl std::ops::DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut NexusSlot {
        match self {
            Self::Shared(guard) => &mut **guard,
            Self::Owned(slot) => &mut **slot,
        }
    }
}

/// Per-thread nexus slots.
#[derive(Debug)]
pub struct NexusSlots {
    slots: Vec<Mutex<NexusSlot>>,
}

impl NexusSlots {
    /// Allocates `count` (at least one) empty slots.
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count.max(1)).map(|_| Mutex::new(NexusSlot::default())).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always `false`.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Borrows the calling thread's slot. Threads outside the rayon pool
    /// share slot 0; if a slot is already in use (nested windows, or two
    /// foreign threads) a private slot is handed out instead.
    pub fn acquire(&self) -> SlotGuard<'_> {
        let id = rayon::current_thread_index().unwrap_or(0) % self.slots.len();
        match self.slots[id].try_lock() {
            Some(guard) => SlotGuard::Shared(guard),
            None => SlotGuard::Owned(Box::default()),
        }
    }
}
