//! Pixel cache descriptor.
//!
//! [`CacheInfo`] owns one backing store plus everything needed to move
//! pixels between it and a [`Nexus`]:
//!
//! - **open**: validates geometry against the policy, then picks a store
//!   (memory, distributed, file-backed map, disk) subject to resource grants,
//!   optionally copying pixels from a previous cache
//! - **set_nexus**: aliases the store for contiguous memory runs, stages
//!   everything else
//! - **read/write**: move a staged region in or out, one contiguous segment
//!   at a time
//! - **clone**: copies one cache's pixels into another, in bulk when the
//!   layouts agree and row by row in parallel otherwise
//!
//! A descriptor is shared through [`PixelCache`](crate::PixelCache); all
//! methods here take `&self` so windows on disjoint rows can be served from
//! several threads.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;
use pixcache_core::{ClassType, ColorspaceType, Error, IndexPacket, PixelPacket, Region, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::config::THROTTLE_INTERVAL;
use crate::context::CacheContext;
use crate::nexus::{Nexus, NexusSlots, SlotGuard};
use crate::resource::{format_bytes, ResourceGrant, ResourceType};
use crate::storage::{
    AlignedBuffer, BackingStore, CacheFile, CacheType, DiskStore, MapMode, MapStore, MemoryStore,
    RemoteStore,
};
use crate::virtual_pixel::VirtualPixelMethod;
use crate::window::WindowClaims;

/// Rows each clone worker should own before another thread is worth it.
const CLONE_ROWS_PER_THREAD: usize = 64;

/// Tile edge in bytes for memory-resident caches.
const MEMORY_TILE_BYTES: usize = 2048;

/// Tile edge in bytes for disk caches.
const DISK_TILE_BYTES: usize = 8192;

/// Shape of the pixels a cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheGeometry {
    /// Width in pixels
    pub columns: usize,
    /// Height in pixels
    pub rows: usize,
    /// Direct or palette pixels
    pub storage_class: ClassType,
    /// Sample colorspace
    pub colorspace: ColorspaceType,
}

impl CacheGeometry {
    /// Direct sRGB geometry.
    pub const fn new(columns: usize, rows: usize) -> Self {
        Self {
            columns,
            rows,
            storage_class: ClassType::Direct,
            colorspace: ColorspaceType::Srgb,
        }
    }

    /// Returns `true` when the index plane is stored.
    pub const fn active_index(&self) -> bool {
        matches!(self.storage_class, ClassType::Pseudo) || self.colorspace.uses_index_channel()
    }

    /// Bytes one pixel occupies across both planes.
    pub const fn bytes_per_pixel(&self) -> usize {
        if self.active_index() {
            PixelPacket::SIZE + size_of::<IndexPacket>()
        } else {
            PixelPacket::SIZE
        }
    }

    /// Pixel count, if it fits in `usize`.
    pub fn area(&self) -> Option<usize> {
        self.columns.checked_mul(self.rows)
    }

    /// Bytes both planes occupy, if representable in memory.
    pub fn length(&self) -> Option<u64> {
        let bytes = self.area()?.checked_mul(self.bytes_per_pixel())?;
        u64::try_from(bytes).ok()
    }
}

#[derive(Clone, Copy)]
enum Plane {
    Pixels,
    Indexes,
}

/// A pixel cache: geometry, backing store and per-thread staging slots.
pub struct CacheInfo {
    id: u64,
    context: Arc<CacheContext>,
    geometry: CacheGeometry,
    active_index: bool,
    mode: MapMode,
    store: BackingStore,
    length: u64,
    forced_type: Option<CacheType>,
    cache_file: Option<(PathBuf, u64)>,
    virtual_pixel_method: Mutex<VirtualPixelMethod>,
    slots: NexusSlots,
    random: Mutex<StdRng>,
    lock: Mutex<()>,
    acquisitions: AtomicU64,
    claims: WindowClaims,
}

impl CacheInfo {
    /// Creates an unopened cache in `context`.
    pub fn new(context: Arc<CacheContext>) -> Self {
        let id = context.next_cache_id();
        let random = match context.config().seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ id),
            None => StdRng::from_entropy(),
        };
        let slots = NexusSlots::new(context.thread_slots());
        Self {
            id,
            context,
            geometry: CacheGeometry::new(0, 0),
            active_index: false,
            mode: MapMode::ReadWrite,
            store: BackingStore::Undefined,
            length: 0,
            forced_type: None,
            cache_file: None,
            virtual_pixel_method: Mutex::new(VirtualPixelMethod::Undefined),
            slots,
            random: Mutex::new(random),
            lock: Mutex::new(()),
            acquisitions: AtomicU64::new(0),
            claims: WindowClaims::default(),
        }
    }

    /// Unopened copy of this descriptor's settings (not its pixels).
    pub fn clone_descriptor(&self) -> Self {
        let mut clone = Self::new(Arc::clone(&self.context));
        clone.geometry = self.geometry;
        clone.active_index = self.active_index;
        clone.forced_type = self.forced_type;
        *clone.virtual_pixel_method.get_mut() = self.virtual_pixel_method();
        clone
    }

    /// Forces the next [`open`](Self::open) to use `kind` (`None` restores
    /// the policy's choice).
    pub fn set_cache_type(&mut self, kind: Option<CacheType>) {
        self.forced_type = kind;
    }

    /// Directs the next [`open`](Self::open) to a named file at `offset`
    /// instead of memory or a temporary file.
    pub fn set_cache_file(&mut self, path: impl Into<PathBuf>, offset: u64) {
        self.cache_file = Some((path.into(), offset));
    }

    /// Allocates storage for `geometry`.
    ///
    /// With `ping` only the geometry is recorded. When `source` holds pixels
    /// and `mode` is writable, the overlapping pixels are copied in.
    pub fn open(
        &mut self,
        geometry: &CacheGeometry,
        mode: MapMode,
        ping: bool,
        source: Option<&CacheInfo>,
    ) -> Result<()> {
        self.context.ensure_active()?;
        let resources = self.context.resources();
        let CacheGeometry { columns, rows, .. } = *geometry;
        if !resources.acquire(ResourceType::Width, columns as u64)
            || !resources.acquire(ResourceType::Height, rows as u64)
        {
            return Err(Error::SizeLimit {
                columns,
                rows,
                width_limit: resources.limit(ResourceType::Width),
                height_limit: resources.limit(ResourceType::Height),
            });
        }
        if columns == 0 || rows == 0 {
            return Err(Error::invalid_geometry(columns, rows, "zero extent"));
        }
        let length = geometry
            .length()
            .ok_or_else(|| Error::invalid_geometry(columns, rows, "pixel extent overflows"))?;
        if let Some((_, offset)) = &self.cache_file {
            if offset % PixelPacket::SIZE as u64 != 0 {
                return Err(Error::cache(format!(
                    "cache file offset {offset} is not a multiple of {}",
                    PixelPacket::SIZE
                )));
            }
        }

        self.store = BackingStore::Undefined;
        self.geometry = *geometry;
        self.active_index = geometry.active_index();
        self.mode = mode;
        self.length = length;

        let forced = self
            .forced_type
            .or(self.context.config().cache_type)
            .filter(|kind| *kind != CacheType::Undefined);
        if ping || forced == Some(CacheType::Ping) {
            self.store = BackingStore::Ping;
            debug!("open {}", self.describe());
            return Ok(());
        }

        self.store = self.allocate(forced)?;
        debug!("open {}", self.describe());

        if let Some(source) = source {
            if mode.is_writable() && source.kind().has_pixels() {
                self.clone_pixels_from(source)?;
            }
        }
        Ok(())
    }

    fn allocate(&self, forced: Option<CacheType>) -> Result<BackingStore> {
        let persistent = self.cache_file.is_some();
        if !persistent && matches!(forced, None | Some(CacheType::Memory)) {
            if let Some(store) = self.allocate_memory() {
                return Ok(store);
            }
            if forced.is_some() {
                return Err(self.exhausted());
            }
        }
        if !persistent && matches!(forced, None | Some(CacheType::Distributed)) {
            match self.context.remote_for(self.id) {
                Some((host, server)) => {
                    let opened = RemoteStore::open(
                        host,
                        server,
                        self.geometry.columns,
                        self.geometry.rows,
                        self.active_index,
                    );
                    match opened {
                        Ok(store) => return Ok(BackingStore::Distributed(store)),
                        Err(e) if forced.is_some() => return Err(e),
                        Err(e) => warn!(error = %e, "distributed cache unavailable"),
                    }
                }
                None if forced.is_some() => return Err(self.exhausted()),
                None => {}
            }
        }
        self.allocate_file(forced)
    }

    fn allocate_memory(&self) -> Option<BackingStore> {
        let resources = self.context.resources();
        let area = self.geometry.area()? as u64;
        if !resources.acquire(ResourceType::Area, area) {
            return None;
        }
        let bytes = usize::try_from(self.length).ok()?;
        if self.context.config().anonymous_map {
            if let Some(grant) = ResourceGrant::acquire(resources, ResourceType::Map, self.length) {
                match MapStore::anonymous(bytes, grant) {
                    Ok(map) => return Some(BackingStore::Map(map)),
                    Err(e) => debug!(error = %e, "anonymous map refused, trying heap"),
                }
            }
        }
        let grant = ResourceGrant::acquire(resources, ResourceType::Memory, self.length)?;
        let buffer = AlignedBuffer::zeroed(bytes)?;
        Some(BackingStore::Memory(MemoryStore::new(buffer, grant)))
    }

    fn allocate_file(&self, forced: Option<CacheType>) -> Result<BackingStore> {
        let resources = self.context.resources();
        let attach = self.mode == MapMode::Read && self.cache_file.is_some();
        let disk_grant = if attach {
            None
        } else {
            Some(
                ResourceGrant::acquire(resources, ResourceType::Disk, self.length)
                    .ok_or_else(|| self.exhausted())?,
            )
        };

        let (file, handle, offset) = match &self.cache_file {
            Some((path, offset)) if attach => {
                let (file, handle) = CacheFile::open(path)?;
                (file, handle, *offset)
            }
            Some((path, offset)) => {
                let (file, handle) = CacheFile::create(path)?;
                (file, handle, *offset)
            }
            None => {
                let (file, handle) = CacheFile::temporary(&self.context.config().temporary_dir())?;
                (file, handle, 0)
            }
        };
        let end = offset
            .checked_add(self.length)
            .ok_or_else(|| Error::cache("cache file offset overflows"))?;
        if attach {
            file.require(&handle, end)?;
        } else {
            file.reserve(&handle, end)?;
        }

        if forced != Some(CacheType::Disk) {
            let bytes = usize::try_from(self.length).ok();
            let map_grant = ResourceGrant::acquire(resources, ResourceType::Map, self.length);
            match (bytes, map_grant) {
                (Some(bytes), Some(map_grant)) => match MapStore::map_file(&handle, offset, bytes) {
                    Ok(mmap) => {
                        let mut grants = vec![map_grant];
                        grants.extend(disk_grant);
                        return Ok(BackingStore::Map(MapStore::file_backed(mmap, file, grants)));
                    }
                    Err(e) if forced == Some(CacheType::Map) => {
                        return Err(Error::io("map", file.path(), e));
                    }
                    Err(e) => debug!(error = %e, "file-backed map failed, using disk I/O"),
                },
                _ if forced == Some(CacheType::Map) => return Err(self.exhausted()),
                _ => {}
            }
        }

        Ok(BackingStore::Disk(DiskStore::new(
            file,
            handle,
            offset,
            self.length,
            Arc::clone(resources),
            disk_grant,
        )))
    }

    fn exhausted(&self) -> Error {
        Error::ResourcesExhausted {
            length: self.length,
            columns: self.geometry.columns,
            rows: self.geometry.rows,
        }
    }

    /// Unique id within the context.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Context the cache was created in.
    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    /// Geometry of the last successful open.
    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    /// Width in pixels.
    #[inline]
    pub fn columns(&self) -> usize {
        self.geometry.columns
    }

    /// Height in pixels.
    #[inline]
    pub fn rows(&self) -> usize {
        self.geometry.rows
    }

    /// Color channels excluding alpha.
    pub fn channels(&self) -> usize {
        self.geometry.colorspace.channels()
    }

    /// Returns `true` if the index plane is stored.
    pub fn has_index_channel(&self) -> bool {
        self.active_index
    }

    /// Backing store kind.
    pub fn kind(&self) -> CacheType {
        self.store.kind()
    }

    /// Store kind forced by [`set_cache_type`](Self::set_cache_type).
    pub fn forced_type(&self) -> Option<CacheType> {
        self.forced_type
    }

    /// Open mode.
    pub fn mode(&self) -> MapMode {
        self.mode
    }

    /// Bytes both planes occupy.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Cache file of disk and file-backed map caches.
    pub fn path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// Virtual pixel method used by windows that do not name one.
    pub fn virtual_pixel_method(&self) -> VirtualPixelMethod {
        *self.virtual_pixel_method.lock()
    }

    /// Changes the virtual pixel method; returns the previous one.
    pub fn set_virtual_pixel_method(&self, method: VirtualPixelMethod) -> VirtualPixelMethod {
        std::mem::replace(&mut *self.virtual_pixel_method.lock(), method)
    }

    /// Preferred processing tile `(width, height)` in pixels.
    pub fn tile_size(&self) -> (usize, usize) {
        let bytes = match self.kind() {
            CacheType::Disk => DISK_TILE_BYTES,
            _ => MEMORY_TILE_BYTES,
        };
        let edge = bytes / PixelPacket::SIZE;
        (edge, edge)
    }

    /// The whole pixel plane, for memory-resident caches.
    pub fn pixels(&self) -> Option<&[PixelPacket]> {
        let base = self.store.base()?;
        let area = self.geometry.area()?;
        // SAFETY: a memory-resident store holds `area` packets at its base.
        Some(unsafe { std::slice::from_raw_parts(base.as_ptr() as *const PixelPacket, area) })
    }

    /// The whole index plane, for memory-resident caches with an index
    /// channel.
    pub fn indexes(&self) -> Option<&[IndexPacket]> {
        if !self.active_index {
            return None;
        }
        let base = self.store.base()?;
        let area = self.geometry.area()?;
        // SAFETY: the index plane follows `area` packets.
        Some(unsafe {
            std::slice::from_raw_parts(
                base.as_ptr().add(area * PixelPacket::SIZE) as *const IndexPacket,
                area,
            )
        })
    }

    /// Human-readable summary of geometry and storage.
    pub fn describe(&self) -> String {
        let mut text = format!(
            "{}[{}] {}x{} {:?}/{:?} {} {:?}",
            self.kind(),
            self.id,
            self.geometry.columns,
            self.geometry.rows,
            self.geometry.colorspace,
            self.geometry.storage_class,
            format_bytes(self.length),
            self.mode,
        );
        if let Some(path) = self.store.path() {
            let _ = write!(text, " {}", path.display());
            if let BackingStore::Disk(disk) = &self.store {
                let _ = write!(text, "@{}", disk.offset());
            }
        }
        if let Some(host) = self.store.host() {
            let _ = write!(text, " {host}");
        }
        text
    }

    /// Flushes file-backed maps to disk.
    pub fn flush(&self) -> Result<()> {
        match &self.store {
            BackingStore::Map(map) => map.flush(),
            _ => Ok(()),
        }
    }

    /// Returns `true` if the cache holds pixels for `geometry`.
    pub(crate) fn is_current(&self, geometry: &CacheGeometry, ping: bool) -> bool {
        let kind = self.kind();
        let usable = if ping {
            kind == CacheType::Ping
        } else {
            kind.has_pixels()
        };
        usable && self.geometry == *geometry
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub(crate) fn random(&self) -> &Mutex<StdRng> {
        &self.random
    }

    pub(crate) fn slot(&self) -> SlotGuard<'_> {
        self.slots.acquire()
    }

    /// Live window regions, tracked only where windows can alias the store.
    pub(crate) fn window_claims(&self) -> Option<&WindowClaims> {
        self.store.is_memory_resident().then_some(&self.claims)
    }

    pub(crate) fn ensure_pixels(&self) -> Result<()> {
        let kind = self.kind();
        if kind.has_pixels() {
            Ok(())
        } else {
            Err(Error::NoPixelCache(format!("{kind} cache has no pixels")))
        }
    }

    fn throttle(&self) {
        if let Some(delay) = self.context.config().throttle() {
            let n = self.acquisitions.fetch_add(1, Ordering::Relaxed) + 1;
            if n % THROTTLE_INTERVAL == 0 {
                std::thread::sleep(delay);
            }
        }
    }

    /// Points `nexus` at `region`: directly into the store when the region
    /// is a contiguous in-bounds run of a memory-resident cache and
    /// `buffered` is false, otherwise at the nexus's staging buffer.
    pub(crate) fn set_nexus(&self, region: Region, buffered: bool, nexus: &mut Nexus) -> Result<()> {
        region.validate()?;
        self.ensure_pixels()?;
        self.throttle();

        let columns = self.geometry.columns;
        let rows = self.geometry.rows;
        let contiguous = (region.x == 0 && region.width == columns) || region.height == 1;
        if !buffered && contiguous && region.is_within(columns, rows) {
            if let Some(base) = self.store.base() {
                let area = columns * rows;
                let offset = region.y as usize * columns + region.x as usize;
                // SAFETY: the region lies inside the planes, which live as
                // long as the store.
                unsafe {
                    let pixels = (base.as_ptr() as *mut PixelPacket).add(offset);
                    let indexes = if self.active_index {
                        (base.as_ptr().add(area * PixelPacket::SIZE) as *mut IndexPacket).add(offset)
                    } else {
                        ptr::null_mut()
                    };
                    nexus.alias(region, pixels, indexes);
                }
                return Ok(());
            }
        }
        nexus.stage(region, columns.max(rows), self.active_index);
        Ok(())
    }

    /// `set_nexus` followed by reading pixels and indexes.
    pub(crate) fn read_into(&self, region: Region, nexus: &mut Nexus) -> Result<()> {
        self.set_nexus(region, false, nexus)?;
        self.read_pixels(nexus)?;
        self.read_indexes(nexus)
    }

    /// Copies the stored pixels of `region` (which must lie inside the
    /// cache) into a new vector.
    pub fn read_region(&self, region: Region) -> Result<Vec<PixelPacket>> {
        let mut nexus = Nexus::new();
        self.set_nexus(region, true, &mut nexus)?;
        self.read_pixels(&mut nexus)?;
        Ok(nexus.pixels().to_vec())
    }

    /// Copies the stored index samples of `region`; `None` without an index
    /// channel.
    pub fn read_index_region(&self, region: Region) -> Result<Option<Vec<IndexPacket>>> {
        let mut nexus = Nexus::new();
        self.set_nexus(region, true, &mut nexus)?;
        self.read_indexes(&mut nexus)?;
        Ok(nexus.indexes().map(<[IndexPacket]>::to_vec))
    }

    /// Fills a staged nexus with pixels from the store.
    pub(crate) fn read_pixels(&self, nexus: &mut Nexus) -> Result<()> {
        if nexus.is_authentic() {
            return Ok(());
        }
        let region = self.check_within(nexus.region())?;
        self.read_plane(Plane::Pixels, region, nexus.pixels_mut())
    }

    /// Fills a staged nexus with index samples from the store.
    pub(crate) fn read_indexes(&self, nexus: &mut Nexus) -> Result<()> {
        if !self.active_index || nexus.is_authentic() {
            return Ok(());
        }
        let region = self.check_within(nexus.region())?;
        match nexus.indexes_mut() {
            Some(indexes) => self.read_plane(Plane::Indexes, region, indexes),
            None => Ok(()),
        }
    }

    /// Stores a staged nexus's pixels.
    pub(crate) fn write_pixels(&self, nexus: &Nexus) -> Result<()> {
        if nexus.is_authentic() {
            return Ok(());
        }
        if !self.mode.is_writable() {
            return Err(Error::ReadOnlyCache);
        }
        let region = self.check_within(nexus.region())?;
        self.write_plane(Plane::Pixels, region, nexus.pixels())
    }

    /// Stores a staged nexus's index samples.
    pub(crate) fn write_indexes(&self, nexus: &Nexus) -> Result<()> {
        if !self.active_index || nexus.is_authentic() {
            return Ok(());
        }
        if !self.mode.is_writable() {
            return Err(Error::ReadOnlyCache);
        }
        let region = self.check_within(nexus.region())?;
        match nexus.indexes() {
            Some(indexes) => self.write_plane(Plane::Indexes, region, indexes),
            None => Ok(()),
        }
    }

    fn check_within(&self, region: Region) -> Result<Region> {
        if region.is_within(self.geometry.columns, self.geometry.rows) {
            Ok(region)
        } else {
            Err(Error::invalid_region(
                region.x,
                region.y,
                region.width,
                region.height,
                "outside the cache",
            ))
        }
    }

    /// Splits `region` into contiguous store segments: one when it spans
    /// whole rows, otherwise one per row.
    fn segments(&self, region: Region) -> (usize, usize) {
        if region.width == self.geometry.columns {
            (1, region.area())
        } else {
            (region.height, region.width)
        }
    }

    fn plane_start(&self, plane: Plane) -> usize {
        match plane {
            Plane::Pixels => 0,
            Plane::Indexes => self.geometry.columns * self.geometry.rows * PixelPacket::SIZE,
        }
    }

    fn read_plane<T: Pod>(&self, plane: Plane, region: Region, dst: &mut [T]) -> Result<()> {
        let columns = self.geometry.columns;
        let unit = size_of::<T>();
        let first = region.y as usize * columns + region.x as usize;
        let (count, len) = self.segments(region);
        let plane_start = self.plane_start(plane);

        for s in 0..count {
            let index = first + s * columns;
            let chunk = &mut dst[s * len..(s + 1) * len];
            match &self.store {
                BackingStore::Memory(_) | BackingStore::Map(_) => {
                    let Some(base) = self.store.base() else {
                        return Err(Error::NoPixelCache("store has no base".into()));
                    };
                    // SAFETY: `check_within` bounds the segment to the plane.
                    unsafe {
                        let src = base.as_ptr().add(plane_start) as *const T;
                        ptr::copy_nonoverlapping(src.add(index), chunk.as_mut_ptr(), len);
                    }
                }
                BackingStore::Disk(disk) => {
                    let pos = (plane_start + index * unit) as u64;
                    disk.read_at(pos, bytemuck::cast_slice_mut(chunk))?;
                }
                BackingStore::Distributed(remote) => {
                    let segment = segment_region(region, s, count);
                    let bytes = bytemuck::cast_slice_mut(chunk);
                    match plane {
                        Plane::Pixels => remote.read_pixels(&segment, bytes)?,
                        Plane::Indexes => remote.read_indexes(&segment, bytes)?,
                    }
                }
                BackingStore::Undefined | BackingStore::Ping => {
                    return Err(Error::NoPixelCache(format!("{} cache has no pixels", self.kind())));
                }
            }
        }
        Ok(())
    }

    fn write_plane<T: Pod>(&self, plane: Plane, region: Region, src: &[T]) -> Result<()> {
        let columns = self.geometry.columns;
        let unit = size_of::<T>();
        let first = region.y as usize * columns + region.x as usize;
        let (count, len) = self.segments(region);
        let plane_start = self.plane_start(plane);

        for s in 0..count {
            let index = first + s * columns;
            let chunk = &src[s * len..(s + 1) * len];
            match &self.store {
                BackingStore::Memory(_) | BackingStore::Map(_) => {
                    let Some(base) = self.store.base() else {
                        return Err(Error::NoPixelCache("store has no base".into()));
                    };
                    // SAFETY: as in `read_plane`; callers write disjoint
                    // regions.
                    unsafe {
                        let dst = base.as_ptr().add(plane_start) as *mut T;
                        ptr::copy_nonoverlapping(chunk.as_ptr(), dst.add(index), len);
                    }
                }
                BackingStore::Disk(disk) => {
                    let pos = (plane_start + index * unit) as u64;
                    disk.write_at(pos, bytemuck::cast_slice(chunk))?;
                }
                BackingStore::Distributed(remote) => {
                    let segment = segment_region(region, s, count);
                    let bytes = bytemuck::cast_slice(chunk);
                    match plane {
                        Plane::Pixels => remote.write_pixels(&segment, bytes)?,
                        Plane::Indexes => remote.write_indexes(&segment, bytes)?,
                    }
                }
                BackingStore::Undefined | BackingStore::Ping => {
                    return Err(Error::NoPixelCache(format!("{} cache has no pixels", self.kind())));
                }
            }
        }
        Ok(())
    }

    /// Copies `source`'s pixels into this cache.
    ///
    /// Identical layouts are copied in one block (memory to memory) or one
    /// file copy (disk to disk). Anything else is copied row by row over
    /// the overlapping area; the index plane only when both sides have one.
    pub(crate) fn clone_pixels_from(&self, source: &CacheInfo) -> Result<()> {
        let same_layout = self.geometry.columns == source.geometry.columns
            && self.geometry.rows == source.geometry.rows
            && self.active_index == source.active_index
            && self.channels() == source.channels()
            && self.length == source.length;

        if same_layout {
            if let (Some(dst), Some(src)) = (self.store.base(), source.store.base()) {
                trace!(bytes = self.length, "bulk memory clone");
                // SAFETY: both blocks are `length` bytes and belong to
                // different caches.
                unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), self.length as usize) };
                return Ok(());
            }
            if let (BackingStore::Disk(dst), BackingStore::Disk(src)) = (&self.store, &source.store) {
                trace!(bytes = self.length, "bulk disk clone");
                dst.copy_from(src, self.length)?;
                return Ok(());
            }
        }
        self.clone_rows_from(source)
    }

    fn clone_rows_from(&self, source: &CacheInfo) -> Result<()> {
        let columns = self.geometry.columns.min(source.geometry.columns);
        let rows = self.geometry.rows.min(source.geometry.rows);
        let copy_indexes = self.active_index && source.active_index;
        let threads = self.clone_threads(source, rows);
        let chunk = rows.div_ceil(threads).max(1);
        trace!(rows, columns, threads, "row-by-row clone");

        (0..rows).into_par_iter().with_min_len(chunk).try_for_each_init(
            || (Nexus::new(), Nexus::new()),
            |(src_nexus, dst_nexus), y| {
                let region = Region::new(0, y as i64, columns, 1);
                source.read_into(region, src_nexus)?;
                self.set_nexus(region, false, dst_nexus)?;
                dst_nexus.pixels_mut().copy_from_slice(src_nexus.pixels());
                if copy_indexes {
                    if let (Some(dst), Some(src)) = (dst_nexus.indexes_mut(), src_nexus.indexes()) {
                        dst.copy_from_slice(src);
                    }
                }
                self.write_pixels(dst_nexus)?;
                self.write_indexes(dst_nexus)
            },
        )
    }

    /// Worker count for a row-by-row clone: one per
    /// [`CLONE_ROWS_PER_THREAD`] rows up to the thread limit, at most two
    /// when either side does file or network I/O.
    fn clone_threads(&self, source: &CacheInfo, rows: usize) -> usize {
        let limit = self.context.thread_slots();
        let threads = (rows / CLONE_ROWS_PER_THREAD).clamp(1, limit);
        if self.store.is_memory_resident() && source.store.is_memory_resident() {
            threads
        } else {
            threads.min(2)
        }
    }
}

fn segment_region(region: Region, segment: usize, count: usize) -> Region {
    if count == 1 {
        region
    } else {
        Region::new(region.x, region.y + segment as i64, region.width, 1)
    }
}

impl Drop for CacheInfo {
    fn drop(&mut self) {
        if self.kind() != CacheType::Undefined {
            debug!("destroy {}", self.describe());
        }
    }
}

impl std::fmt::Debug for CacheInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInfo")
            .field("id", &self.id)
            .field("geometry", &self.geometry)
            .field("mode", &self.mode)
            .field("store", &self.store)
            .finish()
    }
}
