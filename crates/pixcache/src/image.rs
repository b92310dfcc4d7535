//! Image facade over a shared pixel cache.
//!
//! An [`Image`] carries the properties that decide its cache layout
//! (extent, storage class, colorspace, ping) and a [`PixelCache`] handle.
//! Handles are reference counted; several images may share one cache
//! until one of them writes, at which point the writer gets a private
//! copy.
//!
//! # Example
//!
//! ```rust
//! use pixcache::{CacheConfig, CacheContext, Image, PixelPacket};
//!
//! let ctx = CacheContext::init(CacheConfig::default());
//! let mut image = Image::new(&ctx, 4, 4).unwrap();
//!
//! let mut row = image.queue_authentic_pixels(0, 0, 4, 1).unwrap();
//! row.pixels_mut().fill(PixelPacket::opaque(100, 0, 0));
//! row.sync().unwrap();
//!
//! // (-1, 0) lies outside; the default method repeats the edge pixel
//! let px = image.get_one_virtual_pixel(-1, 0).unwrap();
//! assert_eq!(px.red, 100);
//! ```

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use pixcache_core::{
    ClassType, ColorspaceType, Error, ExceptionInfo, IndexPacket, PixelPacket, Region, Result,
};
use tracing::debug;

use crate::cache::{CacheGeometry, CacheInfo};
use crate::context::CacheContext;
use crate::methods::{DefaultCacheMethods, PixelCacheMethods};
use crate::storage::{CacheType, MapMode};
use crate::virtual_pixel::VirtualPixelMethod;
use crate::window::{self, AuthenticPixels, VirtualPixels};

/// Persisted caches are laid out on page boundaries so several images can
/// be chained in one file.
pub const PERSIST_ALIGNMENT: u64 = 4096;

/// Shared handle to a [`CacheInfo`].
///
/// Cloning the handle (see [`reference`](Self::reference)) bumps the
/// reference count; the store is torn down when the last handle drops.
///
/// A shared handle only reads. Pixels change through an image's authentic
/// windows, which copy the cache first when it is shared:
///
/// ```compile_fail
/// use pixcache::{CacheConfig, CacheContext, Image};
///
/// let ctx = CacheContext::init(CacheConfig::default());
/// let image = Image::new(&ctx, 2, 2).unwrap();
/// let other = Image::new(&ctx, 2, 2).unwrap();
/// let shared = image.reference_pixel_cache();
/// shared.clone_pixels_from(other.cache()).unwrap();
/// ```
#[derive(Debug)]
pub struct PixelCache(Arc<CacheInfo>);

impl PixelCache {
    /// Unopened cache in `context`.
    pub fn new(context: Arc<CacheContext>) -> Self {
        Self(Arc::new(CacheInfo::new(context)))
    }

    /// Another handle to the same cache.
    pub fn reference(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    /// Number of live handles.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// The shared descriptor.
    pub fn info(&self) -> &CacheInfo {
        &self.0
    }

    /// Returns `true` if both handles point at the same cache.
    pub fn ptr_eq(&self, other: &PixelCache) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Releases this handle; the store is freed with the last one.
    pub fn destroy(self) {
        drop(self);
    }

    /// Makes this handle usable for `geometry`.
    ///
    /// The cache is reopened when it no longer matches the geometry or the
    /// forced kind, and cloned when `writable` is requested on a cache that
    /// is shared or read-only. Pixels of the previous cache are carried
    /// over. If a reopen fails the handle is left pixel-less.
    pub(crate) fn acquire(
        &mut self,
        geometry: &CacheGeometry,
        ping: bool,
        writable: bool,
        cache_type: Option<CacheType>,
    ) -> Result<()> {
        let stale = |info: &Arc<CacheInfo>| {
            !info.is_current(geometry, ping) || info.forced_type() != cache_type
        };
        let private = |info: &Arc<CacheInfo>| {
            !writable || ping || (Arc::strong_count(info) == 1 && info.mode().is_writable())
        };
        if !stale(&self.0) && private(&self.0) {
            return Ok(());
        }

        let info = &self.0;
        let opened = {
            // re-check under the lock: another handle may have let go
            let _guard = info.lock();
            let was_stale = stale(info);
            if !was_stale && private(info) {
                return Ok(());
            }
            let mut clone = info.clone_descriptor();
            clone.set_cache_type(cache_type);
            let source = info.kind().has_pixels().then_some(&**info);
            clone
                .open(geometry, MapMode::ReadWrite, ping, source)
                .map(|()| clone)
                .map_err(|e| (e, was_stale))
        };

        match opened {
            Ok(clone) => {
                debug!(from = info.id(), to = clone.id(), "pixel cache reopened");
                self.0 = Arc::new(clone);
                Ok(())
            }
            Err((err, was_stale)) => {
                if was_stale {
                    let mut empty = info.clone_descriptor();
                    empty.set_cache_type(cache_type);
                    self.0 = Arc::new(empty);
                }
                Err(err)
            }
        }
    }
}

impl From<CacheInfo> for PixelCache {
    fn from(info: CacheInfo) -> Self {
        Self(Arc::new(info))
    }
}

impl std::ops::Deref for PixelCache {
    type Target = CacheInfo;

    fn deref(&self) -> &CacheInfo {
        &self.0
    }
}

/// An image: cache-relevant properties plus a pixel cache handle.
///
/// Failures are returned as `Err` and also recorded in the image's
/// [`exception`](Self::exception) sink.
pub struct Image {
    context: Arc<CacheContext>,
    geometry: CacheGeometry,
    ping: bool,
    cache_type: Option<CacheType>,
    background_color: PixelPacket,
    clip_mask: Option<Box<Image>>,
    mask: Option<Box<Image>>,
    cache: PixelCache,
    methods: Arc<dyn PixelCacheMethods>,
    taint: AtomicBool,
    epoch: Instant,
    exception: ExceptionInfo,
}

impl Image {
    /// Direct sRGB image of `columns` x `rows`, cache opened.
    pub fn new(context: &Arc<CacheContext>, columns: usize, rows: usize) -> Result<Self> {
        Self::with_geometry(context, CacheGeometry::new(columns, rows))
    }

    /// Image with explicit geometry, cache opened.
    pub fn with_geometry(context: &Arc<CacheContext>, geometry: CacheGeometry) -> Result<Self> {
        Self::build(context, geometry, false)
    }

    /// Image whose cache records geometry but holds no pixels.
    pub fn ping(context: &Arc<CacheContext>, columns: usize, rows: usize) -> Result<Self> {
        Self::build(context, CacheGeometry::new(columns, rows), true)
    }

    fn build(context: &Arc<CacheContext>, geometry: CacheGeometry, ping: bool) -> Result<Self> {
        let mut image = Self {
            context: Arc::clone(context),
            geometry,
            ping,
            cache_type: None,
            background_color: PixelPacket::WHITE,
            clip_mask: None,
            mask: None,
            cache: PixelCache::new(Arc::clone(context)),
            methods: Arc::new(DefaultCacheMethods),
            taint: AtomicBool::new(false),
            epoch: Instant::now(),
            exception: ExceptionInfo::new(),
        };
        image.sync_image_pixel_cache()?;
        Ok(image)
    }

    /// Context the image was created in.
    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    /// Current geometry.
    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    /// Width in pixels.
    pub fn columns(&self) -> usize {
        self.geometry.columns
    }

    /// Height in pixels.
    pub fn rows(&self) -> usize {
        self.geometry.rows
    }

    /// Direct or palette storage.
    pub fn storage_class(&self) -> ClassType {
        self.geometry.storage_class
    }

    /// Sample colorspace.
    pub fn colorspace(&self) -> ColorspaceType {
        self.geometry.colorspace
    }

    /// Returns `true` for geometry-only images.
    pub fn is_ping(&self) -> bool {
        self.ping
    }

    /// Forced store kind, if any.
    pub fn cache_type(&self) -> Option<CacheType> {
        self.cache_type
    }

    /// Color returned by the background virtual pixel methods.
    pub fn background_color(&self) -> PixelPacket {
        self.background_color
    }

    /// Sets the background color.
    pub fn set_background_color(&mut self, color: PixelPacket) {
        self.background_color = color;
    }

    /// Failures recorded so far.
    pub fn exception(&self) -> &ExceptionInfo {
        &self.exception
    }

    /// The cache handle.
    pub fn cache(&self) -> &PixelCache {
        &self.cache
    }

    /// Resizes the image; overlapping pixels are kept.
    pub fn set_extent(&mut self, columns: usize, rows: usize) -> Result<()> {
        self.reshape(|image| {
            image.geometry.columns = columns;
            image.geometry.rows = rows;
        })
    }

    /// Switches between direct and palette storage (the latter adds the
    /// index plane).
    pub fn set_storage_class(&mut self, storage_class: ClassType) -> Result<()> {
        self.reshape(|image| image.geometry.storage_class = storage_class)
    }

    /// Changes the colorspace; CMYK adds the index plane.
    pub fn set_colorspace(&mut self, colorspace: ColorspaceType) -> Result<()> {
        self.reshape(|image| image.geometry.colorspace = colorspace)
    }

    /// Drops or restores pixel storage.
    pub fn set_ping(&mut self, ping: bool) -> Result<()> {
        self.reshape(|image| image.ping = ping)
    }

    /// Moves the pixels to a store of `kind` (`None` lets the policy pick).
    pub fn set_cache_type(&mut self, kind: Option<CacheType>) -> Result<()> {
        self.reshape(|image| image.cache_type = kind.filter(|kind| *kind != CacheType::Undefined))
    }

    /// Applies `change` and reopens the cache. If the reopen fails the
    /// image keeps its previous properties, but its pixels are gone.
    fn reshape(&mut self, change: impl FnOnce(&mut Self)) -> Result<()> {
        let previous = (self.geometry, self.ping, self.cache_type);
        change(self);
        let result = self.sync_image_pixel_cache();
        if result.is_err() {
            (self.geometry, self.ping, self.cache_type) = previous;
        }
        result
    }

    /// Clip mask consulted on sync.
    pub fn clip_mask(&self) -> Option<&Image> {
        self.clip_mask.as_deref()
    }

    /// Sets or clears the clip mask.
    pub fn set_clip_mask(&mut self, mask: Option<Image>) {
        self.clip_mask = mask.map(Box::new);
    }

    /// Composite mask consulted on sync.
    pub fn mask(&self) -> Option<&Image> {
        self.mask.as_deref()
    }

    /// Sets or clears the composite mask.
    pub fn set_mask(&mut self, mask: Option<Image>) {
        self.mask = mask.map(Box::new);
    }

    /// Returns `true` if either mask is set.
    pub fn has_masks(&self) -> bool {
        self.clip_mask.is_some() || self.mask.is_some()
    }

    /// Replaces the single-pixel accessors.
    pub fn set_cache_methods(&mut self, methods: Arc<dyn PixelCacheMethods>) {
        self.methods = methods;
    }

    /// Active single-pixel accessors.
    pub fn cache_methods(&self) -> &Arc<dyn PixelCacheMethods> {
        &self.methods
    }

    /// Returns `true` once pixels were written through a synced window.
    pub fn is_tainted(&self) -> bool {
        self.taint.load(Ordering::Acquire)
    }

    pub(crate) fn taint(&self) {
        self.taint.store(true, Ordering::Release);
    }

    /// Records `result`'s error, if any, and passes it through.
    pub(crate) fn record<T>(&self, result: Result<T>, context: &str) -> Result<T> {
        if let Err(err) = &result {
            self.exception.throw(err, context);
        }
        result
    }

    /// Returns the image's cache, reopening it if the image changed and
    /// making it private if `writable`.
    pub fn get_image_pixel_cache(&mut self, writable: bool) -> Result<&CacheInfo> {
        let result = self.acquire_cache(writable);
        self.record(result, "get image pixel cache")?;
        Ok(self.cache.info())
    }

    /// Brings the cache in line with the image's geometry.
    pub fn sync_image_pixel_cache(&mut self) -> Result<()> {
        let result = self.acquire_cache(false);
        self.record(result, "sync image pixel cache")
    }

    fn acquire_cache(&mut self, writable: bool) -> Result<()> {
        self.context.ensure_active()?;
        if writable {
            self.check_time_limit()?;
        }
        self.cache
            .acquire(&self.geometry, self.ping, writable, self.cache_type)
    }

    fn check_time_limit(&self) -> Result<()> {
        if let Some(limit) = self.context.config().time_limit() {
            let elapsed = self.epoch.elapsed();
            if elapsed > limit {
                return Err(Error::TimeLimitExceeded { elapsed, limit });
            }
        }
        Ok(())
    }

    /// Restarts the time-limit clock.
    pub fn reset_pixel_cache_epoch(&mut self) {
        self.epoch = Instant::now();
    }

    /// New handle to this image's cache.
    pub fn reference_pixel_cache(&self) -> PixelCache {
        self.cache.reference()
    }

    /// Releases this image's handle. The image holds no pixels until its
    /// cache is reacquired.
    pub fn destroy_pixel_cache(&mut self) {
        let empty = PixelCache::new(Arc::clone(&self.context));
        std::mem::replace(&mut self.cache, empty).destroy();
    }

    /// Virtual pixel method of the cache.
    pub fn virtual_pixel_method(&self) -> VirtualPixelMethod {
        self.cache.virtual_pixel_method()
    }

    /// Sets the cache's virtual pixel method; returns the previous one.
    pub fn set_pixel_cache_virtual_method(&self, method: VirtualPixelMethod) -> VirtualPixelMethod {
        self.cache.set_virtual_pixel_method(method)
    }

    /// Read-only window that may extend past the image.
    pub fn get_virtual_pixels(
        &self,
        x: i64,
        y: i64,
        columns: usize,
        rows: usize,
    ) -> Result<VirtualPixels<'_>> {
        self.get_virtual_pixels_with(self.virtual_pixel_method(), x, y, columns, rows)
    }

    /// [`get_virtual_pixels`](Self::get_virtual_pixels) with an explicit
    /// method.
    pub fn get_virtual_pixels_with(
        &self,
        method: VirtualPixelMethod,
        x: i64,
        y: i64,
        columns: usize,
        rows: usize,
    ) -> Result<VirtualPixels<'_>> {
        let cache = self.cache.info();
        let region = Region::new(x, y, columns, rows);
        let result = window::virtual_window(self, cache, cache.slot(), method, region);
        self.record(result, "get virtual pixels")
    }

    /// Writable window initialized with the stored pixels.
    pub fn get_authentic_pixels(
        &mut self,
        x: i64,
        y: i64,
        columns: usize,
        rows: usize,
    ) -> Result<AuthenticPixels<'_>> {
        self.authentic(Region::new(x, y, columns, rows), true, "get authentic pixels")
    }

    /// Writable window whose contents are undefined until written; use when
    /// every pixel will be overwritten.
    pub fn queue_authentic_pixels(
        &mut self,
        x: i64,
        y: i64,
        columns: usize,
        rows: usize,
    ) -> Result<AuthenticPixels<'_>> {
        self.authentic(Region::new(x, y, columns, rows), false, "queue authentic pixels")
    }

    fn authentic(&mut self, region: Region, read: bool, context: &str) -> Result<AuthenticPixels<'_>> {
        self.get_image_pixel_cache(true)?;
        let this: &Image = self;
        let cache = this.cache.info();
        let result = window::authentic_window(this, cache, cache.slot(), region, read);
        this.record(result, context)
    }

    /// One pixel, synthesized when outside the image.
    pub fn get_one_virtual_pixel(&self, x: i64, y: i64) -> Result<PixelPacket> {
        self.get_one_virtual_pixel_with(self.virtual_pixel_method(), x, y)
    }

    /// One pixel with an explicit virtual pixel method.
    pub fn get_one_virtual_pixel_with(
        &self,
        method: VirtualPixelMethod,
        x: i64,
        y: i64,
    ) -> Result<PixelPacket> {
        let methods = Arc::clone(&self.methods);
        methods.get_one_virtual_pixel(self, method, x, y)
    }

    /// One stored pixel, read through a writable window.
    pub fn get_one_authentic_pixel(&mut self, x: i64, y: i64) -> Result<PixelPacket> {
        let methods = Arc::clone(&self.methods);
        methods.get_one_authentic_pixel(self, x, y)
    }

    /// Default single virtual pixel read.
    pub fn cache_one_virtual_pixel(
        &self,
        method: VirtualPixelMethod,
        x: i64,
        y: i64,
    ) -> Result<PixelPacket> {
        let window = self.get_virtual_pixels_with(method, x, y, 1, 1)?;
        Ok(window.pixels()[0])
    }

    /// Default single authentic pixel read.
    pub fn cache_one_authentic_pixel(&mut self, x: i64, y: i64) -> Result<PixelPacket> {
        let window = self.get_authentic_pixels(x, y, 1, 1)?;
        Ok(window.pixels()[0])
    }

    /// Whole pixel plane, for memory-resident caches.
    pub fn get_pixel_cache_pixels(&self) -> Option<&[PixelPacket]> {
        self.cache.pixels()
    }

    /// Whole index plane, for memory-resident caches with an index channel.
    pub fn get_pixel_cache_indexes(&self) -> Option<&[IndexPacket]> {
        self.cache.indexes()
    }

    /// Preferred processing tile `(width, height)`.
    pub fn get_pixel_cache_tile_size(&self) -> (usize, usize) {
        self.cache.tile_size()
    }

    /// Backing store kind.
    pub fn get_pixel_cache_type(&self) -> CacheType {
        self.cache.kind()
    }

    /// Colorspace the cache was opened with.
    pub fn get_pixel_cache_colorspace(&self) -> ColorspaceType {
        self.cache.geometry().colorspace
    }

    /// Storage class the cache was opened with.
    pub fn get_pixel_cache_storage_class(&self) -> ClassType {
        self.cache.geometry().storage_class
    }

    /// Color channels excluding alpha.
    pub fn get_pixel_cache_channels(&self) -> usize {
        self.cache.channels()
    }

    /// Writes the pixels to `path` at `offset`, or with `attach` maps an
    /// existing persisted cache from there. Either way the image then uses
    /// the file-backed cache and `offset` advances past it, page aligned,
    /// ready for the next image in the same file.
    pub fn persist_pixel_cache(
        &mut self,
        path: impl AsRef<Path>,
        attach: bool,
        offset: &mut u64,
    ) -> Result<()> {
        let path = path.as_ref();
        let result = self.persist(path, attach, offset);
        if let Err(err) = &result {
            self.exception
                .throw(err, format!("persist pixel cache `{}`", path.display()));
        }
        result
    }

    fn persist(&mut self, path: &Path, attach: bool, offset: &mut u64) -> Result<()> {
        self.context.ensure_active()?;
        let current = self.cache.info();
        let mut persisted = current.clone_descriptor();
        persisted.set_cache_type(self.cache_type);
        persisted.set_cache_file(path, *offset);
        if attach {
            persisted.open(&self.geometry, MapMode::Read, false, None)?;
        } else {
            let _guard = current.lock();
            persisted.open(&self.geometry, MapMode::Persist, false, Some(current))?;
            persisted.flush()?;
        }

        let length = persisted.length();
        debug!(attach, offset = *offset, "persisted {}", persisted.describe());
        self.cache = PixelCache::from(persisted);
        *offset += length.div_ceil(PERSIST_ALIGNMENT) * PERSIST_ALIGNMENT;
        Ok(())
    }
}

impl Clone for Image {
    /// Shares the pixel cache; the first write from either image copies it.
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            geometry: self.geometry,
            ping: self.ping,
            cache_type: self.cache_type,
            background_color: self.background_color,
            clip_mask: self.clip_mask.clone(),
            mask: self.mask.clone(),
            cache: self.cache.reference(),
            methods: Arc::clone(&self.methods),
            taint: AtomicBool::new(self.is_tainted()),
            epoch: self.epoch,
            exception: ExceptionInfo::new(),
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("geometry", &self.geometry)
            .field("ping", &self.ping)
            .field("cache", &self.cache.describe())
            .field("references", &self.cache.reference_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn context() -> Arc<CacheContext> {
        CacheContext::init(CacheConfig {
            thread_limit: 2,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn test_new_opens_memory() {
        let image = Image::new(&context(), 3, 2).unwrap();
        assert_eq!(image.get_pixel_cache_type(), CacheType::Memory);
        assert_eq!(image.get_pixel_cache_pixels().unwrap().len(), 6);
        assert!(image.get_pixel_cache_indexes().is_none());
        assert!(!image.is_tainted());
    }

    #[test]
    fn test_ping_has_no_pixels() {
        let image = Image::ping(&context(), 3, 2).unwrap();
        assert_eq!(image.get_pixel_cache_type(), CacheType::Ping);
        let err = image.get_virtual_pixels(0, 0, 1, 1).unwrap_err();
        assert!(matches!(err, Error::NoPixelCache(_)));
        assert_eq!(image.exception().len(), 1);
    }

    #[test]
    fn test_write_on_private_cache_keeps_it() {
        let mut image = Image::new(&context(), 4, 4).unwrap();
        let id = image.cache().id();
        let mut window = image.queue_authentic_pixels(0, 1, 4, 1).unwrap();
        assert!(window.is_direct());
        window.pixels_mut()[0] = PixelPacket::BLACK;
        window.sync().unwrap();
        assert_eq!(image.cache().id(), id);
        assert!(image.is_tainted());
    }

    #[test]
    fn test_shared_plane_untouched_by_other_image() {
        let mut first = Image::new(&context(), 3, 2).unwrap();
        let mut window = first.queue_authentic_pixels(0, 0, 3, 2).unwrap();
        window.pixels_mut().fill(PixelPacket::gray(1));
        window.sync().unwrap();
        let second = first.clone();
        let before = second.get_pixel_cache_pixels().unwrap().to_vec();

        let mut window = first.queue_authentic_pixels(0, 0, 3, 2).unwrap();
        assert!(window.is_direct());
        window.pixels_mut().fill(PixelPacket::gray(99));
        window.sync().unwrap();

        assert_eq!(second.get_pixel_cache_pixels().unwrap(), &before[..]);
        assert_eq!(second.cache().reference_count(), 1);
        assert_eq!(first.get_one_virtual_pixel(2, 1).unwrap(), PixelPacket::gray(99));
    }

    #[test]
    fn test_storage_class_adds_index_plane() {
        let mut image = Image::new(&context(), 2, 2).unwrap();
        image.set_storage_class(ClassType::Pseudo).unwrap();
        assert_eq!(image.get_pixel_cache_storage_class(), ClassType::Pseudo);
        assert_eq!(image.get_pixel_cache_indexes().unwrap().len(), 4);
    }

    #[test]
    fn test_extent_keeps_overlap() {
        let mut image = Image::new(&context(), 2, 2).unwrap();
        let mut window = image.queue_authentic_pixels(0, 0, 2, 2).unwrap();
        window.pixels_mut().fill(PixelPacket::gray(9));
        window.sync().unwrap();
        image.set_extent(3, 1).unwrap();
        let row = image.get_virtual_pixels(0, 0, 3, 1).unwrap();
        assert_eq!(&row.pixels()[..2], &[PixelPacket::gray(9); 2]);
        assert_eq!(row.pixels()[2], PixelPacket::default());
    }

    #[test]
    fn test_authentic_out_of_bounds_rejected() {
        let mut image = Image::new(&context(), 2, 2).unwrap();
        let err = image.get_authentic_pixels(1, 0, 2, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidRegion { .. }));
        let recorded = image.exception().take();
        assert_eq!(recorded[0].context, "get authentic pixels");
    }

    #[test]
    fn test_destroy_then_reacquire() {
        let mut image = Image::new(&context(), 2, 2).unwrap();
        image.destroy_pixel_cache();
        assert_eq!(image.get_pixel_cache_type(), CacheType::Undefined);
        image.get_image_pixel_cache(true).unwrap();
        assert_eq!(image.get_pixel_cache_type(), CacheType::Memory);
    }

    #[test]
    fn test_failed_reopen_leaves_image_pixel_less() {
        let ctx = CacheContext::init(CacheConfig {
            width_limit: 8,
            ..CacheConfig::default()
        });
        let mut image = Image::new(&ctx, 4, 4).unwrap();
        let err = image.set_extent(9, 4).unwrap_err();
        assert!(matches!(err, Error::SizeLimit { .. }));
        assert_eq!(image.get_pixel_cache_type(), CacheType::Undefined);
        assert_eq!((image.columns(), image.rows()), (4, 4));

        image.get_image_pixel_cache(true).unwrap();
        assert_eq!(image.get_pixel_cache_type(), CacheType::Memory);
        assert_eq!(image.cache().columns(), 4);
    }

    #[test]
    fn test_rejected_storage_class_keeps_properties() {
        let ctx = CacheContext::init(CacheConfig {
            memory_limit: 32,
            map_limit: 0,
            disk_limit: 0,
            ..CacheConfig::default()
        });
        // 2x2 direct fits in 32 bytes; the index plane does not
        let mut image = Image::new(&ctx, 2, 2).unwrap();
        let err = image.set_storage_class(ClassType::Pseudo).unwrap_err();
        assert!(matches!(err, Error::ResourcesExhausted { .. }));
        assert_eq!(image.storage_class(), ClassType::Direct);
        assert_eq!(image.geometry().storage_class, ClassType::Direct);
    }
}
