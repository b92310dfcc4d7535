//! Cache views for data-parallel loops.
//!
//! A [`CacheView`] borrows an image and owns its own array of nexus slots,
//! one per worker, so a rayon loop can hand each row to a different thread
//! without contending on the image's slots.
//!
//! ```rust
//! use pixcache::{CacheConfig, CacheContext, CacheView, Image, PixelPacket};
//! use rayon::prelude::*;
//!
//! let ctx = CacheContext::init(CacheConfig::default());
//! let mut image = Image::new(&ctx, 16, 16).unwrap();
//! let columns = image.columns();
//! let view = CacheView::authentic_view(&mut image).unwrap();
//! (0..16i64).into_par_iter().try_for_each(|y| {
//!     let mut row = view.queue_authentic_pixels(0, y, columns, 1)?;
//!     row.pixels_mut().fill(PixelPacket::gray(y as u16));
//!     row.sync()
//! }).unwrap();
//! ```
//!
//! Windows from one view share the cache. Keep a write window's rows
//! disjoint from every other live window of the view, whichever thread
//! holds it; see [`window`](crate::window#aliasing).

use pixcache_core::{Error, PixelPacket, Region, Result};

use crate::image::Image;
use crate::nexus::NexusSlots;
use crate::virtual_pixel::VirtualPixelMethod;
use crate::window::{self, AuthenticPixels, VirtualPixels};

/// Per-thread access to one image's cache.
#[derive(Debug)]
pub struct CacheView<'a> {
    image: &'a Image,
    slots: NexusSlots,
    writable: bool,
    method: VirtualPixelMethod,
}

impl<'a> CacheView<'a> {
    /// Read-only view.
    pub fn virtual_view(image: &'a Image) -> Self {
        Self::build(image, false)
    }

    /// Read-write view. The image's cache is made private first, so rows
    /// written through the view never reach images sharing the old cache.
    pub fn authentic_view(image: &'a mut Image) -> Result<Self> {
        image.get_image_pixel_cache(true)?;
        Ok(Self::build(image, true))
    }

    fn build(image: &'a Image, writable: bool) -> Self {
        Self {
            image,
            slots: NexusSlots::new(image.context().thread_slots()),
            writable,
            method: image.virtual_pixel_method(),
        }
    }

    /// The viewed image.
    pub fn image(&self) -> &Image {
        self.image
    }

    /// Returns `true` for views created with
    /// [`authentic_view`](Self::authentic_view).
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Virtual pixel method for this view only; returns the previous one.
    pub fn set_virtual_pixel_method(&mut self, method: VirtualPixelMethod) -> VirtualPixelMethod {
        std::mem::replace(&mut self.method, method)
    }

    /// Virtual pixel method used by this view.
    pub fn virtual_pixel_method(&self) -> VirtualPixelMethod {
        self.method
    }

    /// Read-only window that may extend past the image.
    ///
    /// # Aliasing
    ///
    /// Must not overlap a live write window of this view. Debug builds
    /// panic when it does.
    pub fn get_virtual_pixels(
        &self,
        x: i64,
        y: i64,
        columns: usize,
        rows: usize,
    ) -> Result<VirtualPixels<'_>> {
        let cache = self.image.cache().info();
        let region = Region::new(x, y, columns, rows);
        let result = window::virtual_window(self.image, cache, self.slots.acquire(), self.method, region);
        self.image.record(result, "get cache view virtual pixels")
    }

    /// One pixel, synthesized with the view's method when outside.
    pub fn get_one_virtual_pixel(&self, x: i64, y: i64) -> Result<PixelPacket> {
        let window = self.get_virtual_pixels(x, y, 1, 1)?;
        Ok(window.pixels()[0])
    }

    /// Writable window initialized with the stored pixels.
    ///
    /// # Aliasing
    ///
    /// Must not overlap any other live window of this view, read or write.
    /// Debug builds panic when it does.
    pub fn get_authentic_pixels(
        &self,
        x: i64,
        y: i64,
        columns: usize,
        rows: usize,
    ) -> Result<AuthenticPixels<'_>> {
        self.authentic(Region::new(x, y, columns, rows), true, "get cache view authentic pixels")
    }

    /// Writable window for pixels that will all be overwritten. Subject to
    /// the same aliasing rule as
    /// [`get_authentic_pixels`](Self::get_authentic_pixels).
    pub fn queue_authentic_pixels(
        &self,
        x: i64,
        y: i64,
        columns: usize,
        rows: usize,
    ) -> Result<AuthenticPixels<'_>> {
        self.authentic(Region::new(x, y, columns, rows), false, "queue cache view authentic pixels")
    }

    fn authentic(&self, region: Region, read: bool, context: &str) -> Result<AuthenticPixels<'_>> {
        let result = if self.writable {
            let cache = self.image.cache().info();
            window::authentic_window(self.image, cache, self.slots.acquire(), region, read)
        } else {
            Err(Error::ReadOnlyCache)
        };
        self.image.record(result, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::context::CacheContext;

    #[test]
    fn test_virtual_view_rejects_writes() {
        let ctx = CacheContext::init(CacheConfig::default());
        let image = Image::new(&ctx, 2, 2).unwrap();
        let view = CacheView::virtual_view(&image);
        assert!(!view.is_writable());
        assert!(matches!(
            view.queue_authentic_pixels(0, 0, 2, 1),
            Err(Error::ReadOnlyCache)
        ));
    }

    #[test]
    fn test_view_method_is_local() {
        let ctx = CacheContext::init(CacheConfig::default());
        let mut image = Image::new(&ctx, 2, 1).unwrap();
        let mut w = image.queue_authentic_pixels(0, 0, 2, 1).unwrap();
        w.pixels_mut()[1] = PixelPacket::gray(40);
        w.sync().unwrap();

        let mut view = CacheView::virtual_view(&image);
        view.set_virtual_pixel_method(VirtualPixelMethod::Black);
        assert_eq!(view.get_one_virtual_pixel(5, 0).unwrap(), PixelPacket::BLACK);
        assert_eq!(view.get_one_virtual_pixel(1, 0).unwrap(), PixelPacket::gray(40));
        // the image still repeats edges
        assert_eq!(image.get_one_virtual_pixel(5, 0).unwrap(), PixelPacket::gray(40));
    }

    #[test]
    fn test_disjoint_windows_stay_live_together() {
        let ctx = CacheContext::init(CacheConfig::default());
        let mut image = Image::new(&ctx, 4, 3).unwrap();
        let view = CacheView::authentic_view(&mut image).unwrap();
        #[cfg(debug_assertions)]
        let claims = || view.image().cache().info().window_claims().unwrap();

        let mut top = view.queue_authentic_pixels(0, 0, 4, 1).unwrap();
        let mut middle = view.queue_authentic_pixels(0, 1, 4, 1).unwrap();
        let below = view.get_virtual_pixels(-2, 2, 8, 3).unwrap();
        let again = view.get_virtual_pixels(1, 2, 2, 1).unwrap();
        #[cfg(debug_assertions)]
        assert_eq!(claims().len(), 4);
        assert_eq!(below.pixels()[2], again.pixels()[0]);

        top.pixels_mut().fill(PixelPacket::gray(1));
        middle.pixels_mut().fill(PixelPacket::gray(2));
        top.sync().unwrap();
        middle.sync().unwrap();
        drop((below, again));
        #[cfg(debug_assertions)]
        assert_eq!(claims().len(), 0);

        // released rows can be taken again
        let row = view.get_authentic_pixels(0, 1, 4, 1).unwrap();
        assert!(row.pixels().iter().all(|px| *px == PixelPacket::gray(2)));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "overlaps live window")]
    fn test_write_over_live_read_panics() {
        let ctx = CacheContext::init(CacheConfig::default());
        let mut image = Image::new(&ctx, 4, 2).unwrap();
        let view = CacheView::authentic_view(&mut image).unwrap();
        let _row = view.get_virtual_pixels(-1, 0, 6, 1).unwrap();
        let _ = view.queue_authentic_pixels(3, 0, 1, 1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "overlaps live window")]
    fn test_overlapping_writes_panic() {
        let ctx = CacheContext::init(CacheConfig::default());
        let mut image = Image::new(&ctx, 4, 4).unwrap();
        let view = CacheView::authentic_view(&mut image).unwrap();
        let _block = view.get_authentic_pixels(0, 0, 4, 2).unwrap();
        let _ = view.get_authentic_pixels(2, 1, 1, 1);
    }
}
