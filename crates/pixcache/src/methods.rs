//! Pluggable single-pixel accessors.
//!
//! An [`Image`] routes its single-pixel reads and its sync notifications
//! through a [`PixelCacheMethods`] object. The default implementation goes
//! straight to the cache; embedders can substitute their own (for example
//! to serve pixels from a procedural source, or to track dirty regions)
//! with [`Image::set_cache_methods`].

use std::fmt;

use pixcache_core::{PixelPacket, Region, Result};

use crate::image::Image;
use crate::virtual_pixel::VirtualPixelMethod;

/// Overridable pixel accessors.
pub trait PixelCacheMethods: Send + Sync + fmt::Debug {
    /// Reads one pixel, synthesizing it with `method` if it lies outside
    /// the image.
    fn get_one_virtual_pixel(
        &self,
        image: &Image,
        method: VirtualPixelMethod,
        x: i64,
        y: i64,
    ) -> Result<PixelPacket> {
        image.cache_one_virtual_pixel(method, x, y)
    }

    /// Reads one in-bounds pixel through an authentic window.
    fn get_one_authentic_pixel(&self, image: &mut Image, x: i64, y: i64) -> Result<PixelPacket> {
        image.cache_one_authentic_pixel(x, y)
    }

    /// Called after the pixels of `region` were committed to the cache.
    fn pixels_synced(&self, image: &Image, region: Region) -> Result<()> {
        let _ = (image, region);
        Ok(())
    }
}

/// Accessors that read and write the cache directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCacheMethods;

impl PixelCacheMethods for DefaultCacheMethods {}
