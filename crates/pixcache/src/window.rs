//! Pixel windows handed out by images and cache views.
//!
//! A window owns a nexus slot for as long as it lives:
//!
//! - [`VirtualPixels`]: read-only, may extend past the image edges
//! - [`AuthenticPixels`]: read-write, must lie inside the image; changes
//!   reach the cache on [`sync`](AuthenticPixels::sync)
//!
//! When a write window aliases a memory-resident store
//! ([`is_direct`](AuthenticPixels::is_direct)) modifications land in the
//! cache immediately and `sync` only runs the bookkeeping. Staged windows
//! dropped without `sync` discard their changes.
//!
//! # Aliasing
//!
//! Windows over a memory-resident cache may point straight into the
//! store, so two live windows on the same cache must not overlap when
//! either of them writes. Debug builds record the region of every live
//! window and panic on such an overlap; release builds trust the caller.
//! Read windows may overlap freely, and rayon loops that hand each thread
//! its own rows never trip the check.

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(debug_assertions)]
use parking_lot::Mutex;
use pixcache_core::{Error, IndexPacket, PixelPacket, Region, Result};

use crate::cache::CacheInfo;
use crate::image::Image;
use crate::mask;
use crate::nexus::{NexusSlot, SlotGuard};
use crate::virtual_pixel::VirtualPixelMethod;

/// Read-only pixels of a region, out-of-bounds cells synthesized.
pub struct VirtualPixels<'a> {
    slot: SlotGuard<'a>,
    _claim: Option<Claim<'a>>,
}

impl VirtualPixels<'_> {
    /// Region covered.
    pub fn region(&self) -> Region {
        self.slot.nexus.region()
    }

    /// Pixels in row-major order.
    pub fn pixels(&self) -> &[PixelPacket] {
        self.slot.nexus.pixels()
    }

    /// Index samples, when the image has an index channel.
    pub fn indexes(&self) -> Option<&[IndexPacket]> {
        self.slot.nexus.indexes()
    }
}

impl std::fmt::Debug for VirtualPixels<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualPixels")
            .field("region", &self.region())
            .finish()
    }
}

/// Writable pixels of an in-bounds region.
pub struct AuthenticPixels<'a> {
    image: &'a Image,
    cache: &'a CacheInfo,
    slot: SlotGuard<'a>,
    _claim: Option<Claim<'a>>,
}

impl AuthenticPixels<'_> {
    /// Region covered.
    pub fn region(&self) -> Region {
        self.slot.nexus.region()
    }

    /// Returns `true` if the window aliases the cache, so writes are
    /// visible without a sync.
    pub fn is_direct(&self) -> bool {
        self.slot.nexus.is_authentic()
    }

    /// Pixels in row-major order.
    pub fn pixels(&self) -> &[PixelPacket] {
        self.slot.nexus.pixels()
    }

    /// Mutable pixels.
    pub fn pixels_mut(&mut self) -> &mut [PixelPacket] {
        self.slot.nexus.pixels_mut()
    }

    /// Index samples, when the image has an index channel.
    pub fn indexes(&self) -> Option<&[IndexPacket]> {
        self.slot.nexus.indexes()
    }

    /// Mutable index samples.
    pub fn indexes_mut(&mut self) -> Option<&mut [IndexPacket]> {
        self.slot.nexus.indexes_mut()
    }

    /// Commits the window: applies the image's masks, writes staged pixels
    /// back and marks the image modified.
    pub fn sync(mut self) -> Result<()> {
        let result = self.commit();
        self.image.record(result, "sync authentic pixels")
    }

    fn commit(&mut self) -> Result<()> {
        self.image.context().ensure_active()?;
        let nexus = &mut self.slot.nexus;
        mask::apply_masks(self.image, self.cache, nexus)?;
        self.cache.write_pixels(nexus)?;
        self.cache.write_indexes(nexus)?;
        self.image.cache_methods().pixels_synced(self.image, nexus.region())?;
        self.image.taint();
        Ok(())
    }
}

impl std::fmt::Debug for AuthenticPixels<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticPixels")
            .field("region", &self.region())
            .field("direct", &self.is_direct())
            .finish()
    }
}

/// Resolves `region` into `slot` and wraps it as a read-only window.
pub(crate) fn virtual_window<'a>(
    image: &Image,
    cache: &'a CacheInfo,
    mut slot: SlotGuard<'a>,
    method: VirtualPixelMethod,
    region: Region,
) -> Result<VirtualPixels<'a>> {
    image.context().ensure_active()?;
    let claim = region
        .intersect(&Region::new(0, 0, cache.columns(), cache.rows()))
        .and_then(|inside| Claim::new(cache, inside, false));
    let NexusSlot { nexus, scratch } = &mut *slot;
    cache.get_virtual_pixels_from_nexus(method, image.background_color(), region, nexus, scratch)?;
    Ok(VirtualPixels { slot, _claim: claim })
}

/// Prepares a write window over `region`, reading current values first
/// when `read` is set.
pub(crate) fn authentic_window<'a>(
    image: &'a Image,
    cache: &'a CacheInfo,
    mut slot: SlotGuard<'a>,
    region: Region,
    read: bool,
) -> Result<AuthenticPixels<'a>> {
    image.context().ensure_active()?;
    region.validate()?;
    if !region.is_within(cache.columns(), cache.rows()) {
        return Err(Error::invalid_region(
            region.x,
            region.y,
            region.width,
            region.height,
            "authentic pixels must lie inside the image",
        ));
    }
    let claim = Claim::new(cache, region, true);
    let nexus = &mut slot.nexus;
    cache.set_nexus(region, image.has_masks(), nexus)?;
    if read {
        cache.read_pixels(nexus)?;
        cache.read_indexes(nexus)?;
    }
    Ok(AuthenticPixels { image, cache, slot, _claim: claim })
}

/// Regions held by live windows on one cache.
#[derive(Default)]
pub(crate) struct WindowClaims {
    #[cfg(debug_assertions)]
    live: Mutex<Vec<(u64, Region, bool)>>,
    #[cfg(debug_assertions)]
    next: AtomicU64,
}

#[cfg(debug_assertions)]
impl WindowClaims {
    fn claim(&self, region: Region, writable: bool) -> u64 {
        let mut live = self.live.lock();
        let conflict = live
            .iter()
            .find(|(_, held, held_writable)| (writable || *held_writable) && held.intersect(&region).is_some());
        if let Some((_, held, _)) = conflict {
            panic!("pixel window {region:?} overlaps live window {held:?} and one of them writes");
        }
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        live.push((id, region, writable));
        id
    }

    fn release(&self, id: u64) {
        self.live.lock().retain(|(held, _, _)| *held != id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.live.lock().len()
    }
}

#[cfg(not(debug_assertions))]
impl WindowClaims {
    fn claim(&self, _region: Region, _writable: bool) -> u64 {
        0
    }

    fn release(&self, _id: u64) {}
}

/// A window's entry in [`WindowClaims`], removed on drop.
struct Claim<'a> {
    claims: &'a WindowClaims,
    id: u64,
}

impl<'a> Claim<'a> {
    fn new(cache: &'a CacheInfo, region: Region, writable: bool) -> Option<Self> {
        let claims = cache.window_claims()?;
        let id = claims.claim(region, writable);
        Some(Self { claims, id })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.claims.release(self.id);
    }
}
