//! Write masks applied when a window is synced.
//!
//! Masks protect stored pixels: where a mask is white the previously stored
//! value survives, where it is black the newly written value wins. Gray
//! levels blend.
//!
//! - **Clip mask**: linear blend, `new * (1 - m) + old * m`
//! - **Composite mask**: the new pixel, with its alpha scaled by `1 - m`, is
//!   composited *over* the old pixel
//!
//! `m` is the mask pixel's intensity scaled to `[0, 1]`. Index samples are
//! not blendable; they take the old value wherever `m > 0.5`. Cells beyond
//! a mask's extent read as opaque white, whatever virtual pixel method the
//! mask image carries, so a small mask never exposes pixels outside it.

use pixcache_core::{
    clamp_to_quantum, IndexPacket, PixelPacket, Quantum, Region, Result, QUANTUM_RANGE,
    QUANTUM_SCALE,
};

use crate::cache::CacheInfo;
use crate::image::Image;
use crate::nexus::Nexus;
use crate::virtual_pixel::VirtualPixelMethod;
use crate::window::VirtualPixels;

/// Applies `image`'s clip mask and then its composite mask to a staged
/// write nexus.
pub(crate) fn apply_masks(image: &Image, cache: &CacheInfo, nexus: &mut Nexus) -> Result<()> {
    let clip = image.clip_mask();
    let composite = image.mask();
    if (clip.is_none() && composite.is_none()) || nexus.is_authentic() {
        return Ok(());
    }

    let region = nexus.region();
    let mut old = Nexus::new();
    cache.set_nexus(region, true, &mut old)?;
    cache.read_pixels(&mut old)?;
    cache.read_indexes(&mut old)?;

    if let Some(clip) = clip {
        let coverage = mask_window(clip, region)?;
        let (pixels, indexes) = nexus.planes_mut();
        clip_pixels(pixels, indexes, old.pixels(), old.indexes(), coverage.pixels());
    }
    if let Some(mask) = composite {
        let coverage = mask_window(mask, region)?;
        let (pixels, indexes) = nexus.planes_mut();
        composite_pixels(pixels, indexes, old.pixels(), old.indexes(), coverage.pixels());
    }
    Ok(())
}

fn mask_window(mask: &Image, region: Region) -> Result<VirtualPixels<'_>> {
    mask.get_virtual_pixels_with(
        VirtualPixelMethod::Mask,
        region.x,
        region.y,
        region.width,
        region.height,
    )
}

#[inline]
fn coverage(mask: &PixelPacket) -> f64 {
    (mask.intensity() * QUANTUM_SCALE).clamp(0.0, 1.0)
}

#[inline]
fn lerp(new: Quantum, old: Quantum, m: f64) -> Quantum {
    clamp_to_quantum(new as f64 * (1.0 - m) + old as f64 * m)
}

fn restore_indexes(
    indexes: Option<&mut [IndexPacket]>,
    old: Option<&[IndexPacket]>,
    mask: &[PixelPacket],
) {
    if let (Some(indexes), Some(old)) = (indexes, old) {
        for ((index, &prior), m) in indexes.iter_mut().zip(old).zip(mask) {
            if coverage(m) > 0.5 {
                *index = prior;
            }
        }
    }
}

/// Blends `pixels` toward `old` by the clip mask coverage.
pub fn clip_pixels(
    pixels: &mut [PixelPacket],
    indexes: Option<&mut [IndexPacket]>,
    old: &[PixelPacket],
    old_indexes: Option<&[IndexPacket]>,
    mask: &[PixelPacket],
) {
    for ((px, prior), m) in pixels.iter_mut().zip(old).zip(mask) {
        let m = coverage(m);
        if m <= 0.0 {
            continue;
        }
        *px = PixelPacket::new(
            lerp(px.red, prior.red, m),
            lerp(px.green, prior.green, m),
            lerp(px.blue, prior.blue, m),
            lerp(px.alpha, prior.alpha, m),
        );
    }
    restore_indexes(indexes, old_indexes, mask);
}

/// Composites `pixels` over `old`, with each new pixel's alpha scaled by
/// the inverse mask coverage.
pub fn composite_pixels(
    pixels: &mut [PixelPacket],
    indexes: Option<&mut [IndexPacket]>,
    old: &[PixelPacket],
    old_indexes: Option<&[IndexPacket]>,
    mask: &[PixelPacket],
) {
    let q = QUANTUM_RANGE as f64;
    for ((px, prior), m) in pixels.iter_mut().zip(old).zip(mask) {
        let sa = (1.0 - coverage(m)) * px.alpha as f64 * QUANTUM_SCALE;
        let da = prior.alpha as f64 * QUANTUM_SCALE;
        let ra = sa + da * (1.0 - sa);
        if ra <= f64::EPSILON {
            *px = PixelPacket::TRANSPARENT;
            continue;
        }
        let over = |s: Quantum, d: Quantum| {
            clamp_to_quantum((s as f64 * sa + d as f64 * da * (1.0 - sa)) / ra)
        };
        *px = PixelPacket::new(
            over(px.red, prior.red),
            over(px.green, prior.green),
            over(px.blue, prior.blue),
            clamp_to_quantum(ra * q),
        );
    }
    restore_indexes(indexes, old_indexes, mask);
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: PixelPacket = PixelPacket::opaque(QUANTUM_RANGE, 0, 0);
    const BLUE: PixelPacket = PixelPacket::opaque(0, 0, QUANTUM_RANGE);

    #[test]
    fn test_clip_black_and_white() {
        let mut pixels = [RED, RED];
        let mut indexes = [1, 1];
        let old = [BLUE, BLUE];
        let old_indexes = [9, 9];
        let mask = [PixelPacket::BLACK, PixelPacket::WHITE];
        clip_pixels(&mut pixels, Some(&mut indexes), &old, Some(&old_indexes), &mask);
        assert_eq!(pixels, [RED, BLUE]);
        assert_eq!(indexes, [1, 9]);
    }

    #[test]
    fn test_clip_gray_blends() {
        let mut pixels = [PixelPacket::gray(QUANTUM_RANGE)];
        let old = [PixelPacket::gray(0)];
        let mask = [PixelPacket::gray(QUANTUM_RANGE / 2)];
        clip_pixels(&mut pixels, None, &old, None, &mask);
        let half = QUANTUM_RANGE as i32 / 2;
        assert!((pixels[0].red as i32 - half).abs() <= 2);
    }

    #[test]
    fn test_composite_extremes() {
        let mut pixels = [RED, RED];
        let old = [BLUE, BLUE];
        let mask = [PixelPacket::BLACK, PixelPacket::WHITE];
        composite_pixels(&mut pixels, None, &old, None, &mask);
        assert_eq!(pixels[0], RED);
        assert_eq!(pixels[1], BLUE);
    }

    #[test]
    fn test_composite_transparent_new_keeps_old() {
        let mut pixels = [PixelPacket::TRANSPARENT];
        let old = [BLUE];
        composite_pixels(&mut pixels, None, &old, None, &[PixelPacket::BLACK]);
        assert_eq!(pixels[0], BLUE);
    }

    #[test]
    fn test_composite_both_transparent() {
        let mut pixels = [PixelPacket::new(5, 5, 5, 0)];
        let old = [PixelPacket::new(9, 9, 9, 0)];
        composite_pixels(&mut pixels, None, &old, None, &[PixelPacket::BLACK]);
        assert_eq!(pixels[0], PixelPacket::TRANSPARENT);
    }
}
