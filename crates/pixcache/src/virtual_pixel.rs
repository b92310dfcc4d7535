//! Virtual pixels: values synthesized for coordinates outside the image.
//!
//! Windows may extend past any edge. In-bounds runs are copied from the
//! store; every out-of-bounds cell is resolved with the active
//! [`VirtualPixelMethod`], either to a constant or to some in-bounds pixel
//! chosen by a coordinate rule.
//!
//! # Coordinate rules
//!
//! For extent `d` and an out-of-range coordinate `x`:
//!
//! | Method | Source coordinate |
//! |--------|-------------------|
//! | Edge | `clamp(x, 0, d-1)` |
//! | Tile | `x mod d` (Euclidean) |
//! | Mirror | `x mod d`, reflected when `x div d` is odd |
//! | Dither | `x` plus a 8x8 ordered dither offset, clamped |
//! | Random | uniform over `[0, d)` |
//!
//! The tile variants combine these per axis; see [`VirtualPixelMethod`].

use pixcache_core::{IndexPacket, PixelPacket, Region, Result};
use rand::Rng;

use crate::cache::CacheInfo;
use crate::nexus::Nexus;

/// How pixels outside the image are synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VirtualPixelMethod {
    /// Not set; behaves as [`Edge`](Self::Edge).
    #[default]
    Undefined,
    /// The image background color.
    Background,
    /// Same as `Background`.
    Constant,
    /// Nearby in-bounds pixel chosen by an ordered dither pattern.
    Dither,
    /// Nearest edge pixel.
    Edge,
    /// Image reflected at every edge.
    Mirror,
    /// Random in-bounds pixel.
    Random,
    /// Image repeated in both directions.
    Tile,
    /// Transparent black.
    Transparent,
    /// Opaque white (neutral for masks).
    Mask,
    /// Opaque black.
    Black,
    /// Opaque mid gray.
    Gray,
    /// Opaque white.
    White,
    /// Tiled horizontally; background above and below.
    HorizontalTile,
    /// Tiled vertically; background left and right.
    VerticalTile,
    /// Tiled horizontally; edge rows above and below.
    HorizontalTileEdge,
    /// Tiled vertically; edge columns left and right.
    VerticalTileEdge,
    /// Tiles alternating with background like a checkerboard.
    CheckerTile,
}

impl VirtualPixelMethod {
    /// The method actually applied (`Undefined` becomes `Edge`).
    pub const fn effective(self) -> Self {
        match self {
            Self::Undefined => Self::Edge,
            other => other,
        }
    }

    /// Fixed color for constant methods, `None` when the value depends on
    /// image content.
    pub fn constant(self, background: PixelPacket) -> Option<PixelPacket> {
        match self {
            Self::Background | Self::Constant => Some(background),
            Self::Black => Some(PixelPacket::BLACK),
            Self::Gray => Some(PixelPacket::GRAY),
            Self::Transparent => Some(PixelPacket::TRANSPARENT),
            Self::Mask | Self::White => Some(PixelPacket::WHITE),
            _ => None,
        }
    }
}

/// Quotient and remainder of a Euclidean division.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modulo {
    /// Number of whole extents below the coordinate
    pub quotient: i64,
    /// Position inside the extent, always in `[0, extent)`
    pub remainder: i64,
}

/// Euclidean division of `offset` by `extent` (`extent` > 0).
#[inline]
pub fn virtual_modulo(offset: i64, extent: usize) -> Modulo {
    let d = extent as i64;
    Modulo {
        quotient: offset.div_euclid(d),
        remainder: offset.rem_euclid(d),
    }
}

/// Edge rule: nearest valid coordinate.
#[inline]
pub fn edge_coordinate(offset: i64, extent: usize) -> i64 {
    offset.clamp(0, extent as i64 - 1)
}

/// Tile rule.
#[inline]
pub fn tile_coordinate(offset: i64, extent: usize) -> i64 {
    offset.rem_euclid(extent as i64)
}

/// Mirror rule: every other tile is reflected.
#[inline]
pub fn mirror_coordinate(offset: i64, extent: usize) -> i64 {
    let m = virtual_modulo(offset, extent);
    if m.quotient & 1 != 0 {
        extent as i64 - 1 - m.remainder
    } else {
        m.remainder
    }
}

/// 8x8 ordered dither matrix.
const DITHER_MATRIX: [i64; 64] = [
    0, 48, 12, 60, 3, 51, 15, 63, //
    32, 16, 44, 28, 35, 19, 47, 31, //
    8, 56, 4, 52, 11, 59, 7, 55, //
    40, 24, 36, 20, 43, 27, 39, 23, //
    2, 50, 14, 62, 1, 49, 13, 61, //
    34, 18, 46, 30, 33, 17, 45, 29, //
    10, 58, 6, 54, 9, 57, 5, 53, //
    42, 26, 38, 22, 41, 25, 37, 21, //
];

/// Dither rule: offsets `offset` by up to 32 pixels using the matrix cell
/// picked by (`offset`, `other`), then clamps into the image.
#[inline]
pub fn dither_coordinate(offset: i64, other: i64, extent: usize) -> i64 {
    let cell = (other & 7) * 8 + (offset & 7);
    edge_coordinate(offset + DITHER_MATRIX[cell as usize] - 32, extent)
}

impl CacheInfo {
    /// Fills `slot.nexus` with the pixels of `region`, synthesizing every
    /// out-of-bounds cell with `method`.
    pub(crate) fn get_virtual_pixels_from_nexus(
        &self,
        method: VirtualPixelMethod,
        background: PixelPacket,
        region: Region,
        nexus: &mut Nexus,
        scratch: &mut Nexus,
    ) -> Result<()> {
        region.validate()?;
        self.ensure_pixels()?;
        let columns = self.columns();
        let rows = self.rows();

        if region.is_within(columns, rows) {
            self.set_nexus(region, false, nexus)?;
            self.read_pixels(nexus)?;
            return self.read_indexes(nexus);
        }

        // partially or fully outside: always staged
        self.set_nexus(region, true, nexus)?;
        let method = method.effective();
        let constant = method.constant(background);
        let (pixels, mut indexes) = nexus.planes_mut();
        let inside = region.intersect(&Region::new(0, 0, columns, rows));

        for v in 0..region.height {
            let y = region.y + v as i64;
            let mut u = 0;
            while u < region.width {
                let x = region.x + u as i64;
                let at = v * region.width + u;
                if let Some(bounds) = inside.filter(|b| b.contains(x, y)) {
                    // copy the rest of this row's in-bounds run at once
                    let run = (bounds.right() - x) as usize;
                    self.read_into(Region::new(x, y, run, 1), scratch)?;
                    pixels[at..at + run].copy_from_slice(scratch.pixels());
                    if let (Some(dst), Some(src)) = (indexes.as_deref_mut(), scratch.indexes()) {
                        dst[at..at + run].copy_from_slice(src);
                    }
                    u += run;
                    continue;
                }

                let (pixel, index) = match constant {
                    Some(color) => (color, 0),
                    None => self.virtual_cell(method, background, x, y, scratch)?,
                };
                pixels[at] = pixel;
                if let Some(dst) = indexes.as_deref_mut() {
                    dst[at] = index;
                }
                u += 1;
            }
        }
        Ok(())
    }

    /// Resolves one out-of-bounds cell with a content-dependent method.
    fn virtual_cell(
        &self,
        method: VirtualPixelMethod,
        background: PixelPacket,
        x: i64,
        y: i64,
        scratch: &mut Nexus,
    ) -> Result<(PixelPacket, IndexPacket)> {
        use VirtualPixelMethod as M;

        let columns = self.columns();
        let rows = self.rows();
        let in_x = x >= 0 && (x as usize) < columns;
        let in_y = y >= 0 && (y as usize) < rows;

        let (sx, sy) = match method {
            M::Tile => (tile_coordinate(x, columns), tile_coordinate(y, rows)),
            M::Mirror => (mirror_coordinate(x, columns), mirror_coordinate(y, rows)),
            M::Dither => (dither_coordinate(x, y, columns), dither_coordinate(y, x, rows)),
            M::Random => {
                let mut rng = self.random().lock();
                (
                    rng.gen_range(0..columns as i64),
                    rng.gen_range(0..rows as i64),
                )
            }
            M::CheckerTile => {
                let mx = virtual_modulo(x, columns);
                let my = virtual_modulo(y, rows);
                if (mx.quotient ^ my.quotient) & 1 != 0 {
                    return Ok((background, 0));
                }
                (mx.remainder, my.remainder)
            }
            M::HorizontalTile => {
                if !in_y {
                    return Ok((background, 0));
                }
                (tile_coordinate(x, columns), y)
            }
            M::VerticalTile => {
                if !in_x {
                    return Ok((background, 0));
                }
                (x, tile_coordinate(y, rows))
            }
            M::HorizontalTileEdge => (tile_coordinate(x, columns), edge_coordinate(y, rows)),
            M::VerticalTileEdge => (edge_coordinate(x, columns), tile_coordinate(y, rows)),
            // Edge, and anything constant that slipped through
            _ => (edge_coordinate(x, columns), edge_coordinate(y, rows)),
        };

        self.read_into(Region::pixel(sx, sy), scratch)?;
        let index = scratch.indexes().map_or(0, |i| i[0]);
        Ok((scratch.pixels()[0], index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_wraps() {
        for d in [1usize, 3, 7, 64] {
            for x in -200i64..200 {
                let t = tile_coordinate(x, d);
                assert!((0..d as i64).contains(&t));
                assert_eq!(t, tile_coordinate(x + d as i64, d));
            }
        }
    }

    #[test]
    fn test_mirror_is_symmetric() {
        for d in [1usize, 2, 5, 16] {
            for x in 0..d as i64 {
                assert_eq!(mirror_coordinate(x, d), x);
                assert_eq!(mirror_coordinate(2 * d as i64 - 1 - x, d), x);
                assert_eq!(mirror_coordinate(-1 - x, d), x);
            }
        }
    }

    #[test]
    fn test_edge_clamps() {
        assert_eq!(edge_coordinate(-5, 4), 0);
        assert_eq!(edge_coordinate(2, 4), 2);
        assert_eq!(edge_coordinate(99, 4), 3);
    }

    #[test]
    fn test_modulo_negative() {
        assert_eq!(
            virtual_modulo(-1, 4),
            Modulo {
                quotient: -1,
                remainder: 3
            }
        );
        assert_eq!(
            virtual_modulo(9, 4),
            Modulo {
                quotient: 2,
                remainder: 1
            }
        );
    }

    #[test]
    fn test_dither_stays_inside() {
        for x in -100..100 {
            for y in -10..10 {
                let d = dither_coordinate(x, y, 16);
                assert!((0..16).contains(&d));
            }
        }
        // matrix cell (0, 0) shifts by -32
        assert_eq!(dither_coordinate(40, 0, 100), 8);
    }

    #[test]
    fn test_constants() {
        let bg = PixelPacket::opaque(1, 2, 3);
        assert_eq!(VirtualPixelMethod::Background.constant(bg), Some(bg));
        assert_eq!(VirtualPixelMethod::Constant.constant(bg), Some(bg));
        assert_eq!(VirtualPixelMethod::Transparent.constant(bg), Some(PixelPacket::TRANSPARENT));
        assert_eq!(VirtualPixelMethod::Mask.constant(bg), Some(PixelPacket::WHITE));
        assert_eq!(VirtualPixelMethod::Gray.constant(bg), Some(PixelPacket::GRAY));
        assert_eq!(VirtualPixelMethod::Tile.constant(bg), None);
        assert_eq!(VirtualPixelMethod::Undefined.effective(), VirtualPixelMethod::Edge);
    }
}
