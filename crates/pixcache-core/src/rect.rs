//! Signed pixel regions.
//!
//! Cache windows may start left of or above the image, so unlike an image
//! crop rectangle the origin of a [`Region`] is signed while its extent is
//! not.
//!
//! # Coordinate System
//!
//! ```text
//! (0,0) ────────► X
//!   │
//!   │   ┌──────────┐
//!   │   │  Image   │
//!   │   │ columns x│
//!   │   │   rows   │
//!   │   └──────────┘
//!   ▼
//!   Y
//! ```
//!
//! # Usage
//!
//! ```rust
//! use pixcache_core::Region;
//!
//! let region = Region::new(-1, -1, 3, 3);
//! assert!(!region.is_within(4, 4));
//! assert!(Region::new(0, 0, 4, 1).is_within(4, 4));
//! assert_eq!(region.to_string(), "3x3-1-1");
//! ```

use crate::error::{Error, Result};

/// Largest coordinate magnitude a region may reach.
///
/// Offsets are later multiplied by the row length and a pixel size, so
/// extents are capped well below `i64::MAX` to keep that arithmetic exact.
pub const MAX_EXTENT: i64 = 1 << 40;

/// A rectangle with a signed origin and unsigned extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    /// X coordinate of the left edge (inclusive)
    pub x: i64,
    /// Y coordinate of the top edge (inclusive)
    pub y: i64,
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
}

impl Region {
    /// Creates a new region.
    #[inline]
    pub const fn new(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A single pixel at (x, y).
    #[inline]
    pub const fn pixel(x: i64, y: i64) -> Self {
        Self::new(x, y, 1, 1)
    }

    /// A single full row of an image `columns` wide.
    #[inline]
    pub const fn row(y: i64, columns: usize) -> Self {
        Self::new(0, y, columns, 1)
    }

    /// Returns `true` if the region covers no pixels.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    #[inline]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    /// X coordinate one past the right edge.
    #[inline]
    pub const fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    /// Y coordinate one past the bottom edge.
    #[inline]
    pub const fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    /// Returns `true` if (x, y) lies inside the region.
    #[inline]
    pub const fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Returns `true` if the region lies entirely inside `[0, columns) x [0, rows)`.
    #[inline]
    pub const fn is_within(&self, columns: usize, rows: usize) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.right() <= columns as i64
            && self.bottom() <= rows as i64
    }

    /// Intersection with another region, if any.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return None;
        }
        Some(Region::new(x, y, (right - x) as usize, (bottom - y) as usize))
    }

    /// Rejects zero-sized regions and regions whose corners overflow
    /// [`MAX_EXTENT`].
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::invalid_region(
                self.x,
                self.y,
                self.width,
                self.height,
                "width and height must be positive",
            ));
        }
        let width = i64::try_from(self.width).unwrap_or(i64::MAX);
        let height = i64::try_from(self.height).unwrap_or(i64::MAX);
        let fits = |origin: i64, extent: i64| {
            origin.checked_add(extent).is_some_and(|end| {
                origin > -MAX_EXTENT && end < MAX_EXTENT && extent < MAX_EXTENT
            })
        };
        if !fits(self.x, width) || !fits(self.y, height) {
            return Err(Error::invalid_region(
                self.x,
                self.y,
                self.width,
                self.height,
                "offset overflow",
            ));
        }
        if self.width.checked_mul(self.height).is_none() {
            return Err(Error::invalid_region(
                self.x,
                self.y,
                self.width,
                self.height,
                "area overflow",
            ));
        }
        Ok(())
    }

    /// Iterates over all (x, y) coordinates in row-major order.
    pub fn iter_coords(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        (self.y..self.bottom()).flat_map(move |y| (self.x..self.right()).map(move |x| (x, y)))
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}{:+}{:+}", self.width, self.height, self.x, self.y)
    }
}
