//! Stored pixel layout.
//!
//! The cache stores every pixel as a [`PixelPacket`]: four 16-bit
//! [`Quantum`] channels in red, green, blue, alpha order. When the image is
//! palette based ([`ClassType::Pseudo`]) or has a fourth colorant
//! ([`ColorspaceType::Cmyk`]), a parallel plane of [`IndexPacket`] values is
//! stored after all pixel packets.
//!
//! # Layout
//!
//! ```text
//! offset 0                       columns*rows*8            +columns*rows*2
//! +------------------------------+-------------------------+
//! | PixelPacket[columns * rows]  | IndexPacket[columns*rows]|
//! +------------------------------+-------------------------+
//! ```
//!
//! Both types are [`bytemuck::Pod`], so backing stores move them as raw
//! bytes without per-pixel conversion.

use bytemuck::{Pod, Zeroable};

/// One channel sample.
pub type Quantum = u16;

/// Index channel sample (palette index or black channel).
pub type IndexPacket = Quantum;

/// Largest quantum value.
pub const QUANTUM_RANGE: Quantum = Quantum::MAX;

/// `1 / QUANTUM_RANGE`, for normalizing samples to `[0, 1]`.
pub const QUANTUM_SCALE: f64 = 1.0 / QUANTUM_RANGE as f64;

/// Rec. 601 luma weights used for pixel intensity.
pub const INTENSITY_WEIGHTS: [f64; 3] = [0.298839, 0.586811, 0.114350];

/// Converts a floating point sample to a quantum with rounding and clamping.
#[inline]
pub fn clamp_to_quantum(value: f64) -> Quantum {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= QUANTUM_RANGE as f64 {
        QUANTUM_RANGE
    } else {
        (value + 0.5) as Quantum
    }
}

/// A stored pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct PixelPacket {
    /// Red channel
    pub red: Quantum,
    /// Green channel
    pub green: Quantum,
    /// Blue channel
    pub blue: Quantum,
    /// Alpha channel (`QUANTUM_RANGE` is opaque)
    pub alpha: Quantum,
}

impl PixelPacket {
    /// Opaque black.
    pub const BLACK: Self = Self::new(0, 0, 0, QUANTUM_RANGE);
    /// Opaque white.
    pub const WHITE: Self = Self::new(QUANTUM_RANGE, QUANTUM_RANGE, QUANTUM_RANGE, QUANTUM_RANGE);
    /// Opaque mid gray.
    pub const GRAY: Self = Self::new(QUANTUM_RANGE / 2, QUANTUM_RANGE / 2, QUANTUM_RANGE / 2, QUANTUM_RANGE);
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);

    /// Bytes occupied by one packet in a backing store.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates a pixel from its four channels.
    #[inline]
    pub const fn new(red: Quantum, green: Quantum, blue: Quantum, alpha: Quantum) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Creates an opaque pixel.
    #[inline]
    pub const fn opaque(red: Quantum, green: Quantum, blue: Quantum) -> Self {
        Self::new(red, green, blue, QUANTUM_RANGE)
    }

    /// Creates an opaque gray pixel.
    #[inline]
    pub const fn gray(value: Quantum) -> Self {
        Self::new(value, value, value, QUANTUM_RANGE)
    }

    /// Luma of the color channels, in quantum units.
    #[inline]
    pub fn intensity(&self) -> f64 {
        INTENSITY_WEIGHTS[0] * self.red as f64
            + INTENSITY_WEIGHTS[1] * self.green as f64
            + INTENSITY_WEIGHTS[2] * self.blue as f64
    }

    /// Channels as `[r, g, b, a]`.
    #[inline]
    pub const fn to_array(self) -> [Quantum; 4] {
        [self.red, self.green, self.blue, self.alpha]
    }

    /// Builds a pixel from `[r, g, b, a]`.
    #[inline]
    pub const fn from_array(arr: [Quantum; 4]) -> Self {
        Self::new(arr[0], arr[1], arr[2], arr[3])
    }
}

/// Bytes occupied by one index sample in a backing store.
pub const INDEX_SIZE: usize = std::mem::size_of::<IndexPacket>();

/// Storage class of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClassType {
    /// Not yet decided.
    Undefined,
    /// Pixels carry their own color.
    #[default]
    Direct,
    /// Pixels index a colormap; the index channel is active.
    Pseudo,
}

/// Colorspace of the stored samples.
///
/// Only the properties the cache needs are modelled: the channel count and
/// whether the colorspace carries a fourth colorant in the index channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorspaceType {
    /// Not yet decided.
    Undefined,
    /// Linear RGB.
    Rgb,
    /// sRGB encoded.
    #[default]
    Srgb,
    /// Single gray channel.
    Gray,
    /// Cyan, magenta, yellow.
    Cmy,
    /// Cyan, magenta, yellow, black (black lives in the index channel).
    Cmyk,
    /// CIE L*a*b*.
    Lab,
    /// YCbCr.
    YCbCr,
}

impl ColorspaceType {
    /// Number of color channels, excluding alpha.
    pub const fn channels(&self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Cmyk => 4,
            _ => 3,
        }
    }

    /// Returns `true` when a channel is stored in the index plane.
    pub const fn uses_index_channel(&self) -> bool {
        matches!(self, Self::Cmyk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_is_eight_bytes() {
        assert_eq!(PixelPacket::SIZE, 8);
        assert_eq!(INDEX_SIZE, 2);
        let px = [PixelPacket::new(1, 2, 3, 4)];
        let bytes: &[u8] = bytemuck::cast_slice(&px);
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn test_intensity() {
        assert_eq!(PixelPacket::BLACK.intensity(), 0.0);
        let white = PixelPacket::WHITE.intensity();
        assert!((white - QUANTUM_RANGE as f64).abs() < 1.0);
        assert!(PixelPacket::GRAY.intensity() < QUANTUM_RANGE as f64 / 2.0 + 1.0);
    }

    #[test]
    fn test_clamp_to_quantum() {
        assert_eq!(clamp_to_quantum(-5.0), 0);
        assert_eq!(clamp_to_quantum(f64::NAN), 0);
        assert_eq!(clamp_to_quantum(1e9), QUANTUM_RANGE);
        assert_eq!(clamp_to_quantum(41.6), 42);
    }

    #[test]
    fn test_colorspace_channels() {
        assert_eq!(ColorspaceType::Gray.channels(), 1);
        assert_eq!(ColorspaceType::Cmyk.channels(), 4);
        assert_eq!(ColorspaceType::Srgb.channels(), 3);
        assert!(ColorspaceType::Cmyk.uses_index_channel());
        assert!(!ColorspaceType::Rgb.uses_index_channel());
    }
}
