//! # pixcache-core
//!
//! Core types shared by the pixel cache crates.
//!
//! - [`PixelPacket`], [`IndexPacket`], [`Quantum`] - The stored pixel layout
//! - [`Region`] - Signed rectangle used to address cache windows
//! - [`ClassType`], [`ColorspaceType`] - Image properties that decide whether
//!   the index channel is active
//! - [`Error`], [`Severity`], [`ExceptionInfo`] - Error taxonomy and the
//!   accumulating exception sink
//!
//! ## Crate Structure
//!
//! ```text
//! pixcache-core (this crate)
//!    ^
//!    |
//!    +-- pixcache (cache engine, Image facade)
//!    +-- pixcache-bench
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod pixel;
pub mod rect;

pub use error::*;
pub use pixel::*;
pub use rect::*;

/// Prelude module for convenient imports.
///
/// ```
/// use pixcache_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, ExceptionInfo, Result, Severity};
    pub use crate::pixel::{
        ClassType, ColorspaceType, IndexPacket, PixelPacket, Quantum, QUANTUM_RANGE,
    };
    pub use crate::rect::Region;
}
