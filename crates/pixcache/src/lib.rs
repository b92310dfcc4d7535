//! # pixcache
//!
//! Pixel cache engine: storage and windowed access for raster images too
//! large, too many, or too shared to keep as plain buffers.
//!
//! Each image owns a handle to a cache. The cache picks a backing store
//! when it is opened:
//!
//! - **Memory** - heap block (or anonymous map) within the memory budget
//! - **Distributed** - a registered [`RemoteCache`] server
//! - **Map** - file-backed memory map within the map budget
//! - **Disk** - positioned reads and writes on a cache file
//! - **Ping** - geometry only, no pixels
//!
//! # Architecture
//!
//! - [`CacheContext`] - policy, resource ledger and remote registry
//! - [`CacheInfo`] - one cache: geometry, store, per-thread slots
//! - [`Image`] / [`PixelCache`] - reference-counted handle with
//!   copy-on-write
//! - [`VirtualPixels`] / [`AuthenticPixels`] - read and write windows
//! - [`CacheView`] - per-loop slots for rayon workers
//! - [`PixelCacheMethods`] - overridable single-pixel accessors
//!
//! # Quick Start
//!
//! ```rust
//! use pixcache::{CacheConfig, CacheContext, Image, PixelPacket, VirtualPixelMethod};
//!
//! let ctx = CacheContext::init(CacheConfig::default());
//! let mut image = Image::new(&ctx, 4, 4).unwrap();
//!
//! let mut window = image.queue_authentic_pixels(0, 0, 4, 4).unwrap();
//! for (i, px) in window.pixels_mut().iter_mut().enumerate() {
//!     *px = PixelPacket::opaque(i as u16, 0, 0);
//! }
//! window.sync().unwrap();
//!
//! let corner = image
//!     .get_one_virtual_pixel_with(VirtualPixelMethod::Tile, -1, -1)
//!     .unwrap();
//! assert_eq!(corner.red, 15);
//! ```
//!
//! # Configuration
//!
//! Limits come from [`CacheConfig`]: defaults sized from system memory,
//! overridden by `PIXCACHE_*` environment variables or a YAML policy.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod context;
pub mod image;
pub mod mask;
pub mod methods;
pub mod nexus;
pub mod resource;
pub mod storage;
pub mod view;
pub mod virtual_pixel;
pub mod window;

pub use cache::{CacheGeometry, CacheInfo};
pub use config::{parse_size, CacheConfig};
pub use context::CacheContext;
pub use image::{Image, PixelCache, PERSIST_ALIGNMENT};
pub use methods::{DefaultCacheMethods, PixelCacheMethods};
pub use nexus::Nexus;
pub use resource::{ResourceAccounting, ResourceGrant, ResourceLedger, ResourceType};
pub use storage::{CacheType, LoopbackCacheServer, MapMode, RemoteCache, RemoteHandle};
pub use view::CacheView;
pub use virtual_pixel::VirtualPixelMethod;
pub use window::{AuthenticPixels, VirtualPixels};

pub use pixcache_core::{
    ClassType, ColorspaceType, Error, Exception, ExceptionInfo, IndexPacket, PixelPacket, Quantum,
    Region, Result, Severity, QUANTUM_RANGE,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        CacheConfig, CacheContext, CacheType, CacheView, Image, PixelCache, VirtualPixelMethod,
    };
    pub use pixcache_core::prelude::*;
}
