//! Backing stores for cached pixels.
//!
//! A pixel cache keeps its packets in exactly one backing store:
//!
//! | Kind | Storage | Direct access |
//! |------|---------|---------------|
//! | [`Memory`](BackingStore::Memory) | aligned heap block | yes |
//! | [`Map`](BackingStore::Map) | anonymous or file-backed memory map | yes |
//! | [`Disk`](BackingStore::Disk) | positioned reads/writes on a file | no |
//! | [`Distributed`](BackingStore::Distributed) | remote cache server | no |
//! | [`Ping`](BackingStore::Ping) | geometry only, no pixels | - |
//!
//! Memory-resident kinds expose a base pointer so windows can alias the
//! store directly; the others always stage through a nexus buffer.

mod disk;
mod map;
mod memory;
mod remote;

use std::fmt;
use std::path::Path;
use std::ptr::NonNull;
use std::str::FromStr;

use pixcache_core::Error;
use serde::{Deserialize, Serialize};

pub use disk::{CacheFile, DiskStore};
pub use map::MapStore;
pub use memory::{AlignedBuffer, MemoryStore};
pub use remote::{LoopbackCacheServer, RemoteCache, RemoteHandle, RemoteStore};

/// Backing store kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// No storage yet.
    #[default]
    Undefined,
    /// Heap block.
    Memory,
    /// Memory map.
    Map,
    /// Disk file with positioned I/O.
    Disk,
    /// Remote cache server.
    Distributed,
    /// Geometry only.
    Ping,
}

impl CacheType {
    /// Lowercase name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Memory => "memory",
            Self::Map => "map",
            Self::Disk => "disk",
            Self::Distributed => "distributed",
            Self::Ping => "ping",
        }
    }

    /// Returns `true` if caches of this kind hold pixel data.
    pub const fn has_pixels(&self) -> bool {
        !matches!(self, Self::Undefined | Self::Ping)
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CacheType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "undefined" => Ok(Self::Undefined),
            "memory" => Ok(Self::Memory),
            "map" => Ok(Self::Map),
            "disk" => Ok(Self::Disk),
            "distributed" => Ok(Self::Distributed),
            "ping" => Ok(Self::Ping),
            other => Err(Error::Policy(format!("unknown cache type `{other}`"))),
        }
    }
}

/// How a cache was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MapMode {
    /// Pixels are only read; the first write clones the cache.
    Read,
    /// Pixels are only written.
    Write,
    /// Pixels are read and written.
    #[default]
    ReadWrite,
    /// Written into a named file that outlives the cache.
    Persist,
}

impl MapMode {
    /// Returns `true` if the mode allows writes without cloning.
    pub const fn is_writable(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// Storage holding a cache's pixel and index planes.
#[derive(Debug, Default)]
pub enum BackingStore {
    /// Not opened.
    #[default]
    Undefined,
    /// Heap block.
    Memory(MemoryStore),
    /// Memory map.
    Map(MapStore),
    /// Positioned file I/O.
    Disk(DiskStore),
    /// Remote server.
    Distributed(RemoteStore),
    /// Geometry only.
    Ping,
}

impl BackingStore {
    /// Kind of this store.
    pub fn kind(&self) -> CacheType {
        match self {
            Self::Undefined => CacheType::Undefined,
            Self::Memory(_) => CacheType::Memory,
            Self::Map(_) => CacheType::Map,
            Self::Disk(_) => CacheType::Disk,
            Self::Distributed(_) => CacheType::Distributed,
            Self::Ping => CacheType::Ping,
        }
    }

    /// Start of the pixel plane for memory-resident stores.
    pub fn base(&self) -> Option<NonNull<u8>> {
        match self {
            Self::Memory(m) => Some(m.base()),
            Self::Map(m) => Some(m.base()),
            _ => None,
        }
    }

    /// Returns `true` if pixels can be addressed in place.
    pub fn is_memory_resident(&self) -> bool {
        self.base().is_some()
    }

    /// Cache file, for disk and file-backed map stores.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Map(m) => m.file().map(CacheFile::path),
            Self::Disk(d) => Some(d.file().path()),
            _ => None,
        }
    }

    /// Server host, for distributed stores.
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Distributed(r) => Some(r.host()),
            _ => None,
        }
    }
}
