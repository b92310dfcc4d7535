//! Distributed pixel storage.
//!
//! A [`RemoteCache`] server holds pixel planes on behalf of a cache. The
//! cache addresses it with regions and byte buffers. A server may move
//! fewer bytes than requested; the cache then asks again for the cells that
//! are still missing, the same way disk I/O loops on partial reads. A
//! request that makes no progress is an error, never silently padded.
//!
//! [`LoopbackCacheServer`] keeps the planes in process memory. It backs the
//! distributed cache path in tests and in single-host deployments.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pixcache_core::{Error, IndexPacket, PixelPacket, Region, Result};
use tracing::{debug, warn};

/// Server-side identifier of one remote cache.
pub type RemoteHandle = u64;

/// A server holding pixel planes for distributed caches.
///
/// Transfers move cells in row-major order within the region; the returned
/// byte count covers a prefix of the region, which may be shorter than the
/// buffer.
pub trait RemoteCache: Send + Sync + fmt::Debug {
    /// Allocates zeroed planes for a `columns` x `rows` cache.
    fn open(&self, columns: usize, rows: usize, index_channel: bool) -> Result<RemoteHandle>;

    /// Reads the pixel packets of `region` into `buf`; returns bytes moved.
    fn read_pixels(&self, handle: RemoteHandle, region: &Region, buf: &mut [u8]) -> Result<usize>;

    /// Writes the pixel packets of `region` from `buf`; returns bytes moved.
    fn write_pixels(&self, handle: RemoteHandle, region: &Region, buf: &[u8]) -> Result<usize>;

    /// Reads index samples of `region` into `buf`; returns bytes moved.
    fn read_indexes(&self, handle: RemoteHandle, region: &Region, buf: &mut [u8]) -> Result<usize>;

    /// Writes index samples of `region` from `buf`; returns bytes moved.
    fn write_indexes(&self, handle: RemoteHandle, region: &Region, buf: &[u8]) -> Result<usize>;

    /// Releases the planes of `handle`.
    fn close(&self, handle: RemoteHandle);
}

struct RemotePlanes {
    columns: usize,
    rows: usize,
    pixels: Vec<u8>,
    indexes: Option<Vec<u8>>,
}

/// In-process [`RemoteCache`] server.
#[derive(Default)]
pub struct LoopbackCacheServer {
    caches: Mutex<HashMap<RemoteHandle, RemotePlanes>>,
    next: AtomicU64,
    max_transfer: Option<usize>,
}

impl LoopbackCacheServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server that moves at most `bytes` per request, the way a
    /// congested link would.
    pub fn with_max_transfer(bytes: usize) -> Self {
        Self {
            max_transfer: Some(bytes),
            ..Self::default()
        }
    }

    /// Number of open remote caches.
    pub fn open_caches(&self) -> usize {
        self.caches.lock().len()
    }

    fn transfer(
        &self,
        handle: RemoteHandle,
        region: &Region,
        unit: usize,
        index_plane: bool,
        mut copy: impl FnMut(&mut [u8], usize, usize),
    ) -> Result<usize> {
        let mut caches = self.caches.lock();
        let planes = caches
            .get_mut(&handle)
            .ok_or_else(|| Error::Remote(format!("unknown cache handle {handle}")))?;
        if !region.is_within(planes.columns, planes.rows) {
            return Err(Error::Remote(format!(
                "region {region} outside {}x{} cache",
                planes.columns, planes.rows
            )));
        }
        let columns = planes.columns;
        let plane = if index_plane {
            planes
                .indexes
                .as_mut()
                .ok_or_else(|| Error::Remote("cache has no index channel".into()))?
        } else {
            &mut planes.pixels
        };

        let row_bytes = region.width * unit;
        let mut budget = self.max_transfer.unwrap_or(usize::MAX);
        let mut moved = 0;
        for row in 0..region.height {
            if budget == 0 {
                break;
            }
            let start = ((region.y as usize + row) * columns + region.x as usize) * unit;
            let len = row_bytes.min(budget);
            copy(&mut plane[start..start + len], moved, len);
            moved += len;
            budget -= len;
        }
        Ok(moved)
    }
}

impl RemoteCache for LoopbackCacheServer {
    fn open(&self, columns: usize, rows: usize, index_channel: bool) -> Result<RemoteHandle> {
        let area = columns
            .checked_mul(rows)
            .ok_or_else(|| Error::Remote("cache geometry overflows".into()))?;
        let handle = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.caches.lock().insert(
            handle,
            RemotePlanes {
                columns,
                rows,
                pixels: vec![0; area * PixelPacket::SIZE],
                indexes: index_channel.then(|| vec![0; area * size_of::<IndexPacket>()]),
            },
        );
        Ok(handle)
    }

    fn read_pixels(&self, handle: RemoteHandle, region: &Region, buf: &mut [u8]) -> Result<usize> {
        self.transfer(handle, region, PixelPacket::SIZE, false, |plane, at, len| {
            buf[at..at + len].copy_from_slice(plane)
        })
    }

    fn write_pixels(&self, handle: RemoteHandle, region: &Region, buf: &[u8]) -> Result<usize> {
        self.transfer(handle, region, PixelPacket::SIZE, false, |plane, at, len| {
            plane.copy_from_slice(&buf[at..at + len])
        })
    }

    fn read_indexes(&self, handle: RemoteHandle, region: &Region, buf: &mut [u8]) -> Result<usize> {
        self.transfer(handle, region, size_of::<IndexPacket>(), true, |plane, at, len| {
            buf[at..at + len].copy_from_slice(plane)
        })
    }

    fn write_indexes(&self, handle: RemoteHandle, region: &Region, buf: &[u8]) -> Result<usize> {
        self.transfer(handle, region, size_of::<IndexPacket>(), true, |plane, at, len| {
            plane.copy_from_slice(&buf[at..at + len])
        })
    }

    fn close(&self, handle: RemoteHandle) {
        self.caches.lock().remove(&handle);
    }
}

impl fmt::Debug for LoopbackCacheServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackCacheServer")
            .field("open_caches", &self.open_caches())
            .field("max_transfer", &self.max_transfer)
            .finish()
    }
}

/// Cache planes held by a remote server.
pub struct RemoteStore {
    server: Arc<dyn RemoteCache>,
    host: String,
    handle: RemoteHandle,
    // one request in flight per cache
    lock: Mutex<()>,
}

impl RemoteStore {
    /// Allocates planes on `server`.
    pub fn open(
        host: String,
        server: Arc<dyn RemoteCache>,
        columns: usize,
        rows: usize,
        index_channel: bool,
    ) -> Result<Self> {
        let handle = server.open(columns, rows, index_channel)?;
        Ok(Self {
            server,
            host,
            handle,
            lock: Mutex::new(()),
        })
    }

    /// Host the planes live on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server-side handle.
    pub fn handle(&self) -> RemoteHandle {
        self.handle
    }

    /// Reads the packets of `region`.
    pub fn read_pixels(&self, region: &Region, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        self.transfer(region, len, "read pixels", |rest, range| {
            self.server.read_pixels(self.handle, rest, &mut buf[range])
        })
    }

    /// Writes the packets of `region`.
    pub fn write_pixels(&self, region: &Region, buf: &[u8]) -> Result<()> {
        self.transfer(region, buf.len(), "write pixels", |rest, range| {
            self.server.write_pixels(self.handle, rest, &buf[range])
        })
    }

    /// Reads the index samples of `region`.
    pub fn read_indexes(&self, region: &Region, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        self.transfer(region, len, "read indexes", |rest, range| {
            self.server.read_indexes(self.handle, rest, &mut buf[range])
        })
    }

    /// Writes the index samples of `region`.
    pub fn write_indexes(&self, region: &Region, buf: &[u8]) -> Result<()> {
        self.transfer(region, buf.len(), "write indexes", |rest, range| {
            self.server.write_indexes(self.handle, rest, &buf[range])
        })
    }

    /// Issues `request` until all `len` bytes of `region` have moved.
    ///
    /// After a short transfer the rest of a partly moved row is requested on
    /// its own, then the remaining full rows as one region.
    fn transfer(
        &self,
        region: &Region,
        len: usize,
        operation: &str,
        mut request: impl FnMut(&Region, Range<usize>) -> Result<usize>,
    ) -> Result<()> {
        let _guard = self.lock.lock();
        let area = region.area();
        if area == 0 {
            return Ok(());
        }
        let unit = len / area;
        let mut done = 0;
        while done < len {
            let cell = done / unit;
            let (row, column) = (cell / region.width, cell % region.width);
            let rest = if column == 0 {
                Region::new(region.x, region.y + row as i64, region.width, region.height - row)
            } else {
                Region::new(region.x + column as i64, region.y + row as i64, region.width - column, 1)
            };
            let wanted = rest.area() * unit;
            let moved = request(&rest, done..done + wanted)?;
            if moved == wanted {
                done += wanted;
                continue;
            }
            // only whole cells count as progress
            let moved = if moved > wanted { 0 } else { moved - moved % unit };
            if moved == 0 {
                return Err(self.short_transfer(done, len, operation));
            }
            debug!(host = %self.host, moved, wanted, "resuming short distributed cache transfer");
            done += moved;
        }
        Ok(())
    }

    fn short_transfer(&self, moved: usize, expected: usize, operation: &str) -> Error {
        warn!(host = %self.host, moved, expected, "distributed cache transfer stalled");
        Error::Remote(format!(
            "{operation} on {}: moved {moved} of {expected} bytes",
            self.host
        ))
    }
}

impl Drop for RemoteStore {
    fn drop(&mut self) {
        self.server.close(self.handle);
    }
}

impl fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore")
            .field("host", &self.host)
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_roundtrip_region() {
        let server = Arc::new(LoopbackCacheServer::new());
        let store = RemoteStore::open("loopback".into(), server.clone(), 4, 4, true).unwrap();
        assert_eq!(server.open_caches(), 1);

        let region = Region::new(1, 1, 2, 2);
        let px = [PixelPacket::new(1, 2, 3, 4); 4];
        store.write_pixels(&region, bytemuck::cast_slice(&px)).unwrap();

        let mut row = [PixelPacket::default(); 4];
        store
            .read_pixels(&Region::row(1, 4), bytemuck::cast_slice_mut(&mut row))
            .unwrap();
        assert_eq!(row[0], PixelPacket::default());
        assert_eq!(row[1], px[0]);
        assert_eq!(row[2], px[0]);
        assert_eq!(row[3], PixelPacket::default());

        drop(store);
        assert_eq!(server.open_caches(), 0);
    }

    #[test]
    fn test_short_transfers_are_resumed() {
        let server = Arc::new(LoopbackCacheServer::with_max_transfer(8));
        let store = RemoteStore::open("slow".into(), server, 4, 3, true).unwrap();
        let region = Region::new(1, 0, 3, 3);
        let px: Vec<PixelPacket> = (0..9).map(|i| PixelPacket::gray(i * 10)).collect();
        store.write_pixels(&region, bytemuck::cast_slice(&px)).unwrap();
        let indexes: Vec<IndexPacket> = (0..9).collect();
        store.write_indexes(&region, bytemuck::cast_slice(&indexes)).unwrap();

        let mut back = vec![PixelPacket::default(); 9];
        store
            .read_pixels(&region, bytemuck::cast_slice_mut(&mut back))
            .unwrap();
        assert_eq!(back, px);
        let mut row = [0 as IndexPacket; 4];
        store
            .read_indexes(&Region::row(2, 4), bytemuck::cast_slice_mut(&mut row))
            .unwrap();
        assert_eq!(row, [0, 6, 7, 8]);
    }

    #[test]
    fn test_stalled_transfer_is_error() {
        let server = Arc::new(LoopbackCacheServer::with_max_transfer(0));
        let store = RemoteStore::open("stalled".into(), server, 4, 1, false).unwrap();
        let mut buf = [0u8; 32];
        let err = store.read_pixels(&Region::row(0, 4), &mut buf).unwrap_err();
        assert!(matches!(err, Error::Remote(_)));
        assert!(err.to_string().contains("moved 0 of 32"));
    }

    #[test]
    fn test_indexes_require_channel() {
        let server = Arc::new(LoopbackCacheServer::new());
        let store = RemoteStore::open("loopback".into(), server, 2, 2, false).unwrap();
        let mut buf = [0u8; 4];
        assert!(store.read_indexes(&Region::row(0, 2), &mut buf).is_err());
    }

    #[test]
    fn test_out_of_bounds_region_rejected() {
        let server = Arc::new(LoopbackCacheServer::new());
        let store = RemoteStore::open("loopback".into(), server, 2, 2, false).unwrap();
        let mut buf = [0u8; 16];
        assert!(store.read_pixels(&Region::new(1, 0, 2, 1), &mut buf).is_err());
    }
}
