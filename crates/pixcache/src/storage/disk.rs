//! File-backed pixel storage with positioned I/O.
//!
//! The pixel plane starts at the store's byte offset inside the file and the
//! index plane follows it. Temporary cache files are deleted when the store
//! is dropped; named files (persisted or attached caches) are left in place.
//!
//! The descriptor is opened lazily and kept open while the open-file budget
//! allows it. When the budget is exhausted the descriptor is closed again
//! after every operation.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use pixcache_core::{Error, Result};
use tempfile::TempPath;
use tracing::trace;

use crate::resource::{ResourceAccounting, ResourceGrant, ResourceType};

/// A cache file on disk.
pub struct CacheFile {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl CacheFile {
    /// Creates a uniquely named temporary cache file in `dir`.
    pub fn temporary(dir: &Path) -> Result<(Self, File)> {
        let named = tempfile::Builder::new()
            .prefix("pixcache-")
            .suffix(".cache")
            .tempfile_in(dir)
            .map_err(|e| Error::io("create", dir, e))?;
        let (file, temp) = named.into_parts();
        let path = temp.to_path_buf();
        Ok((
            Self {
                path,
                temp: Some(temp),
            },
            file,
        ))
    }

    /// Opens `path` for reading and writing, creating it if missing.
    /// Existing content is kept so several caches can share one file.
    pub fn create(path: &Path) -> Result<(Self, File)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io("create", path, e))?;
        Ok((Self::named(path), file))
    }

    /// Opens an existing cache file.
    pub fn open(path: &Path) -> Result<(Self, File)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io("open", path, e))?;
        Ok((Self::named(path), file))
    }

    fn named(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            temp: None,
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the file is deleted on drop.
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Grows the file (sparsely) to at least `end` bytes.
    pub fn reserve(&self, file: &File, end: u64) -> Result<()> {
        let len = file
            .metadata()
            .map_err(|e| Error::io("stat", &self.path, e))?
            .len();
        if len < end {
            file.set_len(end)
                .map_err(|e| Error::io("extend", &self.path, e))?;
        }
        Ok(())
    }

    /// Fails unless the file holds at least `end` bytes.
    pub fn require(&self, file: &File, end: u64) -> Result<()> {
        let len = file
            .metadata()
            .map_err(|e| Error::io("stat", &self.path, e))?
            .len();
        if len < end {
            return Err(Error::cache(format!(
                "cache file `{}` is {len} bytes, expected at least {end}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn reopen(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::io("open", &self.path, e))
    }
}

impl fmt::Debug for CacheFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheFile")
            .field("path", &self.path)
            .field("temporary", &self.is_temporary())
            .finish()
    }
}

struct OpenHandle {
    file: File,
    grant: Option<ResourceGrant>,
}

/// Pixel planes stored in a file, accessed with positioned reads and writes.
pub struct DiskStore {
    file: CacheFile,
    handle: Mutex<Option<OpenHandle>>,
    resources: Arc<dyn ResourceAccounting>,
    offset: u64,
    length: u64,
    _grant: Option<ResourceGrant>,
}

impl DiskStore {
    /// Wraps an opened cache file whose planes occupy
    /// `offset..offset + length`.
    pub fn new(
        file: CacheFile,
        handle: File,
        offset: u64,
        length: u64,
        resources: Arc<dyn ResourceAccounting>,
        grant: Option<ResourceGrant>,
    ) -> Self {
        let file_grant = ResourceGrant::acquire(&resources, ResourceType::File, 1);
        let handle = file_grant.is_some().then(|| OpenHandle {
            file: handle,
            grant: file_grant,
        });
        Self {
            file,
            handle: Mutex::new(handle),
            resources,
            offset,
            length,
            _grant: grant,
        }
    }

    /// The cache file.
    pub fn file(&self) -> &CacheFile {
        &self.file
    }

    /// Byte offset of the pixel plane in the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes occupied by both planes.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Returns `true` if the store holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Fills `buf` from store position `pos`.
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        trace!(pos, len = buf.len(), "disk cache read");
        self.with_file("read", |file| read_exact_at(file, buf, self.offset + pos))
    }

    /// Writes `buf` at store position `pos`.
    pub fn write_at(&self, pos: u64, buf: &[u8]) -> Result<()> {
        trace!(pos, len = buf.len(), "disk cache write");
        self.with_file("write", |file| write_all_at(file, buf, self.offset + pos))
    }

    /// Copies `length` bytes of `source`'s planes over this store's planes.
    pub fn copy_from(&self, source: &DiskStore, length: u64) -> Result<u64> {
        use std::io::{Read, Seek, SeekFrom};

        let src = source.file.reopen()?;
        self.with_file("copy", |dst| {
            let mut reader: &File = &src;
            let mut writer: &File = dst;
            reader.seek(SeekFrom::Start(source.offset))?;
            writer.seek(SeekFrom::Start(self.offset))?;
            let copied = io::copy(&mut reader.take(length), &mut writer)?;
            if copied != length {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("copied {copied} of {length} bytes"),
                ));
            }
            Ok(copied)
        })
    }

    fn with_file<R>(&self, operation: &'static str, f: impl FnOnce(&File) -> io::Result<R>) -> Result<R> {
        let mut slot = self.handle.lock();
        let handle = match slot.as_mut() {
            Some(handle) => handle,
            None => slot.insert(OpenHandle {
                file: self.file.reopen()?,
                grant: ResourceGrant::acquire(&self.resources, ResourceType::File, 1),
            }),
        };
        let result = f(&handle.file);
        let keep_open = handle.grant.is_some();
        if !keep_open {
            *slot = None;
        }
        result.map_err(|e| Error::io(operation, &self.file.path, e))
    }
}

impl fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskStore")
            .field("file", &self.file)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, pos)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], pos: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, pos)
}

// The handle mutex is held for the whole call, so seeking is race free.
#[cfg(not(unix))]
fn read_exact_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = file;
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(buf)
}

#[cfg(not(unix))]
fn write_all_at(file: &File, buf: &[u8], pos: u64) -> io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    let mut file = file;
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(buf)
}
