//! Error types for pixel cache operations.
//!
//! Every failure the cache can report maps onto one [`Error`] variant. The
//! variants follow the cache's error taxonomy:
//!
//! - **Limit errors**: [`SizeLimit`](Error::SizeLimit),
//!   [`TimeLimitExceeded`](Error::TimeLimitExceeded) - fail before allocating
//! - **Resource exhaustion**: [`ResourcesExhausted`](Error::ResourcesExhausted)
//! - **I/O errors**: [`Io`](Error::Io), [`Remote`](Error::Remote)
//! - **Geometry errors**: [`InvalidGeometry`](Error::InvalidGeometry),
//!   [`InvalidRegion`](Error::InvalidRegion)
//! - **State errors**: [`NoPixelCache`](Error::NoPixelCache),
//!   [`ReadOnlyCache`](Error::ReadOnlyCache), [`ContextInactive`](Error::ContextInactive)
//!
//! Each error also carries a [`Severity`] and a short domain tag so it can be
//! recorded in an [`ExceptionInfo`] sink.
//!
//! # Usage
//!
//! ```rust
//! use pixcache_core::{Error, ExceptionInfo, Severity};
//!
//! let sink = ExceptionInfo::new();
//! let err = Error::invalid_region(0, 0, 0, 1, "zero width");
//! sink.throw(&err, "queue authentic pixels");
//! assert_eq!(sink.severity(), Some(Severity::Error));
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the pixel cache.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested geometry exceeds the configured width/height ceiling.
    #[error("width or height exceeds limit: {columns}x{rows} (limit {width_limit}x{height_limit})")]
    SizeLimit {
        /// Requested columns
        columns: usize,
        /// Requested rows
        rows: usize,
        /// Configured width ceiling
        width_limit: u64,
        /// Configured height ceiling
        height_limit: u64,
    },

    /// Geometry is zero-sized or its byte extent overflows.
    #[error("invalid pixel cache geometry {columns}x{rows}: {reason}")]
    InvalidGeometry {
        /// Requested columns
        columns: usize,
        /// Requested rows
        rows: usize,
        /// Why the geometry was rejected
        reason: &'static str,
    },

    /// No backing store strategy could be satisfied.
    #[error("cache resources exhausted: unable to allocate {length} bytes for {columns}x{rows} pixel cache")]
    ResourcesExhausted {
        /// Bytes requested
        length: u64,
        /// Image columns
        columns: usize,
        /// Image rows
        rows: usize,
    },

    /// File operation failed.
    #[error("unable to {operation} `{}`: {source}", path.display())]
    Io {
        /// What was being attempted ("open", "read", "extend"...)
        operation: &'static str,
        /// File involved
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A pixel window is zero-sized or its coordinates overflow.
    #[error("invalid pixel region {width}x{height}{x:+}{y:+}: {reason}")]
    InvalidRegion {
        /// Region X origin
        x: i64,
        /// Region Y origin
        y: i64,
        /// Region width
        width: usize,
        /// Region height
        height: usize,
        /// Why the region was rejected
        reason: &'static str,
    },

    /// The image has no usable pixel storage (undefined or ping cache).
    #[error("pixel cache is not open: {0}")]
    NoPixelCache(String),

    /// A write reached a cache opened read-only.
    #[error("pixel cache is read-only")]
    ReadOnlyCache,

    /// The image exhausted its processing time allotment.
    #[error("time limit exceeded: {elapsed:?} > {limit:?}")]
    TimeLimitExceeded {
        /// Time spent since the epoch started
        elapsed: Duration,
        /// Configured limit
        limit: Duration,
    },

    /// The cache context was shut down.
    #[error("pixel cache context is inactive")]
    ContextInactive,

    /// The distributed cache server rejected or failed a request.
    #[error("distributed pixel cache: {0}")]
    Remote(String),

    /// Policy document or environment override could not be parsed.
    #[error("invalid cache policy: {0}")]
    Policy(String),

    /// Short transfer or other cache inconsistency.
    #[error("{0}")]
    Cache(String),
}

impl Error {
    /// Creates an [`Error::Io`] error.
    #[inline]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Creates an [`Error::InvalidRegion`] error.
    #[inline]
    pub fn invalid_region(x: i64, y: i64, width: usize, height: usize, reason: &'static str) -> Self {
        Self::InvalidRegion {
            x,
            y,
            width,
            height,
            reason,
        }
    }

    /// Creates an [`Error::InvalidGeometry`] error.
    #[inline]
    pub fn invalid_geometry(columns: usize, rows: usize, reason: &'static str) -> Self {
        Self::InvalidGeometry {
            columns,
            rows,
            reason,
        }
    }

    /// Creates an [`Error::Cache`] error.
    #[inline]
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Severity used when the error is recorded in an [`ExceptionInfo`].
    pub fn severity(&self) -> Severity {
        match self {
            Self::SizeLimit { .. } | Self::TimeLimitExceeded { .. } => Severity::Error,
            Self::ResourcesExhausted { .. } => Severity::Error,
            Self::Io { .. } | Self::Remote(_) | Self::Cache(_) => Severity::Error,
            Self::InvalidGeometry { .. } | Self::InvalidRegion { .. } => Severity::Error,
            Self::NoPixelCache(_) | Self::ReadOnlyCache => Severity::Error,
            Self::Policy(_) => Severity::Warning,
            Self::ContextInactive => Severity::Fatal,
        }
    }

    /// Short domain tag naming the failing subsystem.
    pub fn domain(&self) -> &'static str {
        match self {
            Self::SizeLimit { .. } | Self::TimeLimitExceeded { .. } => "resource-limit",
            Self::ResourcesExhausted { .. } => "cache-resources",
            Self::Io { .. } => "file-open",
            Self::Remote(_) => "distributed-cache",
            Self::InvalidGeometry { .. } | Self::InvalidRegion { .. } => "corrupt-image",
            Self::Policy(_) => "policy",
            Self::NoPixelCache(_)
            | Self::ReadOnlyCache
            | Self::ContextInactive
            | Self::Cache(_) => "cache",
        }
    }

    /// Returns `true` for limit and exhaustion errors the caller may retry
    /// after freeing resources or shrinking the request.
    #[inline]
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            Self::SizeLimit { .. } | Self::ResourcesExhausted { .. } | Self::TimeLimitExceeded { .. }
        )
    }

    /// Returns `true` if this is a file error.
    #[inline]
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// How serious a recorded exception is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// The operation completed with degraded results.
    Warning,
    /// The operation failed; the cache remains usable.
    Error,
    /// The cache or its context is unusable.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

/// One structured entry in an [`ExceptionInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    /// Severity of the failure
    pub severity: Severity,
    /// Subsystem tag
    pub domain: &'static str,
    /// Rendered error message
    pub message: String,
    /// Caller-supplied context, usually the failing operation or file
    pub context: String,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {} `{}`", self.severity, self.domain, self.message, self.context)
    }
}

/// Accumulating exception sink.
///
/// Operations return `Result`; callers that surface errors later (for example
/// at the end of a batch) record them here instead. Recording takes `&self`
/// so a shared image can collect failures from several threads.
#[derive(Debug, Default)]
pub struct ExceptionInfo {
    entries: Mutex<Vec<Exception>>,
}

impl ExceptionInfo {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `err` with the given context.
    pub fn throw(&self, err: &Error, context: impl Into<String>) {
        self.entries.lock().push(Exception {
            severity: err.severity(),
            domain: err.domain(),
            message: err.to_string(),
            context: context.into(),
        });
    }

    /// Highest severity recorded so far.
    pub fn severity(&self) -> Option<Severity> {
        self.entries.lock().iter().map(|e| e.severity).max()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of recorded exceptions.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Snapshot of the recorded exceptions.
    pub fn exceptions(&self) -> Vec<Exception> {
        self.entries.lock().clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Exception> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Forgets all recorded exceptions.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
