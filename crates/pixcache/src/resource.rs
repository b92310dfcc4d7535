//! Resource accounting for cache allocations.
//!
//! Every backing store requests a grant before allocating and gives it back
//! on teardown. Denied grants make the store selector fall through to the
//! next strategy instead of failing outright.
//!
//! ## Accounting Rules
//!
//! | Resource | Accumulates | Unit |
//! |----------|-------------|------|
//! | Memory, Map, Disk | yes | bytes |
//! | File | yes | descriptors |
//! | Area | no (per request) | pixels |
//! | Width, Height | no (per request) | pixels |
//! | Thread, Time, Throttle | no | count / seconds / ms |
//!
//! Accumulating resources are tracked with atomics; a request succeeds only
//! if `usage + amount <= limit` at the moment of the compare-and-swap.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::CacheConfig;

/// Kinds of resources the cache draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// Pixels held by one memory-resident cache.
    Area,
    /// Bytes of disk cache files.
    Disk,
    /// Open cache file descriptors.
    File,
    /// Image height ceiling.
    Height,
    /// Bytes of memory maps.
    Map,
    /// Bytes of heap memory.
    Memory,
    /// Worker threads.
    Thread,
    /// Throttle delay in milliseconds.
    Throttle,
    /// Processing time in seconds.
    Time,
    /// Image width ceiling.
    Width,
}

impl ResourceType {
    /// All resource kinds, in ledger order.
    pub const ALL: [ResourceType; 10] = [
        Self::Area,
        Self::Disk,
        Self::File,
        Self::Height,
        Self::Map,
        Self::Memory,
        Self::Thread,
        Self::Throttle,
        Self::Time,
        Self::Width,
    ];

    /// Returns `true` if grants of this kind add up until released.
    pub const fn accumulates(&self) -> bool {
        matches!(self, Self::Disk | Self::File | Self::Map | Self::Memory)
    }

    /// Lowercase name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Disk => "disk",
            Self::File => "file",
            Self::Height => "height",
            Self::Map => "map",
            Self::Memory => "memory",
            Self::Thread => "thread",
            Self::Throttle => "throttle",
            Self::Time => "time",
            Self::Width => "width",
        }
    }

    const fn slot(&self) -> usize {
        match self {
            Self::Area => 0,
            Self::Disk => 1,
            Self::File => 2,
            Self::Height => 3,
            Self::Map => 4,
            Self::Memory => 5,
            Self::Thread => 6,
            Self::Throttle => 7,
            Self::Time => 8,
            Self::Width => 9,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Quota tracker consulted before every cache allocation.
pub trait ResourceAccounting: Send + Sync + fmt::Debug {
    /// Requests `amount` of `kind`; returns `false` when the limit would be
    /// exceeded.
    fn acquire(&self, kind: ResourceType, amount: u64) -> bool;

    /// Returns a previously granted `amount` of `kind`.
    fn release(&self, kind: ResourceType, amount: u64);

    /// Current limit for `kind`.
    fn limit(&self, kind: ResourceType) -> u64;

    /// Amount of `kind` currently granted.
    fn usage(&self, kind: ResourceType) -> u64;
}

/// Lock-free [`ResourceAccounting`] implementation.
#[derive(Debug)]
pub struct ResourceLedger {
    limits: [AtomicU64; 10],
    usage: [AtomicU64; 10],
}

impl ResourceLedger {
    /// Creates a ledger with every limit unbounded.
    pub fn unlimited() -> Self {
        Self {
            limits: std::array::from_fn(|_| AtomicU64::new(u64::MAX)),
            usage: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Creates a ledger seeded from a policy.
    pub fn from_config(config: &CacheConfig) -> Self {
        let ledger = Self::unlimited();
        ledger.set_limit(ResourceType::Area, config.area_limit);
        ledger.set_limit(ResourceType::Disk, config.disk_limit);
        ledger.set_limit(ResourceType::File, config.file_limit);
        ledger.set_limit(ResourceType::Height, config.height_limit);
        ledger.set_limit(ResourceType::Map, config.map_limit);
        ledger.set_limit(ResourceType::Memory, config.memory_limit);
        ledger.set_limit(ResourceType::Thread, config.thread_limit as u64);
        ledger.set_limit(ResourceType::Throttle, config.throttle.unwrap_or(0));
        ledger.set_limit(ResourceType::Time, config.time_limit.unwrap_or(u64::MAX));
        ledger.set_limit(ResourceType::Width, config.width_limit);
        ledger
    }

    /// Changes the limit for `kind`. Existing grants are kept even if they
    /// now exceed it.
    pub fn set_limit(&self, kind: ResourceType, limit: u64) {
        self.limits[kind.slot()].store(limit, Ordering::Relaxed);
    }
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl ResourceAccounting for ResourceLedger {
    fn acquire(&self, kind: ResourceType, amount: u64) -> bool {
        let limit = self.limit(kind);
        if !kind.accumulates() {
            return amount <= limit;
        }
        let usage = &self.usage[kind.slot()];
        usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(amount).filter(|&next| next <= limit)
            })
            .is_ok()
    }

    fn release(&self, kind: ResourceType, amount: u64) {
        if !kind.accumulates() {
            return;
        }
        let usage = &self.usage[kind.slot()];
        // saturate so a double release cannot wrap the counter
        let _ = usage.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_sub(amount))
        });
    }

    fn limit(&self, kind: ResourceType) -> u64 {
        self.limits[kind.slot()].load(Ordering::Relaxed)
    }

    fn usage(&self, kind: ResourceType) -> u64 {
        self.usage[kind.slot()].load(Ordering::Acquire)
    }
}

/// A granted amount of one resource, returned on drop.
pub struct ResourceGrant {
    ledger: Arc<dyn ResourceAccounting>,
    kind: ResourceType,
    amount: u64,
}

impl ResourceGrant {
    /// Requests `amount` of `kind` from `ledger`.
    pub fn acquire(
        ledger: &Arc<dyn ResourceAccounting>,
        kind: ResourceType,
        amount: u64,
    ) -> Option<Self> {
        ledger.acquire(kind, amount).then(|| Self {
            ledger: Arc::clone(ledger),
            kind,
            amount,
        })
    }

    /// Resource kind of this grant.
    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    /// Granted amount.
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Drop for ResourceGrant {
    fn drop(&mut self) {
        self.ledger.release(self.kind, self.amount);
    }
}

impl fmt::Debug for ResourceGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceGrant({} {})", self.kind, self.amount)
    }
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GiB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(kind: ResourceType, limit: u64) -> Arc<dyn ResourceAccounting> {
        let ledger = ResourceLedger::unlimited();
        ledger.set_limit(kind, limit);
        Arc::new(ledger)
    }

    #[test]
    fn test_accumulating_limit() {
        let ledger = ledger(ResourceType::Memory, 100);
        assert!(ledger.acquire(ResourceType::Memory, 60));
        assert!(!ledger.acquire(ResourceType::Memory, 60));
        assert!(ledger.acquire(ResourceType::Memory, 40));
        assert_eq!(ledger.usage(ResourceType::Memory), 100);
        ledger.release(ResourceType::Memory, 100);
        assert_eq!(ledger.usage(ResourceType::Memory), 0);
    }

    #[test]
    fn test_per_request_limit() {
        let ledger = ledger(ResourceType::Width, 10);
        assert!(ledger.acquire(ResourceType::Width, 10));
        assert!(ledger.acquire(ResourceType::Width, 10));
        assert!(!ledger.acquire(ResourceType::Width, 11));
        assert_eq!(ledger.usage(ResourceType::Width), 0);
    }

    #[test]
    fn test_release_saturates() {
        let ledger = ledger(ResourceType::Disk, 10);
        ledger.release(ResourceType::Disk, 5);
        assert_eq!(ledger.usage(ResourceType::Disk), 0);
    }

    #[test]
    fn test_grant_released_on_drop() {
        let ledger = ledger(ResourceType::Map, 64);
        let grant = ResourceGrant::acquire(&ledger, ResourceType::Map, 64).unwrap();
        assert_eq!(grant.amount(), 64);
        assert!(ResourceGrant::acquire(&ledger, ResourceType::Map, 1).is_none());
        drop(grant);
        assert_eq!(ledger.usage(ResourceType::Map), 0);
        assert!(ResourceGrant::acquire(&ledger, ResourceType::Map, 1).is_some());
    }

    #[test]
    fn test_from_config() {
        let config = CacheConfig {
            memory_limit: 1234,
            file_limit: 3,
            ..CacheConfig::default()
        };
        let ledger = ResourceLedger::from_config(&config);
        assert_eq!(ledger.limit(ResourceType::Memory), 1234);
        assert_eq!(ledger.limit(ResourceType::File), 3);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1500), "1 KiB");
        assert_eq!(format_bytes(1_500_000), "1.4 MiB");
    }
}
