//! Cache policy: resource limits and backing store preferences.
//!
//! A [`CacheConfig`] is built from defaults derived from the machine, then
//! optionally overridden from the environment or a YAML policy document.
//!
//! # Environment Variables
//!
//! - `PIXCACHE_MEMORY_LIMIT` - Heap bytes the cache may hold (`512MiB`, `2GiB`...)
//! - `PIXCACHE_MAP_LIMIT` - Bytes the cache may memory-map
//! - `PIXCACHE_DISK_LIMIT` - Bytes of temporary disk files
//! - `PIXCACHE_AREA_LIMIT` - Pixels a memory-resident cache may hold
//! - `PIXCACHE_FILE_LIMIT` - Open cache file descriptors
//! - `PIXCACHE_THREAD_LIMIT` - Worker threads (nexus slots per cache)
//! - `PIXCACHE_WIDTH_LIMIT` / `PIXCACHE_HEIGHT_LIMIT` - Geometry ceilings
//! - `PIXCACHE_TIME_LIMIT` - Seconds an image may spend acquiring pixels for write
//! - `PIXCACHE_THROTTLE` - Milliseconds to yield every few acquisitions
//! - `PIXCACHE_TEMPORARY_PATH` - Directory for temporary cache files
//! - `PIXCACHE_CACHE_TYPE` - Force `memory`, `map`, `disk`, `distributed` or `ping`
//! - `PIXCACHE_ANONYMOUS_MAP` - Back memory caches with anonymous maps ("1" or "true")
//!
//! # Policy Documents
//!
//! ```yaml
//! memory_limit: 256MiB
//! disk_limit: 16GiB
//! width_limit: 16384
//! cache_type: disk
//! temporary_path: /scratch
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use pixcache_core::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::storage::CacheType;

/// Fallback when system memory cannot be detected.
const FALLBACK_MEMORY: u64 = 8 * 1024 * 1024 * 1024;

/// Default open cache file budget.
pub const DEFAULT_FILE_LIMIT: u64 = 768;

/// Default geometry ceiling in either dimension.
pub const DEFAULT_DIMENSION_LIMIT: u64 = i32::MAX as u64;

/// Acquisitions between throttle yields.
pub const THROTTLE_INTERVAL: u64 = 32;

static SYSTEM_MEMORY: OnceLock<u64> = OnceLock::new();

/// Total system RAM in bytes.
pub fn system_memory() -> u64 {
    *SYSTEM_MEMORY.get_or_init(|| {
        sys_info::mem_info()
            .map(|m| m.total * 1024)
            .unwrap_or(FALLBACK_MEMORY)
    })
}

/// Resource limits and backing store policy for a cache context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Widest image the cache will open.
    pub width_limit: u64,
    /// Tallest image the cache will open.
    pub height_limit: u64,
    /// Pixels a memory-resident cache may hold.
    #[serde(deserialize_with = "deserialize_size")]
    pub area_limit: u64,
    /// Heap bytes all caches may hold together.
    #[serde(deserialize_with = "deserialize_size")]
    pub memory_limit: u64,
    /// Bytes all caches may memory-map together.
    #[serde(deserialize_with = "deserialize_size")]
    pub map_limit: u64,
    /// Bytes of disk cache files.
    #[serde(deserialize_with = "deserialize_size")]
    pub disk_limit: u64,
    /// Cache file descriptors kept open.
    pub file_limit: u64,
    /// Worker threads; each cache holds one nexus slot per thread.
    pub thread_limit: usize,
    /// Seconds an image may spend before write acquisitions fail.
    pub time_limit: Option<u64>,
    /// Milliseconds to sleep every [`THROTTLE_INTERVAL`] acquisitions.
    pub throttle: Option<u64>,
    /// Directory for temporary cache files (system temp dir when unset).
    pub temporary_path: Option<PathBuf>,
    /// Allocate memory caches as anonymous maps instead of heap blocks.
    pub anonymous_map: bool,
    /// Force a backing store kind instead of the memory/remote/disk cascade.
    pub cache_type: Option<CacheType>,
    /// Remote cache hosts allowed for distributed caches; empty allows any
    /// registered host.
    pub remote_hosts: Vec<String>,
    /// Seed for the random virtual pixel method.
    pub seed: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let memory = system_memory();
        Self {
            width_limit: DEFAULT_DIMENSION_LIMIT,
            height_limit: DEFAULT_DIMENSION_LIMIT,
            area_limit: memory.saturating_mul(2),
            memory_limit: memory,
            map_limit: memory.saturating_mul(2),
            disk_limit: u64::MAX,
            file_limit: DEFAULT_FILE_LIMIT,
            thread_limit: rayon::current_num_threads().max(1),
            time_limit: None,
            throttle: None,
            temporary_path: None,
            anonymous_map: false,
            cache_type: None,
            remote_hosts: Vec::new(),
            seed: None,
        }
    }
}

impl CacheConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Parses a YAML policy document; missing keys keep their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Policy(e.to_string()))
    }

    /// Applies `PIXCACHE_*` environment overrides in place.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_size("PIXCACHE_MEMORY_LIMIT")? {
            self.memory_limit = v;
        }
        if let Some(v) = env_size("PIXCACHE_MAP_LIMIT")? {
            self.map_limit = v;
        }
        if let Some(v) = env_size("PIXCACHE_DISK_LIMIT")? {
            self.disk_limit = v;
        }
        if let Some(v) = env_size("PIXCACHE_AREA_LIMIT")? {
            self.area_limit = v;
        }
        if let Some(v) = env_size("PIXCACHE_FILE_LIMIT")? {
            self.file_limit = v;
        }
        if let Some(v) = env_size("PIXCACHE_THREAD_LIMIT")? {
            self.thread_limit = (v as usize).max(1);
        }
        if let Some(v) = env_size("PIXCACHE_WIDTH_LIMIT")? {
            self.width_limit = v;
        }
        if let Some(v) = env_size("PIXCACHE_HEIGHT_LIMIT")? {
            self.height_limit = v;
        }
        if let Some(v) = env_size("PIXCACHE_TIME_LIMIT")? {
            self.time_limit = Some(v);
        }
        if let Some(v) = env_size("PIXCACHE_THROTTLE")? {
            self.throttle = Some(v);
        }
        if let Ok(path) = env::var("PIXCACHE_TEMPORARY_PATH") {
            self.temporary_path = Some(PathBuf::from(path));
        }
        if let Ok(kind) = env::var("PIXCACHE_CACHE_TYPE") {
            self.cache_type = Some(kind.parse()?);
        }
        if let Ok(v) = env::var("PIXCACHE_ANONYMOUS_MAP") {
            self.anonymous_map = v == "1" || v.eq_ignore_ascii_case("true");
        }
        Ok(())
    }

    /// Time limit as a [`Duration`].
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit.map(Duration::from_secs)
    }

    /// Throttle delay as a [`Duration`].
    pub fn throttle(&self) -> Option<Duration> {
        self.throttle.filter(|&ms| ms > 0).map(Duration::from_millis)
    }

    /// Directory temporary cache files are created in.
    pub fn temporary_dir(&self) -> PathBuf {
        self.temporary_path.clone().unwrap_or_else(env::temp_dir)
    }

    /// Returns `true` if `host` may serve distributed caches.
    pub fn allows_remote_host(&self, host: &str) -> bool {
        self.remote_hosts.is_empty() || self.remote_hosts.iter().any(|h| h == host)
    }
}

/// Parses a byte or count quantity with an optional binary/decimal suffix.
///
/// Accepts plain integers, `K`/`M`/`G`/`T` (powers of 1000), `KiB`/`MiB`/
/// `GiB`/`TiB` (powers of 1024), an optional trailing `B`, and `unlimited`.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("unlimited") {
        return Some(u64::MAX);
    }
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(split);
    let value: u64 = digits.parse().ok()?;
    let suffix = suffix.trim();
    let suffix = suffix
        .strip_suffix('B')
        .or_else(|| suffix.strip_suffix('b'))
        .unwrap_or(suffix);
    let scale: u64 = match suffix {
        "" => 1,
        "K" | "k" => 1_000,
        "M" | "m" => 1_000_000,
        "G" | "g" => 1_000_000_000,
        "T" | "t" => 1_000_000_000_000,
        "Ki" | "ki" => 1 << 10,
        "Mi" | "mi" => 1 << 20,
        "Gi" | "gi" => 1 << 30,
        "Ti" | "ti" => 1 << 40,
        _ => return None,
    };
    value.checked_mul(scale)
}

fn env_size(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(v) => parse_size(&v)
            .map(Some)
            .ok_or_else(|| Error::Policy(format!("{name}: cannot parse `{v}`"))),
        Err(_) => Ok(None),
    }
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => parse_size(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid size `{s}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("4KiB"), Some(4096));
        assert_eq!(parse_size("2MiB"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("3G"), Some(3_000_000_000));
        assert_eq!(parse_size("1 GiB"), Some(1 << 30));
        assert_eq!(parse_size("unlimited"), Some(u64::MAX));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size("12XB"), None);
    }

    #[test]
    fn test_defaults_are_sane() {
        let config = CacheConfig::default();
        assert!(config.memory_limit > 0);
        assert!(config.thread_limit >= 1);
        assert_eq!(config.cache_type, None);
        assert_eq!(config.time_limit(), None);
        assert_eq!(config.throttle(), None);
    }

    #[test]
    fn test_from_yaml() {
        let config = CacheConfig::from_yaml(
            "memory_limit: 64MiB\ndisk_limit: 1000000\nwidth_limit: 4096\ncache_type: disk\nthrottle: 5\n",
        )
        .unwrap();
        assert_eq!(config.memory_limit, 64 * 1024 * 1024);
        assert_eq!(config.disk_limit, 1_000_000);
        assert_eq!(config.width_limit, 4096);
        assert_eq!(config.cache_type, Some(CacheType::Disk));
        assert_eq!(config.throttle(), Some(Duration::from_millis(5)));
        // untouched keys keep defaults
        assert_eq!(config.file_limit, DEFAULT_FILE_LIMIT);
    }

    #[test]
    fn test_from_yaml_rejects_garbage() {
        let err = CacheConfig::from_yaml("memory_limit: plenty\n").unwrap_err();
        assert!(matches!(err, Error::Policy(_)));
    }

    #[test]
    fn test_remote_host_allow_list() {
        let mut config = CacheConfig::default();
        assert!(config.allows_remote_host("anything"));
        config.remote_hosts = vec!["cache-a:6668".into()];
        assert!(config.allows_remote_host("cache-a:6668"));
        assert!(!config.allows_remote_host("cache-b:6668"));
    }
}
