//! Process-scoped cache state.
//!
//! A [`CacheContext`] owns the policy, the resource ledger and the registry
//! of distributed cache servers. Images hold an `Arc` to the context they
//! were created in; after [`CacheContext::shutdown`] every new acquisition
//! fails with [`Error::ContextInactive`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use pixcache_core::{Error, Result};
use tracing::debug;

use crate::config::CacheConfig;
use crate::resource::{ResourceAccounting, ResourceLedger};
use crate::storage::RemoteCache;

/// Shared cache subsystem state.
#[derive(Debug)]
pub struct CacheContext {
    config: CacheConfig,
    resources: Arc<dyn ResourceAccounting>,
    active: AtomicBool,
    next_id: AtomicU64,
    remotes: RwLock<Vec<(String, Arc<dyn RemoteCache>)>>,
}

impl CacheContext {
    /// Initializes a context with a ledger built from `config`.
    pub fn init(config: CacheConfig) -> Arc<Self> {
        let resources: Arc<dyn ResourceAccounting> = Arc::new(ResourceLedger::from_config(&config));
        Self::with_resources(config, resources)
    }

    /// Initializes a context from defaults and `PIXCACHE_*` overrides.
    pub fn from_env() -> Result<Arc<Self>> {
        Ok(Self::init(CacheConfig::from_env()?))
    }

    /// Initializes a context with a caller-supplied resource tracker.
    pub fn with_resources(config: CacheConfig, resources: Arc<dyn ResourceAccounting>) -> Arc<Self> {
        debug!(
            memory_limit = config.memory_limit,
            thread_limit = config.thread_limit,
            cache_type = ?config.cache_type,
            "pixel cache context initialized"
        );
        Arc::new(Self {
            config,
            resources,
            active: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            remotes: RwLock::new(Vec::new()),
        })
    }

    /// Marks the context inactive. Existing caches stay readable until
    /// dropped, but no image can acquire pixels through it any more.
    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.remotes.write().clear();
            debug!("pixel cache context shut down");
        }
    }

    /// Returns `true` until [`shutdown`](Self::shutdown) is called.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Fails with [`Error::ContextInactive`] after shutdown.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::ContextInactive)
        }
    }

    /// Active policy.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Resource tracker shared by every cache in this context.
    pub fn resources(&self) -> &Arc<dyn ResourceAccounting> {
        &self.resources
    }

    /// Nexus slots allocated per cache.
    pub fn thread_slots(&self) -> usize {
        self.config.thread_limit.max(1)
    }

    /// Registers a distributed cache server under `host`.
    pub fn register_remote(&self, host: impl Into<String>, server: Arc<dyn RemoteCache>) {
        let host = host.into();
        debug!(host = %host, "registered distributed cache server");
        let mut remotes = self.remotes.write();
        remotes.retain(|(h, _)| *h != host);
        remotes.push((host, server));
    }

    /// Removes the server registered under `host`.
    pub fn unregister_remote(&self, host: &str) {
        self.remotes.write().retain(|(h, _)| h != host);
    }

    /// Picks a server for cache `id`, spreading caches round-robin over the
    /// allowed hosts.
    pub(crate) fn remote_for(&self, id: u64) -> Option<(String, Arc<dyn RemoteCache>)> {
        let remotes = self.remotes.read();
        let allowed: Vec<_> = remotes
            .iter()
            .filter(|(host, _)| self.config.allows_remote_host(host))
            .collect();
        if allowed.is_empty() {
            return None;
        }
        let (host, server) = allowed[(id as usize) % allowed.len()];
        Some((host.clone(), Arc::clone(server)))
    }

    pub(crate) fn next_cache_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LoopbackCacheServer;

    #[test]
    fn test_shutdown() {
        let ctx = CacheContext::init(CacheConfig::default());
        assert!(ctx.ensure_active().is_ok());
        ctx.shutdown();
        assert!(!ctx.is_active());
        assert!(matches!(ctx.ensure_active(), Err(Error::ContextInactive)));
        // idempotent
        ctx.shutdown();
    }

    #[test]
    fn test_cache_ids_are_unique() {
        let ctx = CacheContext::init(CacheConfig::default());
        let a = ctx.next_cache_id();
        let b = ctx.next_cache_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_remote_selection_respects_allow_list() {
        let config = CacheConfig {
            remote_hosts: vec!["b".into()],
            ..CacheConfig::default()
        };
        let ctx = CacheContext::init(config);
        assert!(ctx.remote_for(0).is_none());
        ctx.register_remote("a", Arc::new(LoopbackCacheServer::new()));
        assert!(ctx.remote_for(0).is_none());
        ctx.register_remote("b", Arc::new(LoopbackCacheServer::new()));
        for id in 0..4 {
            assert_eq!(ctx.remote_for(id).unwrap().0, "b");
        }
        ctx.unregister_remote("b");
        assert!(ctx.remote_for(0).is_none());
    }
}
