mod remote;

pub use remote::RedisCache;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::{CacheConfig, CacheLayerConfig};
use crate::models::CommandKind;

/// Key/value backend shared by every cache gate
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value, ttl: Duration);
    async fn clear(&self);
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// In-process cache store. Concurrent writers to one key: last writer wins.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // expired: drop it
        self.entries.write().await.remove(key);
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Redis when configured and reachable, otherwise an in-process store
pub async fn open_store(cfg: &CacheConfig) -> Arc<dyn CacheStore> {
    let Some(redis) = cfg.redis.as_ref().filter(|_| cfg.enabled) else {
        return Arc::new(MemoryCache::new());
    };

    match RedisCache::connect(redis, &cfg.namespace).await {
        Ok(store) => {
            tracing::info!("Using Redis cache at {}", redis.dsn);
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!("Redis cache unavailable, caching in memory: {:#}", e);
            Arc::new(MemoryCache::new())
        }
    }
}

/// Operation kinds with their own cache layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheNamespace {
    Command,
    Asn,
    Ptr,
    Ip2Asn,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::Command => "command",
            CacheNamespace::Asn => "asn",
            CacheNamespace::Ptr => "ptr",
            CacheNamespace::Ip2Asn => "ip2asn",
        }
    }

    fn layer(&self, cfg: &CacheConfig) -> CacheLayerConfig {
        match self {
            CacheNamespace::Command => cfg.commands,
            CacheNamespace::Asn => cfg.asn,
            CacheNamespace::Ptr => cfg.ptr,
            CacheNamespace::Ip2Asn => cfg.ip2asn,
        }
    }
}

pub fn command_key(location: &str, command: CommandKind, destination: &str) -> String {
    format!("{}_{}_{}", location, command, destination)
}

/// CacheGate puts one operation kind behind the shared store.
///
/// When the gate is disabled every call computes. When enabled a stored value
/// is returned without computing; a miss computes and stores with the layer TTL.
/// Keys are always qualified with the namespace, so two operation kinds sharing
/// a raw key never collide.
#[derive(Clone)]
pub struct CacheGate {
    store: Arc<dyn CacheStore>,
    prefix: String,
    namespace: CacheNamespace,
    enabled: bool,
    ttl: Duration,
}

impl CacheGate {
    pub fn new(
        store: Arc<dyn CacheStore>,
        prefix: &str,
        namespace: CacheNamespace,
        enabled: bool,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            namespace,
            enabled,
            ttl,
        }
    }

    /// Gate for `namespace`, enabled only if both the global flag and the layer flag are set
    pub fn from_config(store: Arc<dyn CacheStore>, cfg: &CacheConfig, namespace: CacheNamespace) -> Self {
        let layer = namespace.layer(cfg);
        Self::new(store, &cfg.namespace, namespace, cfg.enabled && layer.enabled, layer.ttl())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn qualified_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, self.namespace.as_str(), key)
    }

    pub async fn guard<T, F, Fut>(&self, key: &str, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let infallible = move || async move { Ok::<T, std::convert::Infallible>(compute().await) };
        match self.try_guard(key, infallible).await {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like `guard`, but only `Ok` values are stored; errors pass straight through
    pub async fn try_guard<T, E, F, Fut>(&self, key: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return compute().await;
        }

        let full_key = self.qualified_key(key);
        if let Some(stored) = self.store.get(&full_key).await {
            match serde_json::from_value::<T>(stored) {
                Ok(value) => return Ok(value),
                Err(e) => tracing::warn!("Discarding unreadable cache entry {}: {}", full_key, e),
            }
        }

        tracing::debug!("Cache miss: {}", full_key);
        let value = compute().await?;
        match serde_json::to_value(&value) {
            Ok(json) => self.store.set(&full_key, json, self.ttl).await,
            Err(e) => tracing::warn!("Could not cache {}: {}", full_key, e),
        }
        Ok(value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn gate(store: &Arc<MemoryCache>, namespace: CacheNamespace, enabled: bool) -> CacheGate {
        CacheGate::new(store.clone(), "test", namespace, enabled, Duration::from_secs(60))
    }

    async fn counted(calls: &AtomicUsize, value: &str) -> String {
        calls.fetch_add(1, Ordering::SeqCst);
        value.to_string()
    }

    #[tokio::test]
    async fn test_disabled_gate_always_computes() {
        let store = Arc::new(MemoryCache::new());
        let gate = gate(&store, CacheNamespace::Command, false);
        let calls = AtomicUsize::new(0);

        let first = gate.guard("LON_ping_1.1.1.1", || counted(&calls, "a")).await;
        let second = gate.guard("LON_ping_1.1.1.1", || counted(&calls, "b")).await;

        assert_eq!(first, "a");
        assert_eq!(second, "b");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_enabled_gate_returns_stored_value() {
        let store = Arc::new(MemoryCache::new());
        let gate = gate(&store, CacheNamespace::Command, true);
        let calls = AtomicUsize::new(0);

        let first = gate.guard("LON_ping_1.1.1.1", || counted(&calls, "a")).await;
        let second = gate.guard("LON_ping_1.1.1.1", || counted(&calls, "b")).await;

        assert_eq!(first, "a");
        assert_eq!(second, "a");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = Arc::new(MemoryCache::new());
        let gate = gate(&store, CacheNamespace::Asn, true);
        let calls = AtomicUsize::new(0);

        gate.guard("13335", || counted(&calls, "cloudflare")).await;
        tokio::time::advance(Duration::from_secs(59)).await;
        gate.guard("13335", || counted(&calls, "cloudflare")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        gate.guard("13335", || counted(&calls, "cloudflare")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let store = Arc::new(MemoryCache::new());
        let commands = gate(&store, CacheNamespace::Command, true);
        let ip2asn = gate(&store, CacheNamespace::Ip2Asn, true);

        let a: String = commands.guard("1.1.1.1", || async { "command output".to_string() }).await;
        let b: String = ip2asn.guard("1.1.1.1", || async { "asn data".to_string() }).await;

        assert_eq!(a, "command output");
        assert_eq!(b, "asn data");
        assert_ne!(commands.qualified_key("1.1.1.1"), ip2asn.qualified_key("1.1.1.1"));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_try_guard_does_not_store_errors() {
        let store = Arc::new(MemoryCache::new());
        let gate = gate(&store, CacheNamespace::Command, true);

        let failed: Result<String, String> = gate.try_guard("k", || async { Err("boom".to_string()) }).await;
        assert_eq!(failed.unwrap_err(), "boom");

        let ok: Result<String, String> = gate.try_guard("k", || async { Ok("fine".to_string()) }).await;
        assert_eq!(ok.unwrap(), "fine");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_a_miss() {
        let store = Arc::new(MemoryCache::new());
        let gate = gate(&store, CacheNamespace::Asn, true);
        store
            .set(&gate.qualified_key("1"), Value::String("not a number".into()), Duration::from_secs(60))
            .await;

        let value: u32 = gate.guard("1", || async { 7 }).await;
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = Arc::new(MemoryCache::new());
        let gate = gate(&store, CacheNamespace::Ptr, true);
        let _: Option<String> = gate.guard("8.8.8.8", || async { Some("dns.google".to_string()) }).await;
        assert_eq!(store.len().await, 1);
        store.clear().await;
        assert_eq!(store.len().await, 0);
    }

    #[test]
    fn test_gate_from_config_requires_both_flags() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let mut cfg = CacheConfig::default();

        // global off
        assert!(!CacheGate::from_config(store.clone(), &cfg, CacheNamespace::Asn).is_enabled());

        cfg.enabled = true;
        assert!(CacheGate::from_config(store.clone(), &cfg, CacheNamespace::Asn).is_enabled());
        // commands layer is off by default
        assert!(!CacheGate::from_config(store.clone(), &cfg, CacheNamespace::Command).is_enabled());

        let gate = CacheGate::from_config(store, &cfg, CacheNamespace::Command);
        assert_eq!(
            gate.qualified_key(&command_key("LON", CommandKind::Ping, "1.1.1.1")),
            "lgapi:command:LON_ping_1.1.1.1"
        );
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_memory() {
        let cfg = CacheConfig {
            enabled: true,
            redis: Some(RedisConfig {
                dsn: "redis://127.0.0.1:1/".into(),
                timeout: 1,
            }),
            ..Default::default()
        };
        let store = open_store(&cfg).await;

        let gate = CacheGate::from_config(store, &cfg, CacheNamespace::Asn);
        let calls = AtomicUsize::new(0);
        gate.guard("13335", || counted(&calls, "cloudflare")).await;
        gate.guard("13335", || counted(&calls, "cloudflare")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
