//! In-memory cache backend (default, thread-safe, async).
//!
//! Emulates a memcached cluster inside the process: expirations follow
//! memcached's relative/absolute rule, counters are ASCII decimals, oversized
//! items are rejected and every command fails while no server is configured.
//! Uses DashMap for lock-free concurrent access with per-key sharding.

use super::{CacheBackend, MetadumpStream, ServerStats, TransportOptions};
use crate::error::{Error, Result};
use crate::expiration::{unix_now, MAX_RELATIVE_EXPIRATION};
use crate::metadump::MetadumpRecord;
use crate::serialization::Payload;
use crate::servers::ServerSpec;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Memcached's default item size limit.
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

/// In-memory cache entry with optional expiration.
struct CacheEntry {
    payload: Payload,
    /// Absolute Unix time, `None` for never.
    expires_at: Option<i64>,
    cas: u64,
    last_access: i64,
    fetched: bool,
}

impl CacheEntry {
    fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Converts a memcached expiration to an absolute deadline.
fn deadline(expiration: i64, now: i64) -> Option<i64> {
    match expiration {
        0 => None,
        e if e < 0 => Some(now),
        e if e <= MAX_RELATIVE_EXPIRATION => Some(now.saturating_add(e)),
        e => Some(e),
    }
}

/// Parses a counter the way memcached does: an unsigned decimal.
fn parse_counter(payload: &Payload) -> Result<u64> {
    std::str::from_utf8(&payload.data)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            Error::BackendError(
                "CLIENT_ERROR cannot increment or decrement non-numeric value".to_string(),
            )
        })
}

/// Percent-encodes a key the way the LRU crawler prints it.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b"-_.~".contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

#[derive(Default)]
struct Counters {
    commands: AtomicU64,
    cmd_get: AtomicU64,
    get_hits: AtomicU64,
    get_misses: AtomicU64,
    cmd_set: AtomicU64,
    delete_hits: AtomicU64,
    delete_misses: AtomicU64,
    incr_hits: AtomicU64,
    incr_misses: AtomicU64,
    cmd_flush: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct HandleState {
    servers: Vec<ServerSpec>,
    options: Option<TransportOptions>,
    reachable: bool,
}

/// Thread-safe async in-memory cache backend.
///
/// Clones share the same store, server list and counters, like clones of a
/// pooled memcached client.
///
/// # Example
///
/// ```no_run
/// use objcache::backend::{CacheBackend, InMemoryBackend};
/// use objcache::serialization::encode;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let backend = InMemoryBackend::new();
///
///     backend.set("key1", &encode("value")?, 0).await?;
///     assert!(backend.get("key1").await?.is_some());
///
///     // Relative expiration in seconds
///     backend.set("key2", &encode("expires")?, 300).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    store: Arc<DashMap<String, CacheEntry>>,
    state: Arc<RwLock<HandleState>>,
    counters: Arc<Counters>,
    next_cas: Arc<AtomicU64>,
    max_item_size: usize,
}

impl InMemoryBackend {
    /// Create a backend pointed at the default server.
    pub fn new() -> Self {
        Self::with_servers(vec![ServerSpec::default()])
    }

    /// Create a backend with no servers; every command fails until servers
    /// are added.
    pub fn unconfigured() -> Self {
        Self::with_servers(Vec::new())
    }

    pub fn with_servers(servers: Vec<ServerSpec>) -> Self {
        InMemoryBackend {
            store: Arc::new(DashMap::new()),
            state: Arc::new(RwLock::new(HandleState {
                servers,
                options: None,
                reachable: true,
            })),
            counters: Arc::new(Counters::default()),
            next_cas: Arc::new(AtomicU64::new(1)),
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
        }
    }

    /// Reject items larger than `bytes`.
    pub fn with_max_item_size(mut self, bytes: usize) -> Self {
        self.max_item_size = bytes;
        self
    }

    /// Simulate the cluster going down (or coming back).
    pub async fn set_reachable(&self, reachable: bool) {
        self.state.write().await.reachable = reachable;
    }

    /// Get the current number of entries in cache.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Commands received so far, failed ones included.
    pub fn command_count(&self) -> u64 {
        self.counters.commands.load(Ordering::Relaxed)
    }

    /// Print cache statistics to debug log.
    pub fn log_stats(&self) {
        let total_bytes: usize = self.store.iter().map(|e| e.payload.len()).sum();
        debug!(
            "Cache Stats: {} entries, {} bytes, {} commands",
            self.store.len(),
            total_bytes,
            self.command_count()
        );
    }

    async fn ensure_ready(&self) -> Result<()> {
        bump(&self.counters.commands);
        let state = self.state.read().await;
        if !state.reachable {
            return Err(Error::BackendError("connection refused".to_string()));
        }
        if state.servers.is_empty() {
            return Err(Error::BackendError("no servers configured".to_string()));
        }
        Ok(())
    }

    fn new_entry(&self, payload: &Payload, expiration: i64, now: i64) -> Result<CacheEntry> {
        if payload.len() > self.max_item_size {
            return Err(Error::BackendError(
                "SERVER_ERROR object too large for cache".to_string(),
            ));
        }
        Ok(CacheEntry {
            payload: payload.clone(),
            expires_at: deadline(expiration, now),
            cas: self.next_cas.fetch_add(1, Ordering::Relaxed),
            last_access: now,
            fetched: false,
        })
    }

    fn lookup(&self, key: &str, now: i64) -> Option<Payload> {
        bump(&self.counters.cmd_get);
        let hit = match self.store.get_mut(key) {
            Some(mut entry) if !entry.is_expired_at(now) => {
                entry.last_access = now;
                entry.fetched = true;
                Some(entry.payload.clone())
            }
            _ => None,
        };
        if hit.is_some() {
            bump(&self.counters.get_hits);
        } else {
            self.store.remove_if(key, |_, e| e.is_expired_at(now));
            bump(&self.counters.get_misses);
        }
        hit
    }

    fn store_entry(&self, key: &str, payload: &Payload, expiration: i64) -> Result<()> {
        bump(&self.counters.cmd_set);
        let entry = self.new_entry(payload, expiration, unix_now())?;
        self.store.insert(key.to_string(), entry);
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Payload>> {
        self.ensure_ready().await?;
        let hit = self.lookup(key, unix_now());
        debug!(
            "✓ InMemory GET {} -> {}",
            key,
            if hit.is_some() { "HIT" } else { "MISS" }
        );
        Ok(hit)
    }

    async fn get_multi(&self, keys: &[&str]) -> Result<Vec<Option<Payload>>> {
        self.ensure_ready().await?;
        let now = unix_now();
        let results: Vec<Option<Payload>> = keys.iter().map(|k| self.lookup(k, now)).collect();
        debug!("✓ InMemory MGET {} keys", keys.len());
        Ok(results)
    }

    async fn set(&self, key: &str, payload: &Payload, expiration: i64) -> Result<()> {
        self.ensure_ready().await?;
        self.store_entry(key, payload, expiration)?;
        debug!("✓ InMemory SET {} (exp: {})", key, expiration);
        Ok(())
    }

    async fn set_multi(&self, items: &[(&str, &Payload)], expiration: i64) -> Result<Vec<bool>> {
        self.ensure_ready().await?;
        let results: Vec<bool> = items
            .iter()
            .map(|(key, payload)| match self.store_entry(key, payload, expiration) {
                Ok(()) => true,
                Err(e) => {
                    warn!("InMemory MSET {} failed: {}", key, e);
                    false
                }
            })
            .collect();
        debug!("✓ InMemory MSET {} keys", items.len());
        Ok(results)
    }

    async fn add(&self, key: &str, payload: &Payload, expiration: i64) -> Result<bool> {
        self.ensure_ready().await?;
        bump(&self.counters.cmd_set);
        let now = unix_now();
        let entry = self.new_entry(payload, expiration, now)?;
        let stored = match self.store.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired_at(now) {
                    existing.insert(entry);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        };
        debug!("✓ InMemory ADD {} -> {}", key, stored);
        Ok(stored)
    }

    async fn replace(&self, key: &str, payload: &Payload, expiration: i64) -> Result<bool> {
        self.ensure_ready().await?;
        bump(&self.counters.cmd_set);
        let now = unix_now();
        let entry = self.new_entry(payload, expiration, now)?;
        let stored = match self.store.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired_at(now) {
                    existing.remove();
                    false
                } else {
                    existing.insert(entry);
                    true
                }
            }
            Entry::Vacant(_) => false,
        };
        debug!("✓ InMemory REPLACE {} -> {}", key, stored);
        Ok(stored)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_ready().await?;
        let now = unix_now();
        let deleted = self
            .store
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired_at(now));
        if deleted {
            bump(&self.counters.delete_hits);
        } else {
            bump(&self.counters.delete_misses);
        }
        debug!("✓ InMemory DELETE {} -> {}", key, deleted);
        Ok(deleted)
    }

    async fn delete_multi(&self, keys: &[&str]) -> Result<Vec<bool>> {
        self.ensure_ready().await?;
        let now = unix_now();
        let results = keys
            .iter()
            .map(|key| {
                self.store
                    .remove(*key)
                    .is_some_and(|(_, entry)| !entry.is_expired_at(now))
            })
            .collect();
        debug!("✓ InMemory MDELETE {} keys", keys.len());
        Ok(results)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<Option<u64>> {
        self.ensure_ready().await?;
        let now = unix_now();
        let result = match self.store.get_mut(key) {
            Some(mut entry) if !entry.is_expired_at(now) => {
                let current = parse_counter(&entry.payload)?;
                let next = if delta >= 0 {
                    current.wrapping_add(delta as u64)
                } else {
                    current.saturating_sub(delta.unsigned_abs())
                };
                entry.payload.data = next.to_string().into_bytes();
                entry.cas = self.next_cas.fetch_add(1, Ordering::Relaxed);
                entry.last_access = now;
                Some(next)
            }
            _ => None,
        };
        if result.is_some() {
            bump(&self.counters.incr_hits);
        } else {
            bump(&self.counters.incr_misses);
        }
        debug!("✓ InMemory INCR {} by {} -> {:?}", key, delta, result);
        Ok(result)
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_ready().await?;
        bump(&self.counters.cmd_flush);
        self.store.clear();
        warn!("⚠ InMemory FLUSH executed - all cache cleared!");
        Ok(())
    }

    async fn server_list(&self) -> Vec<ServerSpec> {
        self.state.read().await.servers.clone()
    }

    async fn add_servers(&self, servers: &[ServerSpec]) -> Result<()> {
        self.state
            .write()
            .await
            .servers
            .extend(servers.iter().cloned());
        Ok(())
    }

    async fn reset_server_list(&self) -> Result<()> {
        self.state.write().await.servers.clear();
        Ok(())
    }

    async fn is_pristine(&self) -> bool {
        self.state.read().await.options.is_none()
    }

    async fn set_options(&self, options: &TransportOptions) -> Result<TransportOptions> {
        self.state.write().await.options = Some(options.clone());
        Ok(options.clone())
    }

    async fn options(&self) -> TransportOptions {
        self.state.read().await.options.clone().unwrap_or_default()
    }

    async fn stats(&self) -> Result<ServerStats> {
        self.ensure_ready().await?;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed).to_string();
        let c = &self.counters;
        let bytes: usize = self.store.iter().map(|e| e.payload.len()).sum();

        let mut server = BTreeMap::new();
        server.insert("time".to_string(), unix_now().to_string());
        server.insert("curr_items".to_string(), self.store.len().to_string());
        server.insert("bytes".to_string(), bytes.to_string());
        server.insert("limit_item_size".to_string(), self.max_item_size.to_string());
        server.insert("cmd_get".to_string(), load(&c.cmd_get));
        server.insert("get_hits".to_string(), load(&c.get_hits));
        server.insert("get_misses".to_string(), load(&c.get_misses));
        server.insert("cmd_set".to_string(), load(&c.cmd_set));
        server.insert("delete_hits".to_string(), load(&c.delete_hits));
        server.insert("delete_misses".to_string(), load(&c.delete_misses));
        server.insert("incr_hits".to_string(), load(&c.incr_hits));
        server.insert("incr_misses".to_string(), load(&c.incr_misses));
        server.insert("cmd_flush".to_string(), load(&c.cmd_flush));

        let mut stats = ServerStats::new();
        stats.insert("inmemory".to_string(), server);
        Ok(stats)
    }

    async fn metadump(&self) -> Result<MetadumpStream> {
        self.ensure_ready().await?;
        let now = unix_now();
        let mut records: Vec<MetadumpRecord> = self
            .store
            .iter()
            .filter(|e| !e.is_expired_at(now))
            .map(|e| {
                MetadumpRecord::from_pairs([
                    ("key", escape_key(e.key())),
                    ("exp", e.expires_at.unwrap_or(-1).to_string()),
                    ("la", e.last_access.to_string()),
                    ("cas", e.cas.to_string()),
                    ("fetch", if e.fetched { "yes" } else { "no" }.to_string()),
                    ("cls", "1".to_string()),
                    ("size", e.payload.len().to_string()),
                ])
            })
            .collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        debug!("✓ InMemory METADUMP {} items", records.len());
        Ok(futures::stream::iter(records.into_iter().map(Ok)).boxed())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.ensure_ready().await.is_ok())
    }
}
