//! Request-scoped object cache.
//!
//! [`ObjectCache`] composes key derivation, the local mirror, the
//! non-persistent store, the preseed and a backend handle into the object
//! cache operation set. One request owns one engine and drives it
//! sequentially.
//!
//! Backend failures never escape the hot path: reads degrade to "not found",
//! writes to `false`, and ambiguous outcomes drop the mirror entry so the
//! next read asks the backend again. Only an empty key (and a value that
//! cannot be serialized) is reported as an error.

use crate::backend::{CacheBackend, MetadumpStream, ServerStats};
use crate::error::{Error, Result};
use crate::expiration;
use crate::groups::{normalize_group, GroupRegistry};
use crate::key::KeyCodec;
use crate::mirror::{LocalMirror, MirrorLookup};
use crate::nonpersistent::NonPersistentStore;
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::preseed::Preseed;
use crate::serialization::{decode, encode, Payload};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared "don't populate the cache" signal.
///
/// While suspended, `add`, `replace`, `set` and their multi-key variants
/// return `false` without touching anything. Reads are unaffected.
#[derive(Clone, Debug, Default)]
pub struct AdditionGate(Arc<AtomicBool>);

impl AdditionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Optional object cache capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feature {
    AddMultiple,
    DeleteMultiple,
    FlushRuntime,
    GetMultiple,
    SetMultiple,
    FlushGroup,
}

impl Feature {
    pub fn is_supported(self) -> bool {
        !matches!(self, Feature::FlushGroup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Feature::AddMultiple => "add_multiple",
            Feature::DeleteMultiple => "delete_multiple",
            Feature::FlushRuntime => "flush_runtime",
            Feature::GetMultiple => "get_multiple",
            Feature::SetMultiple => "set_multiple",
            Feature::FlushGroup => "flush_group",
        }
    }
}

impl FromStr for Feature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add_multiple" => Ok(Feature::AddMultiple),
            "delete_multiple" => Ok(Feature::DeleteMultiple),
            "flush_runtime" => Ok(Feature::FlushRuntime),
            "get_multiple" => Ok(Feature::GetMultiple),
            "set_multiple" => Ok(Feature::SetMultiple),
            "flush_group" => Ok(Feature::FlushGroup),
            other => Err(Error::Other(format!("unknown feature: {}", other))),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-scoped cache engine.
///
/// # Example
///
/// ```
/// use objcache::{ObjectCache, backend::InMemoryBackend, key::KeyCodec};
///
/// # tokio_test_block_on(async {
/// let mut cache = ObjectCache::new(InMemoryBackend::new(), KeyCodec::new("1"));
///
/// assert!(cache.set("greeting", "hello", "", 0).await?);
/// let value: Option<String> = cache.get("greeting", "", false).await?;
/// assert_eq!(value.as_deref(), Some("hello"));
/// # Ok::<(), objcache::Error>(())
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct ObjectCache<B: CacheBackend> {
    backend: B,
    codec: KeyCodec,
    groups: GroupRegistry,
    mirror: LocalMirror,
    non_persistent: NonPersistentStore,
    preseed: Preseed,
    gate: AdditionGate,
    metrics: Arc<dyn CacheMetrics>,
}

impl<B: CacheBackend> ObjectCache<B> {
    pub fn new(backend: B, codec: KeyCodec) -> Self {
        ObjectCache {
            backend,
            codec,
            groups: GroupRegistry::new(),
            mirror: LocalMirror::new(),
            non_persistent: NonPersistentStore::new(),
            preseed: Preseed::new(),
            gate: AdditionGate::new(),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    pub fn with_gate(mut self, gate: AdditionGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Entries currently held by the local mirror.
    pub fn mirror_len(&self) -> usize {
        self.mirror.len()
    }

    /// Register groups whose keys are shared by every scope.
    pub fn add_global_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.add_global(groups);
    }

    /// Register groups that live only in this engine.
    pub fn add_non_persistent_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.add_non_persistent(groups);
    }

    /// True for the optional operations this cache implements.
    pub fn supports(&self, feature: &str) -> bool {
        feature.parse::<Feature>().is_ok_and(Feature::is_supported)
    }

    fn storage_key(&self, key: &dyn Display, group: &str) -> Result<String> {
        self.codec.resolve(key, group, &self.groups, false)
    }

    fn decode_value<T: DeserializeOwned>(&self, key: &str, payload: &Payload) -> Option<T> {
        match decode(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undecodable value for {}: {}", key, e);
                self.metrics.record_error(key, &e.to_string());
                None
            }
        }
    }

    /// Collect an outstanding preseed before talking to the backend.
    async fn settle(&mut self) {
        if self.preseed.is_pending() {
            self.preseed.collect(&mut self.mirror).await;
        }
    }

    fn apply_write(
        &mut self,
        key: String,
        payload: Payload,
        outcome: Result<bool>,
        started: Instant,
    ) -> bool {
        match outcome {
            Ok(true) => {
                self.metrics.record_set(&key, started.elapsed());
                self.mirror.put(key, payload);
                true
            }
            Ok(false) => {
                debug!("Write not stored for {}", key);
                self.mirror.invalidate(&key);
                false
            }
            Err(e) => {
                self.metrics.record_error(&key, &e.to_string());
                self.mirror.invalidate(&key);
                false
            }
        }
    }

    /// Start a pipelined fetch of hot keys.
    ///
    /// Keys in non-persistent groups are skipped. Backend failures are
    /// logged; the keys then simply stay unknown.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` for an empty key.
    pub async fn preseed<K: Display>(&mut self, keys: &[(K, &str)]) -> Result<()> {
        let mut storage_keys = Vec::with_capacity(keys.len());
        for (key, group) in keys {
            let group = normalize_group(group);
            if self.groups.is_non_persistent(group) {
                continue;
            }
            storage_keys.push(self.storage_key(key, group)?);
        }

        self.settle().await;
        if let Err(e) = self.preseed.issue(&self.backend, storage_keys).await {
            warn!("Preseed not issued: {}", e);
        }
        Ok(())
    }

    /// Fetch a value.
    ///
    /// `force` skips the local mirror and asks the backend. A stored value
    /// that does not decode as `T` is reported as not found.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` for an empty key.
    pub async fn get<T, K>(&mut self, key: K, group: &str, force: bool) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        K: Display,
    {
        let group = normalize_group(group);
        let k = self.storage_key(&key, group)?;

        if self.groups.is_non_persistent(group) {
            return Ok(self
                .non_persistent
                .get(group, &k)
                .and_then(|p| self.decode_value(&k, p)));
        }

        let started = Instant::now();
        self.settle().await;

        if !force {
            match self.mirror.get(&k) {
                MirrorLookup::Present(payload) => {
                    self.metrics.record_hit(&k, started.elapsed());
                    return Ok(self.decode_value(&k, payload));
                }
                MirrorLookup::Missing => {
                    self.metrics.record_miss(&k, started.elapsed());
                    return Ok(None);
                }
                MirrorLookup::Unknown => {}
            }
        }

        match self.backend.get(&k).await {
            Ok(Some(payload)) => {
                self.metrics.record_hit(&k, started.elapsed());
                let value = self.decode_value(&k, &payload);
                self.mirror.put(k, payload);
                Ok(value)
            }
            Ok(None) => {
                self.metrics.record_miss(&k, started.elapsed());
                self.mirror.put_missing(k);
                Ok(None)
            }
            Err(e) => {
                self.metrics.record_error(&k, &e.to_string());
                self.mirror.put_missing(k);
                Ok(None)
            }
        }
    }

    /// Fetch several values, aligned with `keys`.
    ///
    /// Keys the mirror can answer are not sent to the backend; the rest go
    /// out in a single multi-get.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` if any key is empty.
    pub async fn get_multiple<T, K>(
        &mut self,
        keys: &[K],
        group: &str,
        force: bool,
    ) -> Result<Vec<Option<T>>>
    where
        T: DeserializeOwned,
        K: Display,
    {
        let group = normalize_group(group);
        let ks = keys
            .iter()
            .map(|key| self.storage_key(key, group))
            .collect::<Result<Vec<String>>>()?;
        let mut results: Vec<Option<T>> = ks.iter().map(|_| None).collect();
        if ks.is_empty() {
            return Ok(results);
        }

        if self.groups.is_non_persistent(group) {
            for (slot, k) in results.iter_mut().zip(&ks) {
                *slot = self
                    .non_persistent
                    .get(group, k)
                    .and_then(|p| self.decode_value(k, p));
            }
            return Ok(results);
        }

        let started = Instant::now();
        self.settle().await;

        let mut remote = Vec::new();
        for (i, k) in ks.iter().enumerate() {
            if force {
                remote.push(i);
                continue;
            }
            match self.mirror.get(k) {
                MirrorLookup::Present(payload) => results[i] = self.decode_value(k, payload),
                MirrorLookup::Missing => {}
                MirrorLookup::Unknown => remote.push(i),
            }
        }
        if remote.is_empty() {
            debug!("✓ MGET {} keys served locally", ks.len());
            return Ok(results);
        }

        let fetch: Vec<&str> = remote.iter().map(|&i| ks[i].as_str()).collect();
        match self.backend.get_multi(&fetch).await {
            Ok(values) => {
                for (&i, value) in remote.iter().zip(values) {
                    match value {
                        Some(payload) => {
                            self.metrics.record_hit(&ks[i], started.elapsed());
                            results[i] = self.decode_value(&ks[i], &payload);
                            self.mirror.put(ks[i].clone(), payload);
                        }
                        None => {
                            self.metrics.record_miss(&ks[i], started.elapsed());
                            self.mirror.invalidate(&ks[i]);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("MGET of {} keys failed: {}", fetch.len(), e);
                for k in &fetch {
                    self.metrics.record_error(k, &e.to_string());
                }
            }
        }
        Ok(results)
    }

    /// Store only if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` for an empty key, or a serialization error
    /// for a value that cannot be encoded.
    pub async fn add<T, K>(&mut self, key: K, value: &T, group: &str, expire: i64) -> Result<bool>
    where
        T: Serialize + ?Sized,
        K: Display,
    {
        let group = normalize_group(group);
        let k = self.storage_key(&key, group)?;
        if self.gate.is_suspended() {
            return Ok(false);
        }
        let payload = encode(value)?;

        if self.groups.is_non_persistent(group) {
            return Ok(self.non_persistent.add(group, &k, payload));
        }

        let started = Instant::now();
        self.settle().await;
        let outcome = self
            .backend
            .add(&k, &payload, expiration::normalize(expire))
            .await;
        Ok(self.apply_write(k, payload, outcome, started))
    }

    /// Per-key [`add`](Self::add); each item succeeds or fails on its own.
    ///
    /// # Errors
    ///
    /// As for `add`; nothing is stored if any key is empty.
    pub async fn add_multiple<T, K>(
        &mut self,
        items: &[(K, T)],
        group: &str,
        expire: i64,
    ) -> Result<Vec<bool>>
    where
        T: Serialize,
        K: Display,
    {
        let group = normalize_group(group);
        for (key, _) in items {
            self.storage_key(key, group)?;
        }

        let mut results = Vec::with_capacity(items.len());
        for (key, value) in items {
            results.push(self.add(key, value, group, expire).await?);
        }
        Ok(results)
    }

    /// Store only if the key is present.
    ///
    /// # Errors
    ///
    /// As for [`add`](Self::add).
    pub async fn replace<T, K>(
        &mut self,
        key: K,
        value: &T,
        group: &str,
        expire: i64,
    ) -> Result<bool>
    where
        T: Serialize + ?Sized,
        K: Display,
    {
        let group = normalize_group(group);
        let k = self.storage_key(&key, group)?;
        if self.gate.is_suspended() {
            return Ok(false);
        }
        let payload = encode(value)?;

        if self.groups.is_non_persistent(group) {
            return Ok(self.non_persistent.replace(group, &k, payload));
        }

        let started = Instant::now();
        self.settle().await;
        let outcome = self
            .backend
            .replace(&k, &payload, expiration::normalize(expire))
            .await;
        Ok(self.apply_write(k, payload, outcome, started))
    }

    /// Store unconditionally.
    ///
    /// # Errors
    ///
    /// As for [`add`](Self::add).
    pub async fn set<T, K>(&mut self, key: K, value: &T, group: &str, expire: i64) -> Result<bool>
    where
        T: Serialize + ?Sized,
        K: Display,
    {
        let group = normalize_group(group);
        let k = self.storage_key(&key, group)?;
        if self.gate.is_suspended() {
            return Ok(false);
        }
        let payload = encode(value)?;

        if self.groups.is_non_persistent(group) {
            self.non_persistent.insert(group, &k, payload);
            return Ok(true);
        }

        let started = Instant::now();
        self.settle().await;
        let outcome = self
            .backend
            .set(&k, &payload, expiration::normalize(expire))
            .await
            .map(|()| true);
        Ok(self.apply_write(k, payload, outcome, started))
    }

    /// Store several values in one backend call, reporting success per key.
    ///
    /// # Errors
    ///
    /// As for [`add`](Self::add); nothing is stored if any key is empty or
    /// any value fails to encode.
    pub async fn set_multiple<T, K>(
        &mut self,
        items: &[(K, T)],
        group: &str,
        expire: i64,
    ) -> Result<Vec<bool>>
    where
        T: Serialize,
        K: Display,
    {
        let group = normalize_group(group);
        let mut entries = Vec::with_capacity(items.len());
        for (key, value) in items {
            entries.push((self.storage_key(key, group)?, encode(value)?));
        }
        if self.gate.is_suspended() {
            return Ok(vec![false; entries.len()]);
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        if self.groups.is_non_persistent(group) {
            for (k, payload) in entries.iter().cloned() {
                self.non_persistent.insert(group, &k, payload);
            }
            return Ok(vec![true; entries.len()]);
        }

        let started = Instant::now();
        self.settle().await;
        let refs: Vec<(&str, &Payload)> = entries.iter().map(|(k, p)| (k.as_str(), p)).collect();
        let outcome = self
            .backend
            .set_multi(&refs, expiration::normalize(expire))
            .await;

        let stored = match outcome {
            Ok(stored) => stored,
            Err(e) => {
                warn!("MSET of {} keys failed: {}", entries.len(), e);
                vec![false; entries.len()]
            }
        };

        let mut results = Vec::with_capacity(entries.len());
        for (i, (k, payload)) in entries.into_iter().enumerate() {
            let ok = stored.get(i).copied().unwrap_or(false);
            results.push(self.apply_write(k, payload, Ok(ok), started));
        }
        Ok(results)
    }

    /// Remove a key.
    ///
    /// A backend "not found" records the key as absent and returns `false`;
    /// a backend error forgets what the mirror knew about the key.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` for an empty key.
    pub async fn delete<K: Display>(&mut self, key: K, group: &str) -> Result<bool> {
        let group = normalize_group(group);
        let k = self.storage_key(&key, group)?;

        if self.groups.is_non_persistent(group) {
            self.non_persistent.remove(group, &k);
            return Ok(true);
        }

        let started = Instant::now();
        self.settle().await;
        match self.backend.delete(&k).await {
            Ok(deleted) => {
                if deleted {
                    self.metrics.record_delete(&k, started.elapsed());
                }
                self.mirror.put_missing(k);
                Ok(deleted)
            }
            Err(e) => {
                self.metrics.record_error(&k, &e.to_string());
                self.mirror.invalidate(&k);
                Ok(false)
            }
        }
    }

    /// Remove several keys, reporting success per key.
    ///
    /// Keys the backend did not confirm are forgotten by the mirror.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` if any key is empty.
    pub async fn delete_multiple<K: Display>(
        &mut self,
        keys: &[K],
        group: &str,
    ) -> Result<Vec<bool>> {
        let group = normalize_group(group);
        let ks = keys
            .iter()
            .map(|key| self.storage_key(key, group))
            .collect::<Result<Vec<String>>>()?;
        if ks.is_empty() {
            return Ok(Vec::new());
        }

        if self.groups.is_non_persistent(group) {
            for k in &ks {
                self.non_persistent.remove(group, k);
            }
            return Ok(vec![true; ks.len()]);
        }

        let started = Instant::now();
        self.settle().await;
        let refs: Vec<&str> = ks.iter().map(String::as_str).collect();
        let deleted = match self.backend.delete_multi(&refs).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("MDELETE of {} keys failed: {}", ks.len(), e);
                vec![false; ks.len()]
            }
        };

        let mut results = Vec::with_capacity(ks.len());
        for (i, k) in ks.into_iter().enumerate() {
            if deleted.get(i).copied().unwrap_or(false) {
                self.metrics.record_delete(&k, started.elapsed());
                self.mirror.put_missing(k);
                results.push(true);
            } else {
                self.mirror.invalidate(&k);
                results.push(false);
            }
        }
        Ok(results)
    }

    /// Add `offset` to an integer value, returning the new value.
    ///
    /// Returns `None` if the key is absent or not an integer. Persistent
    /// values never drop below zero.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` for an empty key.
    pub async fn incr<K: Display>(
        &mut self,
        key: K,
        offset: i64,
        group: &str,
    ) -> Result<Option<i64>> {
        let group = normalize_group(group);
        let k = self.storage_key(&key, group)?;

        if self.groups.is_non_persistent(group) {
            return Ok(self.non_persistent.incr(group, &k, offset));
        }

        let started = Instant::now();
        self.settle().await;
        match self.backend.increment(&k, offset).await {
            Ok(Some(value)) => {
                let value = i64::try_from(value).unwrap_or(i64::MAX);
                self.metrics.record_set(&k, started.elapsed());
                self.mirror.put(k, Payload::integer(value));
                Ok(Some(value))
            }
            Ok(None) => {
                self.mirror.invalidate(&k);
                Ok(None)
            }
            Err(e) => {
                self.metrics.record_error(&k, &e.to_string());
                self.mirror.invalidate(&k);
                Ok(None)
            }
        }
    }

    /// Subtract `offset` from an integer value.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` for an empty key.
    pub async fn decr<K: Display>(
        &mut self,
        key: K,
        offset: i64,
        group: &str,
    ) -> Result<Option<i64>> {
        self.incr(key, offset.saturating_neg(), group).await
    }

    /// Flush the whole backend and all local state.
    ///
    /// Local state is cleared even when the backend flush fails; the return
    /// value reports the backend result.
    pub async fn flush(&mut self) -> bool {
        self.settle().await;
        let flushed = match self.backend.flush().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Backend flush failed: {}", e);
                false
            }
        };
        self.flush_runtime();
        flushed
    }

    /// Drop the local mirror, non-persistent values and any outstanding
    /// preseed. The backend is untouched.
    pub fn flush_runtime(&mut self) -> bool {
        self.mirror.clear();
        self.non_persistent.clear();
        self.preseed = Preseed::new();
        true
    }

    /// Item metadata from every server, as a lazy best-effort stream.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the dump cannot be started.
    pub async fn metadump(&mut self) -> Result<MetadumpStream> {
        self.settle().await;
        self.backend.metadump().await
    }

    /// The backend's own statistics, untransformed.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn server_stats(&mut self) -> Result<ServerStats> {
        self.settle().await;
        self.backend.stats().await
    }
}
