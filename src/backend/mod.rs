//! Cache backend implementations.

use crate::error::{Error, Result};
use crate::metadump::MetadumpRecord;
use crate::serialization::Payload;
use crate::servers::ServerSpec;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "memcached")]
pub mod memcached;
pub mod ring;

pub use inmemory::InMemoryBackend;
#[cfg(feature = "memcached")]
pub use memcached::{MemcachedBackend, MemcachedConfig};

/// In-flight pipelined multi-get started by [`CacheBackend::get_delayed`].
///
/// Resolves to the `(key, payload)` pairs that were found.
pub type DelayedFetch = BoxFuture<'static, Result<Vec<(String, Payload)>>>;

/// Lazy, single-pass sequence of crawler records.
pub type MetadumpStream = BoxStream<'static, Result<MetadumpRecord>>;

/// Native statistics, server address → stat name → value.
pub type ServerStats = BTreeMap<String, BTreeMap<String, String>>;

/// Transport tuning applied to a backend handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportOptions {
    /// Use the binary protocol (keys may then contain spaces).
    pub binary_protocol: bool,
    /// Disable Nagle's algorithm.
    pub no_delay: bool,
    /// Give up connecting after this long.
    pub connect_timeout: Duration,
    /// How long a failed server is skipped. Zero disables the retry wait.
    pub retry_timeout: Duration,
}

impl Default for TransportOptions {
    /// The options of an untouched client.
    fn default() -> Self {
        TransportOptions {
            binary_protocol: false,
            no_delay: false,
            connect_timeout: Duration::from_secs(4),
            retry_timeout: Duration::from_secs(2),
        }
    }
}

/// Client for the persistent key-value store.
///
/// Mirrors the command set of a memcached client. Result codes are expressed
/// through the return types:
///
/// | Call | Success | Not found / not stored | Error |
/// |---|---|---|---|
/// | `get` | `Ok(Some(_))` | `Ok(None)` | `Err(_)` |
/// | `add`, `replace`, `delete` | `Ok(true)` | `Ok(false)` | `Err(_)` |
/// | `increment` | `Ok(Some(n))` | `Ok(None)` | `Err(_)` |
/// | `set`, `flush` | `Ok(())` | n/a | `Err(_)` |
///
/// **IMPORTANT:** All methods use `&self`. A handle is shared by every
/// request a worker serves, so implementations keep their state behind
/// interior mutability and are cheap to clone.
///
/// **ASYNC:** All methods are async and must be awaited.
#[allow(async_fn_in_trait)]
pub trait CacheBackend: Send + Sync + Clone {
    /// Fetch a payload.
    async fn get(&self, key: &str) -> Result<Option<Payload>>;

    /// Fetch several payloads in one round trip, aligned with `keys`.
    ///
    /// Default implementation calls `get()` for each key.
    async fn get_multi(&self, keys: &[&str]) -> Result<Vec<Option<Payload>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.get(key).await?);
        }
        Ok(results)
    }

    /// Store unconditionally.
    ///
    /// `expiration` uses memcached semantics: 0 never expires, up to thirty
    /// days is relative, larger is an absolute Unix timestamp.
    async fn set(&self, key: &str, payload: &Payload, expiration: i64) -> Result<()>;

    /// Store several payloads, reporting success per key.
    ///
    /// Default implementation calls `set()` for each item.
    async fn set_multi(&self, items: &[(&str, &Payload)], expiration: i64) -> Result<Vec<bool>> {
        let mut results = Vec::with_capacity(items.len());
        for (key, payload) in items {
            results.push(self.set(key, payload, expiration).await.is_ok());
        }
        Ok(results)
    }

    /// Store only if the key is absent.
    async fn add(&self, key: &str, payload: &Payload, expiration: i64) -> Result<bool>;

    /// Store only if the key is present.
    async fn replace(&self, key: &str, payload: &Payload, expiration: i64) -> Result<bool>;

    /// Remove a key. `Ok(false)` means it was not there.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove several keys, reporting success per key.
    ///
    /// Default implementation calls `delete()` for each key.
    async fn delete_multi(&self, keys: &[&str]) -> Result<Vec<bool>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(matches!(self.delete(key).await, Ok(true)));
        }
        Ok(results)
    }

    /// Atomically add `delta` to a decimal value.
    ///
    /// Negative deltas decrement; memcached floors the result at zero.
    async fn increment(&self, key: &str, delta: i64) -> Result<Option<u64>>;

    /// Invalidate every item on every server.
    async fn flush(&self) -> Result<()>;

    /// Servers the handle currently talks to.
    async fn server_list(&self) -> Vec<ServerSpec>;

    /// Append servers to the handle.
    async fn add_servers(&self, servers: &[ServerSpec]) -> Result<()>;

    /// Drop every server from the handle.
    async fn reset_server_list(&self) -> Result<()>;

    /// True until options have been applied to the handle.
    async fn is_pristine(&self) -> bool;

    /// Apply transport options, returning the options actually in effect.
    async fn set_options(&self, options: &TransportOptions) -> Result<TransportOptions>;

    /// Options currently in effect.
    async fn options(&self) -> TransportOptions;

    /// Start a pipelined multi-get without waiting for the answer.
    ///
    /// Default implementation fetches eagerly and hands back a ready future.
    async fn get_delayed(&self, keys: &[&str]) -> Result<DelayedFetch> {
        let values = self.get_multi(keys).await?;
        let found: Vec<(String, Payload)> = keys
            .iter()
            .zip(values)
            .filter_map(|(k, v)| v.map(|p| (k.to_string(), p)))
            .collect();
        Ok(futures::future::ready(Ok(found)).boxed())
    }

    /// Native per-server statistics.
    async fn stats(&self) -> Result<ServerStats>;

    /// Item metadata from the LRU crawler.
    async fn metadump(&self) -> Result<MetadumpStream> {
        Err(Error::NotImplemented(
            "metadump not implemented for this backend".to_string(),
        ))
    }

    /// Health check - verify backend is accessible.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
