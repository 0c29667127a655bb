//! Memcached cache backend implementation.
//!
//! One connection pool per server; keys are routed with a [`HashRing`].
//! Commands the pooled client does not expose (`replace`,
//! `lru_crawler metadump`) go over a short-lived text protocol session.

use super::ring::HashRing;
use super::{CacheBackend, DelayedFetch, MetadumpStream, ServerStats, TransportOptions};
use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::error::{Error, Result};
use crate::metadump::{is_terminator, MetadumpRecord};
use crate::serialization::Payload;
use crate::servers::{parse_server_line, ServerSpec};
use async_memcached::AsciiProtocol;
use deadpool_memcached::{Manager, Pool};
use futures::{FutureExt, StreamExt};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::sync::RwLock;

/// Default Memcached connection pool size.
/// Formula: (CPU cores × 2) + 1
/// For 8-core systems: 16 connections is optimal
/// Override with MEMCACHED_POOL_SIZE environment variable
const DEFAULT_POOL_SIZE: u32 = 16;

/// Configuration for Memcached backend.
#[derive(Clone, Debug)]
pub struct MemcachedConfig {
    pub servers: Vec<ServerSpec>,
    pub connection_timeout: Duration,
    pub pool_size: u32,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            servers: vec![ServerSpec::default()],
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Checks a pooled connection out, bounded by the connect timeout.
macro_rules! checkout {
    ($pool:expr, $timeout:expr) => {
        match tokio::time::timeout($timeout, $pool.get()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(Error::BackendError(format!(
                    "Failed to get Memcached connection: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "Memcached connect timed out after {:?}",
                    $timeout
                )))
            }
        }
    };
}

/// True when the client reported the given status (e.g. "not found").
fn status_is(err: &async_memcached::Error, status: &str) -> bool {
    err.to_string().to_lowercase().contains(status)
}

#[derive(Clone)]
struct Node {
    spec: ServerSpec,
    pool: Pool,
}

struct HandleState {
    nodes: Vec<Node>,
    ring: HashRing,
    options: Option<TransportOptions>,
    /// Used until transport options are applied.
    fallback_timeout: Duration,
}

impl HandleState {
    fn connect_timeout(&self) -> Duration {
        self.options
            .as_ref()
            .map_or(self.fallback_timeout, |o| o.connect_timeout)
    }

    fn rebuild_ring(&mut self) {
        let specs: Vec<ServerSpec> = self.nodes.iter().map(|n| n.spec.clone()).collect();
        self.ring = HashRing::new(&specs);
    }
}

/// Memcached backend with connection pooling and async operations.
///
/// # Example
///
/// ```no_run
/// # use objcache::backend::{MemcachedBackend, MemcachedConfig, CacheBackend};
/// # use objcache::serialization::encode;
/// # use objcache::error::Result;
/// # async fn example() -> Result<()> {
/// let backend = MemcachedBackend::new(MemcachedConfig::default()).await?;
/// backend.set("key", &encode("value")?, 0).await?;
/// let value = backend.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemcachedBackend {
    state: Arc<RwLock<HandleState>>,
    pool_size: u32,
}

impl MemcachedBackend {
    /// Create new Memcached backend from configuration.
    ///
    /// Pools connect lazily, so an empty or unreachable server list is not
    /// an error here.
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub async fn new(config: MemcachedConfig) -> Result<Self> {
        let backend = Self::unconfigured(config.pool_size);
        backend.add_servers(&config.servers).await?;
        backend.state.write().await.fallback_timeout = config.connection_timeout;

        info!(
            "✓ Memcached backend initialized with {} server(s) (pool size: {})",
            config.servers.len(),
            config.pool_size
        );
        Ok(backend)
    }

    /// A pristine handle with no servers, for use as a
    /// [`ConnectionManager`](crate::connection::ConnectionManager) factory.
    pub fn unconfigured(pool_size: u32) -> Self {
        MemcachedBackend {
            state: Arc::new(RwLock::new(HandleState {
                nodes: Vec::new(),
                ring: HashRing::default(),
                options: None,
                fallback_timeout: DEFAULT_CONNECT_TIMEOUT,
            })),
            pool_size,
        }
    }

    /// Pool size from `MEMCACHED_POOL_SIZE`, or the default of 16.
    pub fn pool_size_from_env() -> u32 {
        std::env::var("MEMCACHED_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE)
    }

    /// Create from a `host:port` address directly.
    ///
    /// Pool size is determined by:
    /// 1. `MEMCACHED_POOL_SIZE` environment variable (if set)
    /// 2. `DEFAULT_POOL_SIZE` constant (16)
    ///
    /// # Errors
    /// Returns `Err` if the address is malformed
    pub async fn from_server(addr: &str) -> Result<Self> {
        let config = MemcachedConfig {
            servers: vec![parse_server_line(addr)?],
            pool_size: Self::pool_size_from_env(),
            ..Default::default()
        };
        Self::new(config).await
    }

    fn build_pool(&self, spec: &ServerSpec) -> Result<Pool> {
        Pool::builder(Manager::new(spec.address()))
            .max_size(self.pool_size as usize)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))
    }

    async fn route(&self, key: &str) -> Result<(Node, Duration)> {
        let state = self.state.read().await;
        let index = state
            .ring
            .locate(key)
            .ok_or_else(|| Error::BackendError("no servers configured".to_string()))?;
        Ok((state.nodes[index].clone(), state.connect_timeout()))
    }

    /// Groups keys by owning node, keeping each key's input position.
    async fn partition<'k>(
        &self,
        keys: &[&'k str],
    ) -> Result<(Vec<(Node, Vec<(usize, &'k str)>)>, Duration)> {
        let state = self.state.read().await;
        if state.ring.is_empty() {
            return Err(Error::BackendError("no servers configured".to_string()));
        }
        let mut groups: HashMap<usize, Vec<(usize, &'k str)>> = HashMap::new();
        for (position, key) in keys.iter().enumerate() {
            if let Some(index) = state.ring.locate(key) {
                groups.entry(index).or_default().push((position, *key));
            }
        }
        let routed = groups
            .into_iter()
            .map(|(index, keys)| (state.nodes[index].clone(), keys))
            .collect();
        Ok((routed, state.connect_timeout()))
    }

    async fn nodes(&self) -> (Vec<Node>, Duration) {
        let state = self.state.read().await;
        (state.nodes.clone(), state.connect_timeout())
    }
}

async fn fetch_from_node(
    node: &Node,
    keys: &[&str],
    timeout: Duration,
) -> Result<Vec<(String, Payload)>> {
    let mut conn = checkout!(node.pool, timeout);

    // get_multi reports "not found" when none of the keys exist
    let values = match conn.get_multi(keys).await {
        Ok(values) => values,
        Err(e) if status_is(&e, "not found") => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::BackendError(format!(
                "Memcached MGET failed on {}: {}",
                node.spec.address(),
                e
            )))
        }
    };

    Ok(values
        .into_iter()
        .filter_map(|value| {
            let key = String::from_utf8_lossy(&value.key).to_string();
            let flags = value.flags.unwrap_or(0);
            value.data.map(|data| (key, Payload::new(data, flags)))
        })
        .collect())
}

/// Opens a text protocol session to `address`.
async fn open_session(address: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(Error::Timeout(format!(
            "Memcached connect to {} timed out after {:?}",
            address, timeout
        ))),
    }
}

async fn replace_on_node(
    node: &Node,
    key: &str,
    payload: &Payload,
    expiration: i64,
    timeout: Duration,
) -> Result<bool> {
    let stream = open_session(&node.spec.address(), timeout).await?;
    let (read, mut write) = stream.into_split();

    let mut command = format!(
        "replace {} {} {} {}\r\n",
        key,
        payload.flags,
        expiration,
        payload.len()
    )
    .into_bytes();
    command.extend_from_slice(&payload.data);
    command.extend_from_slice(b"\r\n");
    write.write_all(&command).await?;

    let mut reply = String::new();
    BufReader::new(read).read_line(&mut reply).await?;
    match reply.trim_end() {
        "STORED" => Ok(true),
        "NOT_STORED" => Ok(false),
        other => Err(Error::BackendError(format!(
            "Memcached REPLACE failed for key {}: {}",
            key, other
        ))),
    }
}

type DumpLines = Lines<BufReader<TcpStream>>;

async fn open_dump(address: &str, timeout: Duration) -> Result<DumpLines> {
    let mut stream = open_session(address, timeout).await?;
    stream.write_all(b"lru_crawler metadump all\r\n").await?;
    Ok(BufReader::new(stream).lines())
}

struct DumpState {
    pending: VecDeque<String>,
    current: Option<DumpLines>,
    timeout: Duration,
}

impl CacheBackend for MemcachedBackend {
    async fn get(&self, key: &str) -> Result<Option<Payload>> {
        let (node, timeout) = self.route(key).await?;
        let mut conn = checkout!(node.pool, timeout);

        match conn.get(key).await {
            Ok(Some(value)) => {
                debug!("✓ Memcached GET {} -> HIT", key);
                let flags = value.flags.unwrap_or(0);
                Ok(value.data.map(|data| Payload::new(data, flags)))
            }
            Ok(None) => {
                debug!("✓ Memcached GET {} -> MISS", key);
                Ok(None)
            }
            Err(e) if status_is(&e, "not found") => Ok(None),
            Err(e) => Err(Error::BackendError(format!(
                "Memcached GET failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn get_multi(&self, keys: &[&str]) -> Result<Vec<Option<Payload>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let (routed, timeout) = self.partition(keys).await?;
        let mut results = vec![None; keys.len()];
        for (node, group) in routed {
            let node_keys: Vec<&str> = group.iter().map(|(_, k)| *k).collect();
            let mut found: HashMap<String, Payload> = fetch_from_node(&node, &node_keys, timeout)
                .await?
                .into_iter()
                .collect();
            for (position, key) in group {
                results[position] = found.remove(key);
            }
        }

        debug!("✓ Memcached MGET {} keys (batch operation)", keys.len());
        Ok(results)
    }

    async fn set(&self, key: &str, payload: &Payload, expiration: i64) -> Result<()> {
        let (node, timeout) = self.route(key).await?;
        let mut conn = checkout!(node.pool, timeout);

        // set(key, value, ttl, flags)
        conn.set(key, payload.data.as_slice(), Some(expiration), Some(payload.flags))
            .await
            .map_err(|e| {
                Error::BackendError(format!("Memcached SET failed for key {}: {}", key, e))
            })?;

        debug!("✓ Memcached SET {} (exp: {})", key, expiration);
        Ok(())
    }

    async fn add(&self, key: &str, payload: &Payload, expiration: i64) -> Result<bool> {
        let (node, timeout) = self.route(key).await?;
        let mut conn = checkout!(node.pool, timeout);

        match conn
            .add(key, payload.data.as_slice(), Some(expiration), Some(payload.flags))
            .await
        {
            Ok(()) => {
                debug!("✓ Memcached ADD {}", key);
                Ok(true)
            }
            Err(e) if status_is(&e, "not stored") => Ok(false),
            Err(e) => Err(Error::BackendError(format!(
                "Memcached ADD failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn replace(&self, key: &str, payload: &Payload, expiration: i64) -> Result<bool> {
        let (node, timeout) = self.route(key).await?;
        let stored = replace_on_node(&node, key, payload, expiration, timeout).await?;
        debug!("✓ Memcached REPLACE {} -> {}", key, stored);
        Ok(stored)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let (node, timeout) = self.route(key).await?;
        let mut conn = checkout!(node.pool, timeout);

        match conn.delete(key).await {
            Ok(()) => {
                debug!("✓ Memcached DELETE {}", key);
                Ok(true)
            }
            Err(e) if status_is(&e, "not found") => Ok(false),
            Err(e) => Err(Error::BackendError(format!(
                "Memcached DELETE failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<Option<u64>> {
        let (node, timeout) = self.route(key).await?;
        let mut conn = checkout!(node.pool, timeout);

        let result = if delta >= 0 {
            conn.increment(key, delta as u64).await
        } else {
            conn.decrement(key, delta.unsigned_abs()).await
        };
        match result {
            Ok(value) => {
                debug!("✓ Memcached INCR {} by {} -> {}", key, delta, value);
                Ok(Some(value))
            }
            Err(e) if status_is(&e, "not found") => Ok(None),
            Err(e) => Err(Error::BackendError(format!(
                "Memcached INCR failed for key {}: {}",
                key, e
            ))),
        }
    }

    async fn flush(&self) -> Result<()> {
        let (nodes, timeout) = self.nodes().await;
        if nodes.is_empty() {
            return Err(Error::BackendError("no servers configured".to_string()));
        }
        for node in nodes {
            let mut conn = checkout!(node.pool, timeout);
            conn.flush_all()
                .await
                .map_err(|e| Error::BackendError(format!("Memcached FLUSH_ALL failed: {}", e)))?;
        }

        warn!("⚠ Memcached FLUSH_ALL executed - all cache cleared!");
        Ok(())
    }

    async fn server_list(&self) -> Vec<ServerSpec> {
        self.state
            .read()
            .await
            .nodes
            .iter()
            .map(|n| n.spec.clone())
            .collect()
    }

    async fn add_servers(&self, servers: &[ServerSpec]) -> Result<()> {
        let mut nodes = Vec::with_capacity(servers.len());
        for spec in servers {
            nodes.push(Node {
                spec: spec.clone(),
                pool: self.build_pool(spec)?,
            });
        }
        let mut state = self.state.write().await;
        state.nodes.extend(nodes);
        state.rebuild_ring();
        Ok(())
    }

    async fn reset_server_list(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.nodes.clear();
        state.rebuild_ring();
        Ok(())
    }

    async fn is_pristine(&self) -> bool {
        self.state.read().await.options.is_none()
    }

    async fn set_options(&self, options: &TransportOptions) -> Result<TransportOptions> {
        let mut effective = options.clone();
        if effective.binary_protocol {
            warn!("Memcached binary protocol unavailable, staying on the text protocol");
            effective.binary_protocol = false;
        }
        self.state.write().await.options = Some(effective.clone());
        Ok(effective)
    }

    async fn options(&self) -> TransportOptions {
        self.state.read().await.options.clone().unwrap_or_default()
    }

    async fn get_delayed(&self, keys: &[&str]) -> Result<DelayedFetch> {
        let (routed, timeout) = self.partition(keys).await?;
        let batches: Vec<(Node, Vec<String>)> = routed
            .into_iter()
            .map(|(node, group)| (node, group.into_iter().map(|(_, k)| k.to_string()).collect()))
            .collect();

        let task = tokio::spawn(async move {
            let mut found = Vec::new();
            for (node, keys) in batches {
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                found.extend(fetch_from_node(&node, &keys, timeout).await?);
            }
            Ok::<_, Error>(found)
        });

        Ok(async move {
            task.await
                .map_err(|e| Error::BackendError(format!("delayed fetch aborted: {}", e)))?
        }
        .boxed())
    }

    async fn stats(&self) -> Result<ServerStats> {
        let (nodes, timeout) = self.nodes().await;
        let mut stats = ServerStats::new();
        for node in nodes {
            let mut conn = checkout!(node.pool, timeout);
            let values = conn.stats().await.map_err(|e| {
                Error::BackendError(format!(
                    "Memcached STATS failed on {}: {}",
                    node.spec.address(),
                    e
                ))
            })?;
            stats.insert(
                node.spec.address(),
                values.into_iter().collect::<BTreeMap<String, String>>(),
            );
        }
        Ok(stats)
    }

    async fn metadump(&self) -> Result<MetadumpStream> {
        let (nodes, timeout) = self.nodes().await;
        if nodes.is_empty() {
            return Err(Error::BackendError("no servers configured".to_string()));
        }
        let state = DumpState {
            pending: nodes.iter().map(|n| n.spec.address()).collect(),
            current: None,
            timeout,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if st.current.is_none() {
                    let address = st.pending.pop_front()?;
                    match open_dump(&address, st.timeout).await {
                        Ok(lines) => st.current = Some(lines),
                        Err(e) => return Some((Err(e), st)),
                    }
                }
                let lines = st.current.as_mut()?;
                match lines.next_line().await {
                    Ok(Some(line)) if line.starts_with("key=") => {
                        return Some((Ok(MetadumpRecord::parse(&line)), st));
                    }
                    Ok(Some(line)) if is_terminator(&line) => st.current = None,
                    Ok(Some(line)) => {
                        st.current = None;
                        return Some((
                            Err(Error::BackendError(format!(
                                "Memcached metadump failed: {}",
                                line.trim_end()
                            ))),
                            st,
                        ));
                    }
                    Ok(None) => st.current = None,
                    Err(e) => {
                        st.current = None;
                        return Some((Err(e.into()), st));
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn health_check(&self) -> Result<bool> {
        let (node, timeout) = match self.route("__health_check__").await {
            Ok(routed) => routed,
            Err(_) => return Ok(false),
        };
        match tokio::time::timeout(timeout, node.pool.get()).await {
            Ok(Ok(mut conn)) => Ok(conn.get("__health_check__").await.is_ok()),
            _ => Ok(false),
        }
    }
}
