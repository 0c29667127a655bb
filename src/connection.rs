//! Worker-scoped backend handles and server topology reconciliation.
//!
//! A [`ConnectionManager`] keeps one backend handle per persistent id and
//! reuses it for every request the worker serves. Each acquisition checks
//! the handle against the resolved server list, which is a cheap no-op when
//! nothing changed.

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::servers::{diff_topology, resolve_servers, ServerSpec, SettingsProvider, TopologyDiff};
use dashmap::DashMap;
use std::sync::Arc;

type Factory<B> = Arc<dyn Fn() -> B + Send + Sync>;

/// Push `resolved` to the backend if it differs from the live list.
///
/// Replacing members of a non-empty list also flushes the backend.
///
/// # Errors
///
/// Returns the first backend error; a failed flush is reported after the
/// new list is already in place.
pub async fn apply_topology<B: CacheBackend>(
    backend: &B,
    resolved: &[ServerSpec],
) -> Result<TopologyDiff> {
    let live = backend.server_list().await;
    let diff = diff_topology(&live, resolved);
    if !diff.requires_push() {
        return Ok(diff);
    }

    backend.reset_server_list().await?;
    backend.add_servers(resolved).await?;
    info!(
        "✓ Server topology {:?}: {} -> {} server(s)",
        diff,
        live.len(),
        resolved.len()
    );

    if diff == TopologyDiff::MembersChanged && !live.is_empty() {
        backend.flush().await?;
        warn!("⚠ Server members changed, backend flushed");
    }
    Ok(diff)
}

/// Owns the backend handles of one worker.
#[derive(Clone)]
pub struct ConnectionManager<B: CacheBackend> {
    handles: Arc<DashMap<String, B>>,
    factory: Factory<B>,
}

impl<B: CacheBackend + 'static> ConnectionManager<B> {
    /// Handles are created lazily by `factory`.
    pub fn new(factory: impl Fn() -> B + Send + Sync + 'static) -> Self {
        ConnectionManager {
            handles: Arc::new(DashMap::new()),
            factory: Arc::new(factory),
        }
    }

    /// The handle for `persistent_id`, created on first use.
    pub fn handle(&self, persistent_id: &str) -> B {
        if let Some(existing) = self.handles.get(persistent_id) {
            return existing.clone();
        }
        self.handles
            .entry(persistent_id.to_string())
            .or_insert_with(|| (self.factory)())
            .clone()
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Configure and reconcile the handle for a request.
    ///
    /// Failures are logged and absorbed; the returned handle may have no
    /// servers, in which case every command on it fails and the engine
    /// degrades to request-local caching.
    pub async fn acquire(&self, config: &CacheConfig, settings: &dyn SettingsProvider) -> B {
        let backend = self.handle(&config.persistent_id);

        if backend.is_pristine().await {
            match backend.set_options(&config.transport_options()).await {
                Ok(applied) => debug!(
                    "Transport configured for {}: binary={} no_delay={}",
                    config.persistent_id, applied.binary_protocol, applied.no_delay
                ),
                Err(e) => warn!("Failed to configure transport: {}", e),
            }
        }

        match resolve_servers(settings) {
            Ok(resolved) => {
                if let Err(e) = apply_topology(&backend, &resolved).await {
                    warn!("Failed to apply server list: {}", e);
                }
            }
            Err(e) => warn!("Failed to resolve server list: {}", e),
        }
        backend
    }

    /// Explicit reconciliation, e.g. after an admin edits the server list.
    ///
    /// # Errors
    ///
    /// Returns resolution and backend errors to the caller.
    pub async fn refresh(
        &self,
        persistent_id: &str,
        settings: &dyn SettingsProvider,
    ) -> Result<TopologyDiff> {
        let resolved = resolve_servers(settings)?;
        apply_topology(&self.handle(persistent_id), &resolved).await
    }
}
