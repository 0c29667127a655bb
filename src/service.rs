//! Worker-level cache service.
//!
//! Holds everything that outlives a request (backend handles, settings,
//! configuration, group registrations) and hands out a fresh
//! [`ObjectCache`] per request.

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::connection::ConnectionManager;
use crate::engine::{AdditionGate, ObjectCache};
use crate::error::Result;
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::servers::{SettingsProvider, TopologyDiff};
use std::sync::Arc;

/// Worker-level cache service.
///
/// Cheap to clone: every field is shared, so one service can be handed to
/// each request handler.
///
/// # Example
///
/// ```ignore
/// use objcache::{CacheConfig, CacheService, backend::InMemoryBackend, servers::StaticSettings};
///
/// let service = CacheService::new(
///     InMemoryBackend::unconfigured,
///     CacheConfig::from_env(),
///     StaticSettings::default(),
/// )
/// .with_global_groups(["users", "userlogins"])
/// .with_non_persistent_groups(["counts"]);
///
/// // Per request
/// let mut cache = service.request().await;
/// cache.set("alloptions", &options, "options", 0).await?;
/// ```
#[derive(Clone)]
pub struct CacheService<B: CacheBackend> {
    connections: ConnectionManager<B>,
    config: Arc<CacheConfig>,
    settings: Arc<dyn SettingsProvider>,
    gate: AdditionGate,
    metrics: Arc<dyn CacheMetrics>,
    global_groups: Arc<Vec<String>>,
    non_persistent_groups: Arc<Vec<String>>,
}

impl<B: CacheBackend + 'static> CacheService<B> {
    /// Create a service whose backend handles come from `factory`.
    pub fn new(
        factory: impl Fn() -> B + Send + Sync + 'static,
        config: CacheConfig,
        settings: impl SettingsProvider + 'static,
    ) -> Self {
        CacheService {
            connections: ConnectionManager::new(factory),
            config: Arc::new(config),
            settings: Arc::new(settings),
            gate: AdditionGate::new(),
            metrics: Arc::new(NoOpMetrics),
            global_groups: Arc::new(Vec::new()),
            non_persistent_groups: Arc::new(Vec::new()),
        }
    }

    /// Create a new cache service with custom metrics.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Groups registered as global on every engine.
    pub fn with_global_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.global_groups).extend(groups.into_iter().map(Into::into));
        self
    }

    /// Groups registered as non-persistent on every engine.
    pub fn with_non_persistent_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.non_persistent_groups).extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The suspend-addition signal shared with every engine.
    pub fn gate(&self) -> &AdditionGate {
        &self.gate
    }

    pub fn connections(&self) -> &ConnectionManager<B> {
        &self.connections
    }

    /// Build the engine for one request.
    ///
    /// Reconciles the backend handle with the configured servers and issues
    /// the configured preseed. Never fails: an unusable backend yields an
    /// engine that caches within the request only.
    pub async fn request(&self) -> ObjectCache<B> {
        let backend = self.connections.acquire(&self.config, &*self.settings).await;
        let binary = backend.options().await.binary_protocol;

        let mut engine = ObjectCache::new(backend, self.config.key_codec(binary))
            .with_gate(self.gate.clone())
            .with_metrics(Arc::clone(&self.metrics));
        engine.add_global_groups(self.global_groups.iter().cloned());
        engine.add_non_persistent_groups(self.non_persistent_groups.iter().cloned());

        if !self.config.preseed.is_empty() {
            let pairs: Vec<(&str, &str)> = self
                .config
                .preseed
                .iter()
                .map(|(key, group)| (key.as_str(), group.as_str()))
                .collect();
            if let Err(e) = engine.preseed(&pairs).await {
                warn!("Preseed skipped: {}", e);
            }
        }
        engine
    }

    /// Push the currently configured server list to the backend handle.
    ///
    /// # Errors
    ///
    /// Returns resolution and backend errors, unlike [`request`](Self::request).
    pub async fn refresh_topology(&self) -> Result<TopologyDiff> {
        self.connections
            .refresh(&self.config.persistent_id, &*self.settings)
            .await
    }
}
