//! Integration tests for the worker-level service and server topology.
//!
//! A shared, editable settings provider plays the role of the admin screen
//! where the persisted server list is changed between requests.

use objcache::backend::{CacheBackend, InMemoryBackend};
use objcache::observability::LogMetrics;
use objcache::servers::{ServerEntry, ServerSpec, TopologyDiff};
use objcache::{CacheConfig, CacheService, SettingsProvider, StaticSettings};
use std::sync::{Arc, Mutex};

/// Settings whose persisted server list can be edited while the service runs
#[derive(Clone, Default)]
struct EditableSettings {
    persisted: Arc<Mutex<Option<String>>>,
}

impl EditableSettings {
    fn with(text: &str) -> Self {
        let settings = EditableSettings::default();
        settings.edit(text);
        settings
    }

    fn edit(&self, text: &str) {
        *self.persisted.lock().unwrap() = Some(text.to_string());
    }
}

impl SettingsProvider for EditableSettings {
    fn static_servers(&self) -> Option<Vec<ServerEntry>> {
        None
    }

    fn persisted_servers(&self) -> Option<String> {
        self.persisted.lock().unwrap().clone()
    }
}

fn service(settings: EditableSettings) -> CacheService<InMemoryBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    CacheService::new(InMemoryBackend::unconfigured, CacheConfig::default(), settings)
}

/// Test 1: Replacing a server flushes the shared backend
#[tokio::test]
async fn test_member_change_flushes() {
    let settings = EditableSettings::with("10.0.0.1:11211\n10.0.0.2:11211");
    let service = service(settings.clone());

    let mut cache = service.request().await;
    assert!(cache.set("k", "v", "", 0).await.unwrap());

    settings.edit("10.0.0.1:11211\n10.0.0.3:11211");
    let mut cache = service.request().await;
    assert_eq!(cache.get::<String, _>("k", "", false).await.unwrap(), None);
    assert_eq!(
        cache.backend().server_list().await,
        vec![
            ServerSpec::new("10.0.0.1", 11211, 0),
            ServerSpec::new("10.0.0.3", 11211, 0),
        ]
    );
}

/// Test 2: Growing the pool or changing weights keeps the data
#[tokio::test]
async fn test_count_and_weight_changes_keep_data() {
    let settings = EditableSettings::with("10.0.0.1:11211");
    let service = service(settings.clone());

    let mut cache = service.request().await;
    assert!(cache.set("k", "v", "", 0).await.unwrap());

    settings.edit("10.0.0.1:11211\n10.0.0.2:11211");
    assert_eq!(service.refresh_topology().await.unwrap(), TopologyDiff::CountChanged);

    settings.edit("10.0.0.1:11211 3\n10.0.0.2:11211 1");
    assert_eq!(service.refresh_topology().await.unwrap(), TopologyDiff::Reweighted);

    let mut cache = service.request().await;
    assert_eq!(cache.get::<String, _>("k", "", false).await.unwrap().as_deref(), Some("v"));
    assert_eq!(cache.backend().server_list().await.len(), 2);
}

/// Test 3: Reordering the list is not a change
#[tokio::test]
async fn test_reordered_list_is_same() {
    let settings = EditableSettings::with("10.0.0.1:11211\n10.0.0.2:11211");
    let service = service(settings.clone());
    service.request().await;

    settings.edit("10.0.0.2:11211\n10.0.0.1:11211");
    assert_eq!(service.refresh_topology().await.unwrap(), TopologyDiff::Same);
}

/// Test 4: A broken server list degrades to request-local caching
#[tokio::test]
async fn test_invalid_server_list_degrades() {
    let settings = EditableSettings::with("10.0.0.1:eleven");
    let service = service(settings);

    let mut cache = service.request().await;
    assert!(!cache.set("k", "v", "", 0).await.unwrap());
    assert_eq!(cache.get::<String, _>("k", "", false).await.unwrap(), None);
    assert!(service.refresh_topology().await.is_err());
}

/// Test 5: One handle per persistent id
#[tokio::test]
async fn test_handles_per_persistent_id() {
    let settings = StaticSettings::default();
    let blog = CacheService::new(
        InMemoryBackend::unconfigured,
        CacheConfig::default().with_persistent_id("blog"),
        settings.clone(),
    );
    let mut first = blog.request().await;
    let mut second = blog.request().await;
    assert!(first.set("k", "v", "", 0).await.unwrap());
    assert_eq!(second.get::<String, _>("k", "", false).await.unwrap().as_deref(), Some("v"));
    assert_eq!(blog.connections().len(), 1);

    let shop = blog.connections().handle("shop");
    assert!(shop.is_pristine().await);
    assert_eq!(blog.connections().len(), 2);
}

/// Test 6: Configured preseed is issued on every request
#[tokio::test]
async fn test_configured_preseed() {
    let service = CacheService::new(
        InMemoryBackend::unconfigured,
        CacheConfig::default().with_preseed("alloptions", "options"),
        StaticSettings::default(),
    );

    let mut first = service.request().await;
    assert!(first.set("alloptions", "opts", "options", 0).await.unwrap());

    let mut second = service.request().await;
    let backend = second.backend().clone();
    let before = backend.command_count();
    assert_eq!(
        second.get::<String, _>("alloptions", "options", false).await.unwrap().as_deref(),
        Some("opts")
    );
    assert_eq!(backend.command_count(), before);
}

/// Test 7: Text transport replaces spaces in keys
#[tokio::test]
async fn test_text_transport_key_rewriting() {
    let service = CacheService::new(
        InMemoryBackend::unconfigured,
        CacheConfig::default().with_binary(false),
        StaticSettings::default(),
    )
    .with_metrics(Arc::new(LogMetrics));
    let mut cache = service.request().await;
    assert!(cache.set("two words", "v", "", 0).await.unwrap());
    assert!(cache.backend().get("1default:two_words").await.unwrap().is_some());
}

/// Test 8: A repeated entry cannot hide a removed server
#[tokio::test]
async fn test_repeated_entry_replaces_removed_server() {
    let settings = EditableSettings::with("10.0.0.1:11211\n10.0.0.2:11211");
    let service = service(settings.clone());

    let mut cache = service.request().await;
    assert!(cache.set("k", "v", "", 0).await.unwrap());

    settings.edit("10.0.0.1:11211\n10.0.0.1:11211");
    assert_eq!(service.refresh_topology().await.unwrap(), TopologyDiff::MembersChanged);

    let mut cache = service.request().await;
    assert_eq!(
        cache.backend().server_list().await,
        vec![
            ServerSpec::new("10.0.0.1", 11211, 0),
            ServerSpec::new("10.0.0.1", 11211, 0),
        ]
    );
    assert_eq!(cache.get::<String, _>("k", "", false).await.unwrap(), None);
}
