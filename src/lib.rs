//! # objcache
//!
//! A request-scoped object cache for web applications, backed by memcached.
//!
//! ## Features
//!
//! - **Local Mirror:** Every value read or written in a request is remembered
//!   in-process, including "known missing" keys, so repeated lookups never
//!   reach the network
//! - **Group Namespacing:** Keys are namespaced by group and by scope (site or
//!   tenant); global groups are shared by every scope
//! - **Non-Persistent Groups:** Groups that never leave the process
//! - **Preseed:** Hot keys are fetched in one pipelined request when a
//!   request starts
//! - **Topology Reconciliation:** Backend handles are reused per worker and
//!   follow server list edits, flushing when members change
//! - **Graceful Degradation:** Backend outages turn reads into misses and
//!   writes into `false`; the request keeps working
//!
//! ## Quick Start
//!
//! Build one [`CacheService`] per worker and ask it for an engine per request:
//!
//! ```ignore
//! use objcache::{CacheConfig, CacheService, EnvSettings, backend::InMemoryBackend};
//!
//! let service = CacheService::new(
//!     InMemoryBackend::unconfigured,
//!     CacheConfig::from_env().with_preseed("alloptions", "options"),
//!     EnvSettings::from_env(),
//! )
//! .with_global_groups(["users", "usermeta"])
//! .with_non_persistent_groups(["counts", "plugins"]);
//!
//! // In a request handler
//! let mut cache = service.request().await;
//! if cache.get::<Options, _>("alloptions", "options", false).await?.is_none() {
//!     let options = load_options().await;
//!     cache.add("alloptions", &options, "options", 0).await?;
//! }
//! ```
//!
//! With the `memcached` feature, use
//! `|| MemcachedBackend::unconfigured(MemcachedBackend::pool_size_from_env())`
//! as the factory.
//!
//! ### Standalone engine
//!
//! [`ObjectCache`] can be driven directly when the service layer is not
//! needed:
//!
//! ```ignore
//! use objcache::{ObjectCache, backend::InMemoryBackend, key::KeyCodec};
//!
//! let mut cache = ObjectCache::new(InMemoryBackend::new(), KeyCodec::new("1"));
//! cache.set("k", "v", "", 0).await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod expiration;
pub mod groups;
pub mod key;
pub mod metadump;
pub mod mirror;
pub mod nonpersistent;
pub mod observability;
pub mod preseed;
pub mod serialization;
pub mod servers;
pub mod service;

// Re-exports for convenience
pub use backend::CacheBackend;
pub use config::{CacheConfig, EnvSettings};
pub use connection::ConnectionManager;
pub use engine::{AdditionGate, Feature, ObjectCache};
pub use error::{Error, Result};
pub use metadump::MetadumpRecord;
pub use servers::{ServerSpec, SettingsProvider, StaticSettings};
pub use service::CacheService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
