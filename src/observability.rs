//! Observability hooks for cache operations.
//!
//! Implement the `CacheMetrics` trait to feed cache statistics into your
//! monitoring system:
//!
//! ```ignore
//! use objcache::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _key: &str, _duration: Duration) {
//!         // counter!("objcache_hits").inc();
//!     }
//!     // ... implement other methods
//! }
//!
//! // let service = CacheService::new(backend, config, settings)
//! //     .with_metrics(Arc::new(PrometheusMetrics));
//! ```
//!
//! The default trait methods log via the `log` crate; `NoOpMetrics` discards
//! everything.
//!
//! # Metrics Methods
//!
//! - `record_hit()` - Read answered, from the local mirror or the backend
//! - `record_miss()` - Read found nothing
//! - `record_set()` - Write accepted
//! - `record_delete()` - Delete accepted
//! - `record_error()` - Backend failure absorbed by the engine
//!
//! Methods receive the storage key and timing or error information.

use std::time::Duration;

/// Trait for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Record a cache hit.
    fn record_hit(&self, key: &str, duration: Duration) {
        debug!("Cache HIT: {} took {:?}", key, duration);
    }

    /// Record a cache miss.
    fn record_miss(&self, key: &str, duration: Duration) {
        debug!("Cache MISS: {} took {:?}", key, duration);
    }

    /// Record a cache set operation.
    fn record_set(&self, key: &str, duration: Duration) {
        debug!("Cache SET: {} took {:?}", key, duration);
    }

    /// Record a cache delete operation.
    fn record_delete(&self, key: &str, duration: Duration) {
        debug!("Cache DELETE: {} took {:?}", key, duration);
    }

    /// Record an absorbed backend error.
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Metrics implementation that logs through the trait defaults.
#[derive(Clone, Default)]
pub struct LogMetrics;

impl CacheMetrics for LogMetrics {}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str, _duration: Duration) {}
    fn record_miss(&self, _key: &str, _duration: Duration) {}
    fn record_set(&self, _key: &str, _duration: Duration) {}
    fn record_delete(&self, _key: &str, _duration: Duration) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}
