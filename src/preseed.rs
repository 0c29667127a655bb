//! Pipelined prefetch of hot keys.
//!
//! A preseed issues one delayed multi-get when a request starts and folds
//! the answers into the [`LocalMirror`] on first use. Nothing else may be
//! sent to the backend while the fetch is outstanding; the engine enforces
//! this by collecting before every backend command.

use crate::backend::{CacheBackend, DelayedFetch};
use crate::error::Result;
use crate::mirror::LocalMirror;
use std::collections::HashSet;

struct Outstanding {
    keys: Vec<String>,
    fetch: DelayedFetch,
}

#[derive(Default)]
pub struct Preseed {
    outstanding: Option<Outstanding>,
}

impl Preseed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start fetching `keys` without waiting for the answer.
    ///
    /// The caller must [`collect`](Self::collect) any outstanding fetch
    /// first; issuing while one is pending drops the older fetch.
    pub async fn issue<B: CacheBackend>(&mut self, backend: &B, keys: Vec<String>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if self.outstanding.is_some() {
            warn!("Preseed issued while another fetch was outstanding; dropping the older one");
        }

        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let fetch = backend.get_delayed(&refs).await?;
        debug!("Preseed issued for {} keys", keys.len());
        self.outstanding = Some(Outstanding { keys, fetch });
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Wait for the outstanding fetch and fold it into `mirror`.
    ///
    /// Keys that came back become present, the rest are recorded as missing.
    /// A failed fetch is logged and leaves every key unknown. Returns the
    /// number of keys settled.
    pub async fn collect(&mut self, mirror: &mut LocalMirror) -> usize {
        let Some(Outstanding { keys, fetch }) = self.outstanding.take() else {
            return 0;
        };

        match fetch.await {
            Ok(found) => {
                let mut returned = HashSet::with_capacity(found.len());
                for (key, payload) in found {
                    returned.insert(key.clone());
                    mirror.put(key, payload);
                }
                for key in keys.iter().filter(|k| !returned.contains(*k)) {
                    mirror.put_missing(key.clone());
                }
                debug!(
                    "✓ Preseed collected {} of {} keys",
                    returned.len(),
                    keys.len()
                );
                keys.len()
            }
            Err(e) => {
                warn!("Preseed fetch failed, {} keys stay unknown: {}", keys.len(), e);
                0
            }
        }
    }
}
