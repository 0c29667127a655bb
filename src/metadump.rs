//! Item metadata from memcached's LRU crawler.
//!
//! `lru_crawler metadump all` streams one line per item:
//!
//! ```text
//! key=1default%3Afoo exp=-1 la=1718210000 cas=42 fetch=no cls=1 size=68
//! ```
//!
//! The dump is best effort. Memcached may move items between LRUs while the
//! crawler runs, so a dump can miss items or report one twice.

use std::collections::BTreeMap;

/// Fields every record is expected to carry.
pub const GUARANTEED_FIELDS: [&str; 5] = ["key", "exp", "la", "cas", "fetch"];

/// One item reported by the crawler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadumpRecord {
    fields: BTreeMap<String, String>,
}

impl MetadumpRecord {
    /// Build a record from `name=value` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        MetadumpRecord {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse one crawler line. Tokens without `=` are kept with an empty value.
    pub fn parse(line: &str) -> Self {
        Self::from_pairs(line.split_whitespace().map(|pair| {
            match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            }
        }))
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Storage key (URL-encoded, as the crawler prints it).
    pub fn key(&self) -> Option<&str> {
        self.get("key")
    }

    /// Expiration timestamp, `-1` for items that never expire.
    pub fn exp(&self) -> Option<i64> {
        self.get("exp").and_then(|v| v.parse().ok())
    }

    /// Last access timestamp.
    pub fn last_access(&self) -> Option<i64> {
        self.get("la").and_then(|v| v.parse().ok())
    }

    pub fn cas(&self) -> Option<u64> {
        self.get("cas").and_then(|v| v.parse().ok())
    }

    /// Whether the item has been fetched since it was stored.
    pub fn fetched(&self) -> Option<bool> {
        match self.get("fetch") {
            Some("yes") => Some(true),
            Some("no") => Some(false),
            _ => None,
        }
    }

    /// Field names beyond the guaranteed ones, sorted.
    pub fn extra_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .keys()
            .map(String::as_str)
            .filter(|k| !GUARANTEED_FIELDS.contains(k))
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// True for the line terminating a dump.
pub(crate) fn is_terminator(line: &str) -> bool {
    let line = line.trim_end();
    line == "END" || line.is_empty()
}
