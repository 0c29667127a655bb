//! Value payloads: how cached values are laid out in the backend.
//!
//! Every value handed to the cache is serialized into a [`Payload`]: the raw
//! bytes stored in memcached plus the memcached `flags` word describing them.
//! Two layouts exist:
//!
//! ```text
//! FLAG_INTEGER   ASCII decimal, e.g. b"42"
//!
//! FLAG_ENVELOPE  ┌─────────────────┬─────────────────┬──────────────────────────┐
//!                │  MAGIC (4 bytes)│ VERSION (varint)│POSTCARD PAYLOAD (N bytes)│
//!                └─────────────────┴─────────────────┴──────────────────────────┘
//!                  "CKIT"              u32                postcard::to_allocvec(T)
//! ```
//!
//! Integers are kept as decimal text because memcached's `incr`/`decr`
//! only operate on that representation. Everything else goes through a
//! versioned Postcard envelope.
//!
//! Payloads own their bytes. Reading a value always decodes a fresh copy,
//! so a caller mutating a returned value can never affect what the local
//! mirror (or anyone else in the request) sees next.
//!
//! # Example
//!
//! ```rust
//! use objcache::serialization::{decode, encode, FLAG_INTEGER};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! # fn main() -> objcache::Result<()> {
//! let user = User { id: 1, name: "Alice".to_string() };
//! let payload = encode(&user)?;
//! let back: User = decode(&payload)?;
//! assert_eq!(user, back);
//!
//! let counter = encode(&7_i64)?;
//! assert_eq!(counter.flags, FLAG_INTEGER);
//! assert_eq!(counter.data, b"7");
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic header for envelope entries: b"CKIT"
///
/// Any envelope without this magic is rejected during deserialization.
pub const CACHE_MAGIC: [u8; 4] = *b"CKIT";

/// Current schema version.
///
/// Increment this constant when making breaking changes to cached types.
/// Entries written under another version are treated as misses.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Flags word for Postcard envelopes.
pub const FLAG_ENVELOPE: u32 = 0;

/// Flags word for ASCII decimal integers.
pub const FLAG_INTEGER: u32 = 1;

/// Serialized value as stored in the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    /// Raw bytes stored under the key
    pub data: Vec<u8>,
    /// Memcached flags word
    pub flags: u32,
}

impl Payload {
    /// Create a payload from raw parts.
    pub fn new(data: Vec<u8>, flags: u32) -> Self {
        Payload { data, flags }
    }

    /// Decimal integer payload.
    pub fn integer(value: i64) -> Self {
        Payload {
            data: value.to_string().into_bytes(),
            flags: FLAG_INTEGER,
        }
    }

    /// Interpret the payload as an integer, if it is one.
    ///
    /// Memcached pads in-place `decr` results with trailing spaces, so
    /// surrounding whitespace is ignored.
    pub fn as_integer(&self) -> Option<i64> {
        if self.flags != FLAG_INTEGER {
            return None;
        }
        std::str::from_utf8(&self.data)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
    }

    /// Size of the stored bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no bytes are stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Versioned envelope for non-integer entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"CKIT"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The actual cached data
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize a value into a payload.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Payload> {
    if let Ok(serde_json::Value::Number(n)) = serde_json::to_value(value) {
        if n.is_i64() || n.is_u64() {
            return Ok(Payload::new(n.to_string().into_bytes(), FLAG_INTEGER));
        }
    }

    Ok(Payload::new(serialize_for_cache(value)?, FLAG_ENVELOPE))
}

/// Deserialize a fresh value out of a payload.
///
/// # Errors
///
/// - `Error::DeserializationError`: payload does not decode as `T`
/// - `Error::InvalidCacheEntry`: invalid envelope magic
/// - `Error::VersionMismatch`: envelope written by another schema version
pub fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T> {
    match payload.flags {
        FLAG_INTEGER => {
            let text = std::str::from_utf8(&payload.data)
                .map_err(|e| Error::DeserializationError(e.to_string()))?;
            serde_json::from_str(text.trim())
                .map_err(|e| Error::DeserializationError(e.to_string()))
        }
        _ => deserialize_from_cache(&payload.data),
    }
}

/// Serialize a value into a Postcard envelope.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        log::error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize a Postcard envelope with validation.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: Invalid magic header
/// - `Error::VersionMismatch`: Schema version mismatch
/// - `Error::DeserializationError`: Corrupted Postcard payload
pub fn deserialize_from_cache<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        log::debug!("Cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        log::warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC,
            envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        log::warn!(
            "Cache version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION,
            envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}
