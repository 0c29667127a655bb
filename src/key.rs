//! Storage key derivation.
//!
//! Maps an application `(key, group)` pair onto a memcached-safe key:
//!
//! ```text
//! prefix(group) + group + ":" + key + md5(salt)
//! ```
//!
//! where `prefix(group)` is the global prefix for global groups and the
//! scope prefix (usually the site id) otherwise. Keys longer than memcached's
//! 250 byte limit keep their first 218 bytes and get the MD5 of the full key
//! appended.

use crate::error::{Error, Result};
use crate::groups::{normalize_group, GroupRegistry};
use md5::{Digest, Md5};
use std::fmt::Display;

/// Memcached's key length limit in bytes.
pub const MAX_KEY_LENGTH: usize = 250;

/// Bytes of the original key kept when truncating.
pub const TRUNCATED_KEY_LENGTH: usize = 218;

/// Default prefix for keys in global groups.
pub const DEFAULT_GLOBAL_PREFIX: &str = "global";

/// Hex MD5 of arbitrary bytes.
pub(crate) fn md5_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}

/// Derives storage keys from logical keys.
///
/// # Example
///
/// ```
/// use objcache::key::KeyCodec;
/// use objcache::groups::GroupRegistry;
///
/// let codec = KeyCodec::new("1");
/// let mut groups = GroupRegistry::new();
/// groups.add_global(["users"]);
///
/// assert_eq!(
///     codec.resolve(&"alloptions", "options", &groups, false).unwrap(),
///     "1options:alloptions"
/// );
/// assert_eq!(codec.resolve(&42, "users", &groups, false).unwrap(), "globalusers:42");
/// assert_eq!(codec.resolve(&"x", "", &groups, false).unwrap(), "1default:x");
/// ```
#[derive(Clone, Debug)]
pub struct KeyCodec {
    scope_prefix: String,
    global_prefix: String,
    salt_hash: String,
    replace_spaces: bool,
}

impl KeyCodec {
    /// Codec for the given scope (tenant/site) prefix.
    ///
    /// Defaults: global prefix `"global"`, no salt, binary transport (spaces
    /// kept as-is).
    pub fn new(scope_prefix: impl Into<String>) -> Self {
        KeyCodec {
            scope_prefix: scope_prefix.into(),
            global_prefix: DEFAULT_GLOBAL_PREFIX.to_string(),
            salt_hash: String::new(),
            replace_spaces: false,
        }
    }

    pub fn with_global_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.global_prefix = prefix.into();
        self
    }

    /// Salt appended (as an MD5) to every key. Empty means no salt.
    pub fn with_salt(mut self, salt: &str) -> Self {
        self.salt_hash = if salt.is_empty() {
            String::new()
        } else {
            md5_hex(salt)
        };
        self
    }

    /// Whether keys travel over the binary protocol.
    ///
    /// The text protocol forbids spaces and control characters in keys, so
    /// they are replaced with `_` unless binary transport is in effect.
    pub fn with_binary_transport(mut self, binary: bool) -> Self {
        self.replace_spaces = !binary;
        self
    }

    /// Resolve a logical key to its storage key.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyKey` if `key` renders as an empty string.
    pub fn resolve(
        &self,
        key: &dyn Display,
        group: &str,
        groups: &GroupRegistry,
        force_global: bool,
    ) -> Result<String> {
        let key = key.to_string();
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let group = normalize_group(group);
        let prefix = if force_global || groups.is_global(group) {
            &self.global_prefix
        } else {
            &self.scope_prefix
        };

        let mut full = String::with_capacity(
            prefix.len() + group.len() + 1 + key.len() + self.salt_hash.len(),
        );
        full.push_str(prefix);
        full.push_str(group);
        full.push(':');
        full.push_str(&key);
        full.push_str(&self.salt_hash);

        if self.replace_spaces {
            full = full
                .chars()
                .map(|c| if c == ' ' || c.is_ascii_control() { '_' } else { c })
                .collect();
        }

        Ok(Self::fit_length(full))
    }

    fn fit_length(key: String) -> String {
        if key.len() <= MAX_KEY_LENGTH {
            return key;
        }

        let mut end = TRUNCATED_KEY_LENGTH;
        while !key.is_char_boundary(end) {
            end -= 1;
        }

        let hash = md5_hex(&key);
        let mut truncated = String::with_capacity(end + hash.len());
        truncated.push_str(&key[..end]);
        truncated.push_str(&hash);
        truncated
    }
}
