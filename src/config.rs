//! Cache configuration.
//!
//! [`CacheConfig`] carries the per-deployment knobs; [`EnvSettings`] is a
//! [`SettingsProvider`] reading the server list from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `OBJCACHE_PERSISTENT_ID` | `objcache` |
//! | `OBJCACHE_SCOPE_PREFIX` | `1` |
//! | `OBJCACHE_GLOBAL_PREFIX` | `global` |
//! | `OBJCACHE_KEY_SALT` | empty |
//! | `OBJCACHE_USE_BINARY` | `true` |
//! | `OBJCACHE_CONNECT_TIMEOUT_MS` | `1000` |
//! | `OBJCACHE_SERVERS` | unset (comma or newline separated `host:port weight`) |
//! | `OBJCACHE_SERVERS_FILE` | unset (persisted server list, one entry per line) |

use crate::backend::TransportOptions;
use crate::key::{KeyCodec, DEFAULT_GLOBAL_PREFIX};
use crate::servers::{ServerEntry, SettingsProvider};
use std::path::PathBuf;
use std::time::Duration;

/// Default persistent-connection id.
pub const DEFAULT_PERSISTENT_ID: &str = "objcache";

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default scope prefix, the id of the first site.
pub const DEFAULT_SCOPE_PREFIX: &str = "1";

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Backend handles are shared per persistent id.
    pub persistent_id: String,
    /// Prefix for keys in non-global groups (tenant or site id).
    pub scope_prefix: String,
    /// Prefix for keys in global groups.
    pub global_prefix: String,
    /// Salt mixed into every key; empty for none.
    pub key_salt: String,
    /// Ask for the binary protocol (and TCP no-delay).
    pub use_binary: bool,
    pub connect_timeout: Duration,
    /// `(key, group)` pairs fetched in one pipelined request per request.
    pub preseed: Vec<(String, String)>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            persistent_id: DEFAULT_PERSISTENT_ID.to_string(),
            scope_prefix: DEFAULT_SCOPE_PREFIX.to_string(),
            global_prefix: DEFAULT_GLOBAL_PREFIX.to_string(),
            key_salt: String::new(),
            use_binary: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            preseed: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from `OBJCACHE_*` environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = CacheConfig::default();
        CacheConfig {
            persistent_id: std::env::var("OBJCACHE_PERSISTENT_ID")
                .unwrap_or(defaults.persistent_id),
            scope_prefix: std::env::var("OBJCACHE_SCOPE_PREFIX").unwrap_or(defaults.scope_prefix),
            global_prefix: std::env::var("OBJCACHE_GLOBAL_PREFIX")
                .unwrap_or(defaults.global_prefix),
            key_salt: std::env::var("OBJCACHE_KEY_SALT").unwrap_or_default(),
            use_binary: env_flag("OBJCACHE_USE_BINARY").unwrap_or(defaults.use_binary),
            connect_timeout: std::env::var("OBJCACHE_CONNECT_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
            preseed: Vec::new(),
        }
    }

    pub fn with_persistent_id(mut self, id: impl Into<String>) -> Self {
        self.persistent_id = id.into();
        self
    }

    pub fn with_scope_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.scope_prefix = prefix.into();
        self
    }

    pub fn with_global_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.global_prefix = prefix.into();
        self
    }

    pub fn with_key_salt(mut self, salt: impl Into<String>) -> Self {
        self.key_salt = salt.into();
        self
    }

    pub fn with_binary(mut self, binary: bool) -> Self {
        self.use_binary = binary;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Add a `(key, group)` pair to the per-request preseed.
    pub fn with_preseed(mut self, key: impl Into<String>, group: impl Into<String>) -> Self {
        self.preseed.push((key.into(), group.into()));
        self
    }

    /// Transport options to apply to a fresh backend handle.
    ///
    /// Retries are disabled: a dead server is skipped rather than waited on.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            binary_protocol: self.use_binary,
            no_delay: self.use_binary,
            connect_timeout: self.connect_timeout,
            retry_timeout: Duration::ZERO,
        }
    }

    /// Key codec for a transport that does (or does not) speak binary.
    pub fn key_codec(&self, binary_transport: bool) -> KeyCodec {
        KeyCodec::new(self.scope_prefix.clone())
            .with_global_prefix(self.global_prefix.clone())
            .with_salt(&self.key_salt)
            .with_binary_transport(binary_transport)
    }
}

/// Server settings read from the environment.
///
/// `OBJCACHE_SERVERS` is static configuration and wins; otherwise the file
/// named by `OBJCACHE_SERVERS_FILE` plays the role of the persisted,
/// admin-editable setting.
#[derive(Clone, Debug, Default)]
pub struct EnvSettings {
    servers: Option<String>,
    servers_file: Option<PathBuf>,
}

impl EnvSettings {
    pub fn from_env() -> Self {
        EnvSettings {
            servers: std::env::var("OBJCACHE_SERVERS")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            servers_file: std::env::var_os("OBJCACHE_SERVERS_FILE").map(PathBuf::from),
        }
    }
}

impl SettingsProvider for EnvSettings {
    fn static_servers(&self) -> Option<Vec<ServerEntry>> {
        self.servers.as_ref().map(|list| {
            list.split([',', '\n'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ServerEntry::from)
                .collect()
        })
    }

    fn persisted_servers(&self) -> Option<String> {
        let path = self.servers_file.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Cannot read server list {}: {}", path.display(), e);
                None
            }
        }
    }
}
