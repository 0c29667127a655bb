//! Error types for the object cache.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the object cache.
///
/// Hot-path operations (`get`, `set`, ...) only surface programmer errors
/// such as [`Error::EmptyKey`]. Backend and configuration failures are logged
/// and absorbed by the engine; the remaining variants are returned by the
/// lower layers (backends, server resolution, serialization) and by
/// diagnostic calls like `metadump` and `server_stats`.
#[derive(Debug, Clone)]
pub enum Error {
    /// A cache key was empty.
    ///
    /// This is a programming error in the caller and is always raised,
    /// even when the backend is unavailable.
    EmptyKey,

    /// A server list entry could not be parsed.
    ///
    /// Carries the offending line (or a rendering of the structured entry)
    /// and the reason it was rejected.
    ServerParse {
        /// The entry as it was configured
        line: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration error during initialization.
    ///
    /// Common causes:
    /// - Invalid environment variable value
    /// - Unreadable server list file
    ConfigError(String),

    /// Backend storage error.
    ///
    /// This indicates the backend is unavailable or returned an error.
    /// Common causes:
    /// - No servers configured
    /// - Memcached connection lost
    /// - Backend protocol error (e.g. incrementing a non-numeric value)
    BackendError(String),

    /// Backend call exceeded the configured connect timeout.
    Timeout(String),

    /// Serialization failed when converting a value to a cache payload.
    SerializationError(String),

    /// Deserialization failed when converting a cache payload to a value.
    ///
    /// Usually a stored payload read back as a different type than the one
    /// it was written with.
    DeserializationError(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Operation not supported by this backend.
    NotImplemented(String),

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyKey => write!(f, "Cache key cannot be empty"),
            Error::ServerParse { line, reason } => {
                write!(f, "Invalid server entry '{}': {}", line, reason)
            }
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => {
                write!(f, "Invalid cache entry: {}", msg)
            }
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// True for errors caused by the caller rather than the environment.
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Error::EmptyKey)
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::BackendError(e.to_string())
        } else if e.is_syntax() || e.is_data() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "memcached")]
impl From<async_memcached::Error> for Error {
    fn from(e: async_memcached::Error) -> Self {
        Error::BackendError(format!("Memcached error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::EmptyKey.to_string(), "Cache key cannot be empty");

        let err = Error::ServerParse {
            line: "cache1:abc".to_string(),
            reason: "invalid port".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid server entry 'cache1:abc': invalid port"
        );
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_programmer_error() {
        assert!(Error::EmptyKey.is_programmer_error());
        assert!(!Error::BackendError("down".into()).is_programmer_error());
    }

    #[test]
    fn test_from_json_syntax_error() {
        let err: Error = serde_json::from_str::<i64>("not-a-number")
            .expect_err("should fail")
            .into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }
}
