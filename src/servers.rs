//! Server list resolution.
//!
//! Servers come from one of three places, in priority order: an explicit
//! static configuration, a persisted text setting (one `host:port weight`
//! entry per line, as an admin screen would store it), or the default
//! `127.0.0.1:11211`.

use crate::error::{Error, Result};
use std::fmt;

/// Default memcached port.
pub const DEFAULT_PORT: u16 = 11211;

/// Default server host when nothing is configured.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// A resolved memcached server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServerSpec {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

impl ServerSpec {
    pub fn new(host: impl Into<String>, port: u16, weight: u32) -> Self {
        ServerSpec {
            host: host.into(),
            port,
            weight,
        }
    }

    /// `host:port` address (unix sockets are returned as the bare path).
    pub fn address(&self) -> String {
        if self.is_unix_socket() {
            self.host.clone()
        } else if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn is_unix_socket(&self) -> bool {
        self.host.starts_with('/')
    }
}

impl Default for ServerSpec {
    fn default() -> Self {
        ServerSpec::new(DEFAULT_HOST, DEFAULT_PORT, 0)
    }
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.address(), self.weight)
    }
}

/// A configured server entry, before validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEntry {
    /// Already split into parts; missing parts take their defaults.
    Structured {
        host: String,
        port: Option<u16>,
        weight: Option<u32>,
    },
    /// A `host[:port][ weight]` line.
    TextLine(String),
}

impl ServerEntry {
    pub fn structured(host: impl Into<String>, port: u16, weight: u32) -> Self {
        ServerEntry::Structured {
            host: host.into(),
            port: Some(port),
            weight: Some(weight),
        }
    }

    /// Validate into a [`ServerSpec`].
    ///
    /// # Errors
    ///
    /// Returns `Error::ServerParse` carrying the offending entry.
    pub fn parse(&self) -> Result<ServerSpec> {
        match self {
            ServerEntry::Structured { host, port, weight } => {
                let host = host.trim();
                if host.is_empty() {
                    return Err(parse_error(&format!("{:?}", self), "empty host"));
                }
                let port = if host.starts_with('/') {
                    0
                } else {
                    port.unwrap_or(DEFAULT_PORT)
                };
                Ok(ServerSpec::new(host, port, weight.unwrap_or(0)))
            }
            ServerEntry::TextLine(line) => parse_server_line(line),
        }
    }
}

impl From<&str> for ServerEntry {
    fn from(line: &str) -> Self {
        ServerEntry::TextLine(line.to_string())
    }
}

fn parse_error(line: &str, reason: &str) -> Error {
    Error::ServerParse {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse one `host[:port][ weight]` line.
///
/// Accepts bracketed IPv6 hosts (`[::1]:11211`) and absolute unix socket
/// paths (port 0).
///
/// # Errors
///
/// Returns `Error::ServerParse` for empty lines, bad ports, bad weights and
/// trailing garbage.
pub fn parse_server_line(line: &str) -> Result<ServerSpec> {
    let mut parts = line.split_whitespace();
    let address = parts
        .next()
        .ok_or_else(|| parse_error(line, "empty entry"))?;
    let weight = match parts.next() {
        Some(w) => w
            .parse::<u32>()
            .map_err(|_| parse_error(line, "weight must be a non-negative integer"))?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(parse_error(line, "unexpected trailing fields"));
    }

    if address.starts_with('/') {
        return Ok(ServerSpec::new(address, 0, weight));
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| parse_error(line, "unterminated IPv6 address"))?;
        match after {
            "" => (host, None),
            p => (
                host,
                Some(
                    p.strip_prefix(':')
                        .ok_or_else(|| parse_error(line, "expected ':' after IPv6 address"))?,
                ),
            ),
        }
    } else {
        match address.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(parse_error(line, "empty host"));
    }

    let port = match port {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| parse_error(line, "invalid port"))?,
        None => DEFAULT_PORT,
    };

    Ok(ServerSpec::new(host, port, weight))
}

/// Parse a newline-separated server list, skipping blank lines.
///
/// # Errors
///
/// Fails on the first malformed line.
pub fn parse_server_lines(text: &str) -> Result<Vec<ServerSpec>> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_server_line)
        .collect()
}

/// Parse a server list, logging and skipping malformed lines.
pub fn parse_server_lines_lenient(text: &str) -> Vec<ServerSpec> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| match parse_server_line(l) {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!("Skipping server entry: {}", e);
                None
            }
        })
        .collect()
}

/// Source of server configuration.
///
/// Implemented by whatever stores settings for the application; the cache
/// only reads from it.
pub trait SettingsProvider: Send + Sync {
    /// Explicit, statically configured servers (highest priority).
    fn static_servers(&self) -> Option<Vec<ServerEntry>>;

    /// Persisted server list text, one entry per line.
    fn persisted_servers(&self) -> Option<String>;

    /// True when the server list is fixed by static configuration and not
    /// editable through the persisted setting.
    fn servers_fixed(&self) -> bool {
        self.static_servers().is_some()
    }
}

/// Resolve the configured servers.
///
/// # Errors
///
/// Returns `Error::ServerParse` if any configured entry is malformed.
pub fn resolve_servers(settings: &dyn SettingsProvider) -> Result<Vec<ServerSpec>> {
    if let Some(entries) = settings.static_servers() {
        return entries.iter().map(ServerEntry::parse).collect();
    }

    if let Some(text) = settings.persisted_servers() {
        return parse_server_lines(&text);
    }

    Ok(vec![ServerSpec::default()])
}

/// How a resolved server list relates to the live one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyDiff {
    /// Same servers with the same weights.
    Same,
    /// Same servers, at least one weight changed.
    Reweighted,
    /// Different number of servers.
    CountChanged,
    /// Same number of servers, different members.
    MembersChanged,
}

impl TopologyDiff {
    pub fn requires_push(self) -> bool {
        self != TopologyDiff::Same
    }
}

/// Compare two server lists, ignoring order.
///
/// Membership is decided by `(host, port)` as a multiset on both sides, so a
/// repeated entry never hides a removed one. Weights only matter once the
/// members agree.
pub fn diff_topology(live: &[ServerSpec], resolved: &[ServerSpec]) -> TopologyDiff {
    if live.len() != resolved.len() {
        return TopologyDiff::CountChanged;
    }

    fn sorted(servers: &[ServerSpec]) -> Vec<(&str, u16, u32)> {
        let mut entries: Vec<(&str, u16, u32)> = servers
            .iter()
            .map(|s| (s.host.as_str(), s.port, s.weight))
            .collect();
        entries.sort_unstable();
        entries
    }
    let live = sorted(live);
    let resolved = sorted(resolved);

    let members_match = live
        .iter()
        .zip(&resolved)
        .all(|(l, r)| (l.0, l.1) == (r.0, r.1));
    if !members_match {
        TopologyDiff::MembersChanged
    } else if live != resolved {
        TopologyDiff::Reweighted
    } else {
        TopologyDiff::Same
    }
}

/// Settings provider backed by in-code values.
#[derive(Clone, Debug, Default)]
pub struct StaticSettings {
    pub servers: Option<Vec<ServerEntry>>,
    pub persisted: Option<String>,
}

impl StaticSettings {
    /// Statically configured servers.
    pub fn with_servers(servers: Vec<ServerEntry>) -> Self {
        StaticSettings {
            servers: Some(servers),
            persisted: None,
        }
    }

    /// Servers from persisted setting text.
    pub fn with_persisted(text: impl Into<String>) -> Self {
        StaticSettings {
            servers: None,
            persisted: Some(text.into()),
        }
    }
}

impl SettingsProvider for StaticSettings {
    fn static_servers(&self) -> Option<Vec<ServerEntry>> {
        self.servers.clone()
    }

    fn persisted_servers(&self) -> Option<String> {
        self.persisted.clone()
    }
}
