//! MCP server launch specs and the loader that reads them.
//!
//! The config document holds an `mcpServers` table (alias `servers`) mapping
//! each server name to its launch command:
//!
//! ```json
//! { "mcpServers": { "fetch": { "command": "uvx", "args": ["mcp-server-fetch"] } } }
//! ```
//!
//! Declaration order is kept: it decides startup order and which server wins
//! an unqualified tool name in the registry.

use relay_types::ConfigError;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

fn default_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Launch specification for one MCP server. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    /// Unique within a session; also the namespace for colliding tool names.
    pub name: String,
    /// Command to run (e.g., "npx", "uvx"). Resolved on `PATH`.
    pub command: String,
    pub args: Vec<String>,
    /// Merged on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Upper bound for each JSON-RPC request to this server.
    pub request_timeout: Duration,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Syntax of a config document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension; anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Read and validate the server specs in the file at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<ServerSpec>, ConfigError> {
    let path = path.as_ref();
    let origin = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: origin.clone(),
        message: e.to_string(),
    })?;
    let specs = parse_document(&text, ConfigFormat::from_path(path), &origin)?;
    tracing::info!(
        "Loaded {} MCP server spec(s) from {}: {:?}",
        specs.len(),
        origin,
        specs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
    );
    Ok(specs)
}

/// Parse and validate server specs from an in-memory document.
pub fn parse(text: &str, format: ConfigFormat) -> Result<Vec<ServerSpec>, ConfigError> {
    parse_document(text, format, "<inline>")
}

fn parse_document(
    text: &str,
    format: ConfigFormat,
    origin: &str,
) -> Result<Vec<ServerSpec>, ConfigError> {
    let document: ConfigDocument = match format {
        ConfigFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
    }
    .map_err(|message| ConfigError::Parse {
        path: origin.to_string(),
        message,
    })?;

    let entries = document.servers.ok_or_else(|| ConfigError::MissingKey {
        key: "mcpServers".into(),
    })?;

    validate(entries.0)
}

fn validate(entries: Vec<(String, RawServer)>) -> Result<Vec<ServerSpec>, ConfigError> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(entries.len());

    for (name, raw) in entries {
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "mcpServers".into(),
                message: "server name must not be empty".into(),
            });
        }
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicateServer { name });
        }
        if raw.command.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("mcpServers.{name}.command"),
                message: "command must not be empty".into(),
            });
        }
        if raw.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("mcpServers.{name}.timeout_ms"),
                message: "timeout must be greater than zero".into(),
            });
        }

        specs.push(ServerSpec {
            name,
            command: raw.command,
            args: raw.args.unwrap_or_default(),
            env: raw.env.unwrap_or_default(),
            request_timeout: Duration::from_millis(raw.timeout_ms),
        });
    }

    Ok(specs)
}

#[derive(Deserialize)]
struct ConfigDocument {
    #[serde(default, rename = "mcpServers", alias = "servers")]
    servers: Option<ServerEntries>,
}

/// One server as written in the document.
#[derive(Deserialize)]
struct RawServer {
    command: String,
    #[serde(default)]
    args: Option<Vec<String>>,
    #[serde(default)]
    env: Option<BTreeMap<String, String>>,
    #[serde(default = "default_timeout", alias = "timeoutMs")]
    timeout_ms: u64,
}

/// Server table entries in document order, duplicates included.
///
/// A plain map would silently keep only the last of two same-named entries.
struct ServerEntries(Vec<(String, RawServer)>);

impl<'de> Deserialize<'de> for ServerEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ServerEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a table of MCP server definitions keyed by name")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, server)) = map.next_entry::<String, RawServer>()? {
                    entries.push((name, server));
                }
                Ok(ServerEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
