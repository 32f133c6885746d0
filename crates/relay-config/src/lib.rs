//! Multi-tier configuration for Relay.
//!
//! Reads configuration from multiple sources with precedence:
//! CLI flags > env vars > `~/.relay/config.toml` > defaults

use relay_mcp::SessionOptions;
use relay_types::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The default chat-completions base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The default model to use.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Server list read when nothing else is configured, relative to the working directory.
pub const DEFAULT_MCP_CONFIG: &str = "mcp_config.json";

/// Resolved configuration for one Relay run.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    /// Path of the MCP server list.
    pub mcp_config: PathBuf,
    pub session: SessionOptions,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpSettings {
    /// Path of the MCP server list; relative paths resolve against the working directory.
    pub config: Option<PathBuf>,
}

/// Provider startup/shutdown bounds, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    pub startup_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub mcp_config: Option<PathBuf>,
    pub model: Option<String>,
}

impl RelayConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Settings file (~/.relay/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"));
        Self::resolve(overrides, |key| std::env::var(key).ok(), settings, &config_dir)
    }

    /// Apply precedence over explicit sources. `env` looks up one variable.
    pub fn resolve(
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
        settings: SettingsFile,
        config_dir: &Path,
    ) -> Result<Self, ConfigError> {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        // API key: env > config file
        let api_key = env("LLM_API_KEY")
            .or_else(|| env("OPENAI_API_KEY"))
            .or(settings.api.api_key)
            .ok_or_else(|| ConfigError::MissingKey {
                key: format!(
                    "api_key (set LLM_API_KEY or add [api] api_key to {})",
                    config_dir.join("config.toml").display()
                ),
            })?;

        let model = overrides
            .model
            .or_else(|| env("RELAY_MODEL"))
            .or_else(|| env("MODEL_CHOICE"))
            .or(settings.api.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = env("LLM_BASE_URL")
            .or(settings.api.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let mcp_config = overrides
            .mcp_config
            .or_else(|| env("RELAY_MCP_CONFIG").map(PathBuf::from))
            .or(settings.mcp.config)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MCP_CONFIG));

        let defaults = SessionOptions::default();
        let session = SessionOptions {
            startup_timeout: timeout(
                "session.startup_timeout_ms",
                settings.session.startup_timeout_ms,
                defaults.startup_timeout,
            )?,
            shutdown_timeout: timeout(
                "session.shutdown_timeout_ms",
                settings.session.shutdown_timeout_ms,
                defaults.shutdown_timeout,
            )?,
        };

        Ok(RelayConfig {
            api_key,
            model,
            base_url,
            max_tokens: settings.api.max_tokens,
            system_prompt: settings.api.system_prompt,
            mcp_config,
            session,
        })
    }
}

fn timeout(key: &str, value: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        }),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Get the Relay config directory path (~/.relay/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RELAY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relay")
}

/// Load and parse a TOML settings file, returning defaults on any error.
pub fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}
