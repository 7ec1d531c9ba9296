//! Configuration resolution for Accorcia.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/accorcia/settings.json)
//! 3. Explicit config file (`--config <path>`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete Accorcia configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub log: LogConfig,
}

/// REST backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    /// Root of the REST API, e.g. `http://localhost:8090/api`.
    pub base_url: String,
    /// Per-request timeout (seconds).
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/api".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Real-time connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RealtimeSettings {
    /// STOMP-over-WebSocket endpoint.
    pub ws_url: String,
    /// Handshake timeout (seconds).
    pub connect_timeout_secs: u64,
    /// Delay before the first reconnect attempt (seconds).
    pub reconnect_delay_secs: u64,
    /// Upper bound for the reconnect delay when a multiplier is set (seconds).
    pub reconnect_max_delay_secs: u64,
    /// Growth factor applied per failed attempt, in hundredths (100 = fixed delay).
    pub reconnect_multiplier_percent: u32,
    /// Maximum consecutive reconnect attempts. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8090/ws/websocket".to_string(),
            connect_timeout_secs: 10,
            reconnect_delay_secs: 5,
            reconnect_max_delay_secs: 60,
            reconnect_multiplier_percent: 100,
            max_reconnect_attempts: None,
        }
    }
}

/// Credential lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// Lifetime assumed for a credential whose expiry claim cannot be decoded.
    pub default_expiry_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_expiry_secs: 3600,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit_file: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(path) = explicit_file {
        let file = load_config_file(path)?;
        merge_config(&mut config, file);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".accorcia").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/accorcia/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("accorcia").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.api = overlay.api;
    base.session = overlay.session;
    base.log = overlay.log;

    // Keep an explicit retry bound from a lower layer unless the overlay sets one.
    let max_attempts = overlay
        .realtime
        .max_reconnect_attempts
        .or(base.realtime.max_reconnect_attempts);
    base.realtime = overlay.realtime;
    base.realtime.max_reconnect_attempts = max_attempts;
}

/// Apply `ACCORCIA_*` overrides. `lookup` resolves a variable name to its value.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("ACCORCIA_API_URL") {
        config.api.base_url = val;
    }
    if let Some(val) = lookup("ACCORCIA_WS_URL") {
        config.realtime.ws_url = val;
    }
    if let Some(val) = lookup("ACCORCIA_RECONNECT_DELAY_SECS")
        && let Ok(n) = val.parse()
    {
        config.realtime.reconnect_delay_secs = n;
    }
    if let Some(val) = lookup("ACCORCIA_LOG_LEVEL") {
        config.log.level = val;
    }
}
