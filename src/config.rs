//! Configuration loading and validation.
//!
//! The adapter reads a single TOML file (default `config.toml`). Secrets may
//! also come from the environment: `FEISHU_APP_ID` and `FEISHU_APP_SECRET`
//! override file values, and a `.env` file is honored at startup.

use std::path::Path;

use serde::Deserialize;

/// Environment variable overriding `feishu.app_id`.
pub const APP_ID_ENV: &str = "FEISHU_APP_ID";

/// Environment variable overriding `feishu.app_secret`.
pub const APP_SECRET_ENV: &str = "FEISHU_APP_SECRET";

/// Top-level adapter configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Feishu app identity.
    #[serde(default)]
    pub feishu: FeishuConfig,

    /// Agent message bus endpoint.
    #[serde(default)]
    pub bus: BusConfig,

    /// Conversation/user allow-and-deny lists.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Diagnostics settings.
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Feishu app identity used for the credential exchange.
#[derive(Debug, Deserialize)]
pub struct FeishuConfig {
    /// App id issued by the platform. Mandatory.
    #[serde(default)]
    pub app_id: String,

    /// App secret issued by the platform. Mandatory.
    #[serde(default)]
    pub app_secret: String,

    /// Open-platform API base URL. Overridable for tests and private
    /// deployments.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            api_base: default_api_base(),
        }
    }
}

/// Agent message bus endpoint and the platform tag stamped on messages.
#[derive(Debug, Deserialize)]
pub struct BusConfig {
    /// Router host.
    #[serde(default = "default_bus_host")]
    pub host: String,

    /// Router port.
    #[serde(default = "default_bus_port")]
    pub port: u16,

    /// Canonical `platform` tag of this adapter instance.
    #[serde(default = "default_platform")]
    pub platform: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_bus_host(),
            port: default_bus_port(),
            platform: default_platform(),
        }
    }
}

/// Allow-and-deny lists consulted before a message is forwarded to the bus.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// When true, only whitelisted chats or users pass the gate.
    #[serde(default = "default_whitelist_mode")]
    pub whitelist_mode: bool,

    /// Chat ids allowed through in whitelist mode.
    #[serde(default)]
    pub chat_whitelist: Vec<String>,

    /// User ids allowed through in whitelist mode.
    #[serde(default)]
    pub user_whitelist: Vec<String>,

    /// Chat ids always denied.
    #[serde(default)]
    pub chat_blacklist: Vec<String>,

    /// User ids always denied.
    #[serde(default)]
    pub user_blacklist: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            whitelist_mode: default_whitelist_mode(),
            chat_whitelist: Vec::new(),
            user_whitelist: Vec::new(),
            chat_blacklist: Vec::new(),
            user_blacklist: Vec::new(),
        }
    }
}

/// Diagnostics settings.
#[derive(Debug, Deserialize)]
pub struct DebugConfig {
    /// Default log level when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for rotated JSON log files; empty means console-only.
    #[serde(default)]
    pub logs_dir: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            logs_dir: String::new(),
        }
    }
}

// Default value functions for serde

fn default_bus_host() -> String {
    "localhost".to_owned()
}
fn default_bus_port() -> u16 {
    8000
}
fn default_platform() -> String {
    "feishu".to_owned()
}
fn default_whitelist_mode() -> bool {
    true
}
fn default_api_base() -> String {
    crate::feishu::client::DEFAULT_BASE_URL.to_owned()
}
fn default_level() -> String {
    "info".to_owned()
}

impl Config {
    /// Apply environment overrides for the app identity.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(app_id) = std::env::var(APP_ID_ENV) {
            if !app_id.trim().is_empty() {
                self.feishu.app_id = app_id;
            }
        }
        if let Ok(app_secret) = std::env::var(APP_SECRET_ENV) {
            if !app_secret.trim().is_empty() {
                self.feishu.app_secret = app_secret;
            }
        }
    }

    /// Check that mandatory credentials are present.
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing field; the process exits non-zero
    /// on this at startup.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.feishu.app_id.trim().is_empty() {
            anyhow::bail!("missing mandatory credential: feishu.app_id (or {APP_ID_ENV})");
        }
        if self.feishu.app_secret.trim().is_empty() {
            anyhow::bail!("missing mandatory credential: feishu.app_secret (or {APP_SECRET_ENV})");
        }
        Ok(())
    }
}

/// Load the adapter config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}
