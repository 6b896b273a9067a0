//! Configuration management for the pmchat CLI.

use anyhow::{Context, Result};
use pmchat::ChatClient;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Overrides the configured REST base URL.
pub const BASE_URL_ENV: &str = "PMCHAT_BASE_URL";
/// Overrides the configured realtime server URL.
pub const SOCKET_URL_ENV: &str = "PMCHAT_SOCKET_URL";

/// CLI configuration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// REST base URL, e.g. `https://example.com/api/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Realtime server URL; derived from `base_url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_url: Option<String>,
    /// Authentication credentials.
    pub auth: Option<AuthConfig>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token.
    pub token: String,
    /// Local user id.
    pub user_id: String,
}

/// Server URLs given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub socket_url: Option<String>,
}

static OVERRIDES: OnceLock<Overrides> = OnceLock::new();

/// Record overrides for every client built afterwards. Only the first call counts.
pub fn set_overrides(overrides: Overrides) {
    let _ = OVERRIDES.set(overrides);
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

impl Config {
    fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(url) = non_blank(&overrides.base_url) {
            self.base_url = Some(url);
        }
        if let Some(url) = non_blank(&overrides.socket_url) {
            self.socket_url = Some(url);
        }
        self
    }
}

/// Get the configuration file path.
pub fn config_path() -> Result<PathBuf> {
    let exe_path = env::current_exe().context("Could not determine executable path")?;
    let exe_dir = exe_path
        .parent()
        .context("Could not determine executable directory")?;

    Ok(exe_dir.join("pmchat.toml"))
}

/// Load configuration from file.
pub fn load_config() -> Result<Config> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).context("Failed to read config file")?;

    toml::from_str(&content).context("Failed to parse config file")
}

/// Save configuration to file.
pub fn save_config(config: &Config) -> Result<()> {
    let path = config_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&path, content).context("Failed to write config file")?;

    Ok(())
}

/// Load the file and apply overrides.
pub fn effective_config() -> Result<Config> {
    let config = load_config()?;
    Ok(match OVERRIDES.get() {
        Some(overrides) => config.with_overrides(overrides),
        None => config,
    })
}

fn builder(config: &Config) -> pmchat::ChatClientBuilder {
    let mut builder = ChatClient::builder();
    if let Some(url) = &config.base_url {
        builder = builder.base_url(url);
    }
    if let Some(url) = &config.socket_url {
        builder = builder.socket_url(url);
    }
    builder
}

/// Build a chat client from the current configuration.
pub fn build_client() -> Result<ChatClient> {
    let config = effective_config()?;

    let mut builder = builder(&config);

    if let Some(auth) = config.auth {
        builder = builder.auth(&auth.token, &auth.user_id);
    }

    builder.build().context("Failed to build chat client")
}

/// Build a chat client that requires authentication.
pub fn build_authed_client() -> Result<ChatClient> {
    let config = effective_config()?;

    let auth = config
        .auth
        .clone()
        .context("Authentication required. Run 'pmchat auth login' first.")?;

    builder(&config)
        .auth(&auth.token, &auth.user_id)
        .build()
        .context("Failed to build chat client")
}
