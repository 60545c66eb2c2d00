use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

pub mod session;

const APP_NAME: &str = "splitdebt";
const KEYCHAIN_SERVICE: &str = "splitdebt.credentials";

/// Keychain entry holding the API access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Environment override for the access token, checked before the keychain.
pub const TOKEN_ENV: &str = "SPLITDEBT_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub paging: PagingConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_kind")]
    pub kind: String, // "mock" | "http"
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            kind: default_api_kind(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagingConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_participant_page_size")]
    pub participant_page_size: u32,
    /// Distance below the viewport at which the next page is requested.
    #[serde(default = "default_root_margin")]
    pub root_margin_px: f32,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            participant_page_size: default_participant_page_size(),
            root_margin_px: default_root_margin(),
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub active_only: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { active_only: true }
    }
}

fn default_api_kind() -> String {
    "mock".to_string()
}

fn default_base_url() -> String {
    "https://localhost:7654".to_string()
}

fn default_page_size() -> u32 {
    10
}

fn default_participant_page_size() -> u32 {
    20
}

fn default_root_margin() -> f32 {
    150.0
}

fn default_threshold() -> f32 {
    0.1
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Update one setting addressed as `section.field`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "api.kind" => match value {
                "mock" | "http" => self.api.kind = value.to_string(),
                other => bail!("unknown api kind: {other} (expected mock or http)"),
            },
            "api.base_url" => self.api.base_url = value.trim_end_matches('/').to_string(),
            "paging.page_size" => self.paging.page_size = parse_page_size(key, value)?,
            "paging.participant_page_size" => {
                self.paging.participant_page_size = parse_page_size(key, value)?
            }
            "paging.root_margin_px" => {
                self.paging.root_margin_px = value
                    .parse()
                    .with_context(|| format!("{key} must be a number"))?
            }
            "paging.threshold" => {
                let threshold: f32 = value
                    .parse()
                    .with_context(|| format!("{key} must be a number"))?;
                if !(0.0..=1.0).contains(&threshold) {
                    bail!("{key} must be between 0 and 1");
                }
                self.paging.threshold = threshold;
            }
            "events.active_only" => {
                self.events.active_only = value
                    .parse()
                    .with_context(|| format!("{key} must be true or false"))?
            }
            other => return Err(anyhow!("unknown setting: {other}")),
        }
        Ok(())
    }
}

fn parse_page_size(key: &str, value: &str) -> Result<u32> {
    let size: u32 = value
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    if size == 0 {
        bail!("{key} must be a positive integer");
    }
    Ok(size)
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    tracing::debug!(api = %cfg.api.kind, page_size = cfg.paging.page_size, "config loaded");
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}

/// Access token from the environment, falling back to the keychain.
pub fn access_token() -> Option<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Some(token);
        }
    }
    match get_secret(ACCESS_TOKEN_KEY) {
        Ok(token) => Some(token),
        Err(err) => {
            tracing::debug!(error = %err, "no access token in keychain");
            None
        }
    }
}
