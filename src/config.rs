use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_TABLE: &str = "ratings";
const DEFAULT_CHANNEL: &str = "ratings-live-feed";
const DEFAULT_LIMIT: usize = 40;
const DEFAULT_HEARTBEAT_SECS: u64 = 25;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    roster: RosterConfig,
    #[serde(default)]
    realtime: RealtimeConfig,
    #[serde(default)]
    http: HttpConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoreConfig {
    url: Option<String>,
    key: Option<String>,
    table: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RosterConfig {
    limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RealtimeConfig {
    enabled: Option<bool>,
    channel: Option<String>,
    heartbeat_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct HttpConfig {
    timeout_secs: Option<u64>,
}

/// Endpoint and access key for the hosted store. Only exists when both are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub url: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub table: String,
    pub limit: usize,
    pub realtime_enabled: bool,
    pub channel: String,
    pub heartbeat_secs: u64,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_file_config(ConfigFile::default())
    }
}

impl Config {
    fn from_file_config(file: ConfigFile) -> Self {
        Self {
            store_url: file.store.url,
            store_key: file.store.key,
            table: file.store.table.unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            limit: file.roster.limit.unwrap_or(DEFAULT_LIMIT),
            realtime_enabled: file.realtime.enabled.unwrap_or(true),
            channel: file
                .realtime
                .channel
                .unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
            heartbeat_secs: file
                .realtime
                .heartbeat_secs
                .unwrap_or(DEFAULT_HEARTBEAT_SECS),
            timeout_secs: file.http.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config_file: ConfigFile =
            toml::from_str(content).context("Failed to parse config file")?;
        Ok(Self::from_file_config(config_file))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Reads `config.toml` (or `$RATINGS_CONFIG`) when present, then applies
    /// `SUPABASE_URL` / `SUPABASE_ANON_KEY` on top.
    pub fn load() -> Result<Self> {
        let path = std::env::var("RATINGS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let path = Path::new(&path);

        let config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        Ok(config.with_overrides(
            std::env::var("SUPABASE_URL").ok(),
            std::env::var("SUPABASE_ANON_KEY").ok(),
        ))
    }

    pub fn with_overrides(mut self, url: Option<String>, key: Option<String>) -> Self {
        if url.is_some() {
            self.store_url = url;
        }
        if key.is_some() {
            self.store_key = key;
        }
        self
    }

    pub fn credentials(&self) -> Option<StoreCredentials> {
        let url = self.store_url.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let key = self.store_key.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some(StoreCredentials {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }
}
