// Configuration module for the Ollama bridge

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod routes;

pub use routes::RouteTable;

/// Environment variable naming an optional YAML config file
pub const CONFIG_PATH_ENV: &str = "OLLAMA_BRIDGE_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the local Ollama server
    #[serde(default = "default_local_upstream")]
    pub local_upstream: String,

    /// Base URL of the remote (cloud) backend
    #[serde(default = "default_remote_url")]
    pub remote_url: String,

    /// Bearer credential for the remote backend; remote routing is disabled without it
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_remote_models_ttl")]
    pub remote_models_ttl: u64,

    /// Route table as JSON text, e.g. `{"gpt-oss:120b": ["gpt-oss:120b"], "*": ["qwen3:32b"]}`
    #[serde(default)]
    pub model_map: Option<String>,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_upstream_connect_timeout")]
    pub upstream_connect_timeout: u64,

    #[serde(default = "default_upstream_read_timeout")]
    pub upstream_read_timeout: u64,

    #[serde(default = "default_model_list_timeout")]
    pub model_list_timeout: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    11435
}

fn default_local_upstream() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_remote_url() -> String {
    "https://api.ollama.cloud".to_string()
}

fn default_remote_models_ttl() -> u64 {
    120
}

fn default_upstream_connect_timeout() -> u64 {
    60
}

fn default_upstream_read_timeout() -> u64 {
    300
}

fn default_model_list_timeout() -> u64 {
    20
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            local_upstream: default_local_upstream(),
            remote_url: default_remote_url(),
            api_key: None,
            remote_models_ttl: default_remote_models_ttl(),
            model_map: None,
            debug: false,
            upstream_connect_timeout: default_upstream_connect_timeout(),
            upstream_read_timeout: default_upstream_read_timeout(),
            model_list_timeout: default_model_list_timeout(),
        }
    }
}

impl BridgeConfig {
    pub fn bind_addr(&self) -> String {
        let host = if self.host.trim().is_empty() {
            "0.0.0.0"
        } else {
            self.host.trim()
        };
        format!("{}:{}", host, self.port)
    }

    pub fn remote_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn remote_models_ttl(&self) -> Duration {
        Duration::from_secs(self.remote_models_ttl)
    }

    pub fn upstream_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_timeout)
    }

    pub fn upstream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_read_timeout)
    }

    pub fn model_list_timeout(&self) -> Duration {
        Duration::from_secs(self.model_list_timeout)
    }

    /// Parse the configured route table, falling back to the default on malformed input
    pub fn route_table(&self) -> RouteTable {
        RouteTable::load(self.model_map.as_deref())
    }

    /// Apply `OLLAMA_*` overrides using the given variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OLLAMA_BRIDGE_HOST") {
            self.host = host.trim().to_string();
        }
        if let Some(port) = parse_env(&lookup, "OLLAMA_BRIDGE_PORT") {
            self.port = port;
        }
        if let Some(key) = lookup("OLLAMA_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("OLLAMA_REMOTE_URL") {
            self.remote_url = url;
        }
        if let Some(url) = lookup("OLLAMA_LOCAL_UPSTREAM") {
            self.local_upstream = url;
        }
        if let Some(raw) = lookup("OLLAMA_BRIDGE_DEBUG") {
            self.debug = env_bool(&raw);
        }
        if let Some(ttl) = parse_env(&lookup, "OLLAMA_REMOTE_MODELS_TTL") {
            self.remote_models_ttl = ttl;
        }
        if let Some(map) = lookup("OLLAMA_MODEL_MAP_JSON") {
            self.model_map = Some(map);
        }
        if let Some(secs) = parse_env(&lookup, "OLLAMA_UPSTREAM_CONNECT_TIMEOUT") {
            self.upstream_connect_timeout = secs;
        }
        if let Some(secs) = parse_env(&lookup, "OLLAMA_UPSTREAM_READ_TIMEOUT") {
            self.upstream_read_timeout = secs;
        }
        if let Some(secs) = parse_env(&lookup, "OLLAMA_MODEL_LIST_TIMEOUT") {
            self.model_list_timeout = secs;
        }
    }

    /// Trim URLs and drop blank credentials / route tables
    pub fn normalize(mut self) -> Self {
        self.local_upstream = trim_base_url(&self.local_upstream);
        self.remote_url = trim_base_url(&self.remote_url);
        self.api_key = self
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self.model_map = self
            .model_map
            .map(|map| map.trim().to_string())
            .filter(|map| !map.is_empty());
        self
    }
}

/// Load the config: optional YAML file first, then environment overrides
pub fn load_config() -> Result<BridgeConfig> {
    let mut config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(raw) if !raw.trim().is_empty() => read_config_file(&expand_home(raw.trim()))?,
        _ => BridgeConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config.normalize())
}

pub fn read_config_file(path: &Path) -> Result<BridgeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: BridgeConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn env_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}, keeping default", key, raw);
            None
        }
    }
}
