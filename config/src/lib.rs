//! Configuration loading, parsing, and defaults.
//!
//! Configuration is a TOML document with `server` and `proxy` sections.
//! Candidates are checked in order: `./slipstream.toml` (useful in
//! constrained environments), then `~/.slipstream/config.toml`. A missing
//! file yields the defaults; a present-but-broken file is an error - silently
//! running with defaults when the operator wrote a config is worse than
//! refusing to start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret; when set, every request must present it.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8045,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Endpoint aliases in failover order.
    pub endpoints: Vec<String>,
    /// Alias tried first; reorders `endpoints` without editing the list.
    pub default_endpoint: String,
    /// Enables the model fallback chain on quota exhaustion.
    pub switch_preview_model: bool,
    /// Catalog id unknown client names fall back to.
    pub default_model: String,
    /// Hard cap on one request; 0 means no cap.
    pub request_timeout_secs: u64,
    /// Project id substituted when an account has none. The stock value
    /// looks like a leaked default; the pool warns whenever it is actually
    /// used.
    pub fallback_project_id: String,
    /// User route map: client model name (exact or single-`*` glob) to
    /// catalog id. Checked before the built-in routes.
    pub model_routes: BTreeMap<String, String>,
    /// Accounts file; defaults to `~/.slipstream/accounts.json`.
    pub accounts_path: Option<PathBuf>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "sandbox-daily".to_string(),
                "daily".to_string(),
                "prod".to_string(),
            ],
            default_endpoint: "sandbox-daily".to_string(),
            switch_preview_model: true,
            default_model: "gemini-2.5-pro".to_string(),
            request_timeout_secs: 0,
            fallback_project_id: "rising-fact-p41fc".to_string(),
            model_routes: BTreeMap::new(),
            accounts_path: None,
            oauth_client_id: None,
            oauth_client_secret: None,
        }
    }
}

impl ProxyConfig {
    /// Endpoint aliases with the default endpoint moved to the front.
    #[must_use]
    pub fn endpoint_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.endpoints.len() + 1);
        if self.endpoints.contains(&self.default_endpoint) || self.endpoints.is_empty() {
            order.push(self.default_endpoint.clone());
        }
        for alias in &self.endpoints {
            if !order.contains(alias) {
                order.push(alias.clone());
            }
        }
        order
    }

    /// Route map as ordered pairs for the registry.
    #[must_use]
    pub fn route_pairs(&self) -> Vec<(String, String)> {
        self.model_routes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn accounts_path(&self) -> PathBuf {
        self.accounts_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".slipstream")
                .join("accounts.json")
        })
    }
}

impl Config {
    /// Candidate config paths, most specific first.
    #[must_use]
    pub fn path_candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from("slipstream.toml")];
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".slipstream").join("config.toml"));
        }
        candidates
    }

    /// Load the first config file that exists, or defaults.
    pub fn load() -> Result<Self, ConfigError> {
        for candidate in Self::path_candidates() {
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }
        tracing::debug!("no config file found; using defaults");
        Ok(Self::default())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// `SLIPSTREAM_HOST`, `SLIPSTREAM_PORT`, and `SLIPSTREAM_API_KEY`
    /// override the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("SLIPSTREAM_HOST")
            && !host.is_empty()
        {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SLIPSTREAM_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(key) = std::env::var("SLIPSTREAM_API_KEY")
            && !key.is_empty()
        {
            self.server.api_key = Some(key);
        }
    }
}
