//! Configuration loading and management

use std::path::Path;

use account_link_core::{DEFAULT_SCOPE, MAX_LIFETIME_SECS};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Tunables read from `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scope requested from the authorization server
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Origins a downstream `redirect_uri` may point at.
    /// Empty allows any absolute http(s) URL.
    #[serde(default)]
    pub allowed_downstream_origins: Vec<String>,

    /// Secret for checking bearer tokens on protected resources.
    /// If not set, the client secret is used.
    #[serde(default)]
    pub verification_secret: Option<String>,

    /// How long a started flow waits for its callback (default: 10 minutes)
    #[serde(default = "default_flow_lifetime")]
    pub flow_lifetime_secs: u64,

    /// How long a linked token is kept for `/refresh` (default: 30 days)
    #[serde(default = "default_token_cache_lifetime")]
    pub token_cache_lifetime_secs: u64,

    /// Mark the flow cookie `Secure` (disable only for plain-HTTP development)
    #[serde(default = "default_true")]
    pub secure_cookie: bool,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_flow_lifetime() -> u64 {
    600 // 10 minutes
}

fn default_token_cache_lifetime() -> u64 {
    30 * 24 * 3600 // 30 days
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            allowed_downstream_origins: Vec::new(),
            verification_secret: None,
            flow_lifetime_secs: default_flow_lifetime(),
            token_cache_lifetime_secs: default_token_cache_lifetime(),
            secure_cookie: true,
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_path: &str) -> Result<Self> {
        let config_file = Path::new(config_path).join("config.json");

        let config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            config
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = Config::default();

            std::fs::create_dir_all(config_path)
                .with_context(|| format!("Failed to create config directory: {}", config_path))?;
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scope.trim().is_empty() {
            bail!("scope must not be empty");
        }
        let lifetimes = [
            ("flow_lifetime_secs", self.flow_lifetime_secs),
            ("token_cache_lifetime_secs", self.token_cache_lifetime_secs),
        ];
        for (name, secs) in lifetimes {
            if secs == 0 || secs > MAX_LIFETIME_SECS {
                bail!("{} must be between 1 and {} seconds", name, MAX_LIFETIME_SECS);
            }
        }
        for origin in &self.allowed_downstream_origins {
            Url::parse(origin)
                .with_context(|| format!("Invalid allowed downstream origin: {}", origin))?;
        }
        Ok(())
    }
}

/// Deployment settings given on the command line
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Base URL of the authorization server
    pub auth_server_url: String,
    /// This client's callback (`/oauth2`) as registered with the server
    pub redirect_url: String,
    pub client_id: String,
    pub client_secret: String,
}
