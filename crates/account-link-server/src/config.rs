//! Configuration loading and management

use std::path::Path;

use account_link_core::{DEFAULT_SCOPE, MAX_LIFETIME_SECS};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for the authorization server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Token configuration
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Authorization code configuration
    #[serde(default)]
    pub codes: CodeConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// The single scope granted to the registered client
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Resource owners accepted by the login form and the password grant.
    /// The default `test`/`test` account is a development placeholder.
    #[serde(default = "default_users")]
    pub users: Vec<UserCredential>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Access token lifetime in seconds (default: 1 hour)
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_lifetime_secs: u64,

    /// Refresh token lifetime in seconds (default: 30 days)
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_lifetime_secs: u64,

    /// HS256 signing secret for access tokens.
    /// If not set, the registered client secret is used so the client can
    /// verify bearer tokens on its own.
    #[serde(default)]
    pub signing_secret: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime_secs: default_access_token_lifetime(),
            refresh_token_lifetime_secs: default_refresh_token_lifetime(),
            signing_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Authorization code lifetime in seconds (default: 10 minutes)
    #[serde(default = "default_code_lifetime")]
    pub code_lifetime_secs: u64,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            code_lifetime_secs: default_code_lifetime(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in seconds (default: 1 hour)
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime_secs: u64,

    /// Mark the session cookie `Secure` (disable only for plain-HTTP development)
    #[serde(default = "default_true")]
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_lifetime_secs: default_session_lifetime(),
            secure_cookie: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCredential {
    pub username: String,
    pub password: String,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_users() -> Vec<UserCredential> {
    vec![UserCredential {
        username: "test".to_string(),
        password: "test".to_string(),
    }]
}

fn default_true() -> bool {
    true
}

fn default_access_token_lifetime() -> u64 {
    3600 // 1 hour
}

fn default_refresh_token_lifetime() -> u64 {
    30 * 24 * 3600 // 30 days
}

fn default_code_lifetime() -> u64 {
    600 // 10 minutes
}

fn default_session_lifetime() -> u64 {
    3600 // 1 hour
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tokens: TokenConfig::default(),
            codes: CodeConfig::default(),
            session: SessionConfig::default(),
            scope: default_scope(),
            users: default_users(),
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
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_file
            );
            let config = Config::default();

            // Create config directory if it doesn't exist
            std::fs::create_dir_all(config_path)
                .with_context(|| format!("Failed to create config directory: {}", config_path))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the protocol cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.scope.trim().is_empty() || self.scope.contains(' ') {
            bail!("scope must be a single non-empty value");
        }
        let lifetimes = [
            ("tokens.access_token_lifetime_secs", self.tokens.access_token_lifetime_secs),
            ("tokens.refresh_token_lifetime_secs", self.tokens.refresh_token_lifetime_secs),
            ("codes.code_lifetime_secs", self.codes.code_lifetime_secs),
            ("session.session_lifetime_secs", self.session.session_lifetime_secs),
        ];
        for (name, secs) in lifetimes {
            if secs == 0 || secs > MAX_LIFETIME_SECS {
                bail!("{} must be between 1 and {} seconds", name, MAX_LIFETIME_SECS);
            }
        }
        if let Some(secret) = &self.tokens.signing_secret {
            if secret.len() < 16 {
                bail!("tokens.signing_secret must be at least 16 bytes");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_writes_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg");
        let path = path.to_str().unwrap();

        let config = Config::load(path).unwrap();
        assert_eq!(config.scope, "all");
        assert_eq!(config.codes.code_lifetime_secs, 600);
        assert!(Path::new(path).join("config.json").exists());

        // Second load reads the file back
        let again = Config::load(path).unwrap();
        assert_eq!(again.users.len(), 1);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "tokens": { "access_token_lifetime_secs": 60 }, "users": [] }"#,
        )
        .unwrap();

        let config = Config::load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config.tokens.access_token_lifetime_secs, 60);
        assert_eq!(config.tokens.refresh_token_lifetime_secs, 30 * 24 * 3600);
        assert!(config.users.is_empty());
        assert!(config.session.secure_cookie);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{ "scope": "read write" }"#).unwrap();
        assert!(Config::load(dir.path().to_str().unwrap()).is_err());

        std::fs::write(dir.path().join("config.json"), "not json").unwrap();
        assert!(Config::load(dir.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_lifetime_upper_bound() {
        let mut config = Config::default();
        config.tokens.access_token_lifetime_secs = MAX_LIFETIME_SECS;
        assert!(config.validate().is_ok());

        config.tokens.access_token_lifetime_secs = 10_000_000_000_000_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.codes.code_lifetime_secs = u64::MAX;
        assert!(config.validate().is_err());
    }
}
