//! # Configuration
//!
//! Explicit, validated configuration loaded once at startup: a TOML file
//! (default `bridge-config.toml`, overridable via `BRIDGE_CONFIG_PATH`)
//! layered with `ESB_BRIDGE__`-prefixed environment variables. No silent
//! fallbacks for secrets - a missing appkey or broker URL fails fast.

use serde::Deserialize;

use crate::database::OracleConnectConfig;
use crate::error::{BridgeError, Result};

/// One Oracle registration.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleAliasConfig {
    pub alias: String,
    pub user: String,
    pub password: String,
    pub connect_string: String,
    #[serde(default = "default_pooled")]
    pub pooled: bool,
    #[serde(default = "default_pool_max")]
    pub pool_max: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_pooled() -> bool {
    true
}

fn default_pool_max() -> u32 {
    8
}

fn default_connect_timeout() -> u64 {
    30
}

impl From<&OracleAliasConfig> for OracleConnectConfig {
    fn from(config: &OracleAliasConfig) -> Self {
        OracleConnectConfig {
            alias: config.alias.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            connect_string: config.connect_string.clone(),
            pooled: config.pooled,
            pool_max: config.pool_max,
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Postgres URL backing the job broker.
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsbConfig {
    /// Shared secret checked against the gateway's `appkey` header.
    pub appkey: String,
    /// Credentials for callback deliveries.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Environment tag selecting job-profile rows (e.g. `PROD`, `UAT`).
    pub profile_env: String,
    pub databases: Vec<OracleAliasConfig>,
    pub broker: BrokerConfig,
    #[serde(default = "default_web")]
    pub web: WebConfig,
    pub esb: EsbConfig,
}

fn default_web() -> WebConfig {
    WebConfig {
        bind: default_bind(),
    }
}

impl BridgeConfig {
    /// Load from file + environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("BRIDGE_CONFIG_PATH")
            .unwrap_or_else(|_| "bridge-config.toml".to_string());
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("ESB_BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;

        let config: BridgeConfig = settings
            .try_deserialize()
            .map_err(|e| BridgeError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.databases.is_empty() {
            return Err(BridgeError::Configuration(
                "at least one database alias is required".to_string(),
            ));
        }
        if self.esb.appkey.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "esb.appkey must not be empty".to_string(),
            ));
        }
        if self.broker.database_url.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "broker.database_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn oracle_configs(&self) -> Vec<OracleConnectConfig> {
        self.databases.iter().map(Into::into).collect()
    }
}
