use std::net::SocketAddr;

use capview_core::transport::DEFAULT_USER_AGENT;
use serde::Deserialize;

use crate::error::RelayError;

pub const DEFAULT_CONFIG_FILE: &str = "capview-relay.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Upstream request timeout.
    pub timeout_secs: u64,
    /// Accept plain `http://` targets. Local testing only.
    pub allow_http: bool,
    pub user_agent: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            timeout_secs: 30,
            allow_http: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.timeout_secs == 0 {
            return Err(RelayError::Invalid("timeout_secs must be greater than 0".into()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(RelayError::Invalid("user_agent must not be empty".into()));
        }
        Ok(())
    }

    pub fn addr(&self) -> Result<SocketAddr, RelayError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| RelayError::Invalid(format!("bad listen address {}:{}: {e}", self.host, self.port)))
    }
}

pub mod loader {
    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use super::{DEFAULT_CONFIG_FILE, RelayConfig};
    use crate::error::RelayError;

    pub fn load_config(path: Option<&str>) -> Result<RelayConfig, RelayError> {
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        let mut builder = Config::builder();
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment overrides, e.g. CAPVIEW_RELAY__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CAPVIEW_RELAY")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: RelayConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}
