use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use capview_core::{RelayEndpoint, RelayKind};
use capview_core::relay::{DEFAULT_RELAY_A, DEFAULT_RELAY_B};

pub const CONFIG_KEYS: &str = "server, format, relay_a, relay_b, viewer";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ProfileConfig {
    pub server: Option<String>,
    pub format: Option<String>,
    /// First relay: base URL with an optional `envelope:`, `raw:` or `query:`
    /// prefix (envelope when bare), or "off".
    pub relay_a: Option<String>,
    /// Second relay, same format (raw when bare), or "off".
    pub relay_b: Option<String>,
    /// Base URL of the hosted viewer, used for permalinks.
    pub viewer: Option<String>,
}

impl ProfileConfig {
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = Some(value.to_string());
        match key {
            "server" => self.server = value,
            "format" => self.format = value,
            "relay_a" => self.relay_a = value,
            "relay_b" => self.relay_b = value,
            "viewer" => self.viewer = value,
            other => anyhow::bail!("Unknown config key: {other}. Valid keys: {CONFIG_KEYS}"),
        }
        Ok(())
    }

    pub fn relay_a(&self) -> Option<RelayEndpoint> {
        relay_setting(self.relay_a.as_deref(), DEFAULT_RELAY_A)
            .map(|v| RelayEndpoint::from_setting(&v, RelayKind::Envelope))
    }

    pub fn relay_b(&self) -> Option<RelayEndpoint> {
        relay_setting(self.relay_b.as_deref(), DEFAULT_RELAY_B)
            .map(|v| RelayEndpoint::from_setting(&v, RelayKind::Raw))
    }
}

fn relay_setting(value: Option<&str>, default: &str) -> Option<String> {
    match value.map(str::trim) {
        None | Some("") => Some(default.to_string()),
        Some(v) if v.eq_ignore_ascii_case("off") || v.eq_ignore_ascii_case("none") => None,
        Some(v) => Some(v.to_string()),
    }
}

pub type ConfigFile = HashMap<String, ProfileConfig>;

fn config_dir() -> Result<PathBuf> {
    let dir = dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(".capview");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn load_all_from(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let cfg: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(cfg)
}

pub fn save_profile_to(path: &Path, profile: &str, config: &ProfileConfig) -> Result<()> {
    let mut all = load_all_from(path)?;
    all.insert(profile.to_string(), config.clone());
    let content = toml::to_string_pretty(&all)?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

pub fn load_profile(profile: &str) -> Result<ProfileConfig> {
    let mut all = load_all_from(&config_path()?)?;
    Ok(all.remove(profile).unwrap_or_default())
}

pub fn save_profile(profile: &str, config: &ProfileConfig) -> Result<()> {
    save_profile_to(&config_path()?, profile, config)
}

pub fn resolve_server(cli_server: Option<&str>, cfg: &ProfileConfig) -> Result<String> {
    // 1. --server flag / CAPVIEW_URL env
    if let Some(s) = cli_server.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(s.to_string());
    }
    // 2. config.toml profile
    if let Some(s) = cfg.server.as_deref().filter(|s| !s.trim().is_empty()) {
        return Ok(s.to_string());
    }
    anyhow::bail!(
        "No FHIR URL configured. Use --server, set CAPVIEW_URL, or run: capview config set server <url>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(load_all_from(&path).unwrap().is_empty());

        let mut cfg = ProfileConfig::default();
        cfg.set("server", "https://fhir.example.org/r4/metadata").unwrap();
        cfg.set("relay_b", "off").unwrap();
        save_profile_to(&path, "staging", &cfg).unwrap();
        save_profile_to(&path, "default", &ProfileConfig::default()).unwrap();

        let all = load_all_from(&path).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["staging"], cfg);
        assert!(fs::read_to_string(&path).unwrap().contains("[staging]"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = ProfileConfig::default().set("colour", "blue").unwrap_err();
        assert!(err.to_string().contains("Valid keys: server, format"));
    }

    #[test]
    fn test_relay_settings() {
        let mut cfg = ProfileConfig::default();
        assert_eq!(cfg.relay_a().unwrap().base_url, DEFAULT_RELAY_A);
        assert_eq!(cfg.relay_b().unwrap().kind, RelayKind::Raw);

        cfg.relay_a = Some("http://localhost:3001/proxy".into());
        cfg.relay_b = Some("OFF".into());
        assert_eq!(cfg.relay_a().unwrap().base_url, "http://localhost:3001/proxy");
        assert_eq!(cfg.relay_a().unwrap().kind, RelayKind::Envelope);
        assert!(cfg.relay_b().is_none());
    }

    #[test]
    fn test_self_hosted_relay_is_selectable_by_prefix() {
        let mut cfg = ProfileConfig::default();
        cfg.set("relay_a", "query:http://localhost:3001/proxy").unwrap();
        cfg.set("relay_b", "envelope:https://relay.example.org/get").unwrap();

        let a = cfg.relay_a().unwrap();
        assert_eq!(a.kind, RelayKind::Query);
        assert_eq!(a.base_url, "http://localhost:3001/proxy");
        assert_eq!(
            a.relayed_url("https://fhir.example.org/metadata"),
            "http://localhost:3001/proxy?url=https%3A%2F%2Ffhir.example.org%2Fmetadata"
        );
        let b = cfg.relay_b().unwrap();
        assert_eq!(b.kind, RelayKind::Envelope);
        assert_eq!(b.base_url, "https://relay.example.org/get");
    }

    #[test]
    fn test_resolve_server_precedence() {
        let cfg = ProfileConfig {
            server: Some("https://from-profile/metadata".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_server(Some("https://from-flag/metadata"), &cfg).unwrap(),
            "https://from-flag/metadata"
        );
        assert_eq!(resolve_server(None, &cfg).unwrap(), "https://from-profile/metadata");
        assert!(resolve_server(Some("  "), &ProfileConfig::default()).is_err());
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();
        let err = load_all_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid config file"));
    }
}
