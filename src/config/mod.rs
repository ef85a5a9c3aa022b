// ABOUTME: Read-only configuration: servers, credentials, port forwards, settings.
// ABOUTME: Loads the YAML file and answers lookups by id or alias.

mod credential;
mod forward;
mod settings;
mod target;

pub use credential::{CredentialKind, CredentialLookup, CredentialRecord};
pub use forward::{ForwardDirection, ForwardSpec, PortForwardConfig};
pub use settings::TunnelSettings;
pub use target::{AuthConfig, ConnectionTarget, HostKeyPolicy, ProxyConfig, ProxyKind};

use crate::types::{CredentialId, TargetId};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_DIR: &str = ".config/tunwarden";
pub const CONFIG_FILENAME: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("unknown credential: {0}")]
    UnknownCredential(String),

    #[error("no port forward with alias: {0}")]
    UnknownForward(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Lookups the tunnel core needs from whatever stores the configuration.
pub trait ConfigSource: Send + Sync {
    fn connection_target(&self, id: &TargetId) -> Result<ConnectionTarget, ConfigError>;

    fn credential(&self, id: &CredentialId) -> Result<CredentialRecord, ConfigError>;

    fn forward_by_alias(&self, alias: &str) -> Result<PortForwardConfig, ConfigError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ConnectionTarget>,

    #[serde(default)]
    pub credentials: Vec<CredentialRecord>,

    #[serde(default)]
    pub port_forwards: Vec<PortForwardConfig>,

    #[serde(default)]
    pub settings: TunnelSettings,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// `$HOME/.config/tunwarden/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home).join(CONFIG_DIR).join(CONFIG_FILENAME)
        })
    }

    /// Find a server by id, falling back to alias.
    pub fn find_server(&self, query: &str) -> Option<&ConnectionTarget> {
        self.servers
            .iter()
            .find(|s| s.id.as_str() == query)
            .or_else(|| {
                self.servers
                    .iter()
                    .find(|s| s.alias.as_deref() == Some(query))
            })
    }

    /// Find a credential by id, falling back to alias.
    pub fn find_credential_by_name(&self, query: &str) -> Option<&CredentialRecord> {
        self.credentials
            .iter()
            .find(|c| c.id.as_str() == query)
            .or_else(|| {
                self.credentials
                    .iter()
                    .find(|c| c.alias.as_deref() == Some(query))
            })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        ensure_unique("server id", self.servers.iter().map(|s| s.id.as_str()))?;
        ensure_unique(
            "credential id",
            self.credentials.iter().map(|c| c.id.as_str()),
        )?;
        ensure_unique(
            "port forward id",
            self.port_forwards.iter().map(|p| p.id.as_str()),
        )?;
        ensure_unique(
            "port forward alias",
            self.port_forwards.iter().filter_map(|p| p.alias.as_deref()),
        )?;

        for pf in &self.port_forwards {
            if !self.servers.iter().any(|s| s.id == pf.server_id) {
                return Err(ConfigError::Invalid(format!(
                    "port forward {} references unknown server {}",
                    pf.id, pf.server_id
                )));
            }
        }
        Ok(())
    }
}

fn ensure_unique<'a>(what: &str, values: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ConfigError::Invalid(format!("duplicate {}: {}", what, value)));
        }
    }
    Ok(())
}

impl ConfigSource for Config {
    fn connection_target(&self, id: &TargetId) -> Result<ConnectionTarget, ConfigError> {
        self.servers
            .iter()
            .find(|s| &s.id == id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownServer(id.to_string()))
    }

    fn credential(&self, id: &CredentialId) -> Result<CredentialRecord, ConfigError> {
        self.credentials
            .find_credential(id)
            .ok_or_else(|| ConfigError::UnknownCredential(id.to_string()))
    }

    fn forward_by_alias(&self, alias: &str) -> Result<PortForwardConfig, ConfigError> {
        self.port_forwards
            .iter()
            .find(|pf| pf.matches_alias(alias))
            .or_else(|| self.port_forwards.iter().find(|pf| pf.id.as_str() == alias))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownForward(alias.to_string()))
    }
}

impl CredentialLookup for Config {
    fn find_credential(&self, id: &CredentialId) -> Option<CredentialRecord> {
        self.credentials.find_credential(id)
    }
}
