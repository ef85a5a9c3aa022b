// ABOUTME: Port forward definitions: direction plus local and remote endpoints.
// ABOUTME: A configured forward names its owning server and an optional alias.

use crate::types::{Endpoint, TargetId, TunnelId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardDirection {
    /// Listen locally, dial from the server side.
    Local,
    /// Listen on the server, dial locally.
    Remote,
}

impl fmt::Display for ForwardDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardDirection::Local => write!(f, "local"),
            ForwardDirection::Remote => write!(f, "remote"),
        }
    }
}

/// What a tunnel forwards. Immutable for the life of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardSpec {
    pub direction: ForwardDirection,
    pub local: Endpoint,
    pub remote: Endpoint,
}

impl ForwardSpec {
    pub fn local(local: Endpoint, remote: Endpoint) -> Self {
        Self {
            direction: ForwardDirection::Local,
            local,
            remote,
        }
    }

    pub fn remote(local: Endpoint, remote: Endpoint) -> Self {
        Self {
            direction: ForwardDirection::Remote,
            local,
            remote,
        }
    }
}

impl fmt::Display for ForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            ForwardDirection::Local => write!(f, "{} -> {} (local)", self.local, self.remote),
            ForwardDirection::Remote => write!(f, "{} -> {} (remote)", self.remote, self.local),
        }
    }
}

/// A forward as stored in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForwardConfig {
    pub id: TunnelId,
    #[serde(default)]
    pub alias: Option<String>,
    pub server_id: TargetId,
    #[serde(rename = "type", default = "default_direction")]
    pub direction: ForwardDirection,
    #[serde(default = "default_bind_host")]
    pub local_host: String,
    pub local_port: u16,
    #[serde(default = "default_bind_host")]
    pub remote_host: String,
    pub remote_port: u16,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_direction() -> ForwardDirection {
    ForwardDirection::Local
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

impl PortForwardConfig {
    pub fn spec(&self) -> ForwardSpec {
        ForwardSpec {
            direction: self.direction,
            local: Endpoint::new(&self.local_host, self.local_port),
            remote: Endpoint::new(&self.remote_host, self.remote_port),
        }
    }

    pub fn matches_alias(&self, alias: &str) -> bool {
        self.alias.as_deref() == Some(alias)
    }
}
