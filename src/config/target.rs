// ABOUTME: Connection target configuration: host, auth descriptor, proxy, host-key policy.
// ABOUTME: Parses ad-hoc targets in "host", "user@host", "host:port", "user@host:port" form.

use crate::types::{CredentialId, Endpoint, TargetId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A configured SSH server that tunnels are opened against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub id: TargetId,
    #[serde(default)]
    pub alias: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub host_key: HostKeyPolicy,
    #[serde(default)]
    pub description: Option<String>,
    /// Command run before an interactive shell is started.
    #[serde(default)]
    pub startup_script: Option<String>,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

/// How to authenticate against a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Inline password stored with the target.
    Password {
        #[serde(default)]
        password: String,
    },
    /// Private key file stored with the target.
    Key {
        #[serde(default)]
        key_path: Option<PathBuf>,
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Reference to a shared credential record.
    Credential { credential_id: CredentialId },
    /// Ask the operator on every connection attempt.
    #[default]
    #[serde(alias = "ask")]
    Interactive,
}

impl AuthConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthConfig::Password { .. } => "password",
            AuthConfig::Key { .. } => "key",
            AuthConfig::Credential { .. } => "credential",
            AuthConfig::Interactive => "interactive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks5,
}

impl std::fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyKind::Http => write!(f, "http"),
            ProxyKind::Socks5 => write!(f, "socks5"),
        }
    }
}

/// Proxy the TCP stream is dialed through before the SSH handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// Username and password, only when both are set and the username is non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), pass) if !user.is_empty() => {
                Some((user.as_str(), pass.as_deref().unwrap_or("")))
            }
            _ => None,
        }
    }
}

/// How the server's host key is verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Check against known_hosts. Unknown hosts are learned only when
    /// `trust_on_first_use` is set; a changed key is always rejected.
    KnownHosts {
        #[serde(default = "default_trust_on_first_use")]
        trust_on_first_use: bool,
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Accept any key. Only meant for compatibility testing.
    AcceptAny,
}

fn default_trust_on_first_use() -> bool {
    false
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::KnownHosts {
            trust_on_first_use: default_trust_on_first_use(),
            path: None,
        }
    }
}

impl ConnectionTarget {
    pub fn new(id: impl Into<TargetId>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: None,
            host: host.into(),
            port: default_port(),
            user: default_user(),
            auth: AuthConfig::default(),
            proxy: None,
            host_key: HostKeyPolicy::default(),
            description: None,
            startup_script: None,
        }
    }

    /// Parse an ad-hoc `[user@]host[:port]` target with interactive auth.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("server address cannot be empty".to_string());
        }

        let (user_part, rest) = match s.find('@') {
            Some(at_pos) => (Some(&s[..at_pos]), &s[at_pos + 1..]),
            None => (None, s),
        };

        let endpoint =
            Endpoint::parse_with_default(rest, default_port()).map_err(|e| e.to_string())?;

        let mut target = ConnectionTarget::new(s, endpoint.host);
        target.port = endpoint.port;
        if let Some(user) = user_part.filter(|u| !u.is_empty()) {
            target.user = user.to_string();
        }
        Ok(target)
    }

    pub fn address(&self) -> String {
        Endpoint::new(self.host.as_str(), self.port).to_string()
    }

    pub fn display_name(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}@{}:{} [{}]", self.user, self.host, self.port, alias),
            None => format!("{}@{}:{}", self.user, self.host, self.port),
        }
    }
}
