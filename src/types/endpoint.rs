// ABOUTME: Host and port pair used for listen and connect addresses.
// ABOUTME: Parses "host", "host:port" and bracketed IPv6 "[::1]:port" forms.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("invalid port in endpoint: {0}")]
    InvalidPort(String),

    #[error("unclosed '[' in endpoint: {0}")]
    UnclosedBracket(String),

    #[error("endpoint host cannot be empty")]
    EmptyHost,
}

/// A host:port pair. The host is kept verbatim so names resolve on the side
/// that dials them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`, falling back to
    /// `default_port`. An unbracketed host with more than one colon is a
    /// bare IPv6 address and never carries a port.
    pub fn parse_with_default(s: &str, default_port: u16) -> Result<Self, EndpointError> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| EndpointError::UnclosedBracket(s.to_string()))?;
            let after = &rest[close + 1..];
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port),
                None if after.is_empty() => None,
                None => return Err(EndpointError::InvalidPort(after.to_string())),
            };
            (&rest[..close], port)
        } else {
            match s.rfind(':') {
                Some(colon) if s[..colon].contains(':') => (s, None),
                Some(colon) => (&s[..colon], Some(&s[colon + 1..])),
                None => (s, None),
            }
        };

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| EndpointError::InvalidPort(port.to_string()))?,
            None => default_port,
        };
        if host.is_empty() {
            return Err(EndpointError::EmptyHost);
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
