// ABOUTME: Error types for the tunnel layer: data-plane failures and caller-facing errors.
// ABOUTME: Fault wraps whatever ended a forwarding phase so the supervisor can classify it.

use crate::config::ConfigError;
use crate::ssh;
use crate::types::TunnelId;
use std::io;
use thiserror::Error;

/// Errors from the data-plane accept loop.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed on {addr}: {source}")]
    Accept {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("remote listener on {0} closed unexpectedly")]
    ListenerClosed(String),

    #[error("transport lost")]
    TransportLost,

    #[error(transparent)]
    Transport(#[from] ssh::Error),
}

impl ForwardError {
    pub fn is_retryable(&self) -> bool {
        match self {
            // A taken port or a refused remote bind will not fix itself.
            ForwardError::Bind { .. } => false,
            ForwardError::Transport(e) => e.is_retryable(),
            ForwardError::Accept { .. }
            | ForwardError::ListenerClosed(_)
            | ForwardError::TransportLost => true,
        }
    }
}

/// Why a connect attempt or forwarding phase ended.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("connect failed: {0}")]
    Connect(#[source] ssh::Error),

    #[error("forwarding failed: {0}")]
    Forward(#[source] ForwardError),

    #[error("liveness probe failed: {0}")]
    Liveness(#[source] ssh::Error),
}

impl Fault {
    pub fn is_retryable(&self) -> bool {
        match self {
            Fault::Connect(e) => e.is_retryable(),
            Fault::Forward(e) => e.is_retryable(),
            Fault::Liveness(_) => true,
        }
    }
}

/// Errors returned to callers of the registry and manager.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel {0} is already running")]
    AlreadyRunning(TunnelId),

    #[error("tunnel {0} is not running")]
    NotRunning(TunnelId),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
