// ABOUTME: Tunnel lifecycle states and the coarse running/stopped status.
// ABOUTME: Stopped and Failed are terminal; a terminal tunnel leaves the registry.

use serde::Serialize;
use std::fmt;

/// Lifecycle of one supervised tunnel.
///
/// `Idle -> Connecting -> Forwarding -> Retrying -> Connecting ...`, ending in
/// `Stopped` (requested) or `Failed` (fatal fault or retry budget spent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    Idle,
    Connecting,
    Forwarding,
    Retrying,
    Stopped,
    Failed,
}

impl TunnelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TunnelState::Stopped | TunnelState::Failed)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TunnelState::Idle => "idle",
            TunnelState::Connecting => "connecting",
            TunnelState::Forwarding => "forwarding",
            TunnelState::Retrying => "retrying",
            TunnelState::Stopped => "stopped",
            TunnelState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Running,
    Stopped,
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelStatus::Running => f.write_str("running"),
            TunnelStatus::Stopped => f.write_str("stopped"),
        }
    }
}
