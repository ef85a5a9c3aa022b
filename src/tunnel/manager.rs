// ABOUTME: Caller-facing tunnel service: resolves forwards from configuration and
// ABOUTME: drives the registry, connectivity tests and foreground runs.

use super::error::TunnelError;
use super::registry::TunnelRegistry;
use super::state::{TunnelState, TunnelStatus};
use super::supervisor::{Tunnel, TunnelSnapshot};
use crate::config::{ConfigSource, ConnectionTarget, PortForwardConfig, TunnelSettings};
use crate::ssh::{self, Connector};
use crate::types::TunnelId;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// How a foreground run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForegroundOutcome {
    /// The shutdown signal fired and every tunnel was stopped.
    Interrupted,
    /// Every tunnel reached a terminal state on its own.
    Finished(Vec<(TunnelId, TunnelState)>),
}

pub struct TunnelManager {
    config: Arc<dyn ConfigSource>,
    connector: Arc<dyn Connector>,
    registry: TunnelRegistry,
}

impl TunnelManager {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        connector: Arc<dyn Connector>,
        settings: TunnelSettings,
    ) -> Self {
        let registry = TunnelRegistry::new(Arc::clone(&connector), settings);
        Self {
            config,
            connector,
            registry,
        }
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    /// Start the tunnel described by a configured forward.
    pub fn start_tunnel(&self, forward: &PortForwardConfig) -> Result<Arc<Tunnel>, TunnelError> {
        let target = self.config.connection_target(&forward.server_id)?;
        self.registry
            .start(forward.id.clone(), target, forward.spec())
    }

    pub fn start_tunnel_by_alias(&self, alias: &str) -> Result<Arc<Tunnel>, TunnelError> {
        let forward = self.config.forward_by_alias(alias)?;
        self.start_tunnel(&forward)
    }

    pub async fn stop_tunnel(&self, id: &TunnelId) -> Result<(), TunnelError> {
        self.registry.stop(id).await
    }

    pub async fn stop_all_tunnels(&self) {
        self.registry.stop_all().await;
    }

    pub fn list_active_tunnels(&self) -> Vec<TunnelSnapshot> {
        self.registry.list()
    }

    pub fn tunnel_status(&self, id: &TunnelId) -> TunnelStatus {
        self.registry.status(id)
    }

    /// Connect to `target` and close again straight away.
    pub async fn test_connectivity(&self, target: &ConnectionTarget) -> Result<(), ssh::Error> {
        let transport = self.connector.connect(target).await?;
        let probe = transport.probe().await;
        transport.close().await;
        probe
    }

    /// Start the forwards named by `aliases` and hold them until `shutdown`
    /// resolves or all of them end on their own.
    ///
    /// If any alias fails to start, the ones already started are stopped.
    pub async fn run_foreground<F>(
        &self,
        aliases: &[String],
        shutdown: F,
    ) -> Result<ForegroundOutcome, TunnelError>
    where
        F: Future<Output = ()>,
    {
        let mut tunnels = Vec::with_capacity(aliases.len());
        for alias in aliases {
            match self.start_tunnel_by_alias(alias) {
                Ok(tunnel) => {
                    info!(alias = %alias, tunnel = %tunnel.id(), spec = %tunnel.spec(), "Forward started");
                    tunnels.push(tunnel);
                }
                Err(e) => {
                    self.stop_all_tunnels().await;
                    return Err(e);
                }
            }
        }

        let finished = futures::future::join_all(tunnels.iter().map(|t| t.wait()));
        tokio::select! {
            states = finished => {
                let outcome = tunnels
                    .iter()
                    .map(|t| t.id().clone())
                    .zip(states)
                    .collect();
                Ok(ForegroundOutcome::Finished(outcome))
            }
            _ = shutdown => {
                info!("Shutdown requested, stopping forwards");
                self.stop_all_tunnels().await;
                Ok(ForegroundOutcome::Interrupted)
            }
        }
    }
}
