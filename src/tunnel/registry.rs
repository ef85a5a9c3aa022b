// ABOUTME: Registry of live tunnels keyed by id: start, stop, list and status.
// ABOUTME: Each started tunnel gets a supervisor task that deregisters it on completion.

use super::error::TunnelError;
use super::state::{TunnelState, TunnelStatus};
use super::supervisor::{Tunnel, TunnelSnapshot, TunnelSupervisor};
use crate::config::{ConnectionTarget, ForwardSpec, TunnelSettings};
use crate::ssh::Connector;
use crate::types::TunnelId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Inner {
    tunnels: Mutex<HashMap<TunnelId, Arc<Tunnel>>>,
    connector: Arc<dyn Connector>,
    settings: TunnelSettings,
}

impl Inner {
    /// Remove `tunnel` only if the entry under its id is this very instance.
    fn deregister(&self, tunnel: &Arc<Tunnel>) -> bool {
        let mut tunnels = self.tunnels.lock();
        match tunnels.get(tunnel.id()) {
            Some(current) if Arc::ptr_eq(current, tunnel) => {
                tunnels.remove(tunnel.id());
                true
            }
            _ => false,
        }
    }
}

/// Shared handle to the set of running tunnels. Cheap to clone.
#[derive(Clone)]
pub struct TunnelRegistry {
    inner: Arc<Inner>,
}

impl TunnelRegistry {
    pub fn new(connector: Arc<dyn Connector>, settings: TunnelSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                tunnels: Mutex::new(HashMap::new()),
                connector,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &TunnelSettings {
        &self.inner.settings
    }

    /// Register a tunnel and spawn its supervisor. Returns as soon as the
    /// supervisor is running; connecting happens in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        &self,
        id: TunnelId,
        target: ConnectionTarget,
        spec: ForwardSpec,
    ) -> Result<Arc<Tunnel>, TunnelError> {
        let tunnel = {
            let mut tunnels = self.inner.tunnels.lock();
            if tunnels.contains_key(&id) {
                return Err(TunnelError::AlreadyRunning(id));
            }
            let tunnel = Arc::new(Tunnel::new(id.clone(), target, spec));
            tunnels.insert(id, Arc::clone(&tunnel));
            tunnel
        };

        let supervisor = TunnelSupervisor::new(
            Arc::clone(&tunnel),
            Arc::clone(&self.inner.connector),
            self.inner.settings.clone(),
        );
        let inner = Arc::clone(&self.inner);
        let task_tunnel = Arc::clone(&tunnel);
        tokio::spawn(async move {
            let terminal = supervisor.run().await;
            inner.deregister(&task_tunnel);
            task_tunnel.transition(terminal);
        });

        Ok(tunnel)
    }

    /// Cancel a tunnel and wait for it to wind down.
    ///
    /// If the supervisor has not finished within the stop grace period the
    /// entry is removed and marked `Stopped` regardless, and the transport is
    /// closed in the background.
    pub async fn stop(&self, id: &TunnelId) -> Result<(), TunnelError> {
        let tunnel = self
            .get(id)
            .ok_or_else(|| TunnelError::NotRunning(id.clone()))?;

        info!(tunnel = %id, "Stopping tunnel");
        tunnel.cancel();

        let grace = self.inner.settings.stop_grace;
        if tokio::time::timeout(grace, tunnel.wait()).await.is_err() {
            warn!(tunnel = %id, grace = ?grace, "Tunnel did not stop in time, forcing close");
            if let Some(transport) = tunnel.take_transport() {
                tokio::spawn(async move { transport.close().await });
            }
            self.inner.deregister(&tunnel);
            tunnel.transition(TunnelState::Stopped);
        }
        Ok(())
    }

    /// Stop every tunnel concurrently. Safe to call repeatedly.
    pub async fn stop_all(&self) {
        let ids: Vec<TunnelId> = self.inner.tunnels.lock().keys().cloned().collect();
        let results = futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                debug!(tunnel = %id, error = %e, "Tunnel already gone");
            }
        }
    }

    pub fn get(&self, id: &TunnelId) -> Option<Arc<Tunnel>> {
        self.inner.tunnels.lock().get(id).cloned()
    }

    /// Snapshots of every registered tunnel, ordered by id.
    pub fn list(&self) -> Vec<TunnelSnapshot> {
        let mut snapshots: Vec<TunnelSnapshot> = self
            .inner
            .tunnels
            .lock()
            .values()
            .map(|t| t.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        snapshots
    }

    pub fn is_active(&self, id: &TunnelId) -> bool {
        self.inner.tunnels.lock().contains_key(id)
    }

    pub fn status(&self, id: &TunnelId) -> TunnelStatus {
        if self.is_active(id) {
            TunnelStatus::Running
        } else {
            TunnelStatus::Stopped
        }
    }

    pub fn len(&self) -> usize {
        self.inner.tunnels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
