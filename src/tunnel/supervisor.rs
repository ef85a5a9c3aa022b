// ABOUTME: Per-tunnel supervisor: connect, forward, retry with backoff, stop on request.
// ABOUTME: Tunnel holds the shared state a registry entry and its supervisor task both see.

use super::backoff::RetryPolicy;
use super::error::Fault;
use super::forward::DataPlaneForwarder;
use super::monitor;
use super::state::TunnelState;
use crate::config::{ConnectionTarget, ForwardSpec, TunnelSettings};
use crate::ssh::{Connector, Transport};
use crate::types::{TargetId, TunnelId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Point-in-time view of a tunnel for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelSnapshot {
    pub id: TunnelId,
    pub server: TargetId,
    pub spec: ForwardSpec,
    pub state: TunnelState,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
}

/// One tunnel instance.
///
/// Owned jointly by the registry and the supervisor task. The transport slot
/// is only written by the supervisor, except for a forced close after the
/// stop grace period has run out.
pub struct Tunnel {
    id: TunnelId,
    target: ConnectionTarget,
    spec: ForwardSpec,
    started_at: DateTime<Utc>,
    state: watch::Sender<TunnelState>,
    history: Mutex<Vec<TunnelState>>,
    retry_count: AtomicU32,
    cancel: CancellationToken,
    transport: Mutex<Option<Arc<dyn Transport>>>,
}

impl Tunnel {
    pub(crate) fn new(id: TunnelId, target: ConnectionTarget, spec: ForwardSpec) -> Self {
        let (state, _) = watch::channel(TunnelState::Idle);
        Self {
            id,
            target,
            spec,
            started_at: Utc::now(),
            state,
            history: Mutex::new(vec![TunnelState::Idle]),
            retry_count: AtomicU32::new(0),
            cancel: CancellationToken::new(),
            transport: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &TunnelId {
        &self.id
    }

    pub fn spec(&self) -> &ForwardSpec {
        &self.spec
    }

    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    /// Every state this tunnel has passed through, oldest first.
    pub fn history(&self) -> Vec<TunnelState> {
        self.history.lock().clone()
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    /// Resolves with the terminal state once the supervisor has finished
    /// and the tunnel is out of the registry.
    pub async fn wait(&self) -> TunnelState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub fn snapshot(&self) -> TunnelSnapshot {
        TunnelSnapshot {
            id: self.id.clone(),
            server: self.target.id.clone(),
            spec: self.spec.clone(),
            state: self.state(),
            retry_count: self.retry_count(),
            started_at: self.started_at,
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn take_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().take()
    }

    fn set_transport(&self, transport: Option<Arc<dyn Transport>>) {
        *self.transport.lock() = transport;
    }

    fn set_retry_count(&self, count: u32) {
        self.retry_count.store(count, Ordering::SeqCst);
    }

    /// Move to `next`. Terminal states are final: a forced stop may publish
    /// `Stopped` before a stuck supervisor reports its own outcome.
    pub(crate) fn transition(&self, next: TunnelState) {
        let mut previous = next;
        let moved = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            previous = std::mem::replace(state, next);
            true
        });
        if !moved {
            debug!(tunnel = %self.id, to = %next, "Already terminal, ignoring state change");
            return;
        }
        self.history.lock().push(next);
        if previous != next {
            debug!(tunnel = %self.id, from = %previous, to = %next, "State change");
        }
    }
}

/// Drives one tunnel through its lifecycle.
pub struct TunnelSupervisor {
    tunnel: Arc<Tunnel>,
    connector: Arc<dyn Connector>,
    settings: TunnelSettings,
    policy: RetryPolicy,
}

impl TunnelSupervisor {
    pub fn new(tunnel: Arc<Tunnel>, connector: Arc<dyn Connector>, settings: TunnelSettings) -> Self {
        let policy = RetryPolicy::from(&settings);
        Self {
            tunnel,
            connector,
            settings,
            policy,
        }
    }

    /// Run until stopped or failed and return the terminal state.
    ///
    /// The terminal state is not published here; the caller does that after
    /// deregistering the tunnel.
    pub async fn run(self) -> TunnelState {
        let span = info_span!(
            "tunnel",
            id = %self.tunnel.id,
            server = %self.tunnel.target.display_name()
        );
        self.supervise().instrument(span).await
    }

    async fn supervise(&self) -> TunnelState {
        let tunnel = &self.tunnel;
        info!(spec = %tunnel.spec, "Starting tunnel");
        let mut failures: u32 = 0;

        loop {
            tunnel.transition(TunnelState::Connecting);

            let attempt = tokio::select! {
                biased;
                _ = tunnel.cancel.cancelled() => return self.stopped(),
                result = self.connector.connect(&tunnel.target) => result,
            };

            let fault = match attempt {
                Ok(transport) => {
                    failures = 0;
                    tunnel.set_retry_count(0);
                    tunnel.set_transport(Some(Arc::clone(&transport)));
                    tunnel.transition(TunnelState::Forwarding);
                    info!("Tunnel established");

                    let outcome = self.forward(Arc::clone(&transport)).await;

                    // The forwarder has unwound; nothing else is using the transport.
                    tunnel.set_transport(None);
                    transport.close().await;

                    match outcome {
                        Some(fault) => fault,
                        None => return self.stopped(),
                    }
                }
                Err(e) => Fault::Connect(e),
            };

            if tunnel.is_cancelled() {
                return self.stopped();
            }

            if !fault.is_retryable() {
                error!(error = %fault, "Tunnel failed");
                return TunnelState::Failed;
            }

            failures += 1;
            tunnel.set_retry_count(failures);
            tunnel.transition(TunnelState::Retrying);

            if self.policy.exhausted(failures) {
                error!(error = %fault, attempts = failures, "Giving up after repeated failures");
                return TunnelState::Failed;
            }

            let delay = self.policy.delay(failures);
            warn!(
                error = %fault,
                attempt = failures,
                max = self.policy.max_retries,
                delay = ?delay,
                "Tunnel interrupted, retrying"
            );

            tokio::select! {
                biased;
                _ = tunnel.cancel.cancelled() => return self.stopped(),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One forwarding phase. `None` means the phase ended because the tunnel
    /// was stopped.
    async fn forward(&self, transport: Arc<dyn Transport>) -> Option<Fault> {
        let phase = self.tunnel.cancel.child_token();
        let (fault_tx, mut fault_rx) = mpsc::channel(1);
        let monitor = tokio::spawn(
            monitor::run(
                Arc::clone(&transport),
                self.settings.keepalive_interval,
                phase.clone(),
                fault_tx,
            )
            .in_current_span(),
        );

        let forwarder =
            DataPlaneForwarder::new(transport, self.tunnel.spec.clone(), self.settings.accept_tick);
        let run = forwarder.run(phase.clone());
        tokio::pin!(run);

        let first = tokio::select! {
            result = &mut run => Ok(result),
            Some(fault) = fault_rx.recv() => Err(fault),
        };
        let outcome = match first {
            Ok(result) => result.err().map(Fault::Forward),
            Err(fault) => {
                // Let the accept loop unwind before the transport is closed.
                phase.cancel();
                let _ = run.await;
                Some(fault)
            }
        };

        phase.cancel();
        let _ = monitor.await;

        if self.tunnel.is_cancelled() {
            return None;
        }
        outcome
    }

    fn stopped(&self) -> TunnelState {
        info!("Tunnel stopped");
        TunnelState::Stopped
    }
}
