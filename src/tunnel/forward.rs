// ABOUTME: Data-plane forwarder: accepts connections on one side of a transport
// ABOUTME: and relays bytes to the other, in local or remote direction.

use super::error::ForwardError;
use crate::config::{ForwardDirection, ForwardSpec};
use crate::ssh::{BoxedStream, InboundChannel, Transport};
use crate::types::Endpoint;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs one forwarding spec over one transport until cancelled or broken.
pub struct DataPlaneForwarder {
    transport: Arc<dyn Transport>,
    spec: ForwardSpec,
    accept_tick: Duration,
}

impl DataPlaneForwarder {
    /// `accept_tick` is how often the transport is checked while accepting,
    /// and how long a remote forward waits to reach its local endpoint.
    pub fn new(transport: Arc<dyn Transport>, spec: ForwardSpec, accept_tick: Duration) -> Self {
        Self {
            transport,
            spec,
            accept_tick,
        }
    }

    /// Accept and relay until `cancel` fires (returns `Ok`) or the listener
    /// or transport fails (returns the error).
    ///
    /// Per-connection failures are logged and never end the loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ForwardError> {
        match self.spec.direction {
            ForwardDirection::Local => self.run_local(cancel).await,
            ForwardDirection::Remote => self.run_remote(cancel).await,
        }
    }

    async fn run_local(&self, cancel: CancellationToken) -> Result<(), ForwardError> {
        let bind = &self.spec.local;
        let listener = TcpListener::bind((bind.host.as_str(), bind.port))
            .await
            .map_err(|source| ForwardError::Bind {
                addr: bind.to_string(),
                source,
            })?;
        let bound = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| bind.to_string());
        info!(listen = %bound, remote = %self.spec.remote, "Local forward listening");

        let mut tick = self.health_tick();
        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(listen = %bound, "Local forward cancelled");
                    return Ok(());
                }
                _ = tick.tick() => {
                    if self.transport.is_closed() {
                        return Err(ForwardError::TransportLost);
                    }
                    continue;
                }
                result = listener.accept() => result,
            };

            match accepted {
                Ok((socket, peer)) => self.spawn_local(socket, peer),
                Err(_) if cancel.is_cancelled() => return Ok(()),
                Err(source) => {
                    return Err(ForwardError::Accept {
                        addr: bound,
                        source,
                    });
                }
            }
        }
    }

    fn spawn_local(&self, socket: TcpStream, peer: SocketAddr) {
        let transport = Arc::clone(&self.transport);
        let remote = self.spec.remote.clone();
        tokio::spawn(async move {
            let channel = match transport.open_channel(&remote).await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(%peer, remote = %remote, error = %e, "Failed to open channel");
                    return;
                }
            };
            debug!(%peer, remote = %remote, "Relaying connection");
            relay(Box::pin(socket), channel).await;
        });
    }

    async fn run_remote(&self, cancel: CancellationToken) -> Result<(), ForwardError> {
        let mut listener = self
            .transport
            .open_remote_listener(&self.spec.remote)
            .await?;
        info!(bind = %self.spec.remote, local = %self.spec.local, "Remote forward listening");

        let mut tick = self.health_tick();
        let outcome = loop {
            let inbound = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = tick.tick() => {
                    if self.transport.is_closed() {
                        break Err(ForwardError::TransportLost);
                    }
                    continue;
                }
                inbound = listener.accept() => inbound,
            };

            match inbound {
                Some(inbound) => self.spawn_remote(inbound),
                None if cancel.is_cancelled() => break Ok(()),
                None => break Err(ForwardError::ListenerClosed(self.spec.remote.to_string())),
            }
        };

        listener.close().await;
        outcome
    }

    /// Transport health is checked every `accept_tick` whether or not
    /// connections keep arriving.
    fn health_tick(&self) -> Interval {
        let mut tick = interval_at(Instant::now() + self.accept_tick, self.accept_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick
    }

    fn spawn_remote(&self, inbound: InboundChannel) {
        let local = self.spec.local.clone();
        let dial_timeout = self.accept_tick;
        tokio::spawn(async move {
            let InboundChannel { stream, originator } = inbound;
            let socket = match dial_local(&local, dial_timeout).await {
                Ok(socket) => socket,
                Err(e) => {
                    warn!(%originator, local = %local, error = %e, "Failed to reach local endpoint");
                    return;
                }
            };
            debug!(%originator, local = %local, "Relaying connection");
            relay(stream, Box::pin(socket)).await;
        });
    }
}

async fn dial_local(local: &Endpoint, timeout: Duration) -> std::io::Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect((local.host.as_str(), local.port)))
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))?
}

/// Copy bytes both ways until either side reaches end-of-stream or fails,
/// then close both.
pub(crate) async fn relay(a: BoxedStream, b: BoxedStream) {
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let mut outbound = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut a_read, &mut b_write).await;
        let _ = b_write.shutdown().await;
        copied
    });
    let mut inbound = tokio::spawn(async move {
        let copied = tokio::io::copy(&mut b_read, &mut a_write).await;
        let _ = a_write.shutdown().await;
        copied
    });

    let (direction, finished) = tokio::select! {
        result = &mut outbound => {
            inbound.abort();
            ("outbound", result)
        }
        result = &mut inbound => {
            outbound.abort();
            ("inbound", result)
        }
    };

    match finished {
        Ok(Ok(bytes)) => debug!(direction, bytes, "Relay finished"),
        Ok(Err(e)) => debug!(direction, error = %e, "Relay ended with error"),
        Err(e) => debug!(direction, error = %e, "Relay task failed"),
    }
}
