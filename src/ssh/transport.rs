// ABOUTME: The Transport capability: channels, remote listeners, liveness probes, close.
// ABOUTME: SshTransport implements it on top of an authenticated russh session.

use super::error::{Error, Result};
use super::handler::{ForwardedChannel, TunnelHandler};
use crate::types::Endpoint;
use async_trait::async_trait;
use russh::Disconnect;
use russh::client::Handle;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};

/// A bidirectional byte stream: a TCP socket or an SSH channel.
pub trait DataStream: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> DataStream for T {}

pub type BoxedStream = Pin<Box<dyn DataStream>>;

/// A connection accepted on a remote listener.
pub struct InboundChannel {
    pub stream: BoxedStream,
    /// Address of the peer that connected on the far side.
    pub originator: String,
}

/// An authenticated, multiplexed connection.
///
/// Once `close` has been called the transport is dead for good; reconnecting
/// always produces a new one.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Open an outbound channel to `target`, dialed from the far side.
    async fn open_channel(&self, target: &Endpoint) -> Result<BoxedStream>;

    /// Ask the far side to listen on `bind` and hand over each connection.
    async fn open_remote_listener(&self, bind: &Endpoint) -> Result<Box<dyn RemoteListener>>;

    /// Side-effect-free check that the transport still carries traffic.
    async fn probe(&self) -> Result<()>;

    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A listener opened on the far side of a transport.
#[async_trait]
pub trait RemoteListener: Send {
    /// Next inbound connection; `None` once the listener or transport is gone.
    async fn accept(&mut self) -> Option<InboundChannel>;

    async fn close(&mut self);
}

/// Transport backed by a russh client session.
pub struct SshTransport {
    addr: String,
    pub(super) handle: Arc<Handle<TunnelHandler>>,
    forwarded: Mutex<Option<mpsc::UnboundedReceiver<ForwardedChannel>>>,
    closed: AtomicBool,
}

impl fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTransport")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SshTransport {
    pub(crate) fn new(
        addr: String,
        handle: Handle<TunnelHandler>,
        forwarded: mpsc::UnboundedReceiver<ForwardedChannel>,
    ) -> Self {
        Self {
            addr,
            handle: Arc::new(handle),
            forwarded: Mutex::new(Some(forwarded)),
            closed: AtomicBool::new(false),
        }
    }

    /// The `host:port` this transport is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub(super) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open_channel(&self, target: &Endpoint) -> Result<BoxedStream> {
        self.ensure_open()?;
        let channel = self
            .handle
            .channel_open_direct_tcpip(target.host.clone(), u32::from(target.port), "127.0.0.1", 0)
            .await
            .map_err(|e| Error::ChannelOpen {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::pin(channel.into_stream()))
    }

    async fn open_remote_listener(&self, bind: &Endpoint) -> Result<Box<dyn RemoteListener>> {
        self.ensure_open()?;
        let mut slot = self.forwarded.lock().await;
        let receiver = slot.take().ok_or_else(|| Error::RemoteListen {
            bind: bind.to_string(),
            reason: "a remote listener is already open on this transport".to_string(),
        })?;

        if let Err(e) = self
            .handle
            .tcpip_forward(bind.host.clone(), u32::from(bind.port))
            .await
        {
            *slot = Some(receiver);
            return Err(Error::RemoteListen {
                bind: bind.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(Box::new(SshRemoteListener {
            handle: Arc::clone(&self.handle),
            bind: bind.clone(),
            receiver,
            cancelled: false,
        }))
    }

    async fn probe(&self) -> Result<()> {
        self.ensure_open()?;
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Probe(e.to_string()))?;
        let _ = channel.close().await;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!(addr = %self.addr, error = %e, "Disconnect failed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.handle.is_closed()
    }
}

struct SshRemoteListener {
    handle: Arc<Handle<TunnelHandler>>,
    bind: Endpoint,
    receiver: mpsc::UnboundedReceiver<ForwardedChannel>,
    cancelled: bool,
}

#[async_trait]
impl RemoteListener for SshRemoteListener {
    async fn accept(&mut self) -> Option<InboundChannel> {
        let forwarded = self.receiver.recv().await?;
        Some(InboundChannel {
            stream: Box::pin(forwarded.channel.into_stream()),
            originator: forwarded.originator,
        })
    }

    async fn close(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.receiver.close();
        if let Err(e) = self
            .handle
            .cancel_tcpip_forward(self.bind.host.clone(), u32::from(self.bind.port))
            .await
        {
            tracing::debug!(bind = %self.bind, error = %e, "cancel_tcpip_forward failed");
        }
    }
}
