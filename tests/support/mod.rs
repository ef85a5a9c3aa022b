// ABOUTME: Test support utilities.
// ABOUTME: In-process fakes for transports, connectors and prompters, plus a TCP echo server.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tunwarden::config::{ConnectionTarget, TunnelSettings};
use tunwarden::ssh::{
    self, BoxedStream, Connector, InboundChannel, PromptAnswer, Prompter, RemoteListener,
    Transport,
};
use tunwarden::tunnel::TunnelState;
use tunwarden::types::Endpoint;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("tunwarden=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Settings scaled down so retry and stop paths finish in milliseconds.
#[allow(dead_code)]
pub fn fast_settings() -> TunnelSettings {
    TunnelSettings {
        connect_timeout: Duration::from_secs(2),
        accept_tick: Duration::from_millis(50),
        keepalive_interval: Duration::from_secs(60),
        max_retries: 3,
        retry_unit: Duration::from_millis(10),
        stop_grace: Duration::from_secs(2),
    }
}

#[allow(dead_code)]
pub fn target(id: &str) -> ConnectionTarget {
    ConnectionTarget::new(id, "127.0.0.1")
}

#[allow(dead_code)]
pub fn refused() -> ssh::Error {
    ssh::Error::Dial {
        addr: "127.0.0.1:22".to_string(),
        source: io::Error::from(io::ErrorKind::ConnectionRefused),
    }
}

#[allow(dead_code)]
pub fn rejected() -> ssh::Error {
    ssh::Error::AuthenticationRejected {
        user: "root".to_string(),
        addr: "127.0.0.1:22".to_string(),
    }
}

/// Transport whose channels are plain TCP connections made from this process.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct FakeTransport {
    closed: AtomicBool,
    probe_fails: AtomicBool,
    close_hangs: AtomicBool,
    close_calls: AtomicUsize,
    channels_opened: AtomicUsize,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundChannel>>>,
}

#[allow(dead_code)]
impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport whose remote listener yields whatever is sent on the
    /// returned channel.
    pub fn with_remote() -> (Arc<Self>, mpsc::UnboundedSender<InboundChannel>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self::default();
        *transport.inbound.lock() = Some(rx);
        (Arc::new(transport), tx)
    }

    pub fn fail_probes(&self) {
        self.probe_fails.store(true, Ordering::SeqCst);
    }

    /// Make `close` mark the transport closed and then never return.
    pub fn hang_on_close(&self) {
        self.close_hangs.store(true, Ordering::SeqCst);
    }

    /// Simulate the far side dropping the connection.
    pub fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.channels_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open_channel(&self, target: &Endpoint) -> ssh::Result<BoxedStream> {
        if self.is_closed() {
            return Err(ssh::Error::Closed);
        }
        self.channels_opened.fetch_add(1, Ordering::SeqCst);
        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| ssh::Error::ChannelOpen {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::pin(stream))
    }

    async fn open_remote_listener(
        &self,
        bind: &Endpoint,
    ) -> ssh::Result<Box<dyn RemoteListener>> {
        let receiver = self
            .inbound
            .lock()
            .take()
            .ok_or_else(|| ssh::Error::RemoteListen {
                bind: bind.to_string(),
                reason: "remote forwarding refused".to_string(),
            })?;
        Ok(Box::new(FakeRemoteListener { receiver }))
    }

    async fn probe(&self) -> ssh::Result<()> {
        if self.is_closed() || self.probe_fails.load(Ordering::SeqCst) {
            return Err(ssh::Error::Probe("no reply".to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.close_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
struct FakeRemoteListener {
    receiver: mpsc::UnboundedReceiver<InboundChannel>,
}

#[async_trait]
impl RemoteListener for FakeRemoteListener {
    async fn accept(&mut self) -> Option<InboundChannel> {
        self.receiver.recv().await
    }

    async fn close(&mut self) {
        self.receiver.close();
    }
}

/// One scripted connect outcome.
#[allow(dead_code)]
pub enum Step {
    Connect(Arc<FakeTransport>),
    Fail(ssh::Error),
    /// Never completes; only cancellation gets past it.
    Hang,
}

/// Connector that replays a fixed script, then keeps refusing.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    attempts: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _target: &ConnectionTarget) -> ssh::Result<Arc<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Connect(transport)) => Ok(transport as Arc<dyn Transport>),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(refused()),
        }
    }
}

/// Prompter that hands back a fixed answer and counts calls.
#[allow(dead_code)]
pub struct StubPrompter {
    answer: Mutex<Option<PromptAnswer>>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl StubPrompter {
    pub fn new(answer: PromptAnswer) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Some(answer)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Prompter for StubPrompter {
    fn prompt(&self, _target: &ConnectionTarget) -> io::Result<PromptAnswer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .lock()
            .take()
            .ok_or_else(|| io::Error::other("prompt already answered"))
    }
}

/// Echo server on an ephemeral port. Runs until the test's runtime ends.
#[allow(dead_code)]
pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// A port that was free a moment ago.
#[allow(dead_code)]
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Connect to `addr`, retrying briefly while a listener comes up.
#[allow(dead_code)]
pub async fn connect_when_ready(addr: SocketAddr) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("nothing listening on {addr}");
}

/// Send `payload` and read back the same number of bytes.
#[allow(dead_code)]
pub async fn round_trip(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    buf
}

/// Poll until `check` holds or five seconds pass.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// States in the order they were entered, with consecutive repeats folded.
#[allow(dead_code)]
pub fn dedup(history: Vec<TunnelState>) -> Vec<TunnelState> {
    let mut out: Vec<TunnelState> = Vec::with_capacity(history.len());
    for state in history {
        if out.last() != Some(&state) {
            out.push(state);
        }
    }
    out
}
