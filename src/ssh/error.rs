// ABOUTME: SSH transport error types and network fault classification.
// ABOUTME: Faults are recognised from io::ErrorKind and russh::Error variants, not message text.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Network-level fault categories that are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFault {
    ConnectionRefused,
    ConnectionReset,
    TimedOut,
    Unreachable,
    BrokenPipe,
    UnexpectedEof,
    ConnectionLost,
}

impl NetworkFault {
    pub fn from_io_kind(kind: io::ErrorKind) -> Option<Self> {
        use io::ErrorKind;
        match kind {
            ErrorKind::ConnectionRefused => Some(NetworkFault::ConnectionRefused),
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                Some(NetworkFault::ConnectionReset)
            }
            ErrorKind::TimedOut => Some(NetworkFault::TimedOut),
            ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NetworkDown
            | ErrorKind::AddrNotAvailable => Some(NetworkFault::Unreachable),
            ErrorKind::BrokenPipe => Some(NetworkFault::BrokenPipe),
            ErrorKind::UnexpectedEof => Some(NetworkFault::UnexpectedEof),
            ErrorKind::NotConnected => Some(NetworkFault::ConnectionLost),
            _ => None,
        }
    }

    pub fn from_russh(err: &russh::Error) -> Option<Self> {
        match err {
            russh::Error::IO(e) => Self::from_io_kind(e.kind()),
            russh::Error::Disconnect | russh::Error::HUP | russh::Error::SendError => {
                Some(NetworkFault::ConnectionLost)
            }
            russh::Error::ConnectionTimeout
            | russh::Error::KeepaliveTimeout
            | russh::Error::InactivityTimeout => Some(NetworkFault::TimedOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetworkFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            NetworkFault::ConnectionRefused => "connection refused",
            NetworkFault::ConnectionReset => "connection reset",
            NetworkFault::TimedOut => "timed out",
            NetworkFault::Unreachable => "unreachable",
            NetworkFault::BrokenPipe => "broken pipe",
            NetworkFault::UnexpectedEof => "unexpected end of stream",
            NetworkFault::ConnectionLost => "connection lost",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no usable credential: {0}")]
    NoCredential(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("failed to decode inline key: {0}")]
    KeyDecodeFailed(String),

    #[error("interactive authentication failed: {0}")]
    Prompt(String),

    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// `fault` is set when the proxy reports a network failure past it,
    /// as opposed to refusing the request.
    #[error("proxy {proxy} could not reach {addr}: {reason}")]
    Proxy {
        proxy: String,
        addr: String,
        reason: String,
        fault: Option<NetworkFault>,
    },

    #[error("SSH handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: russh::Error,
    },

    #[error("authentication rejected for {user}@{addr}")]
    AuthenticationRejected { user: String, addr: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport is closed")]
    Closed,

    #[error("failed to open channel to {target}: {reason}")]
    ChannelOpen { target: String, reason: String },

    #[error("server refused listener on {bind}: {reason}")]
    RemoteListen { bind: String, reason: String },

    #[error("liveness probe failed: {0}")]
    Probe(String),

    #[error("SSH session error: {0}")]
    Session(String),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// The network fault behind this error, if it is one.
    pub fn fault(&self) -> Option<NetworkFault> {
        match self {
            Error::Dial { source, .. } | Error::Io(source) => {
                NetworkFault::from_io_kind(source.kind())
            }
            Error::Handshake { source, .. } | Error::Protocol(source) => {
                NetworkFault::from_russh(source)
            }
            Error::Proxy { fault, .. } => *fault,
            Error::Timeout(_) => Some(NetworkFault::TimedOut),
            Error::Closed | Error::Probe(_) => Some(NetworkFault::ConnectionLost),
            _ => None,
        }
    }

    /// Whether reconnecting could plausibly fix this.
    pub fn is_retryable(&self) -> bool {
        self.fault().is_some()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
