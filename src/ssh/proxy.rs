// ABOUTME: TCP dialing for the SSH transport, direct or through an HTTP/SOCKS5 proxy.
// ABOUTME: HTTP uses CONNECT with optional Basic auth; SOCKS5 goes through tokio-socks.

use super::error::{Error, NetworkFault, Result};
use crate::config::{ConnectionTarget, ProxyConfig, ProxyKind};
use crate::types::Endpoint;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

/// Upper bound on an HTTP CONNECT response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Open the TCP stream the SSH handshake will run over.
pub async fn dial(target: &ConnectionTarget) -> Result<TcpStream> {
    match &target.proxy {
        None => {
            let addr = target.address();
            tracing::debug!(addr = %addr, "Dialing directly");
            TcpStream::connect((target.host.as_str(), target.port))
                .await
                .map_err(|source| Error::Dial { addr, source })
        }
        Some(proxy) => {
            tracing::debug!(
                proxy = %format!("{}://{}:{}", proxy.kind, proxy.host, proxy.port),
                target = %target.address(),
                "Dialing through proxy"
            );
            let destination = Endpoint::new(&target.host, target.port);
            match proxy.kind {
                ProxyKind::Http => http_connect(proxy, &destination).await,
                ProxyKind::Socks5 => socks5_connect(proxy, &destination).await,
            }
        }
    }
}

async fn socks5_connect(proxy: &ProxyConfig, destination: &Endpoint) -> Result<TcpStream> {
    let proxy_addr = format!("{}:{}", proxy.host, proxy.port);
    let target_addr = (destination.host.as_str(), destination.port);

    let result = match proxy.credentials() {
        Some((user, pass)) => {
            Socks5Stream::connect_with_password(proxy_addr.as_str(), target_addr, user, pass).await
        }
        None => Socks5Stream::connect(proxy_addr.as_str(), target_addr).await,
    };

    match result {
        Ok(stream) => Ok(stream.into_inner()),
        Err(tokio_socks::Error::Io(source)) => Err(Error::Dial {
            addr: proxy_addr,
            source,
        }),
        Err(e) => Err(Error::Proxy {
            proxy: proxy_addr,
            addr: destination.to_string(),
            fault: socks_fault(&e),
            reason: e.to_string(),
        }),
    }
}

/// SOCKS5 replies that describe the network past the proxy rather than a
/// refusal by the proxy itself.
fn socks_fault(err: &tokio_socks::Error) -> Option<NetworkFault> {
    use tokio_socks::Error as Socks;
    match err {
        Socks::ConnectionRefused => Some(NetworkFault::ConnectionRefused),
        Socks::HostUnreachable | Socks::NetworkUnreachable | Socks::ProxyServerUnreachable => {
            Some(NetworkFault::Unreachable)
        }
        Socks::TtlExpired => Some(NetworkFault::TimedOut),
        _ => None,
    }
}

/// Gateway statuses mean the proxy could not reach the destination.
fn http_fault(status: u16) -> Option<NetworkFault> {
    match status {
        502 => Some(NetworkFault::ConnectionRefused),
        503 => Some(NetworkFault::Unreachable),
        504 => Some(NetworkFault::TimedOut),
        _ => None,
    }
}

async fn http_connect(proxy: &ProxyConfig, destination: &Endpoint) -> Result<TcpStream> {
    let proxy_addr = format!("{}:{}", proxy.host, proxy.port);
    let dial_err = |source: io::Error| Error::Dial {
        addr: proxy_addr.clone(),
        source,
    };

    let mut stream = TcpStream::connect(proxy_addr.as_str())
        .await
        .map_err(dial_err)?;

    let authority = destination.to_string();
    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some((user, pass)) = proxy.credentials() {
        let token = STANDARD.encode(format!("{}:{}", user, pass));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(dial_err)?;

    let head = read_response_head(&mut stream).await.map_err(dial_err)?;
    let status = parse_status(&head).ok_or_else(|| Error::Proxy {
        proxy: proxy_addr.clone(),
        addr: authority.clone(),
        reason: "malformed CONNECT response".to_string(),
        fault: None,
    })?;

    if status != 200 {
        let status_line = head.lines().next().unwrap_or_default().to_string();
        return Err(Error::Proxy {
            proxy: proxy_addr,
            addr: authority,
            reason: status_line,
            fault: http_fault(status),
        });
    }

    Ok(stream)
}

/// Read up to and including the blank line that ends the response head.
///
/// Reads one byte at a time: the SSH server may send its banner right after
/// the head and those bytes belong to the handshake.
async fn read_response_head(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy response head too large",
            ));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        head.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn parse_status(head: &str) -> Option<u16> {
    let status_line = head.lines().next()?;
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}
