// ABOUTME: Opens authenticated SSH transports: dial, handshake, then try auth sources in order.
// ABOUTME: The Connector trait is what the tunnel supervisor reconnects through.

use super::auth::{AuthMethod, AuthSource, CredentialResolver, ResolvedAuth};
use super::error::{Error, Result};
use super::handler::TunnelHandler;
use super::proxy;
use super::transport::{SshTransport, Transport};
use crate::config::{AuthConfig, ConnectionTarget, CredentialLookup};
use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Dial `target` and authenticate with the first source the server accepts.
///
/// The whole operation is bounded by `timeout`; on expiry the half-open
/// stream is dropped.
pub async fn connect(
    target: &ConnectionTarget,
    auth: &ResolvedAuth,
    timeout: Duration,
) -> Result<SshTransport> {
    match tokio::time::timeout(timeout, connect_inner(target, auth)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout)),
    }
}

async fn connect_inner(target: &ConnectionTarget, auth: &ResolvedAuth) -> Result<SshTransport> {
    let addr = target.address();
    let stream = proxy::dial(target).await?;

    // Liveness is probed by the tunnel supervisor, so no inactivity cutoff here.
    let russh_config = Config {
        inactivity_timeout: None,
        ..Default::default()
    };

    let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
    let handler = TunnelHandler::new(
        target.host.clone(),
        target.port,
        target.host_key.clone(),
        forwarded_tx,
    );

    let mut session = client::connect_stream(Arc::new(russh_config), stream, handler)
        .await
        .map_err(|source| Error::Handshake {
            addr: addr.clone(),
            source,
        })?;

    authenticate(&mut session, auth, &addr).await?;
    tracing::info!(addr = %addr, user = %auth.username, "SSH transport established");

    Ok(SshTransport::new(addr, session, forwarded_rx))
}

/// Offer each source in order. Sources that cannot be built are skipped.
async fn authenticate(
    session: &mut Handle<TunnelHandler>,
    auth: &ResolvedAuth,
    addr: &str,
) -> Result<()> {
    let mut offered = 0usize;
    let mut last_build_error = None;

    for source in &auth.sources {
        let method = match source.try_build().await {
            Ok(method) => method,
            Err(e) => {
                tracing::debug!(source = %source, error = %e, "Skipping auth source");
                last_build_error = Some(e);
                continue;
            }
        };
        offered += 1;

        if try_method(session, &auth.username, source, method).await? {
            tracing::debug!(source = %source, "Authenticated");
            return Ok(());
        }
    }

    if offered == 0 {
        return Err(last_build_error
            .unwrap_or_else(|| Error::NoCredential("no authentication method available".to_string())));
    }

    Err(Error::AuthenticationRejected {
        user: auth.username.clone(),
        addr: addr.to_string(),
    })
}

async fn try_method(
    session: &mut Handle<TunnelHandler>,
    user: &str,
    source: &AuthSource,
    method: AuthMethod,
) -> Result<bool> {
    match method {
        AuthMethod::Password(password) => {
            let result = session.authenticate_password(user, password).await?;
            Ok(result.success())
        }
        AuthMethod::PrivateKey(key) => {
            let hash_alg = session.best_supported_rsa_hash().await?.flatten();
            let result = session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                .await?;
            Ok(result.success())
        }
        AuthMethod::Agent(mut agent) => {
            let keys = match agent.request_identities().await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::debug!(source = %source, error = %e, "Failed to list agent keys");
                    return Ok(false);
                }
            };
            for key in keys {
                match session
                    .authenticate_publickey_with(user, key, None, &mut agent)
                    .await
                {
                    Ok(result) if result.success() => return Ok(true),
                    _ => continue,
                }
            }
            Ok(false)
        }
    }
}

/// Produces fresh transports for a target. Every call is a new connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Arc<dyn Transport>>;
}

/// Connector that resolves credentials and opens real SSH sessions.
pub struct SshConnector {
    resolver: CredentialResolver,
    credentials: Arc<dyn CredentialLookup>,
    timeout: Duration,
}

impl SshConnector {
    pub fn new(
        resolver: CredentialResolver,
        credentials: Arc<dyn CredentialLookup>,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            credentials,
            timeout,
        }
    }

    /// Resolve credentials off the async runtime; the interactive prompt blocks.
    async fn resolve(&self, target: &ConnectionTarget) -> Result<ResolvedAuth> {
        let credential = match &target.auth {
            AuthConfig::Credential { credential_id } => {
                self.credentials.find_credential(credential_id)
            }
            _ => None,
        };
        let resolver = self.resolver.clone();
        let target = target.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(&target, credential.as_ref()))
            .await
            .map_err(|e| Error::Prompt(format!("credential resolution aborted: {}", e)))?
    }
}

impl SshConnector {
    /// Resolve credentials and open a concrete session, for callers that
    /// need more than the `Transport` capability.
    pub async fn open(&self, target: &ConnectionTarget) -> Result<SshTransport> {
        let auth = self.resolve(target).await?;
        connect(target, &auth, self.timeout).await
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Arc<dyn Transport>> {
        let transport = self.open(target).await?;
        Ok(Arc::new(transport))
    }
}
