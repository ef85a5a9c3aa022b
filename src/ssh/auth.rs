// ABOUTME: Credential resolution: turns a target's auth config into ordered auth sources.
// ABOUTME: Sources are built lazily at connect time; the first one the server accepts wins.

use super::error::{Error, Result};
use crate::config::{AuthConfig, ConnectionTarget, CredentialKind, CredentialRecord};
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKey, decode_secret_key, load_secret_key};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;

/// Default private keys tried when nothing else is configured, in order.
pub const DEFAULT_KEY_FILES: [&str; 3] = ["id_rsa", "id_ecdsa", "id_ed25519"];

/// Something that can produce an authentication method on demand.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthSource {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    KeyContent {
        content: String,
        passphrase: Option<String>,
    },
    Agent,
}

// Secrets stay out of logs.
impl fmt::Debug for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthSource::Password(_) => f.write_str("Password(..)"),
            AuthSource::KeyFile { path, .. } => f.debug_struct("KeyFile").field("path", path).finish(),
            AuthSource::KeyContent { .. } => f.write_str("KeyContent(..)"),
            AuthSource::Agent => f.write_str("Agent"),
        }
    }
}

impl fmt::Display for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthSource::Password(_) => f.write_str("password"),
            AuthSource::KeyFile { path, .. } => write!(f, "key {}", path.display()),
            AuthSource::KeyContent { .. } => f.write_str("inline key"),
            AuthSource::Agent => f.write_str("ssh-agent"),
        }
    }
}

/// A ready-to-use authentication method.
pub enum AuthMethod {
    Password(String),
    PrivateKey(Arc<PrivateKey>),
    Agent(AgentClient<UnixStream>),
}

impl AuthSource {
    /// Build the method. Key files are read and agents dialed only here.
    pub async fn try_build(&self) -> Result<AuthMethod> {
        match self {
            AuthSource::Password(password) => Ok(AuthMethod::Password(password.clone())),
            AuthSource::KeyFile { path, passphrase } => load_secret_key(path, passphrase.as_deref())
                .map(|key| AuthMethod::PrivateKey(Arc::new(key)))
                .map_err(|e| Error::KeyLoadFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            AuthSource::KeyContent {
                content,
                passphrase,
            } => decode_secret_key(content, passphrase.as_deref())
                .map(|key| AuthMethod::PrivateKey(Arc::new(key)))
                .map_err(|e| Error::KeyDecodeFailed(e.to_string())),
            AuthSource::Agent => AgentClient::connect_env()
                .await
                .map(AuthMethod::Agent)
                .map_err(|e| Error::NoCredential(format!("SSH agent not available: {}", e))),
        }
    }
}

/// Resolved username plus the sources to offer, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuth {
    pub username: String,
    pub sources: Vec<AuthSource>,
}

/// What the operator picked at the interactive prompt.
#[derive(Clone, PartialEq, Eq)]
pub enum PromptAnswer {
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Agent,
}

impl fmt::Debug for PromptAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptAnswer::Password(_) => f.write_str("Password(..)"),
            PromptAnswer::KeyFile { path, .. } => {
                f.debug_struct("KeyFile").field("path", path).finish()
            }
            PromptAnswer::Agent => f.write_str("Agent"),
        }
    }
}

/// Asks the operator how to authenticate. Blocks the calling thread.
pub trait Prompter: Send + Sync {
    fn prompt(&self, target: &ConnectionTarget) -> std::io::Result<PromptAnswer>;
}

/// Prompter for non-interactive contexts; always refuses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn prompt(&self, _target: &ConnectionTarget) -> std::io::Result<PromptAnswer> {
        Err(std::io::Error::other("no interactive terminal available"))
    }
}

/// Turns a target's auth configuration into an ordered list of auth sources.
#[derive(Clone)]
pub struct CredentialResolver {
    prompter: Arc<dyn Prompter>,
    home: Option<PathBuf>,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("home", &self.home)
            .finish()
    }
}

impl CredentialResolver {
    pub fn new(prompter: Arc<dyn Prompter>) -> Self {
        Self {
            prompter,
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    /// Override the home directory used for default key discovery.
    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Resolve the username and auth sources for one connection attempt.
    ///
    /// `credential` is the record referenced by the target, if the target
    /// references one and it exists. Interactive targets prompt exactly once.
    pub fn resolve(
        &self,
        target: &ConnectionTarget,
        credential: Option<&CredentialRecord>,
    ) -> Result<ResolvedAuth> {
        let mut username = target.user.clone();

        let sources = match &target.auth {
            AuthConfig::Credential { credential_id } => match credential {
                Some(record) => {
                    if let Some(user) = record.username_override() {
                        username = user.to_string();
                    }
                    Self::record_sources(record)?
                }
                None => {
                    tracing::warn!(
                        credential = %credential_id,
                        "Credential not found, falling back to agent and default keys"
                    );
                    let discovered = self.discover();
                    if discovered.is_empty() {
                        return Err(Error::NoCredential(format!(
                            "credential {} not found and no agent or default key available",
                            credential_id
                        )));
                    }
                    discovered
                }
            },
            AuthConfig::Password { password } => {
                if password.is_empty() {
                    return Err(Error::NoCredential(
                        "password authentication requires a password".to_string(),
                    ));
                }
                vec![AuthSource::Password(password.clone())]
            }
            AuthConfig::Key {
                key_path,
                passphrase,
            } => match key_path.as_deref().filter(|p| !p.as_os_str().is_empty()) {
                Some(path) => vec![AuthSource::KeyFile {
                    path: path.to_path_buf(),
                    passphrase: passphrase.clone().filter(|p| !p.is_empty()),
                }],
                None => {
                    return Err(Error::NoCredential(
                        "key authentication requires a key path".to_string(),
                    ));
                }
            },
            AuthConfig::Interactive => {
                let answer = self
                    .prompter
                    .prompt(target)
                    .map_err(|e| Error::Prompt(e.to_string()))?;
                vec![match answer {
                    PromptAnswer::Password(password) => AuthSource::Password(password),
                    PromptAnswer::KeyFile { path, passphrase } => {
                        AuthSource::KeyFile { path, passphrase }
                    }
                    PromptAnswer::Agent => AuthSource::Agent,
                }]
            }
        };

        Ok(ResolvedAuth { username, sources })
    }

    fn record_sources(record: &CredentialRecord) -> Result<Vec<AuthSource>> {
        let passphrase = record.key_passphrase.clone().filter(|p| !p.is_empty());
        match record.kind {
            CredentialKind::Password => match record.password.as_deref() {
                Some(password) if !password.is_empty() => {
                    Ok(vec![AuthSource::Password(password.to_string())])
                }
                _ => Err(Error::NoCredential(format!(
                    "credential {} has an empty password",
                    record.id
                ))),
            },
            CredentialKind::Key => {
                if let Some(content) = record.key_content.as_deref().filter(|c| !c.is_empty()) {
                    return Ok(vec![AuthSource::KeyContent {
                        content: content.to_string(),
                        passphrase,
                    }]);
                }
                match record.key_path.as_deref().filter(|p| !p.as_os_str().is_empty()) {
                    Some(path) => Ok(vec![AuthSource::KeyFile {
                        path: path.to_path_buf(),
                        passphrase,
                    }]),
                    None => Err(Error::NoCredential(format!(
                        "credential {} has neither key content nor key path",
                        record.id
                    ))),
                }
            }
        }
    }

    /// Agent first (when one is advertised), then default key files that exist.
    fn discover(&self) -> Vec<AuthSource> {
        let mut sources = Vec::new();
        if std::env::var_os("SSH_AUTH_SOCK").is_some_and(|s| !s.is_empty()) {
            sources.push(AuthSource::Agent);
        }
        if let Some(home) = &self.home {
            sources.extend(
                default_key_paths(home)
                    .into_iter()
                    .filter(|path| path.is_file())
                    .map(|path| AuthSource::KeyFile {
                        path,
                        passphrase: None,
                    }),
            );
        }
        sources
    }
}

/// `$HOME/.ssh/{id_rsa,id_ecdsa,id_ed25519}`.
pub fn default_key_paths(home: &Path) -> Vec<PathBuf> {
    DEFAULT_KEY_FILES
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .collect()
}
