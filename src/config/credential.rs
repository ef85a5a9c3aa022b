// ABOUTME: Shared credential records referenced by connection targets.
// ABOUTME: Holds a password or key material (content or path) plus optional passphrase.

use crate::types::CredentialId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Password,
    Key,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: CredentialId,
    #[serde(default)]
    pub alias: Option<String>,
    /// Overrides the target's own user when set.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Inline PEM/OpenSSH key; preferred over `key_path`.
    #[serde(default)]
    pub key_content: Option<String>,
    #[serde(default)]
    pub key_passphrase: Option<String>,
}

impl CredentialRecord {
    pub fn password(id: impl Into<CredentialId>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: None,
            username: None,
            kind: CredentialKind::Password,
            password: Some(password.into()),
            key_path: None,
            key_content: None,
            key_passphrase: None,
        }
    }

    pub fn key_file(id: impl Into<CredentialId>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            alias: None,
            username: None,
            kind: CredentialKind::Key,
            password: None,
            key_path: Some(path.into()),
            key_content: None,
            key_passphrase: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// The username override, ignoring empty strings.
    pub fn username_override(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Read-only lookup of credential records by id.
pub trait CredentialLookup: Send + Sync {
    fn find_credential(&self, id: &CredentialId) -> Option<CredentialRecord>;
}

impl CredentialLookup for HashMap<CredentialId, CredentialRecord> {
    fn find_credential(&self, id: &CredentialId) -> Option<CredentialRecord> {
        self.get(id).cloned()
    }
}

impl CredentialLookup for Vec<CredentialRecord> {
    fn find_credential(&self, id: &CredentialId) -> Option<CredentialRecord> {
        self.iter().find(|c| &c.id == id).cloned()
    }
}
