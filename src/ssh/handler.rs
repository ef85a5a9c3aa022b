// ABOUTME: russh client handler: host key verification and remote-forward channel intake.
// ABOUTME: Channels opened by the server for remote listeners are queued for the transport.

use crate::config::HostKeyPolicy;
use russh::Channel;
use russh::client::{self, Msg};
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use tokio::sync::mpsc;

/// A channel the server opened because something connected to a remote listener.
pub(crate) struct ForwardedChannel {
    pub channel: Channel<Msg>,
    pub originator: String,
}

pub(crate) struct TunnelHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    forwarded: mpsc::UnboundedSender<ForwardedChannel>,
}

impl TunnelHandler {
    pub(crate) fn new(
        host: String,
        port: u16,
        policy: HostKeyPolicy,
        forwarded: mpsc::UnboundedSender<ForwardedChannel>,
    ) -> Self {
        Self {
            host,
            port,
            policy,
            forwarded,
        }
    }
}

/// Decide whether to accept `key` for `host:port` under `policy`.
///
/// Unknown hosts are learned only with trust-on-first-use. A changed key or
/// an unreadable known_hosts file is always a rejection.
pub(crate) fn verify_host_key(
    host: &str,
    port: u16,
    policy: &HostKeyPolicy,
    key: &ssh_key::PublicKey,
) -> bool {
    let (trust_on_first_use, path) = match policy {
        HostKeyPolicy::AcceptAny => {
            tracing::warn!(host, port, "Accepting host key without verification");
            return true;
        }
        HostKeyPolicy::KnownHosts {
            trust_on_first_use,
            path,
        } => (*trust_on_first_use, path.as_ref()),
    };

    let check_result = match path {
        Some(path) => check_known_hosts_path(host, port, key, path),
        None => check_known_hosts(host, port, key),
    };

    match check_result {
        Ok(true) => true,
        Ok(false) if trust_on_first_use => {
            tracing::warn!(
                "Trust-On-First-Use: accepting unknown host key for {}:{}",
                host,
                port
            );
            let learn_result = match path {
                Some(path) => learn_known_hosts_path(host, port, key, path),
                None => learn_known_hosts(host, port, key),
            };
            if let Err(e) = learn_result {
                tracing::warn!("Failed to save host key to known_hosts: {}", e);
            }
            true
        }
        Ok(false) => {
            tracing::error!(host, port, "Unknown host key, add it to known_hosts first");
            false
        }
        Err(russh::keys::Error::KeyChanged { line }) => {
            tracing::error!(host, port, line, "Host key changed, refusing connection");
            false
        }
        Err(e) => {
            tracing::error!(host, port, error = %e, "known_hosts check failed");
            false
        }
    }
}

impl client::Handler for TunnelHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(verify_host_key(
            &self.host,
            self.port,
            &self.policy,
            server_public_key,
        ))
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            "Forwarded connection from {}:{} to {}:{}",
            originator_address,
            originator_port,
            connected_address,
            connected_port
        );
        let forwarded = ForwardedChannel {
            channel,
            originator: format!("{}:{}", originator_address, originator_port),
        };
        if self.forwarded.send(forwarded).is_err() {
            tracing::debug!("No remote listener waiting, dropping forwarded channel");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const HOST_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFbvpSbbmS4gL0k4IFnysi1NUMFytYV6zHuI+mbGbSSK";
    const OTHER_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILtkF8cfxzWK4caNEq2S7c3WIv0tUVbTd7O273gbIFiI";

    fn key(text: &str) -> ssh_key::PublicKey {
        ssh_key::PublicKey::from_openssh(text).unwrap()
    }

    fn pinned(path: PathBuf, trust_on_first_use: bool) -> HostKeyPolicy {
        HostKeyPolicy::KnownHosts {
            trust_on_first_use,
            path: Some(path),
        }
    }

    #[test]
    fn default_policy_refuses_unknown_host() {
        let home = tempfile::tempdir().unwrap();
        let accepted = temp_env::with_var("HOME", Some(home.path()), || {
            verify_host_key("db.internal", 22, &HostKeyPolicy::default(), &key(HOST_KEY))
        });
        assert!(!accepted);
        assert!(!home.path().join(".ssh/known_hosts").exists());
    }

    #[test]
    fn recorded_key_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, format!("[db.internal]:2222 {HOST_KEY}\n")).unwrap();

        assert!(verify_host_key(
            "db.internal",
            2222,
            &pinned(path, false),
            &key(HOST_KEY)
        ));
    }

    #[test]
    fn changed_key_is_refused_even_with_tofu() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, format!("db.internal {HOST_KEY}\n")).unwrap();

        assert!(!verify_host_key(
            "db.internal",
            22,
            &pinned(path, true),
            &key(OTHER_KEY)
        ));
    }

    #[test]
    fn tofu_learns_unknown_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");

        let policy = pinned(path.clone(), true);
        assert!(verify_host_key("db.internal", 22, &policy, &key(HOST_KEY)));
        let recorded = std::fs::read_to_string(&path).unwrap();
        assert!(recorded.starts_with("db.internal ssh-ed25519 "));

        let strict = pinned(path, false);
        assert!(verify_host_key("db.internal", 22, &strict, &key(HOST_KEY)));
    }

    #[test]
    fn unreadable_known_hosts_is_refused_even_with_tofu() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, "db.internal ssh-ed25519 !!not-base64!!\n").unwrap();

        assert!(!verify_host_key(
            "db.internal",
            22,
            &pinned(path, true),
            &key(HOST_KEY)
        ));
    }
}
