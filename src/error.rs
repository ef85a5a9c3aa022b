// ABOUTME: Application-wide error type for the tunwarden binary.
// ABOUTME: Wraps the per-module errors so main can report any of them uniformly.

use crate::config::ConfigError;
use crate::ssh;
use crate::tunnel::TunnelError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot locate configuration: HOME is not set and --config was not given")]
    NoConfigPath,

    #[error("no server matching {0} and it is not a valid user@host[:port] address: {1}")]
    UnknownTarget(String, String),

    #[error("configuration file {0} could not be used: {1}")]
    ConfigLoad(PathBuf, #[source] ConfigError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Ssh(#[from] ssh::Error),

    #[error("{0} tunnel(s) failed")]
    TunnelsFailed(usize),

    #[error("shell exited with status {0}")]
    ShellExited(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
