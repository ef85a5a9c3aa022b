// ABOUTME: Tunnel supervision: data-plane forwarding, retry policy, liveness
// ABOUTME: monitoring, the registry of running tunnels and the caller-facing manager.

mod backoff;
mod error;
mod forward;
mod manager;
mod monitor;
mod registry;
mod state;
mod supervisor;

pub use backoff::RetryPolicy;
pub use error::{Fault, ForwardError, TunnelError};
pub use forward::DataPlaneForwarder;
pub use manager::{ForegroundOutcome, TunnelManager};
pub use registry::TunnelRegistry;
pub use state::{TunnelState, TunnelStatus};
pub use supervisor::{Tunnel, TunnelSnapshot, TunnelSupervisor};
