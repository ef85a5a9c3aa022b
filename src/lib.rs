// ABOUTME: Library root for tunwarden: supervised SSH port-forwarding tunnels.
// ABOUTME: The tunwarden binary is in main.rs.

pub mod config;
pub mod error;
pub mod output;
pub mod ssh;
pub mod tunnel;
pub mod types;
