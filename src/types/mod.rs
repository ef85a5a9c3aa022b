// ABOUTME: Type-safe identifiers and small validated value types.
// ABOUTME: Uses phantom types to keep tunnel, server and credential ids apart.

mod endpoint;
mod id;

pub use endpoint::{Endpoint, EndpointError};
pub use id::{CredentialId, Id, TargetId, TunnelId};
