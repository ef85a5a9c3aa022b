// ABOUTME: SSH transport layer: credential resolution, proxy dialing, authenticated sessions.
// ABOUTME: Exposes the Transport capability for tunnels plus exec and shell sessions.

mod auth;
mod connector;
mod error;
mod handler;
mod prompt;
mod proxy;
mod session;
mod transport;

pub use auth::{
    AuthMethod, AuthSource, CredentialResolver, DEFAULT_KEY_FILES, NoPrompt, PromptAnswer,
    Prompter, ResolvedAuth, default_key_paths,
};
pub use connector::{Connector, SshConnector, connect};
pub use error::{Error, NetworkFault, Result};
pub use prompt::TerminalPrompter;
pub use proxy::dial;
pub use session::{CommandOutput, PtyRequest, ShellInput};
pub use transport::{
    BoxedStream, DataStream, InboundChannel, RemoteListener, SshTransport, Transport,
};
