// ABOUTME: Command and interactive shell sessions over an established SSH transport.
// ABOUTME: exec collects a command's output; shell relays local input until the remote side closes.

use super::error::{Error, Result};
use super::transport::SshTransport;
use russh::{ChannelMsg, Pty};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Output of a command executed on the remote host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: u32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Pseudo-terminal requested before starting a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

const PTY_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 1),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Local events fed into an interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    Data(Vec<u8>),
    Resize { cols: u32, rows: u32 },
    Eof,
}

fn session_err(context: &str) -> impl Fn(russh::Error) -> Error + '_ {
    move |e| Error::Session(format!("{}: {}", context, e))
}

impl SshTransport {
    /// Run `command` on a fresh session channel and collect its output.
    pub async fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.ensure_open()?;
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(session_err("failed to open channel"))?;
        channel
            .exec(true, command)
            .await
            .map_err(session_err("failed to exec command"))?;

        let mut output = CommandOutput::default();
        let mut exit_code = None;
        let mut got_eof = false;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => output.stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                    output.stderr.extend_from_slice(&data)
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                    if got_eof {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Failure) => {
                    return Err(Error::Session(format!("server refused to run {:?}", command)));
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        output.exit_code = exit_code.ok_or_else(|| {
            Error::Session(format!("{:?} ended without an exit status", command))
        })?;
        Ok(output)
    }

    /// Start a shell, optionally on a pseudo-terminal, and relay until the
    /// remote side closes the channel.
    ///
    /// `input` drives what is sent; everything the shell prints, stderr
    /// included, goes to `output`. Returns the exit status if the server sent one.
    pub async fn shell<W>(
        &self,
        pty: Option<&PtyRequest>,
        mut input: mpsc::UnboundedReceiver<ShellInput>,
        mut output: W,
    ) -> Result<Option<u32>>
    where
        W: AsyncWrite + Unpin,
    {
        self.ensure_open()?;
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(session_err("failed to open channel"))?;

        if let Some(pty) = pty {
            channel
                .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, PTY_MODES)
                .await
                .map_err(session_err("failed to request pty"))?;
        }
        channel
            .request_shell(true)
            .await
            .map_err(session_err("failed to start shell"))?;

        let mut exit_code = None;
        let mut input_open = true;

        loop {
            tokio::select! {
                event = input.recv(), if input_open => match event {
                    Some(ShellInput::Data(bytes)) => {
                        channel
                            .data(&bytes[..])
                            .await
                            .map_err(session_err("failed to send input"))?;
                    }
                    Some(ShellInput::Resize { cols, rows }) => {
                        channel
                            .window_change(cols, rows, 0, 0)
                            .await
                            .map_err(session_err("failed to resize"))?;
                    }
                    Some(ShellInput::Eof) | None => {
                        input_open = false;
                        channel.eof().await.map_err(session_err("failed to send EOF"))?;
                    }
                },
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                        output.write_all(&data).await?;
                        output.flush().await?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                    Some(ChannelMsg::Failure) => {
                        return Err(Error::Session("server refused the shell request".to_string()));
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                },
            }
        }

        Ok(exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_output_helpers() {
        let output = CommandOutput {
            stdout: b"ok\n".to_vec(),
            stderr: vec![0xff, b'!'],
            exit_code: 0,
        };
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "ok\n");
        assert_eq!(output.stderr_lossy(), "\u{fffd}!");
    }
}
