// ABOUTME: Local terminal plumbing for the connect command: raw mode, size and input relay.
// ABOUTME: Stdin and window size are watched on plain threads and fed to the shell as ShellInput.

use crossterm::terminal;
use std::io::{IsTerminal, Read};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tunwarden::ssh::{self, PtyRequest, ShellInput, SshTransport};

const DEFAULT_TERM: &str = "xterm-256color";
const DEFAULT_SIZE: (u16, u16) = (80, 24);
const RESIZE_POLL: Duration = Duration::from_millis(250);

/// Restores cooked mode when dropped.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

fn window_size() -> (u16, u16) {
    terminal::size().unwrap_or(DEFAULT_SIZE)
}

fn pty_request() -> PtyRequest {
    let (cols, rows) = window_size();
    PtyRequest {
        term: DEFAULT_TERM.to_string(),
        cols: cols.into(),
        rows: rows.into(),
    }
}

fn relay_stdin(tx: UnboundedSender<ShellInput>) {
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(ShellInput::Eof);
                    return;
                }
                Ok(n) => {
                    if tx.send(ShellInput::Data(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "Stdin closed");
                    let _ = tx.send(ShellInput::Eof);
                    return;
                }
            }
        }
    });
}

fn watch_resize(tx: UnboundedSender<ShellInput>, initial: (u16, u16)) {
    std::thread::spawn(move || {
        let mut last = initial;
        while !tx.is_closed() {
            std::thread::sleep(RESIZE_POLL);
            let size = window_size();
            if size != last {
                last = size;
                let (cols, rows) = size;
                let resize = ShellInput::Resize {
                    cols: cols.into(),
                    rows: rows.into(),
                };
                if tx.send(resize).is_err() {
                    return;
                }
            }
        }
    });
}

/// Attach the local terminal to a remote shell until it exits.
///
/// A pseudo-terminal is only requested when stdin is a terminal; piped
/// input runs the shell without one.
pub async fn run_shell(transport: &SshTransport) -> ssh::Result<Option<u32>> {
    let interactive = std::io::stdin().is_terminal();
    let (tx, rx) = mpsc::unbounded_channel();

    let pty = interactive.then(pty_request);
    let _raw = if interactive {
        Some(RawModeGuard::enter()?)
    } else {
        None
    };

    relay_stdin(tx.clone());
    if let Some(pty) = &pty {
        let cols = u16::try_from(pty.cols).unwrap_or(DEFAULT_SIZE.0);
        let rows = u16::try_from(pty.rows).unwrap_or(DEFAULT_SIZE.1);
        watch_resize(tx, (cols, rows));
    }

    transport.shell(pty.as_ref(), rx, tokio::io::stdout()).await
}
