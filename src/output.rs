// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet, and JSON output modes plus tunnel and forward tables.

use crate::config::PortForwardConfig;
use crate::tunnel::TunnelSnapshot;
use serde::Serialize;
use std::time::Instant;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Only final results and errors
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => self.emit_event("success", message, false),
        }
    }

    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Error: {message}"),
            OutputMode::Json => self.emit_event("error", message, true),
        }
    }

    /// Print the configured port forwards.
    pub fn forwards(&self, forwards: &[PortForwardConfig]) {
        if self.mode == OutputMode::Json {
            let rows: Vec<ForwardRow<'_>> = forwards.iter().map(ForwardRow::from).collect();
            print_json(&rows);
            return;
        }
        if forwards.is_empty() {
            self.progress("No port forwards configured.");
            return;
        }
        println!(
            "{:<16} {:<16} {:<8} {:<24} {:<24} {}",
            "ID", "ALIAS", "TYPE", "LOCAL", "REMOTE", "SERVER"
        );
        for pf in forwards {
            let spec = pf.spec();
            println!(
                "{:<16} {:<16} {:<8} {:<24} {:<24} {}",
                pf.id,
                pf.alias.as_deref().unwrap_or("-"),
                spec.direction,
                spec.local,
                spec.remote,
                pf.server_id
            );
        }
    }

    /// Print snapshots of running tunnels.
    pub fn tunnels(&self, tunnels: &[TunnelSnapshot]) {
        if self.mode == OutputMode::Json {
            print_json(&tunnels);
            return;
        }
        if self.mode == OutputMode::Quiet {
            return;
        }
        for t in tunnels {
            println!(
                "{}  {}  {}  retries={}  since {}",
                t.id,
                t.spec,
                t.state,
                t.retry_count,
                t.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    fn emit_event(&self, event: &str, message: &str, to_stderr: bool) {
        let event = JsonEvent {
            event,
            message,
            duration_secs: self.start_time.map(|_| self.elapsed_secs()),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            if to_stderr {
                eprintln!("{json}");
            } else {
                println!("{json}");
            }
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        println!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct ForwardRow<'a> {
    id: &'a str,
    alias: Option<&'a str>,
    server: &'a str,
    direction: String,
    local: String,
    remote: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

impl<'a> From<&'a PortForwardConfig> for ForwardRow<'a> {
    fn from(pf: &'a PortForwardConfig) -> Self {
        let spec = pf.spec();
        Self {
            id: pf.id.as_str(),
            alias: pf.alias.as_deref(),
            server: pf.server_id.as_str(),
            direction: spec.direction.to_string(),
            local: spec.local.to_string(),
            remote: spec.remote.to_string(),
            description: pf.description.as_deref(),
        }
    }
}
