// ABOUTME: Entry point for the tunwarden CLI application.
// ABOUTME: Parses arguments, loads configuration and dispatches to the tunnel manager.

mod cli;
mod terminal;

use clap::Parser;
use cli::{Cli, Commands};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tunwarden::config::{AuthConfig, Config, ConfigError, ConfigSource, ConnectionTarget};
use tunwarden::error::{Error, Result};
use tunwarden::output::{Output, OutputMode};
use tunwarden::ssh::{CredentialResolver, SshConnector, TerminalPrompter, Transport};
use tunwarden::tunnel::{ForegroundOutcome, TunnelManager, TunnelState};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set.
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let output = Output::new(mode);

    if let Err(e) = run(cli, output).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, mut output: Output) -> Result<()> {
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Forwards => {
            output.forwards(&config.port_forwards);
            Ok(())
        }
        Commands::Test { server } => {
            let target = resolve_target(&config, &server)?;
            let manager = manager(config);
            output.progress(&format!("Testing connection to {}...", target.display_name()));
            output.start_timer();
            manager.test_connectivity(&target).await?;
            output.success(&format!("Connection to {} succeeded", target.display_name()));
            Ok(())
        }
        Commands::Connect { server, credential } => {
            let mut target = resolve_target(&config, &server)?;
            if let Some(query) = credential {
                let record = config
                    .find_credential_by_name(&query)
                    .ok_or(ConfigError::UnknownCredential(query))?;
                target.auth = AuthConfig::Credential {
                    credential_id: record.id.clone(),
                };
            }

            output.progress(&format!(
                "Connecting to {} ({} auth)...",
                target.display_name(),
                target.auth.kind()
            ));
            let transport = connector(Arc::new(config)).open(&target).await?;
            tracing::info!(addr = %transport.addr(), "Connected");

            if let Some(script) = target.startup_script.as_deref() {
                match transport.exec(script).await {
                    Ok(result) if result.success() => {
                        tracing::debug!(script, "Startup script finished");
                    }
                    Ok(result) => output.progress(&format!(
                        "Warning: startup script exited with status {}: {}",
                        result.exit_code,
                        result.stderr_lossy().trim_end()
                    )),
                    Err(e) => output.progress(&format!("Warning: startup script failed: {}", e)),
                }
            }

            let status = terminal::run_shell(&transport).await;
            transport.close().await;
            match status? {
                Some(code) if code != 0 => Err(Error::ShellExited(code)),
                _ => Ok(()),
            }
        }
        Commands::Run { aliases } => {
            for alias in &aliases {
                let forward = config.forward_by_alias(alias)?;
                let server = config
                    .find_server(forward.server_id.as_str())
                    .map(|s| s.display_name())
                    .unwrap_or_else(|| forward.server_id.to_string());
                output.progress(&format!("{} via {}", forward.spec(), server));
            }

            let manager = manager(config);
            let outcome = manager.run_foreground(&aliases, shutdown_signal()).await?;
            match outcome {
                ForegroundOutcome::Interrupted => {
                    output.success("Port forwards stopped");
                    Ok(())
                }
                ForegroundOutcome::Finished(states) => {
                    let failed = states
                        .iter()
                        .filter(|(_, state)| *state == TunnelState::Failed)
                        .count();
                    if failed > 0 {
                        Err(Error::TunnelsFailed(failed))
                    } else {
                        output.success("Port forwards ended");
                        Ok(())
                    }
                }
            }
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let explicit = path.is_some();
    let path = match path.or_else(Config::default_path) {
        Some(path) => path,
        None => return Err(Error::NoConfigPath),
    };
    match Config::load(&path) {
        Ok(config) => Ok(config),
        // A missing default file just means nothing is configured yet.
        Err(ConfigError::NotFound(_)) if !explicit => Ok(Config::default()),
        Err(e) => Err(Error::ConfigLoad(path, e)),
    }
}

/// A configured server by id or alias, else an ad-hoc `user@host[:port]`.
fn resolve_target(config: &Config, query: &str) -> Result<ConnectionTarget> {
    match config.find_server(query) {
        Some(target) => Ok(target.clone()),
        None => ConnectionTarget::parse(query)
            .map_err(|reason| Error::UnknownTarget(query.to_string(), reason)),
    }
}

fn connector(config: Arc<Config>) -> SshConnector {
    let timeout = config.settings.connect_timeout;
    let resolver = CredentialResolver::new(Arc::new(TerminalPrompter));
    SshConnector::new(resolver, config, timeout)
}

fn manager(config: Config) -> TunnelManager {
    let settings = config.settings.clone();
    let config = Arc::new(config);
    let connector = connector(config.clone());
    TunnelManager::new(config, Arc::new(connector), settings)
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
