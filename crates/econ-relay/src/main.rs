//! econ-relay: forwards chat commands to a Teeworlds/DDNet econ console.
//!
//! Resolves and authenticates against the econ server once at startup, then
//! relays every accepted `exec` command over that single connection until
//! SIGINT/SIGTERM. Closing stdin stops reading commands but keeps the relay
//! up; a failing command source shuts it down.

mod config;
mod source;

use anyhow::Context;
use clap::Parser;
use config::{Overrides, RelayConfig};
use econ_relay_core::{CancelSignal, EconConnection, RelayPipeline};
use source::{ConsoleSource, ExecHandler};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{error, info};

/// econ-relay — chat command relay for econ consoles
#[derive(Parser, Debug)]
#[command(name = "econ-relay", version, about = "Relay chat commands to an econ console")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.econ-relay/config.toml")]
    config: String,

    /// Econ server address (host:port)
    #[arg(long)]
    econ_address: Option<String>,

    /// Econ server password
    #[arg(long)]
    econ_password: Option<String>,

    /// Seconds allowed for connecting and authenticating
    #[arg(long)]
    handshake_timeout: Option<u64>,

    /// Command source token
    #[arg(long)]
    chat_token: Option<String>,

    /// Channel id allowed to submit commands
    #[arg(long)]
    chat_channel: Option<String>,

    /// Commands buffered before submissions are rejected
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            econ_address: self.econ_address.clone(),
            econ_password: self.econ_password.clone(),
            handshake_timeout_secs: self.handshake_timeout,
            chat_token: self.chat_token.clone(),
            chat_channel: self.chat_channel.clone(),
            queue_capacity: self.queue_capacity,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stdout)
        .init();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %format!("{e:#}"), "econ-relay failed");
            1
        }
    };
    // stdin reads run on a blocking thread that would otherwise hold the
    // runtime open after shutdown.
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting application...");

    let config_path = PathBuf::from(&cli.config);
    let config = RelayConfig::load(Some(config_path.as_path()), cli.overrides())
        .context("failed to load config")?
        .validate()
        .await
        .context("invalid configuration")?;

    let signal = CancelSignal::new();
    {
        let signal = signal.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("received shutdown signal");
            signal.cancel();
        });
    }

    info!(address = %config.target, "connecting to econ");
    let conn = EconConnection::connect(
        &config.target,
        &config.econ_password,
        config.handshake_timeout,
        signal.clone(),
    )
    .await
    .context("failed to connect to econ")?;

    let pipeline = RelayPipeline::spawn(conn, config.queue_capacity, signal.clone());
    let handler = ExecHandler::new(config.scope.clone(), pipeline.gateway());

    info!(channel = %config.scope.channel(), "started application");
    let source = ConsoleSource::new(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        config.scope,
    );
    let source_result = source.run(&handler, &signal).await;

    // The pipeline owns the connection; shut it down on every path.
    let report = pipeline.shutdown().await.context("relay shutdown failed")?;
    info!(
        written = report.written,
        failed = report.failed,
        discarded = report.discarded,
        "relay stopped"
    );

    source_result.context("command source failed")
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
