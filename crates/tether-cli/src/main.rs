//! tether
//!
//! Single binary for both ends of a tunnel:
//! - Control node (accepts agents listed under `[[apps]]`)
//! - Agent (keeps sessions to every `[[remotes]]` entry alive)
//! - Local forwarders (`[[forwards]]`) on either side

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use tether::logging;
use tether::workers::{run_listener, run_remote, ForwardWorker};
use tether_core::config::{self, Config};
use tether_core::BasicValidator;
use tether_node::{Node, ServiceMapping, TlsConfig};

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Reverse tunnels and remote control over QUIC")]
struct Cli {
    /// Path to configuration file (created with defaults if missing)
    #[arg(short, long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides the config file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run in foreground with debug logging
    #[arg(short, long)]
    foreground: bool,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let (config, created) = config::load_or_init_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    logging::init(&logging::filter_directive(
        std::env::var("RUST_LOG").ok(),
        cli.log_level.as_deref(),
        cli.foreground,
        &config.log.level,
    ));
    if created {
        tracing::info!("Wrote default configuration to {:?}", config_path);
    }

    if cli.check {
        println!("{:?}: ok", config_path);
        return Ok(());
    }

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    if config.apps.is_empty() && config.remotes.is_empty() && config.forwards.is_empty() {
        bail!("Nothing to do: configure apps, remotes or forwards");
    }

    let tls = Arc::new(TlsConfig::load(&config.tls).context("Failed to load TLS material")?);
    if !config.apps.is_empty() && !tls.has_identity() {
        bail!("Accepting apps requires tls.cert and tls.private_key");
    }

    let cancel = CancellationToken::new();
    let node = Node::bind(
        config.node.clone(),
        Arc::new(BasicValidator::new(config.apps.clone())),
        ServiceMapping::with_defaults(),
        cancel.clone(),
    )
    .context("Failed to bind node")?;

    tracing::info!("tether starting...");
    spawn_signal_handler(cancel.clone());

    let mut workers = JoinSet::new();
    if !config.apps.is_empty() {
        workers.spawn(run_listener(node.clone(), Arc::clone(&tls)));
    }
    for remote in config.remotes.iter().cloned() {
        workers.spawn(run_remote(
            node.clone(),
            remote,
            Arc::clone(&tls),
            config.backoff.clone(),
        ));
    }
    for rule in config.forwards.iter().cloned() {
        let worker = ForwardWorker::bind(node.clone(), rule).await?;
        workers.spawn(worker.run());
    }

    let mut result = Ok(());
    while let Some(joined) = workers.join_next().await {
        let outcome = joined
            .context("Worker panicked")
            .and_then(|outcome| outcome);
        if let Err(e) = outcome {
            tracing::error!("{:#}", e);
            if result.is_ok() {
                result = Err(e);
            }
            cancel.cancel();
        }
    }

    node.shutdown().await;
    tracing::info!("tether stopped");
    result
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
