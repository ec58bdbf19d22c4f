//! CLI command implementations

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use reqwest::Url;
use seedcast_core::config::SeedcastConfig;
use seedcast_core::swarm::format_bytes;
use seedcast_core::{
    DirectSwarm, DirectSwarmConfig, DistributionSession, TorrentDescriptor, download_descriptor,
    select_backend,
};
use seedcast_web::{AppState, run_server};
use tokio_util::sync::CancellationToken;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve the artifact to the configured number of peers
    Serve {
        /// Address to bind the control plane to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Control-plane port, overriding the configured one
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Fetch the artifact from an origin and report completion
    Peer {
        /// Origin control plane, defaults to the configured server address
        #[arg(long)]
        origin: Option<Url>,
        /// Directory to download into, overriding the configured model path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build a descriptor for a file or directory
    Create {
        /// Content to describe
        path: PathBuf,
        /// Descriptor file to write, defaults to `<name>.torrent`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    match command {
        Commands::Serve { host, port } => serve(config, &host, port).await,
        Commands::Peer { origin, output } => run_peer(config, origin, output).await,
        Commands::Create { path, output } => create_descriptor(&config, &path, output).await,
    }
}

/// Loads the config file when present, otherwise starts from defaults.
fn load_config(path: &Path) -> Result<SeedcastConfig> {
    if path.exists() {
        return SeedcastConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()));
    }

    tracing::warn!("No config at {}, using defaults", path.display());
    let mut config = SeedcastConfig::default();
    config.apply_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Runs the origin until Ctrl-C or SIGTERM, then aborts the session.
async fn serve(config: SeedcastConfig, host: &str, port: Option<u16>) -> Result<()> {
    let address: SocketAddr = format!("{host}:{}", port.unwrap_or(config.port.http_port))
        .parse()
        .with_context(|| format!("invalid listen address {host}"))?;

    let method = config.storage.storage_method();
    tracing::info!(
        "Serving {} from {} to {} peers ({method} storage, data port {})",
        config.model.model_name,
        config.model.model_path.display(),
        config.client.total_peers,
        config.port.data_port
    );

    let backend = select_backend(&method, config.backend_settings()).await;
    let engine = Arc::new(DirectSwarm::new(DirectSwarmConfig {
        poll_interval: config.torrent.seed_poll_interval(),
        ..DirectSwarmConfig::default()
    }));
    let session = Arc::new(DistributionSession::new(
        config.model.model_name.clone(),
        config.client.total_peers,
        backend,
        engine.clone(),
    ));

    let shutdown = CancellationToken::new();
    let state = AppState::new(Arc::clone(&session), Arc::new(config), shutdown.clone());
    let mut server = tokio::spawn(run_server(state, address));

    tokio::select! {
        result = &mut server => {
            session.abort();
            engine.shutdown();
            result.context("control plane task failed")??;
            return Ok(());
        }
        () = shutdown_signal() => {
            tracing::info!("Shutdown requested");
        }
    }

    session.abort();
    engine.shutdown();
    shutdown.cancel();
    server.await.context("control plane task failed")??;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Peer side of a distribution: fetch the descriptor, download, report.
async fn run_peer(
    mut config: SeedcastConfig,
    origin: Option<Url>,
    output: Option<PathBuf>,
) -> Result<()> {
    let origin = match origin {
        Some(origin) => origin,
        None => Url::parse(&config.origin_url()).context("invalid configured origin")?,
    };
    if let Some(output) = output {
        config.model.model_path = output;
    }

    let client = reqwest::Client::new();
    let response = client
        .get(origin.join("send")?)
        .send()
        .await
        .context("failed to reach origin")?;
    if !response.status().is_success() {
        bail!(
            "origin refused descriptor request: {} {}",
            response.status(),
            response.text().await.unwrap_or_default()
        );
    }
    let encoded = response.bytes().await?;
    let descriptor =
        TorrentDescriptor::from_bytes(&encoded).context("origin sent a malformed descriptor")?;
    tracing::info!(
        info_hash = %descriptor.info_hash,
        "Received descriptor for {} ({}, {} pieces)",
        descriptor.name,
        format_bytes(descriptor.total_length),
        descriptor.piece_count()
    );

    let backend = select_backend(&config.storage.storage_method(), config.backend_settings()).await;
    let engine = DirectSwarm::new(DirectSwarmConfig {
        http_seeds: vec![origin.clone()],
        poll_interval: config.torrent.seed_poll_interval(),
        ..DirectSwarmConfig::default()
    });

    let cancel = CancellationToken::new();
    let download = download_descriptor(
        backend.as_ref(),
        &engine,
        &descriptor,
        config.torrent.progress_interval(),
        &cancel,
    );
    let report = tokio::select! {
        report = download => report.context("download failed")?,
        () = shutdown_signal() => {
            cancel.cancel();
            engine.shutdown();
            bail!("download interrupted");
        }
    };

    let status = format!(
        "{} received {} in {:.3?}",
        descriptor.name,
        format_bytes(report.bytes),
        report.elapsed
    );
    client
        .post(origin.join("completesend")?)
        .body(status.clone())
        .send()
        .await
        .context("failed to acknowledge send")?
        .error_for_status()?;
    client
        .post(origin.join("recv")?)
        .body(report.info_hash.to_string())
        .send()
        .await
        .context("failed to report completion")?
        .error_for_status()?;

    println!("{status}");
    println!("  Average rate: {}/s", format_bytes(report.average_rate()));
    if let Some(location) = &report.location {
        println!("  Location: {}", location.display());
    }

    engine.shutdown();
    Ok(())
}

/// Writes a descriptor file for local content.
async fn create_descriptor(
    config: &SeedcastConfig,
    path: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let descriptor = config
        .descriptor_builder()
        .create_from_path(path)
        .await
        .with_context(|| format!("failed to describe {}", path.display()))?;
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.torrent", descriptor.name)));
    tokio::fs::write(&output, descriptor.to_bytes()?)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("Created {}", output.display());
    println!("  Info hash: {}", descriptor.info_hash);
    println!(
        "  Size: {} in {} pieces of {}",
        format_bytes(descriptor.total_length),
        descriptor.piece_count(),
        format_bytes(u64::from(descriptor.piece_length))
    );
    Ok(())
}
