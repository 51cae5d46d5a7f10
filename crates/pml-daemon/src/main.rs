// SPDX-License-Identifier: MIT OR Apache-2.0
//! Standalone daemon binary: loads a workspace's `.pml/config.toml`,
//! wires an [`AppState`], and serves the HTTP/SSE surface.

use clap::Parser;
use pml_daemon::config::{config_path, load_config, validate_config};
use pml_daemon::{build_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
#[command(name = "pml-daemon", about = "HTTP/SSE server for the procedural-memory execution core")]
struct Args {
    /// Workspace root containing `.pml/`.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Address to bind the HTTP server to.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Port to bind on, overriding the config file's `port`.
    #[arg(long)]
    port: Option<u16>,

    /// Enable verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_default()).init();

    let mut config = load_config(&config_path(&args.workspace))?;
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            tracing::error!(%error, "invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) found in {}", errors.len(), config_path(&args.workspace).display());
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let state = Arc::new(AppState::open(&args.workspace, config)?);
    let port = state.config.port;
    let addr = args.bind.unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], port)));

    let app = build_app(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "pml-daemon listening");
    axum::serve(listener, app).await?;
    Ok(())
}
