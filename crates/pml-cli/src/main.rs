// SPDX-License-Identifier: MIT OR Apache-2.0
//! `pml`: the workspace-local CLI over the procedural-memory execution
//! core. `serve` hosts the HTTP/SSE daemon; `stdio` drives the executor
//! directly over stdin/stdout for embedding into another process; the
//! rest are thin wrappers over the capability store and the registered
//! MCP server lockfile.

mod commands;
mod lockfile;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pml_core::Fqdn;
use pml_daemon::config::{config_path, load_config, validate_config};
use pml_daemon::{build_app, AppState};
use pml_executor::ExecuteOptions;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
#[command(name = "pml", version, about = "Procedural-memory execution core CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root containing (or to contain) `.pml/`.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scaffold `.pml/` in the workspace.
    Init,
    /// Drive the executor directly over stdin/stdout, one request per line.
    Stdio,
    /// Start the HTTP/SSE daemon.
    Serve {
        /// Port to bind on, overriding the config file's `port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Register an MCP server from a registry URL.
    Add {
        /// Registry URL returning the server's descriptor JSON.
        source: String,
    },
    /// Execute a stored capability to completion.
    Run {
        /// The capability's fqdn or display name.
        fqdn: String,
        /// Initial context, as a JSON object.
        #[arg(long, default_value = "{}")]
        context: String,
    },
    /// Remove a capability or a registered server.
    Remove {
        /// The capability's fqdn, or the server's local name.
        key: String,
    },
    /// List every capability and registered server in the workspace.
    List,
    /// Re-fetch every registered server and update entries that changed.
    Upgrade,
}

/// Marks an anyhow error as a configuration problem, so `main` can map
/// it to [`commands::EXIT_CONFIG_ERROR`] instead of the generic failure
/// code.
#[derive(Debug)]
struct ConfigInvalid;

impl std::fmt::Display for ConfigInvalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration")
    }
}

impl std::error::Error for ConfigInvalid {}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_default()).init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            if err.downcast_ref::<ConfigInvalid>().is_some() {
                commands::EXIT_CONFIG_ERROR
            } else {
                commands::EXIT_GENERIC_FAILURE
            }
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Init => {
            commands::init_workspace(&cli.workspace)?;
            Ok(commands::EXIT_SUCCESS)
        }
        Commands::Stdio => cmd_stdio(&cli.workspace).await,
        Commands::Serve { port } => cmd_serve(&cli.workspace, port).await,
        Commands::Add { source } => {
            let name = commands::add_server(&cli.workspace, &source).await?;
            println!("registered server `{name}`");
            Ok(commands::EXIT_SUCCESS)
        }
        Commands::Run { fqdn, context } => cmd_run(&cli.workspace, &fqdn, &context).await,
        Commands::Remove { key } => {
            let state = open_state(&cli.workspace)?;
            commands::remove_entry(&cli.workspace, &state.store, &key)?;
            Ok(commands::EXIT_SUCCESS)
        }
        Commands::List => {
            let state = open_state(&cli.workspace)?;
            commands::list_entries(&cli.workspace, &state.store)?;
            Ok(commands::EXIT_SUCCESS)
        }
        Commands::Upgrade => {
            let upgraded = commands::upgrade_servers(&cli.workspace).await?;
            if upgraded.is_empty() {
                println!("everything up to date");
            } else {
                println!("upgraded: {}", upgraded.join(", "));
            }
            Ok(commands::EXIT_SUCCESS)
        }
    }
}

fn open_state(workspace: &std::path::Path) -> Result<AppState> {
    let config = load_and_validate_config(workspace)?;
    AppState::open(workspace, config)
}

fn load_and_validate_config(workspace: &std::path::Path) -> Result<pml_daemon::config::PmlConfig> {
    let config = load_config(&config_path(workspace))?;
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("{error}");
        }
        return Err(ConfigInvalid.into());
    }
    Ok(config)
}

async fn cmd_serve(workspace: &std::path::Path, port: Option<u16>) -> Result<i32> {
    let mut config = load_and_validate_config(workspace)?;
    if let Some(port) = port {
        config.port = port;
    }
    let bound_port = config.port;
    let state = Arc::new(AppState::open(workspace, config)?);
    let app = build_app(state).layer(TraceLayer::new_for_http());
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], bound_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "pml serving");
    axum::serve(listener, app).await?;
    Ok(commands::EXIT_SUCCESS)
}

async fn cmd_run(workspace: &std::path::Path, fqdn_or_name: &str, context_json: &str) -> Result<i32> {
    let state = open_state(workspace)?;
    let capability = state.store.resolve(fqdn_or_name).ok_or_else(|| anyhow::anyhow!("no capability `{fqdn_or_name}`"))?;
    let context: serde_json::Value = serde_json::from_str(context_json).context("--context must be a JSON object")?;
    let options = ExecuteOptions { capability_fqdn: Some(capability.fqdn.to_string()), initial_context: context, permissions: state.default_permissions.clone() };
    let result = state.executor.execute(capability.static_structure, options).await;
    Ok(commands::report_outcome(result))
}

#[derive(Deserialize)]
struct StdioRequest {
    capability_fqdn: String,
    #[serde(default)]
    context: serde_json::Value,
}

/// Read one [`StdioRequest`] per line from stdin, execute it to
/// completion, and write its outcome (or error) as one JSON line per
/// request to stdout. Exits with the last request's exit code.
async fn cmd_stdio(workspace: &std::path::Path) -> Result<i32> {
    let state = open_state(workspace)?;
    let stdin = std::io::stdin();
    let mut last_code = commands::EXIT_SUCCESS;

    let mut line = String::new();
    loop {
        line.clear();
        let read = stdin.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let request: StdioRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(err) => {
                write_stdio_error(&format!("malformed request: {err}"));
                last_code = commands::EXIT_GENERIC_FAILURE;
                continue;
            }
        };
        let fqdn = match Fqdn::from_str(&request.capability_fqdn) {
            Ok(fqdn) => fqdn,
            Err(err) => {
                write_stdio_error(&format!("invalid fqdn: {err}"));
                last_code = commands::EXIT_GENERIC_FAILURE;
                continue;
            }
        };
        let Some(capability) = state.store.get(&fqdn) else {
            write_stdio_error(&format!("no capability `{}`", request.capability_fqdn));
            last_code = commands::EXIT_GENERIC_FAILURE;
            continue;
        };
        let options = ExecuteOptions { capability_fqdn: Some(request.capability_fqdn), initial_context: request.context, permissions: state.default_permissions.clone() };
        let result = state.executor.execute(capability.static_structure, options).await;
        match &result {
            Ok(outcome) => write_stdio_line(&serde_json::json!({ "outcome": outcome })),
            Err(err) => write_stdio_error(&err.message),
        }
        last_code = commands::exit_code_for(&result);
    }
    Ok(last_code)
}

fn write_stdio_line(value: &serde_json::Value) {
    if let Ok(text) = serde_json::to_string(value) {
        println!("{text}");
        let _ = std::io::stdout().flush();
    }
}

fn write_stdio_error(message: &str) {
    write_stdio_line(&serde_json::json!({ "error": message }));
}
