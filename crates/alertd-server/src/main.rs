use anyhow::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use alertd_server::app;
use alertd_server::config::ServerConfig;
use alertd_server::state::AppState;
use alertd_storage::{AlertStore, NewMachine, StorageError};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  alertd-server [config.toml]                                Start the server");
    eprintln!("  alertd-server register-machine <config.toml> <name> [ip]  Register a submitting machine");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("alertd=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("register-machine") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("register-machine requires <config.toml> and <name> arguments")
            })?;
            let name = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("register-machine requires <name> argument")
            })?;
            run_register_machine(config_path, name, args.get(4).cloned()).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

async fn open_store(config: &ServerConfig) -> Result<AlertStore> {
    alertd_common::id::init(config.id.machine_id, config.id.node_id);
    let db_url = config.database.connection_url();
    AlertStore::new(&db_url, Path::new(&config.database.data_dir)).await
}

/// Provision a machine so that its numeric ID can be used as `machineId`.
#[allow(clippy::print_stdout)]
async fn run_register_machine(
    config_path: &str,
    name: &str,
    ip_address: Option<String>,
) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config).await?;

    let new = NewMachine {
        machine_id: name.to_string(),
        ip_address,
        version: None,
        is_validated: true,
    };
    match store.register_machine(&new).await {
        Ok(row) => {
            tracing::info!(id = row.id, machine_id = %row.machine_id, "Machine registered");
            println!("{}", row.id);
            Ok(())
        }
        Err(StorageError::Conflict { .. }) => {
            let existing = store
                .get_machine_by_name(name)
                .await?
                .ok_or_else(|| anyhow::anyhow!("machine '{name}' vanished during registration"))?;
            tracing::warn!(id = existing.id, machine_id = %name, "Machine already registered, skipping");
            println!("{}", existing.id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    tracing::info!(config = %config_path, "Loaded configuration");

    let store = open_store(&config).await?;

    let state = AppState {
        store: Arc::new(store),
        start_time: Utc::now(),
        config: Arc::new(config.clone()),
    };

    let http_addr: SocketAddr = format!("{}:{}", config.bind_addr, config.http_port).parse()?;
    let app = app::build_http_app(state);
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;

    tracing::info!(http = %http_addr, "Server started");

    axum::serve(
        http_listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        signal::ctrl_c().await.ok();
        tracing::info!("Shutting down gracefully");
    })
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
