mod api;
mod config;
mod search;
mod warehouse;


use anyhow::Result;
use clap::Parser;
use config::{Config, WarehouseConfig, DEFAULT_SECRETS_PATH};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use api::handlers::AppState;
use search::Archive;
use warehouse::{bigquery::BigQueryWarehouse, sqlite::SqliteWarehouse, SharedWarehouse};

/// Password-gated search over an email archive
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Port for the HTTP API
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Secrets file (TOML) consulted after environment variables
    #[arg(long, env = "SECRETS_PATH", default_value = DEFAULT_SECRETS_PATH)]
    secrets: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with env filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Email Archive Search");

    let cli = Cli::parse();
    let config = Config::load(&cli.secrets, cli.port)?;

    info!("📝 Configuration:");
    info!("  API Port: {}", config.api_port);
    info!("  Project: {}", config.project_id.as_deref().unwrap_or("<unset>"));
    info!("  Dataset: {}", config.dataset.as_deref().unwrap_or("<unset>"));
    info!("  Table: {}", config.table.as_deref().unwrap_or("<unset>"));
    info!("  Summary table: {}", config.summary_table.as_deref().unwrap_or("<unset>"));
    info!("  Allowed origin: {}", config.frontend_url);
    if config.app_password.is_none() {
        warn!("  APP_PASSWORD is not set; every login attempt will be rejected");
    }

    let state = build_state(&config).await;
    let router = api::create_router(state, &config.frontend_url, config.static_dir.as_deref());

    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("🛑 Received Ctrl+C signal");
            },
            _ = terminate => {
                info!("🛑 Received terminate signal");
            },
        }
    };

    info!("🔄 Server is running. Press Ctrl+C to stop gracefully...");
    if let Err(e) = api::start_server_with_shutdown(router, config.api_port, shutdown_signal).await {
        error!("❌ Server error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Shared API state; a warehouse that fails to initialize leaves the archive unset
async fn build_state(config: &Config) -> AppState {
    let archive = match connect_archive(config).await {
        Ok(archive) => archive,
        Err(e) => {
            error!("❌ Error initializing warehouse client: {:#}", e);
            None
        }
    };
    if archive.is_none() {
        warn!("Searches will fail until the warehouse is configured");
    }

    AppState {
        archive,
        dataset: config.dataset.clone(),
        table: config.table.clone(),
        app_password: config.app_password.clone(),
    }
}

/// Build the warehouse client and archive; `Ok(None)` when tables are not configured
async fn connect_archive(config: &Config) -> Result<Option<Archive>> {
    let Some(emails) = config.email_table() else {
        warn!("PROJECT_ID, DATASET and TABLE must be set to search the archive");
        return Ok(None);
    };

    let warehouse: SharedWarehouse = match &config.warehouse {
        WarehouseConfig::BigQuery {
            api_url,
            credentials,
        } => {
            let credentials = credentials.clone().map_err(anyhow::Error::msg)?;
            let project = emails.project.clone();
            Arc::new(BigQueryWarehouse::new(project, credentials, api_url.clone())?)
        }
        WarehouseConfig::Sqlite { database_url } => {
            Arc::new(SqliteWarehouse::new(database_url).await?)
        }
    };

    info!("✅ Warehouse client initialized for {}", emails.qualified());
    Ok(Some(Archive::new(warehouse, emails, config.summary_table_ref())))
}
