//! # rayo-server
//!
//! Gateway directory server.
//!
//! This binary wires together:
//! - the **directory store**, either in-process or replicated over a
//!   wide-column store
//! - the **storage facade**, **load balancer** and **admin service** from
//!   `rayo-gateway`
//! - a **REST API** (axum) for health checks, platform listings and
//!   operator controls (blacklists, bans)

mod api;
mod config;
mod error;

use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

use rayo_gateway::{AdminService, GatewayStorageService, LoadBalancer, LoadBalancerConfig};
use rayo_store::replicated::LocalColumnStore;
use rayo_store::{GatewayDatastore, InMemoryDatastore, ReplicatedDatastore};

use crate::api::AppState;
use crate::config::{DatastoreKind, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rayo_server=debug")),
        )
        .init();

    info!("Starting Rayo gateway v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        datastore = ?config.datastore,
        default_platform = %config.default_platform,
        max_dial_retries = config.max_dial_retries,
        max_consecutive_errors = config.max_consecutive_errors,
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the directory store
    // -----------------------------------------------------------------------
    let datastore = open_datastore(&config).await?;

    // -----------------------------------------------------------------------
    // 4. Build the gateway services
    // -----------------------------------------------------------------------
    let storage = GatewayStorageService::new(datastore, config.default_platform.clone());
    let lb = Arc::new(LoadBalancer::new(
        storage.clone(),
        LoadBalancerConfig {
            max_consecutive_errors: config.max_consecutive_errors,
        },
    ));
    let admin = Arc::new(AdminService::new(storage.clone()));
    admin.set_max_dial_retries(config.max_dial_retries);

    let http_addr = config.http_addr;
    let app_state = AppState {
        storage,
        lb,
        admin,
        config: Arc::new(config),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

async fn open_datastore(config: &ServerConfig) -> anyhow::Result<Arc<dyn GatewayDatastore>> {
    match config.datastore {
        DatastoreKind::Memory => {
            info!("Using in-process datastore");
            Ok(Arc::new(InMemoryDatastore::new()))
        }
        DatastoreKind::Replicated => {
            info!(
                contact_point = %config.store.contact_point(),
                keyspace = %config.store.keyspace,
                recreate_schema = config.store.recreate_schema,
                "Using replicated datastore on the embedded column store"
            );
            // Only the embedded store exists; init refuses any other contact point.
            let columns = Arc::new(LocalColumnStore::new());
            let datastore = ReplicatedDatastore::init(columns, &config.store).await?;
            Ok(Arc::new(datastore))
        }
    }
}
