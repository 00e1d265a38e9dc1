//! Connector binary.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, catalog bootstrap, the side-effect workers and graceful
//! shutdown on SIGTERM/SIGINT.

use dsc_server::{app, background, bootstrap, config, AppState};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("DSC_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the connector cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = dsc_db::open_database(
        &config.database.path,
        dsc_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to open database; check database.path in config");

    let state = AppState::from_config(pool, &config)
        .expect("failed to set up outbound HTTP clients; check the TLS backend");

    if config.connector.security_token.is_none() {
        tracing::warn!("connector.security_token is not set; outbound requests will fail to build");
    }
    if config.peers.is_empty() {
        tracing::warn!("no peers configured; every inbound exchange will be rejected as not authenticated");
    }

    if let Some(path) = &config.bootstrap.catalog {
        match bootstrap::load_catalogs(&state.pool, Path::new(path), state.connector_id()) {
            Ok(resources) => tracing::info!(%path, resources, "bootstrap catalog loaded"),
            Err(e) => tracing::error!(%path, "failed to load bootstrap catalog: {}", e),
        }
    }

    let state = Arc::new(state);
    background::spawn_workers(state.clone())
        .expect("failed to set up the side-effect workers' HTTP client");

    let app = app(state.as_ref().clone());
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, connector = %state.connector_id(), "starting connector");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("connector shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
