//! Dataspace connector server library logic.
//!
//! Inbound exchanges arrive on `POST /api/ids` as a two-part multipart
//! body, are authenticated by [`middleware::claims_middleware`] and handed
//! to [`dispatch::dispatch`], which always answers with an envelope. The
//! local REST API under `/api/*` drives outbound flows (descriptions,
//! negotiations, artifact requests) and exposes the exchange event log.
//! Outcomes that do not belong on the synchronous path go through the
//! side-effect bus in [`background`].

pub mod api;
pub mod api_ids;
pub mod api_observe;
pub mod background;
pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod middleware;
pub mod outbound;
pub mod policy;
pub mod transfer;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use background::SideEffect;
use dsc_db::DbPool;
use dsc_message::{BuildContext, StaticCredential, StaticIdentity, SystemClock};
use middleware::{ClaimsVerifier, PeerTable};
use outbound::{HttpTransport, Transport};
use policy::{PolicyDecision, RuleEvaluator};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transfer::{DataSource, HttpDataSource};

/// Static facts about this connector that are not part of message
/// headers.
#[derive(Debug, Clone)]
pub struct ConnectorProfile {
    /// Human-readable title for the self-description.
    pub title: Option<String>,
    /// Information model versions accepted on inbound headers.
    pub inbound_model_versions: Vec<String>,
    /// Remote clearing-house endpoint, if outcomes are forwarded.
    pub clearing_house_url: Option<String>,
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Clock, identity and credential used for every outbound header.
    pub messages: BuildContext,
    /// Self-description details and inbound version set.
    pub profile: Arc<ConnectorProfile>,
    /// Turns a peer's bearer credential into verified claims.
    pub verifier: Arc<dyn ClaimsVerifier>,
    /// Yes/no usage decision for each rule of an agreement.
    pub policy: Arc<dyn PolicyDecision>,
    /// Where artifact data comes from.
    pub data_source: Arc<dyn DataSource>,
    /// Sends envelopes to peers.
    pub transport: Arc<dyn Transport>,
    /// Side-effect bus.
    pub bus: broadcast::Sender<SideEffect>,
    /// Bounds the number of inbound exchanges processed at once.
    pub exchange_slots: Arc<Semaphore>,
    /// Deadline for outbound calls whose caller supplies none.
    pub outbound_timeout: Duration,
}

impl AppState {
    /// Builds the production state from configuration.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest::Error` if an outbound HTTP client cannot be
    /// set up.
    pub fn from_config(pool: DbPool, config: &config::Config) -> Result<Self, reqwest::Error> {
        let connector = &config.connector;
        let outbound_timeout = Duration::from_millis(connector.outbound_timeout_ms);
        let messages = BuildContext::new(
            Arc::new(SystemClock),
            Arc::new(StaticIdentity {
                connector_id: connector.id.clone(),
                sender_agent: connector.sender_agent().to_string(),
                model_version: connector.model_version.clone(),
            }),
            Arc::new(StaticCredential(connector.security_token.clone())),
        );

        Ok(Self {
            pool,
            messages,
            profile: Arc::new(ConnectorProfile {
                title: connector.title.clone(),
                inbound_model_versions: connector.inbound_model_versions.clone(),
                clearing_house_url: config.clearing_house.url.clone(),
            }),
            verifier: Arc::new(PeerTable::new(config.peers.clone())),
            policy: Arc::new(RuleEvaluator),
            data_source: Arc::new(HttpDataSource::new(outbound_timeout)?),
            transport: Arc::new(HttpTransport::new(outbound_timeout)?),
            bus: broadcast::channel(connector.bus_capacity).0,
            exchange_slots: Arc::new(Semaphore::new(connector.max_concurrent_exchanges)),
            outbound_timeout,
        })
    }

    /// URI identifying this connector.
    pub fn connector_id(&self) -> &str {
        self.messages.connector_id()
    }

    /// Queues a side effect without waiting for its consumers.
    ///
    /// A bus without subscribers drops the effect; that is logged at debug
    /// level and never fails the caller.
    pub fn publish(&self, effect: SideEffect) {
        let label = effect.label();
        if let Err(e) = self.bus.send(effect) {
            tracing::debug!(effect = label, "side-effect bus has no subscribers: {}", e);
        }
    }
}

/// Runs blocking database work on the blocking thread pool.
///
/// Pool and join failures are converted with `on_err`, so each caller
/// keeps its own error type.
pub(crate) async fn run_blocking<T, E, F>(
    pool: &DbPool,
    on_err: fn(String) -> E,
    f: F,
) -> Result<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> Result<T, E> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e| on_err(e.to_string()))?;
        f(&mut *conn)
    })
    .await
    .map_err(|e| on_err(format!("task join error: {}", e)))?
}

/// Writes one event to the exchange event log.
///
/// Failures are logged as warnings but never reach the caller.
pub fn record_event(
    conn: &rusqlite::Connection,
    connector_id: &str,
    entity_id: &str,
    payload: &dsc_observe::EventPayload,
) {
    if let Err(e) = dsc_observe::emit_event(conn, connector_id, entity_id, payload) {
        tracing::warn!(
            domain = payload.domain().as_str(),
            event_type = payload.event_type(),
            "failed to record exchange event: {}",
            e
        );
    }
}

/// Maximum request body size (16 MiB), large enough for artifact payloads
/// carried in resource updates and contract requests.
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let ids_routes = Router::new()
        .route("/api/ids", post(api_ids::ids_handler))
        .layer(axum::middleware::from_fn(middleware::claims_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/api/descriptions", post(api::describe_handler))
        .route("/api/negotiations", post(api::negotiate_handler))
        .route("/api/artifacts", post(api::artifact_handler))
        .route("/api/subscriptions", post(api::subscribe_handler))
        .route("/api/events", get(api_observe::get_events_handler))
        .merge(ids_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
