//! Event API handler for the exchange event log.
//!
//! Provides `GET /api/events`: paginated event retrieval with filtering.

use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dsc_observe::{query_events, EventDomain, EventFilter, ExchangeEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Query parameters for `GET /api/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Filter by event domain (e.g., `NEGOTIATION`, `TRANSFER`).
    pub domain: Option<String>,
    /// Filter by event type (e.g., `AGREEMENT_CONFIRMED`).
    pub event_type: Option<String>,
    /// Filter by entity type (e.g., `agreement`, `artifact`).
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Return events with a sequence number greater than this.
    pub after_seq: Option<i64>,
    /// Maximum number of events to return (default: 100, max: 1000).
    pub limit: Option<i64>,
}

/// Response wrapper for paginated event retrieval.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    /// The matching events, oldest first.
    pub events: Vec<ExchangeEvent>,
    /// The number of events returned.
    pub count: usize,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Handler for `GET /api/events`.
pub async fn get_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, Response> {
    let pool = state.pool.clone();
    let connector_id = state.connector_id().to_string();

    let domain = match &params.domain {
        Some(d) => {
            let parsed: EventDomain = d.parse().map_err(|_| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    format!(
                        "invalid domain: {}. Expected one of: NEGOTIATION, TRANSFER, EXCHANGE, METADATA",
                        d
                    ),
                )
            })?;
            Some(parsed)
        }
        None => None,
    };

    let limit = params.limit.unwrap_or(100).clamp(1, 1000);

    let filter = EventFilter {
        domain,
        event_type: params.event_type,
        entity_type: params.entity_type,
        entity_id: params.entity_id,
        after_seq: params.after_seq,
        limit: Some(limit),
    };

    let events = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        query_events(&conn, &connector_id, &filter).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("task join error: {}", e),
        )
    })?
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?;

    let count = events.len();
    Ok(Json(EventsResponse { events, count }))
}
