//! Local REST API driving outbound flows.
//!
//! These endpoints are for the operator of this connector, not for peers:
//! they fetch remote descriptions, run the consumer side of a negotiation,
//! request artifact data and manage resource subscriptions.

use axum::{
    extract::{Extension, Json},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};
use dsc_negotiation::add_subscription;
use dsc_types::{ContractRequest, RejectionReason};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::outbound::{self, ClientError, NegotiationOutcome};
use crate::transfer::QueryInput;
use crate::{run_blocking, AppState};

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// The peer refused or answered unusably.
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Build(e) => ApiError::BadRequest(e.to_string()),
            ClientError::Negotiation(e) => match e {
                dsc_negotiation::NegotiationError::MissingRules
                | dsc_negotiation::NegotiationError::MissingTargetInRule { .. } => {
                    ApiError::BadRequest(e.to_string())
                }
                dsc_negotiation::NegotiationError::AgreementMismatch(_) => {
                    ApiError::BadGateway(e.to_string())
                }
                other => ApiError::InternalServerError(other.to_string()),
            },
            ClientError::Rejected(rejection) if rejection.reason == RejectionReason::NotFound => {
                ApiError::NotFound(format!("peer answered {}", rejection.reason))
            }
            ClientError::Rejected(rejection) => {
                ApiError::BadGateway(format!("peer answered {}", rejection.reason))
            }
            e @ (ClientError::Transport(_)
            | ClientError::Timeout(_)
            | ClientError::Invalid(_)
            | ClientError::Payload(_)) => ApiError::BadGateway(e.to_string()),
            ClientError::Database(msg) => ApiError::InternalServerError(msg),
        }
    }
}

/// Outbound deadline requested by a local caller, in milliseconds.
fn deadline(timeout_ms: Option<u64>) -> Option<Duration> {
    timeout_ms.map(Duration::from_millis)
}

/// Request body for `POST /api/descriptions`.
#[derive(Debug, Deserialize)]
pub struct DescribeRequest {
    /// Connector to ask.
    pub recipient: String,
    /// Element to describe; the connector's self-description if absent.
    #[serde(default)]
    pub element: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Handler for `POST /api/descriptions`.
pub async fn describe_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<DescribeRequest>,
) -> Result<Json<Value>, ApiError> {
    let reply = outbound::request_description(
        &state,
        &payload.recipient,
        payload.element.as_deref(),
        deadline(payload.timeout_ms),
    )
    .await?;
    let description: Value = serde_json::from_slice(&reply.payload)
        .map_err(|e| ApiError::BadGateway(format!("description is not JSON: {}", e)))?;
    Ok(Json(description))
}

/// Request body for `POST /api/negotiations`.
#[derive(Debug, Deserialize)]
pub struct NegotiateRequest {
    /// Provider connector.
    pub recipient: String,
    pub request: ContractRequest,
    /// Deadline for each round trip of the negotiation.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Handler for `POST /api/negotiations`.
pub async fn negotiate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<NegotiateRequest>,
) -> Result<(StatusCode, Json<NegotiationOutcome>), ApiError> {
    let outcome = outbound::negotiate(
        &state,
        &payload.recipient,
        payload.request,
        deadline(payload.timeout_ms),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Request body for `POST /api/artifacts`.
#[derive(Debug, Deserialize)]
pub struct ArtifactRequest {
    pub recipient: String,
    pub artifact: String,
    /// Agreement the data is requested under.
    pub agreement: String,
    #[serde(default)]
    pub query: Option<QueryInput>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Handler for `POST /api/artifacts`. Returns the artifact data as is.
pub async fn artifact_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ArtifactRequest>,
) -> Result<Response, ApiError> {
    let reply = outbound::request_artifact(
        &state,
        &payload.recipient,
        &payload.artifact,
        &payload.agreement,
        payload.query.as_ref(),
        deadline(payload.timeout_ms),
    )
    .await?;
    Ok((
        [(CONTENT_TYPE, "application/octet-stream")],
        reply.payload,
    )
        .into_response())
}

/// Request body for `POST /api/subscriptions`.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// Resource to follow, local URI or remote id.
    pub target: String,
    /// URL updated resources are posted to.
    pub location: String,
    pub subscriber: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeResponse {
    /// `false` if the subscription already existed.
    pub created: bool,
}

/// Handler for `POST /api/subscriptions`.
pub async fn subscribe_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<SubscribeResponse>), ApiError> {
    if payload.target.trim().is_empty() || payload.subscriber.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "target and subscriber must not be empty".to_string(),
        ));
    }
    url::Url::parse(&payload.location)
        .map_err(|e| ApiError::BadRequest(format!("invalid location: {}", e)))?;

    let created = run_blocking(&state.pool, ApiError::InternalServerError, move |conn| {
        add_subscription(conn, &payload.target, &payload.location, &payload.subscriber)
            .map_err(|e| ApiError::InternalServerError(e.to_string()))
    })
    .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(SubscribeResponse { created })))
}
