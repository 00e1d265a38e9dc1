//! Inbound exchange endpoint.
//!
//! `POST /api/ids` takes a multipart body with a `header` part and an
//! optional `payload` part. The reply carries the response payload as its
//! body and the response header base64-encoded in the `ids-header` HTTP
//! header. Every well-formed HTTP call gets status 200; refusals travel
//! inside the envelope.

use axum::{
    extract::{Extension, Multipart},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dsc_message::encode;
use std::sync::Arc;

use crate::dispatch::dispatch;
use crate::middleware::PeerClaims;
use crate::outbound::IDS_HEADER;
use crate::AppState;

/// The two parts of an inbound envelope as read from the request body.
#[derive(Debug, Default)]
struct RawParts {
    header: Vec<u8>,
    payload: Option<Vec<u8>>,
}

async fn read_parts(multipart: &mut Multipart) -> RawParts {
    let mut parts = RawParts::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                // Whatever was read so far goes to the dispatcher, which
                // rejects an incomplete header as malformed.
                tracing::warn!("unreadable multipart body: {}", e);
                break;
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        let data = match field.bytes().await {
            Ok(data) => data.to_vec(),
            Err(e) => {
                tracing::warn!(part = %name, "failed to read multipart part: {}", e);
                break;
            }
        };
        match name.as_str() {
            "header" => parts.header = data,
            "payload" => parts.payload = Some(data),
            other => tracing::debug!(part = %other, "ignoring unknown multipart part"),
        }
    }
    parts
}

/// Handler for `POST /api/ids`.
pub async fn ids_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(PeerClaims(claims)): Extension<PeerClaims>,
    mut multipart: Multipart,
) -> Response {
    let parts = read_parts(&mut multipart).await;

    let Ok(_slot) = state.exchange_slots.acquire().await else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let envelope = dispatch(&state, &parts.header, parts.payload.as_deref(), claims).await;

    let (header, payload) = match encode(&envelope) {
        Ok(encoded) => encoded,
        Err(e) => {
            tracing::error!(message = %envelope.header.id(), "failed to encode response: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let Ok(header_value) = HeaderValue::from_str(&STANDARD.encode(header)) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    (
        StatusCode::OK,
        [
            (IDS_HEADER, header_value),
            (CONTENT_TYPE.as_str(), HeaderValue::from_static("application/octet-stream")),
        ],
        payload,
    )
        .into_response()
}
