//! Shared fixtures for connector integration tests.
//!
//! Each connector under test gets its own file-backed database in a
//! temporary directory, so pooled connections see the same data.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dsc_db::{open_database, DbPool, DbRuntimeSettings};
use dsc_message::{
    decode, encode, BuildContext, BuildMessage, Envelope, StaticCredential, StaticIdentity,
    SystemClock,
};
use dsc_negotiation::{register_catalog, OfferedCatalog};
use dsc_server::{
    app,
    middleware::PeerTable,
    outbound::{RawResponse, Transport, TransportError, IDS_HEADER},
    policy::RuleEvaluator,
    transfer::HttpDataSource,
    AppState, ConnectorProfile,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Semaphore};
use tower::ServiceExt;

pub const PROVIDER: &str = "https://provider.example.com";
pub const CONSUMER: &str = "https://consumer.example.com";
pub const CATALOG: &str = "https://provider.example.com/catalogs/weather";
pub const RESOURCE: &str = "https://provider.example.com/resources/hourly";
pub const ARTIFACT: &str = "https://provider.example.com/artifacts/hourly-2026";
pub const ARTIFACT_DATA: &str = "21.5";

pub const PROVIDER_TOKEN: &str = "provider-token";
pub const CONSUMER_TOKEN: &str = "consumer-token";
pub const MODEL_VERSION: &str = "4.2.7";

/// A connector state together with the directory holding its database.
pub struct TestConnector {
    pub state: AppState,
    _dir: TempDir,
}

pub fn test_pool() -> (DbPool, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dsc.db");
    let pool = open_database(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    (pool, dir)
}

/// Header builder for `connector_id` speaking `model_version`.
pub fn messages_for(connector_id: &str, token: &str, model_version: &str) -> BuildContext {
    BuildContext::new(
        Arc::new(SystemClock),
        Arc::new(StaticIdentity {
            connector_id: connector_id.to_string(),
            sender_agent: connector_id.to_string(),
            model_version: model_version.to_string(),
        }),
        Arc::new(StaticCredential(Some(token.to_string()))),
    )
}

/// Builds a header as the consumer would.
pub fn consumer_header<P: BuildMessage>(params: P) -> dsc_message::Message {
    messages_for(CONSUMER, CONSUMER_TOKEN, MODEL_VERSION)
        .build(params)
        .unwrap()
}

/// Fails every send; for connectors that must not reach out.
pub struct NoTransport;

#[async_trait]
impl Transport for NoTransport {
    async fn send(&self, recipient: &str, _envelope: Envelope) -> Result<RawResponse, TransportError> {
        Err(TransportError::MalformedResponse(format!(
            "no network in tests (sending to {})",
            recipient
        )))
    }
}

/// Delivers envelopes to another connector's router in process.
pub struct RouterTransport {
    pub peer: AppState,
}

#[async_trait]
impl Transport for RouterTransport {
    async fn send(&self, _recipient: &str, envelope: Envelope) -> Result<RawResponse, TransportError> {
        let token = envelope.header.header.security_token.clone();
        let (header, payload) = encode(&envelope)?;
        let response = app(self.peer.clone())
            .oneshot(ids_request(&header, &payload, Some(&token)))
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        let (header, payload) = read_ids_response(response).await;
        Ok(RawResponse {
            header,
            payload: Some(payload),
        })
    }
}

pub fn make_state(
    pool: DbPool,
    connector_id: &str,
    token: &str,
    transport: Arc<dyn Transport>,
) -> AppState {
    AppState {
        pool,
        messages: messages_for(connector_id, token, MODEL_VERSION),
        profile: Arc::new(ConnectorProfile {
            title: Some(format!("Test connector {}", connector_id)),
            inbound_model_versions: vec![MODEL_VERSION.to_string()],
            clearing_house_url: None,
        }),
        verifier: Arc::new(PeerTable::new(BTreeMap::from([
            (PROVIDER_TOKEN.to_string(), PROVIDER.to_string()),
            (CONSUMER_TOKEN.to_string(), CONSUMER.to_string()),
        ]))),
        policy: Arc::new(RuleEvaluator),
        data_source: Arc::new(HttpDataSource::new(Duration::from_secs(2)).unwrap()),
        transport,
        bus: broadcast::channel(64).0,
        exchange_slots: Arc::new(Semaphore::new(8)),
        outbound_timeout: Duration::from_secs(5),
    }
}

/// The weather catalog with one artifact, offered for plain use with the
/// given extra rules.
pub fn weather_catalog(offer_rules: serde_json::Value) -> OfferedCatalog {
    serde_json::from_value(serde_json::json!({
        "@id": CATALOG,
        "title": "Weather",
        "resources": [{
            "@id": RESOURCE,
            "title": "Hourly readings",
            "keywords": ["weather"],
            "artifacts": [{
                "@id": ARTIFACT,
                "title": "2026",
                "value": ARTIFACT_DATA
            }],
            "contractOffers": [{
                "@id": "https://provider.example.com/offers/open",
                "rules": offer_rules
            }]
        }]
    }))
    .unwrap()
}

pub fn use_rule() -> serde_json::Value {
    serde_json::json!({ "kind": "PERMISSION", "action": "USE", "target": ARTIFACT })
}

/// A provider offering the weather catalog under a plain use permission.
pub fn provider() -> TestConnector {
    provider_with_offer(serde_json::json!([use_rule()]))
}

pub fn provider_with_offer(offer_rules: serde_json::Value) -> TestConnector {
    let (pool, dir) = test_pool();
    {
        let mut conn = pool.get().unwrap();
        register_catalog(&mut conn, &weather_catalog(offer_rules), PROVIDER).unwrap();
    }
    TestConnector {
        state: make_state(pool, PROVIDER, PROVIDER_TOKEN, Arc::new(NoTransport)),
        _dir: dir,
    }
}

/// A consumer whose outbound calls reach `peer` in process.
pub fn consumer_of(peer: &AppState) -> TestConnector {
    let (pool, dir) = test_pool();
    TestConnector {
        state: make_state(
            pool,
            CONSUMER,
            CONSUMER_TOKEN,
            Arc::new(RouterTransport { peer: peer.clone() }),
        ),
        _dir: dir,
    }
}

/// A multipart `POST /api/ids` request.
pub fn ids_request(header: &[u8], payload: &[u8], token: Option<&str>) -> Request<Body> {
    let boundary = "dsc-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"header\"\r\nContent-Type: application/json\r\n\r\n",
            b = boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(header);
    body.extend_from_slice(
        format!(
            "\r\n--{b}\r\nContent-Disposition: form-data; name=\"payload\"\r\n\r\n",
            b = boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{b}--\r\n", b = boundary).as_bytes());

    let mut builder = Request::builder()
        .uri("/api/ids")
        .method("POST")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        );
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

/// Splits an `/api/ids` response into raw header and payload.
pub async fn read_ids_response(response: axum::response::Response) -> (Vec<u8>, Vec<u8>) {
    assert_eq!(response.status(), StatusCode::OK);
    let header = STANDARD
        .decode(response.headers().get(IDS_HEADER).unwrap().to_str().unwrap())
        .unwrap();
    let payload = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (header, payload)
}

/// Posts raw envelope parts to `state`'s exchange endpoint and decodes
/// the reply.
pub async fn post_raw(
    state: &AppState,
    header: &[u8],
    payload: &[u8],
    token: Option<&str>,
) -> Envelope {
    let response = app(state.clone())
        .oneshot(ids_request(header, payload, token))
        .await
        .unwrap();
    let (header, payload) = read_ids_response(response).await;
    decode(&header, Some(&payload)).unwrap()
}

/// Sends `envelope` to `state` with the credential in its header.
pub async fn post_envelope(state: &AppState, envelope: &Envelope) -> Envelope {
    let (header, payload) = encode(envelope).unwrap();
    let token = envelope.header.header.security_token.clone();
    post_raw(state, &header, &payload, Some(&token)).await
}

/// Counts event log rows of the given type.
pub fn count_events_by_type(pool: &DbPool, event_type: &str) -> i64 {
    let conn = pool.get().unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM exchange_event_log WHERE event_type = ?1",
        [event_type],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Polls until at least `expected` events of `event_type` are logged.
pub async fn wait_for_events(pool: &DbPool, event_type: &str, expected: i64) -> i64 {
    for _ in 0..100 {
        let count = count_events_by_type(pool, event_type);
        if count >= expected {
            return count;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    count_events_by_type(pool, event_type)
}

/// Posts a JSON body to the local API of `state`.
pub async fn post_json(
    state: &AppState,
    uri: &str,
    body: serde_json::Value,
) -> axum::response::Response {
    app(state.clone())
        .oneshot(
            Request::builder()
                .uri(uri)
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Sends a GET to the local API of `state` and returns status and JSON body.
pub async fn get_json(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app(state.clone())
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}
