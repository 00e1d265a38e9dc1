//! Integration tests for contract negotiation and artifact transfer, on
//! the provider side over `/api/ids` and end to end through the local API
//! of a consumer.

mod common;

use axum::http::StatusCode;
use common::*;
use dsc_message::{
    ArtifactRequestParams, ContractAgreementParams, ContractRequestParams, Envelope, MessageKind,
};
use dsc_negotiation::find_agreement;
use dsc_types::{ContractAgreement, RejectionReason};
use dsc_server::outbound::{self, ClientError, RawResponse, Transport, TransportError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_ID: &str = "https://consumer.example.com/requests/1";

fn contract_request(rules: Value) -> Envelope {
    let header = consumer_header(ContractRequestParams {
        recipient: PROVIDER.to_string(),
        transfer_contract: REQUEST_ID.to_string(),
    });
    Envelope::new(
        header,
        json!({ "@id": REQUEST_ID, "rules": rules }).to_string(),
    )
}

fn confirmation(agreement: &ContractAgreement) -> Envelope {
    let header = consumer_header(ContractAgreementParams {
        recipient: PROVIDER.to_string(),
        correlation_message: None,
        transfer_contract: agreement.id.clone(),
    });
    Envelope::new(header, serde_json::to_vec(agreement).unwrap())
}

fn artifact_request(agreement: &str) -> Envelope {
    Envelope::header_only(consumer_header(ArtifactRequestParams {
        recipient: PROVIDER.to_string(),
        requested_artifact: ARTIFACT.to_string(),
        transfer_contract: agreement.to_string(),
    }))
}

fn is_confirmed(state: &dsc_server::AppState, uri: &str) -> bool {
    let conn = state.pool.get().unwrap();
    find_agreement(&conn, uri).unwrap().unwrap().confirmed
}

/// Negotiates `rules` with the provider and returns the agreement it sent.
async fn agree(state: &dsc_server::AppState, rules: Value) -> ContractAgreement {
    let request = contract_request(rules);
    let reply = post_envelope(state, &request).await;
    assert_eq!(
        reply.kind(),
        MessageKind::ContractAgreement,
        "negotiation failed: {}",
        reply.payload_text()
    );
    assert_eq!(reply.header.correlation_message(), Some(request.header.id()));
    serde_json::from_slice(&reply.payload).unwrap()
}

async fn agree_and_confirm(state: &dsc_server::AppState, rules: Value) -> ContractAgreement {
    let agreement = agree(state, rules).await;
    let reply = post_envelope(state, &confirmation(&agreement)).await;
    assert_eq!(reply.kind(), MessageKind::MessageProcessedNotification);
    agreement
}

// ── Provider side ──────────────────────────────────────────────────

#[tokio::test]
async fn contract_request_yields_unconfirmed_agreement() {
    let provider = provider();

    let agreement = agree(&provider.state, json!([use_rule()])).await;

    assert_eq!(agreement.consumer, CONSUMER);
    assert_eq!(agreement.provider, PROVIDER);
    assert!(agreement.id.starts_with("https://provider.example.com/agreements/"));
    assert_eq!(agreement.targets().into_iter().collect::<Vec<_>>(), vec![ARTIFACT]);
    assert!(!is_confirmed(&provider.state, &agreement.id));
}

#[tokio::test]
async fn rules_matching_no_offer_get_a_contract_rejection() {
    let provider = provider();
    let rules = json!([
        use_rule(),
        { "kind": "PERMISSION", "action": "DISTRIBUTE", "target": ARTIFACT }
    ]);

    let reply = post_envelope(&provider.state, &contract_request(rules)).await;

    assert_eq!(reply.kind(), MessageKind::ContractRejection);
    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::BadParameters)
    );
}

#[tokio::test]
async fn request_naming_no_local_artifact_is_malformed() {
    let provider = provider();
    let rules = json!([{
        "kind": "PERMISSION",
        "action": "USE",
        "target": "https://provider.example.com/artifacts/unknown"
    }]);

    let reply = post_envelope(&provider.state, &contract_request(rules)).await;

    assert_eq!(reply.kind(), MessageKind::ContractRejection);
    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::MalformedMessage)
    );
}

#[tokio::test]
async fn request_without_rules_is_malformed() {
    let provider = provider();

    let reply = post_envelope(&provider.state, &contract_request(json!([]))).await;

    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::MalformedMessage)
    );
}

#[tokio::test]
async fn unchanged_agreement_is_confirmed_once() {
    let provider = provider();
    let agreement = agree(&provider.state, json!([use_rule()])).await;

    let reply = post_envelope(&provider.state, &confirmation(&agreement)).await;
    assert_eq!(reply.kind(), MessageKind::MessageProcessedNotification);
    assert!(is_confirmed(&provider.state, &agreement.id));

    // A repeated confirmation is acknowledged and changes nothing.
    let reply = post_envelope(&provider.state, &confirmation(&agreement)).await;
    assert_eq!(reply.kind(), MessageKind::MessageProcessedNotification);
    assert!(is_confirmed(&provider.state, &agreement.id));
}

#[tokio::test]
async fn altered_agreement_is_not_confirmed() {
    let provider = provider();
    let agreement = agree(&provider.state, json!([use_rule()])).await;

    let mut altered = agreement.clone();
    altered.rules.push(dsc_types::Rule::new(
        dsc_types::RuleKind::Permission,
        dsc_types::Action::Distribute,
        ARTIFACT,
    ));
    let reply = post_envelope(&provider.state, &confirmation(&altered)).await;

    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::BadParameters)
    );
    let conn = provider.state.pool.get().unwrap();
    let stored = find_agreement(&conn, &agreement.id).unwrap().unwrap();
    assert!(!stored.confirmed);
    assert_eq!(stored.value, agreement);
}

#[tokio::test]
async fn confirmation_naming_another_contract_is_bad_parameters() {
    let provider = provider();
    let agreement = agree(&provider.state, json!([use_rule()])).await;

    let header = consumer_header(ContractAgreementParams {
        recipient: PROVIDER.to_string(),
        correlation_message: None,
        transfer_contract: "https://provider.example.com/agreements/other".to_string(),
    });
    let envelope = Envelope::new(header, serde_json::to_vec(&agreement).unwrap());
    let reply = post_envelope(&provider.state, &envelope).await;

    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::BadParameters)
    );
    assert!(!is_confirmed(&provider.state, &agreement.id));
}

#[tokio::test]
async fn confirmed_agreement_releases_artifact_data() {
    let provider = provider();
    let agreement = agree_and_confirm(&provider.state, json!([use_rule()])).await;

    let request = artifact_request(&agreement.id);
    let reply = post_envelope(&provider.state, &request).await;

    assert_eq!(reply.kind(), MessageKind::ArtifactResponse);
    assert_eq!(reply.header.correlation_message(), Some(request.header.id()));
    assert_eq!(reply.header.transfer_contract(), Some(agreement.id.as_str()));
    assert_eq!(reply.payload, ARTIFACT_DATA.as_bytes());
}

#[tokio::test]
async fn unconfirmed_agreement_releases_nothing() {
    let provider = provider();
    let agreement = agree(&provider.state, json!([use_rule()])).await;

    let reply = post_envelope(&provider.state, &artifact_request(&agreement.id)).await;

    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::BadParameters)
    );
    assert!(!reply.payload_text().contains(ARTIFACT_DATA));
}

#[tokio::test]
async fn unknown_transfer_contract_is_not_found() {
    let provider = provider();

    let reply = post_envelope(
        &provider.state,
        &artifact_request("https://provider.example.com/agreements/none"),
    )
    .await;

    assert_eq!(reply.header.rejection_reason(), Some(RejectionReason::NotFound));
}

#[tokio::test]
async fn expired_usage_window_is_not_authorized() {
    let expired = json!({
        "kind": "PERMISSION",
        "action": "USE",
        "target": ARTIFACT,
        "constraints": [{
            "leftOperand": "POLICY_EVALUATION_TIME",
            "operator": "BEFORE",
            "rightOperand": "2020-01-01T00:00:00Z"
        }]
    });
    let provider = provider_with_offer(json!([expired.clone()]));
    let agreement = agree_and_confirm(&provider.state, json!([expired])).await;

    let reply = post_envelope(&provider.state, &artifact_request(&agreement.id)).await;

    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::NotAuthorized)
    );
    assert!(!reply.payload_text().contains(ARTIFACT_DATA));
}

#[tokio::test]
async fn malformed_query_input_is_bad_parameters() {
    let provider = provider();
    let agreement = agree_and_confirm(&provider.state, json!([use_rule()])).await;

    let mut request = artifact_request(&agreement.id);
    request.payload = b"[\"not\", \"a\", \"query\"]".to_vec();
    let reply = post_envelope(&provider.state, &request).await;

    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::BadParameters)
    );
}

#[tokio::test]
async fn unsendable_query_header_is_bad_parameters() {
    let provider = provider();
    let agreement = agree_and_confirm(&provider.state, json!([use_rule()])).await;

    let mut request = artifact_request(&agreement.id);
    request.payload = json!({ "headers": { "x city": "Dortmund" } })
        .to_string()
        .into_bytes();
    let reply = post_envelope(&provider.state, &request).await;

    assert_eq!(
        reply.header.rejection_reason(),
        Some(RejectionReason::BadParameters)
    );
}

// ── Consumer side, through the local API ──────────────────────────

fn pending_requests(state: &dsc_server::AppState) -> i64 {
    let conn = state.pool.get().unwrap();
    conn.query_row("SELECT COUNT(*) FROM pending_requests", [], |row| row.get(0))
        .unwrap()
}

#[tokio::test]
async fn consumer_negotiates_and_fetches_artifact() {
    let provider = provider();
    let consumer = consumer_of(&provider.state);

    let response = post_json(
        &consumer.state,
        "/api/negotiations",
        json!({
            "recipient": PROVIDER,
            "request": { "@id": REQUEST_ID, "rules": [use_rule()] }
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let outcome: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(outcome["agreement"]["confirmed"], true);
    assert_eq!(outcome["linked"], 1);
    assert_eq!(outcome["resources"].as_array().unwrap().len(), 1);
    let remote_agreement = outcome["agreement"]["remoteId"].as_str().unwrap().to_string();
    assert!(is_confirmed(&provider.state, &remote_agreement));
    assert_eq!(pending_requests(&consumer.state), 0);

    // The copied artifact is linked to the local agreement.
    let local_agreement = outcome["agreement"]["uri"].as_str().unwrap();
    let conn = consumer.state.pool.get().unwrap();
    let stored = find_agreement(&conn, local_agreement).unwrap().unwrap();
    assert_eq!(stored.artifacts.len(), 1);
    drop(conn);

    let response = post_json(
        &consumer.state,
        "/api/artifacts",
        json!({
            "recipient": PROVIDER,
            "artifact": ARTIFACT,
            "agreement": remote_agreement
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let data = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&data[..], ARTIFACT_DATA.as_bytes());
}

#[tokio::test]
async fn consumer_reports_provider_refusal() {
    let provider = provider();
    let consumer = consumer_of(&provider.state);

    let response = post_json(
        &consumer.state,
        "/api/negotiations",
        json!({
            "recipient": PROVIDER,
            "request": {
                "@id": REQUEST_ID,
                "rules": [{
                    "kind": "PERMISSION",
                    "action": "USE",
                    "target": "https://provider.example.com/artifacts/unknown"
                }]
            }
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(pending_requests(&consumer.state), 0);
}

#[tokio::test]
async fn consumer_rejects_request_without_rules_locally() {
    let provider = provider();
    let consumer = consumer_of(&provider.state);

    let response = post_json(
        &consumer.state,
        "/api/negotiations",
        json!({ "recipient": PROVIDER, "request": { "@id": REQUEST_ID, "rules": [] } }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(pending_requests(&consumer.state), 0);
}

#[tokio::test]
async fn consumer_fetches_remote_description() {
    let provider = provider();
    let consumer = consumer_of(&provider.state);

    let response = post_json(
        &consumer.state,
        "/api/descriptions",
        json!({ "recipient": PROVIDER, "element": RESOURCE }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let resource: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(resource["@id"], RESOURCE);
}

/// Never answers within any deadline a test sets.
struct StalledTransport;

#[async_trait::async_trait]
impl Transport for StalledTransport {
    async fn send(&self, recipient: &str, _envelope: Envelope) -> Result<RawResponse, TransportError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(TransportError::MalformedResponse(format!("{} stalled", recipient)))
    }
}

#[tokio::test]
async fn caller_deadline_bounds_the_round_trip() {
    let (pool, _dir) = test_pool();
    let consumer = make_state(pool, CONSUMER, CONSUMER_TOKEN, Arc::new(StalledTransport));
    let deadline = Duration::from_millis(50);

    let err = outbound::request_description(&consumer, PROVIDER, None, Some(deadline))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout(d) if d == deadline));

    let response = post_json(
        &consumer,
        "/api/negotiations",
        json!({
            "recipient": PROVIDER,
            "request": { "@id": REQUEST_ID, "rules": [use_rule()] },
            "timeout_ms": 50
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(pending_requests(&consumer), 0);
}
