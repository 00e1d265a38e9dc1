//! Integration tests for the inbound exchange endpoint: authentication,
//! version checks, routing by message kind and the rejections sent back.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use dsc_message::{
    ArtifactResponseParams, ContractRejectionParams, DescriptionRequestParams,
    DescriptionResponseParams, Envelope, LogParams, MessageKind, MessageProcessedParams,
    NotificationParams,
};
use dsc_server::{app, background};
use dsc_types::RejectionReason;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn description_request(element: Option<&str>) -> Envelope {
    Envelope::header_only(consumer_header(DescriptionRequestParams {
        recipient: PROVIDER.to_string(),
        requested_element: element.map(str::to_string),
    }))
}

fn assert_rejected(reply: &Envelope, reason: RejectionReason) {
    assert_eq!(reply.kind(), MessageKind::Rejection);
    assert_eq!(reply.header.rejection_reason(), Some(reason));
    assert_eq!(reply.header.issuer(), PROVIDER);
}

#[tokio::test]
async fn state_is_built_from_configuration() {
    let (pool, _dir) = test_pool();
    let mut config = dsc_server::config::Config::default();
    config.connector.id = PROVIDER.to_string();
    config.connector.outbound_timeout_ms = 750;

    let state = dsc_server::AppState::from_config(pool, &config).unwrap();

    assert_eq!(state.connector_id(), PROVIDER);
    assert_eq!(state.outbound_timeout, std::time::Duration::from_millis(750));
}

#[tokio::test]
async fn health_check_returns_ok() {
    let provider = provider();

    let response = app(provider.state.clone())
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn malformed_header_is_rejected_without_correlation() {
    let provider = provider();

    let reply = post_raw(&provider.state, b"{not json", b"", Some(CONSUMER_TOKEN)).await;

    assert_rejected(&reply, RejectionReason::MalformedMessage);
    assert_eq!(reply.header.correlation_message(), None);
    let payload: Value = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(payload["reason"], "MALFORMED_MESSAGE");
}

#[tokio::test]
async fn missing_credential_is_not_authenticated() {
    let provider = provider();
    let request = description_request(None);
    let (header, _) = dsc_message::encode(&request).unwrap();

    let reply = post_raw(&provider.state, &header, b"", None).await;

    assert_rejected(&reply, RejectionReason::NotAuthenticated);
    assert_eq!(reply.header.correlation_message(), Some(request.header.id()));
}

#[tokio::test]
async fn credential_of_another_connector_is_not_authenticated() {
    let provider = provider();
    let request = description_request(None);
    let (header, _) = dsc_message::encode(&request).unwrap();

    // The header claims the consumer, the credential belongs to the provider.
    let reply = post_raw(&provider.state, &header, b"", Some(PROVIDER_TOKEN)).await;

    assert_rejected(&reply, RejectionReason::NotAuthenticated);
}

#[tokio::test]
async fn unsupported_model_version_is_rejected() {
    let provider = provider();
    let header = messages_for(CONSUMER, CONSUMER_TOKEN, "3.0.0")
        .build(DescriptionRequestParams {
            recipient: PROVIDER.to_string(),
            requested_element: None,
        })
        .unwrap();

    let reply = post_envelope(&provider.state, &Envelope::header_only(header)).await;

    assert_rejected(&reply, RejectionReason::VersionNotSupported);
}

#[tokio::test]
async fn self_description_lists_offered_catalog() {
    let provider = provider();
    let request = description_request(None);

    let reply = post_envelope(&provider.state, &request).await;

    assert_eq!(reply.kind(), MessageKind::DescriptionResponse);
    assert_eq!(reply.header.correlation_message(), Some(request.header.id()));
    let description: Value = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(description["@id"], PROVIDER);
    assert_eq!(description["outboundModelVersion"], MODEL_VERSION);
    assert_eq!(description["catalogs"][0]["@id"], CATALOG);
    assert_eq!(
        description["catalogs"][0]["offeredResources"][0]["artifacts"][0]["@id"],
        ARTIFACT
    );
}

#[tokio::test]
async fn artifact_element_is_described_by_its_resource() {
    let provider = provider();

    let reply = post_envelope(&provider.state, &description_request(Some(ARTIFACT))).await;

    assert_eq!(reply.kind(), MessageKind::DescriptionResponse);
    let resource: Value = serde_json::from_slice(&reply.payload).unwrap();
    assert_eq!(resource["@id"], RESOURCE);
    assert_eq!(resource["contractOffers"][0]["rules"][0]["action"], "USE");
}

#[tokio::test]
async fn unknown_element_is_not_found() {
    let provider = provider();

    let reply = post_envelope(
        &provider.state,
        &description_request(Some("https://provider.example.com/resources/missing")),
    )
    .await;

    assert_rejected(&reply, RejectionReason::NotFound);
    // Rejection payloads never carry internal detail.
    assert!(!reply.payload_text().contains("missing"));
}

#[tokio::test]
async fn notifications_and_logs_are_acknowledged() {
    let provider = provider();

    let notification = Envelope::header_only(consumer_header(NotificationParams {
        recipient: PROVIDER.to_string(),
    }));
    let reply = post_envelope(&provider.state, &notification).await;
    assert_eq!(reply.kind(), MessageKind::MessageProcessedNotification);
    assert_eq!(
        reply.header.correlation_message(),
        Some(notification.header.id())
    );

    let log = Envelope::new(
        consumer_header(LogParams {
            recipient: PROVIDER.to_string(),
        }),
        "connector started",
    );
    let reply = post_envelope(&provider.state, &log).await;
    assert_eq!(reply.kind(), MessageKind::MessageProcessedNotification);
}

#[tokio::test]
async fn response_kinds_have_no_handler() {
    let provider = provider();
    let correlation = "urn:message:earlier".to_string();

    let headers = vec![
        consumer_header(DescriptionResponseParams {
            recipient: PROVIDER.to_string(),
            correlation_message: correlation.clone(),
        }),
        consumer_header(ArtifactResponseParams {
            recipient: PROVIDER.to_string(),
            correlation_message: correlation.clone(),
            transfer_contract: "https://provider.example.com/agreements/1".to_string(),
        }),
        consumer_header(MessageProcessedParams {
            recipient: PROVIDER.to_string(),
            correlation_message: correlation.clone(),
        }),
        consumer_header(ContractRejectionParams {
            recipient: PROVIDER.to_string(),
            correlation_message: correlation.clone(),
            reason: RejectionReason::NotFound,
        }),
    ];

    for header in headers {
        let kind = header.kind();
        let reply = post_envelope(&provider.state, &Envelope::header_only(header)).await;
        assert_eq!(
            reply.header.rejection_reason(),
            Some(RejectionReason::InternalRecipientError),
            "{} should not be handled",
            kind
        );
    }
}

#[tokio::test]
async fn artifact_request_without_contract_is_bad_parameters() {
    let provider = provider();
    let base = consumer_header(DescriptionRequestParams {
        recipient: PROVIDER.to_string(),
        requested_element: None,
    });
    let mut header = serde_json::to_value(&base).unwrap();
    header["@type"] = Value::String("ids:ArtifactRequestMessage".to_string());
    header["requestedArtifact"] = Value::String(ARTIFACT.to_string());
    let raw = serde_json::to_vec(&header).unwrap();

    let reply = post_raw(&provider.state, &raw, b"", Some(CONSUMER_TOKEN)).await;

    assert_rejected(&reply, RejectionReason::BadParameters);
    assert_eq!(reply.header.correlation_message(), Some(base.id()));
}

#[tokio::test]
async fn rejections_are_recorded_in_the_event_log() {
    let provider = provider();
    background::spawn_workers(Arc::new(provider.state.clone())).unwrap();

    post_raw(&provider.state, b"", b"", Some(CONSUMER_TOKEN)).await;
    post_envelope(&provider.state, &description_request(Some(CATALOG))).await;

    assert_eq!(
        wait_for_events(&provider.state.pool, "EXCHANGE_REJECTED", 1).await,
        1
    );
}
