//! Outbound exchanges with other connectors.
//!
//! Every outbound call goes through [`exchange`]: the envelope is sent by
//! the [`Transport`], and the raw reply is classified against the kind of
//! the request and correlated to its id. The flows on top of it are the
//! description fetch, the artifact request and the consumer side of a
//! contract negotiation.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use dsc_message::{
    encode, validate, ArtifactRequestParams, BuildError, ContractAgreementParams,
    ContractRequestParams, DescriptionRequestParams, EncodeError, Envelope, InvalidResponse,
    Rejection, ResponseOutcome,
};
use dsc_negotiation::{
    accept_agreement, confirm_agreement, link_remote_artifacts, mint_agreement_id,
    save_metadata, save_pending_request, take_pending_request, validate_rules, NegotiationError,
    StoredAgreement,
};
use dsc_types::{uris_equal, ContractAgreement, ContractRequest, ResourceDescription};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::background::SideEffect;
use crate::transfer::QueryInput;
use crate::{run_blocking, AppState};

/// Name of the HTTP response header carrying the base64-encoded message
/// header of a reply.
pub const IDS_HEADER: &str = "ids-header";

/// A reply as received, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub header: Vec<u8>,
    pub payload: Option<Vec<u8>>,
}

/// Errors raised while moving an envelope to a peer and back.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("malformed reply: {0}")]
    MalformedResponse(String),
}

/// Moves envelopes to peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `envelope` to the connector `recipient` and returns its raw
    /// reply.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if no reply could be obtained.
    async fn send(&self, recipient: &str, envelope: Envelope) -> Result<RawResponse, TransportError>;
}

/// Posts envelopes as two-part multipart bodies to `{recipient}/api/ids`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `connect_timeout` bounds connection setup only; the whole round
    /// trip is bounded by the deadline [`exchange`] applies.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest::Error` if the HTTP client cannot be set up.
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("dsc-connector/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, recipient: &str, envelope: Envelope) -> Result<RawResponse, TransportError> {
        let url = format!("{}/api/ids", recipient.trim_end_matches('/'));
        let token = envelope.header.header.security_token.clone();
        let (header, payload) = encode(&envelope)?;

        let form = Form::new()
            .part("header", Part::bytes(header).mime_str("application/json").map_err(|e| {
                TransportError::Http {
                    url: url.clone(),
                    source: e,
                }
            })?)
            .part("payload", Part::bytes(payload));

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(|source| TransportError::Http {
                url: url.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let header = resp
            .headers()
            .get(IDS_HEADER)
            .ok_or_else(|| TransportError::MalformedResponse(format!("no {} header", IDS_HEADER)))?
            .to_str()
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))
            .and_then(|encoded| {
                STANDARD
                    .decode(encoded)
                    .map_err(|e| TransportError::MalformedResponse(e.to_string()))
            })?;

        let payload = resp
            .bytes()
            .await
            .map_err(|source| TransportError::Http { url, source })?;

        Ok(RawResponse {
            header,
            payload: (!payload.is_empty()).then(|| payload.to_vec()),
        })
    }
}

/// Errors surfaced to the local caller of an outbound flow.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("peer rejected the request: {}", .0.reason)]
    Rejected(Rejection),

    #[error(transparent)]
    Invalid(#[from] InvalidResponse),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("unusable reply payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),
}

/// Sends one request and returns the expected, correlated reply.
///
/// The round trip is bounded by `deadline`, or by the connector's
/// configured outbound timeout when the caller supplies none.
///
/// # Errors
///
/// Returns `ClientError::Timeout` once the deadline passes,
/// `ClientError::Rejected` if the peer refused and
/// `ClientError::Invalid` for replies of the wrong kind or correlation.
pub async fn exchange(
    state: &AppState,
    recipient: &str,
    envelope: Envelope,
    deadline: Option<Duration>,
) -> Result<Envelope, ClientError> {
    let request_kind = envelope.kind();
    let request_id = envelope.header.id().to_string();
    tracing::debug!(kind = %request_kind, message = %request_id, %recipient, "sending request");

    let timeout = deadline.unwrap_or(state.outbound_timeout);
    let raw = tokio::time::timeout(timeout, state.transport.send(recipient, envelope))
        .await
        .map_err(|_| ClientError::Timeout(timeout))??;

    match validate(request_kind, &raw.header, raw.payload.as_deref()).correlated_to(&request_id) {
        ResponseOutcome::Ok(reply) => Ok(reply),
        ResponseOutcome::Rejected(rejection) => {
            tracing::warn!(
                kind = %request_kind,
                reason = %rejection.reason,
                %recipient,
                "request rejected by peer"
            );
            Err(ClientError::Rejected(rejection))
        }
        ResponseOutcome::Invalid(invalid) => {
            tracing::warn!(kind = %request_kind, %recipient, "unusable reply: {}", invalid);
            Err(ClientError::Invalid(invalid))
        }
    }
}

/// Asks `recipient` for its self-description or for one element.
pub async fn request_description(
    state: &AppState,
    recipient: &str,
    element: Option<&str>,
    deadline: Option<Duration>,
) -> Result<Envelope, ClientError> {
    let header = state.messages.build(DescriptionRequestParams {
        recipient: recipient.to_string(),
        requested_element: element.map(str::to_string),
    })?;
    exchange(state, recipient, Envelope::header_only(header), deadline).await
}

/// Asks `recipient` for the data of `artifact` under `agreement`.
pub async fn request_artifact(
    state: &AppState,
    recipient: &str,
    artifact: &str,
    agreement: &str,
    query: Option<&QueryInput>,
    deadline: Option<Duration>,
) -> Result<Envelope, ClientError> {
    let header = state.messages.build(ArtifactRequestParams {
        recipient: recipient.to_string(),
        requested_artifact: artifact.to_string(),
        transfer_contract: agreement.to_string(),
    })?;
    let payload = match query {
        Some(q) => serde_json::to_vec(q)?,
        None => Vec::new(),
    };
    exchange(state, recipient, Envelope::new(header, payload), deadline).await
}

/// Result of a completed consumer-side negotiation.
#[derive(Debug, Clone, Serialize)]
pub struct NegotiationOutcome {
    /// The confirmed agreement as stored locally.
    pub agreement: StoredAgreement,
    /// Local URIs of the resource copies saved for the agreement targets.
    pub resources: Vec<String>,
    /// Number of artifact copies newly linked to the agreement.
    pub linked: usize,
}

/// Negotiates `request` with the provider `recipient`.
///
/// The request is recorded as pending under the id of the message that
/// carries it. The provider's agreement must match the recorded request;
/// it is then stored unconfirmed, sent back for confirmation and
/// confirmed once the provider acknowledges. Finally the metadata of every
/// target is fetched and the copied artifacts are linked to the agreement.
///
/// `deadline` bounds each round trip of the flow separately.
pub async fn negotiate(
    state: &AppState,
    recipient: &str,
    request: ContractRequest,
    deadline: Option<Duration>,
) -> Result<NegotiationOutcome, ClientError> {
    validate_rules(&request.rules)?;

    let header = state.messages.build(ContractRequestParams {
        recipient: recipient.to_string(),
        transfer_contract: request.id.clone(),
    })?;
    let message_id = header.id().to_string();
    let payload = serde_json::to_vec(&request)?;

    {
        let message_id = message_id.clone();
        let recipient = recipient.to_string();
        let request = request.clone();
        run_blocking(&state.pool, ClientError::Database, move |conn| {
            Ok(save_pending_request(conn, &message_id, &recipient, &request)?)
        })
        .await?;
    }

    let sent = exchange(state, recipient, Envelope::new(header, payload), deadline).await;

    // The pending entry is settled whatever the outcome.
    let pending = {
        let message_id = message_id.clone();
        run_blocking(&state.pool, ClientError::Database, move |conn| {
            Ok(take_pending_request(conn, &message_id)?)
        })
        .await?
    };
    let reply = sent?;
    let pending = pending.ok_or(NegotiationError::UnknownRequest(message_id))?;

    let agreement: ContractAgreement = serde_json::from_slice(&reply.payload)?;
    if reply.header.transfer_contract() != Some(agreement.id.as_str()) {
        return Err(NegotiationError::AgreementMismatch(agreement.id).into());
    }

    let local_uri = mint_agreement_id(state.connector_id());
    let stored = {
        let agreement = agreement.clone();
        run_blocking(&state.pool, ClientError::Database, move |conn| {
            Ok(accept_agreement(conn, &pending.request, &agreement, &local_uri)?)
        })
        .await?
    };
    tracing::info!(
        agreement = %stored.uri,
        remote = %agreement.id,
        provider = %recipient,
        "agreement received, confirming"
    );
    state.publish(SideEffect::AgreementPersisted {
        agreement: agreement.clone(),
    });

    let confirmation = state.messages.build(ContractAgreementParams {
        recipient: recipient.to_string(),
        correlation_message: None,
        transfer_contract: agreement.id.clone(),
    })?;
    exchange(
        state,
        recipient,
        Envelope::new(confirmation, reply.payload.clone()),
        deadline,
    )
    .await?;

    let stored = {
        let uri = stored.uri.clone();
        run_blocking(&state.pool, ClientError::Database, move |conn| {
            confirm_agreement(conn, &uri)?;
            Ok(dsc_negotiation::find_agreement(conn, &uri)?
                .ok_or(NegotiationError::AgreementNotFound(uri))?)
        })
        .await?
    };
    // The provider only acknowledged; no verified claims came with it.
    state.publish(SideEffect::AgreementConfirmed {
        agreement: agreement.clone(),
        requester: None,
    });

    let (resources, remote_artifacts) =
        fetch_target_metadata(state, recipient, &agreement, deadline).await?;

    let linked = {
        let agreement_id = stored.id;
        run_blocking(&state.pool, ClientError::Database, move |conn| {
            Ok(link_remote_artifacts(
                conn,
                agreement_id,
                remote_artifacts.iter().map(String::as_str),
            )?)
        })
        .await?
    };
    tracing::info!(agreement = %stored.uri, resources = resources.len(), linked, "negotiation completed");
    state.publish(SideEffect::ArtifactsLinked {
        agreement: stored.uri.clone(),
        linked,
    });

    Ok(NegotiationOutcome {
        agreement: stored,
        resources,
        linked,
    })
}

/// Fetches and stores the resource behind every agreement target.
///
/// Returns the local URIs of the saved copies and the remote ids of all
/// copied artifacts.
async fn fetch_target_metadata(
    state: &AppState,
    recipient: &str,
    agreement: &ContractAgreement,
    deadline: Option<Duration>,
) -> Result<(Vec<String>, Vec<String>), ClientError> {
    let mut resources = Vec::new();
    let mut remote_artifacts: Vec<String> = Vec::new();

    for target in agreement.targets() {
        if remote_artifacts.iter().any(|a| uris_equal(a, &target)) {
            continue;
        }
        let reply = request_description(state, recipient, Some(target.as_str()), deadline).await?;
        let resource: ResourceDescription = serde_json::from_slice(&reply.payload)?;
        remote_artifacts.extend(resource.artifacts.iter().map(|a| a.id.clone()));

        let connector_id = state.connector_id().to_string();
        let saved = run_blocking(&state.pool, ClientError::Database, move |conn| {
            Ok(save_metadata(conn, &connector_id, &resource)?)
        })
        .await?;
        tracing::debug!(resource = %saved.uri, target = %target, "resource metadata copied");
        resources.push(saved.uri);
    }

    Ok((resources, remote_artifacts))
}
