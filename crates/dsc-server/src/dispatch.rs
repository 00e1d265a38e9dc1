//! Inbound exchange dispatch.
//!
//! [`dispatch`] is the single entry point for inbound envelopes. It is
//! total: whatever arrives, it returns an envelope for the peer. An
//! exchange moves through these stages:
//!
//! 1. **Received**: the raw header is decoded; a header that does not
//!    decode is answered with a malformed-message rejection and never
//!    reaches a handler.
//! 2. **Type resolved**: the sender's claims and model version are checked
//!    and the handler is selected by an exhaustive match on the kind.
//! 3. **Handled**: the handler returns a response or a [`HandlerError`].
//! 4. **Responded** or **failed**: a failure is mapped to a rejection by
//!    [`rejection_reason`], its detail logged locally and never sent.

use dsc_message::{
    decode, BuildError, DecodeError, Envelope, Message, MessageKind, Request, Response,
    RouteError,
};
use dsc_negotiation::NegotiationError;
use dsc_types::{Claims, RejectionReason};
use serde_json::json;
use thiserror::Error;
use tracing::Instrument;

use crate::background::SideEffect;
use crate::transfer::RetrievalError;
use crate::{handlers, transfer, AppState};

/// Why an inbound exchange could not be answered as asked.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Malformed(#[from] DecodeError),

    #[error("sender not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("model version {0} is not supported")]
    VersionNotSupported(String),

    #[error("no handler for {0}")]
    NoHandler(MessageKind),

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("bad parameters: {0}")]
    BadParameters(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("policy restriction: {0}")]
    PolicyRestriction(String),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(String),
}

/// Maps every failure to the reason sent to the peer.
pub fn rejection_reason(err: &HandlerError) -> RejectionReason {
    use RejectionReason::*;

    match err {
        HandlerError::Malformed(_) | HandlerError::MalformedPayload(_) => MalformedMessage,
        HandlerError::NotAuthenticated(_) => NotAuthenticated,
        HandlerError::VersionNotSupported(_) => VersionNotSupported,
        HandlerError::MissingField(_) | HandlerError::BadParameters(_) => BadParameters,
        HandlerError::NotFound(_) => NotFound,
        HandlerError::PolicyRestriction(_) => NotAuthorized,
        HandlerError::Retrieval(_) => TemporarilyNotAvailable,
        HandlerError::Negotiation(e) => match e {
            NegotiationError::MissingRules
            | NegotiationError::MissingTargetInRule { .. }
            | NegotiationError::NoAffectedResource => MalformedMessage,
            NegotiationError::NoOfferAvailable { .. }
            | NegotiationError::ArtifactNotFound(_)
            | NegotiationError::ResourceNotFound(_)
            | NegotiationError::AgreementNotFound(_) => NotFound,
            NegotiationError::OfferMismatch { .. }
            | NegotiationError::AgreementMismatch(_)
            | NegotiationError::ArtifactNotCovered { .. }
            | NegotiationError::NotConfirmed(_)
            | NegotiationError::NotInForce(_)
            | NegotiationError::ConsumerMismatch { .. }
            | NegotiationError::UnknownRequest(_) => BadParameters,
            NegotiationError::Database(_) | NegotiationError::Serialization(_) => {
                InternalRecipientError
            }
        },
        HandlerError::NoHandler(_)
        | HandlerError::Build(_)
        | HandlerError::Route(_)
        | HandlerError::Serialization(_)
        | HandlerError::Database(_) => InternalRecipientError,
    }
}

/// Text sent alongside a rejection. Never carries internal detail.
fn public_message(reason: RejectionReason) -> &'static str {
    match reason {
        RejectionReason::BadParameters => "The request carried unusable parameters.",
        RejectionReason::MalformedMessage => "The message could not be parsed.",
        RejectionReason::NotAuthenticated => "The sender could not be authenticated.",
        RejectionReason::NotAuthorized => "The requested use is not permitted.",
        RejectionReason::NotFound => "The requested element was not found.",
        RejectionReason::TemporarilyNotAvailable => "The requested data is temporarily unavailable.",
        RejectionReason::VersionNotSupported => "The information model version is not supported.",
        RejectionReason::InternalRecipientError => "The request could not be processed.",
    }
}

/// Answers one inbound envelope.
///
/// `claims` are the verified claims of the caller, or `None` if the
/// transport could not verify any.
pub async fn dispatch(
    state: &AppState,
    raw_header: &[u8],
    raw_payload: Option<&[u8]>,
    claims: Option<Claims>,
) -> Envelope {
    let envelope = match decode(raw_header, raw_payload) {
        Ok(envelope) => envelope,
        Err(e) => return reject(state, None, HandlerError::from(e)),
    };

    let span = tracing::info_span!(
        "exchange",
        message = %envelope.header.id(),
        kind = %envelope.kind(),
        issuer = %envelope.header.issuer(),
    );

    async move {
        tracing::debug!("exchange received");
        let request_header = envelope.header.clone();
        match handle(state, envelope, claims).await {
            Ok(response) => {
                tracing::debug!(response = %response.header().kind(), "exchange responded");
                response.into_envelope()
            }
            Err(e) => reject(state, Some(&request_header), e),
        }
    }
    .instrument(span)
    .await
}

async fn handle(
    state: &AppState,
    envelope: Envelope,
    claims: Option<Claims>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    let claims = authenticate(state, &envelope.header, claims)?;
    check_model_version(state, &envelope.header)?;

    let request = Request::new(envelope.header, envelope.payload, claims);
    match request.header.kind() {
        MessageKind::DescriptionRequest => handlers::describe(state, request).await,
        MessageKind::ArtifactRequest => transfer::deliver_artifact(state, request).await,
        MessageKind::ContractRequest => handlers::contract_request(state, request).await,
        MessageKind::ContractAgreement => handlers::contract_agreement(state, request).await,
        MessageKind::Notification | MessageKind::Log => handlers::acknowledge(state, request),
        MessageKind::ResourceUpdate => handlers::resource_update(state, request).await,
        kind @ (MessageKind::DescriptionResponse
        | MessageKind::ArtifactResponse
        | MessageKind::ContractRejection
        | MessageKind::MessageProcessedNotification
        | MessageKind::Rejection) => Err(HandlerError::NoHandler(kind)),
    }
}

fn authenticate(
    state: &AppState,
    header: &Message,
    claims: Option<Claims>,
) -> Result<Claims, HandlerError> {
    let claims = claims.ok_or_else(|| {
        HandlerError::NotAuthenticated("no verified credential".to_string())
    })?;
    if !claims.is_valid_at(state.messages.now()) {
        return Err(HandlerError::NotAuthenticated(format!(
            "credential of {} has expired",
            claims.issuer_connector
        )));
    }
    if !dsc_types::uris_equal(&claims.issuer_connector, header.issuer()) {
        return Err(HandlerError::NotAuthenticated(format!(
            "credential issued to {} but message claims {}",
            claims.issuer_connector,
            header.issuer()
        )));
    }
    Ok(claims)
}

fn check_model_version(state: &AppState, header: &Message) -> Result<(), HandlerError> {
    let version = &header.header.model_version;
    if state
        .profile
        .inbound_model_versions
        .iter()
        .any(|v| v == version)
    {
        Ok(())
    } else {
        Err(HandlerError::VersionNotSupported(version.clone()))
    }
}

/// Builds the rejection for a failed exchange and queues it for audit.
fn reject(state: &AppState, request: Option<&Message>, err: HandlerError) -> Envelope {
    let reason = rejection_reason(&err);
    match reason {
        RejectionReason::InternalRecipientError => {
            tracing::error!(%reason, "exchange failed: {}", err)
        }
        _ => tracing::warn!(%reason, "exchange rejected: {}", err),
    }

    // Refusals inside a negotiation are contract rejections.
    let header = match request {
        Some(r) if r.kind() == MessageKind::ContractRequest => {
            state.messages.contract_rejection(reason, Some(r))
        }
        _ => state.messages.rejection(reason, request),
    };

    state.publish(SideEffect::ExchangeRejected {
        message_id: header.id().to_string(),
        message_kind: request.map(Message::kind),
        reason,
        issuer_connector: request.map(|r| r.issuer().to_string()),
    });

    let payload = json!({
        "reason": reason,
        "message": public_message(reason),
    });
    Envelope::new(header, payload.to_string())
}
