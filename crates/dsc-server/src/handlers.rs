//! Handlers for inbound request kinds other than artifact requests.
//!
//! Each handler receives a [`Request`] whose claims are already verified
//! and returns a [`Response`] or a [`HandlerError`]; turning errors into
//! rejections is the dispatcher's job.

use dsc_message::{
    BuildMessage, ContractAgreementParams, DescriptionResponseParams, MessageFields,
    MessageProcessedParams, Request, Response,
};
use dsc_negotiation::{
    confirm_received, find_element, find_resource_by_remote_id, negotiate, offered_catalogs,
    save_metadata,
};
use dsc_types::{
    uris_equal, ConnectorDescription, ContractAgreement, ContractRequest, ResourceDescription,
};
use serde::de::DeserializeOwned;

use crate::background::SideEffect;
use crate::dispatch::HandlerError;
use crate::{run_blocking, AppState};

/// Builds a response header from `params` and pairs it with `body`.
pub(crate) fn respond<P: BuildMessage>(
    state: &AppState,
    params: P,
    body: impl Into<Vec<u8>>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    let header = state.messages.build(params)?;
    Ok(Response::new(header, body.into())?)
}

/// Parses a JSON payload the handler cannot do without.
pub(crate) fn parse_payload<T: DeserializeOwned>(
    body: &[u8],
    what: &'static str,
) -> Result<T, HandlerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(HandlerError::MissingField(what));
    }
    serde_json::from_slice(body)
        .map_err(|e| HandlerError::MalformedPayload(format!("{}: {}", what, e)))
}

fn processed(
    state: &AppState,
    request: &Request<Vec<u8>>,
    body: impl Into<Vec<u8>>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    respond(
        state,
        MessageProcessedParams {
            recipient: request.header.issuer().to_string(),
            correlation_message: request.header.id().to_string(),
        },
        body,
    )
}

/// The connector's self-description with every offered catalog.
pub async fn self_description(state: &AppState) -> Result<ConnectorDescription, HandlerError> {
    let catalogs = run_blocking(&state.pool, HandlerError::Database, |conn| {
        Ok(offered_catalogs(conn)?)
    })
    .await?;

    Ok(ConnectorDescription {
        id: state.connector_id().to_string(),
        title: state.profile.title.clone(),
        outbound_model_version: state.messages.model_version().to_string(),
        inbound_model_versions: state.profile.inbound_model_versions.clone(),
        catalogs,
    })
}

/// Answers a description request with the self-description or with the
/// requested element.
pub async fn describe(
    state: &AppState,
    request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    let requested = match &request.header.fields {
        MessageFields::DescriptionRequest { requested_element } => requested_element
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string),
        _ => None,
    };

    let body = match requested {
        None => serde_json::to_vec(&self_description(state).await?)?,
        Some(uri) => {
            let lookup = uri.clone();
            let element = run_blocking(&state.pool, HandlerError::Database, move |conn| {
                Ok(find_element(conn, &lookup)?)
            })
            .await?
            .ok_or(HandlerError::NotFound(uri))?;
            serde_json::to_vec(&element)?
        }
    };

    respond(
        state,
        DescriptionResponseParams {
            recipient: request.header.issuer().to_string(),
            correlation_message: request.header.id().to_string(),
        },
        body,
    )
}

/// Runs the provider side of a negotiation and answers with the stored,
/// unconfirmed agreement.
pub async fn contract_request(
    state: &AppState,
    request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    let contract: ContractRequest = parse_payload(&request.body, "contract request")?;
    let consumer = request.claims.issuer_connector.clone();
    let provider = state.connector_id().to_string();
    let now = state.messages.now();

    let persisted = run_blocking(&state.pool, HandlerError::Database, move |conn| {
        Ok(negotiate(conn, contract, &consumer, &provider, now)?)
    })
    .await?;

    tracing::info!(
        agreement = %persisted.agreement.id,
        consumer = %persisted.agreement.consumer,
        linked = persisted.linked,
        "agreement persisted, awaiting confirmation"
    );

    let body = serde_json::to_vec(&persisted.agreement)?;
    let transfer_contract = persisted.agreement.id.clone();
    state.publish(SideEffect::AgreementPersisted {
        agreement: persisted.agreement,
    });

    respond(
        state,
        ContractAgreementParams {
            recipient: request.header.issuer().to_string(),
            correlation_message: Some(request.header.id().to_string()),
            transfer_contract,
        },
        body,
    )
}

/// Confirms an agreement the consumer sends back unchanged.
pub async fn contract_agreement(
    state: &AppState,
    request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    let agreement: ContractAgreement = parse_payload(&request.body, "contract agreement")?;
    if let Some(named) = request.header.transfer_contract() {
        if !uris_equal(named, &agreement.id) {
            return Err(HandlerError::BadParameters(format!(
                "header names {} but payload carries {}",
                named, agreement.id
            )));
        }
    }

    let issuer = request.claims.issuer_connector.clone();
    let (stored, newly_confirmed) =
        run_blocking(&state.pool, HandlerError::Database, move |conn| {
            Ok(confirm_received(conn, &agreement, &issuer)?)
        })
        .await?;

    if newly_confirmed {
        tracing::info!(agreement = %stored.uri, "agreement confirmed");
        state.publish(SideEffect::AgreementConfirmed {
            agreement: stored.value,
            requester: Some(request.claims.clone()),
        });
    } else {
        tracing::debug!(agreement = %stored.uri, "agreement was already confirmed");
    }

    processed(state, &request, "Agreement confirmed.")
}

/// Acknowledges notifications and log messages.
pub fn acknowledge(
    state: &AppState,
    request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    tracing::info!(
        kind = %request.header.kind(),
        bytes = request.body.len(),
        "message received"
    );
    processed(state, &request, Vec::new())
}

/// Updates the local copy of a resource its owner has changed.
pub async fn resource_update(
    state: &AppState,
    request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    let affected = match &request.header.fields {
        MessageFields::ResourceUpdate { affected_resource } => affected_resource
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
        _ => None,
    }
    .ok_or(HandlerError::MissingField("affectedResource"))?;

    let resource: ResourceDescription = parse_payload(&request.body, "resource")?;
    if !uris_equal(&resource.id, &affected) {
        return Err(HandlerError::BadParameters(format!(
            "affected resource {} does not match payload resource {}",
            affected, resource.id
        )));
    }

    let connector_id = state.connector_id().to_string();
    let update = resource.clone();
    let saved = run_blocking(&state.pool, HandlerError::Database, move |conn| {
        if find_resource_by_remote_id(conn, &update.id)?.is_none() {
            return Ok(None);
        }
        Ok(Some(save_metadata(conn, &connector_id, &update)?))
    })
    .await?;

    let Some(saved) = saved else {
        tracing::info!(resource = %affected, "update for a resource with no local copy ignored");
        return processed(state, &request, "Message received but resource not updated.");
    };

    tracing::info!(resource = %saved.uri, remote = %affected, "resource copy updated");
    state.publish(SideEffect::ResourceUpdated {
        local_uri: saved.uri,
        resource,
        issuer_connector: request.claims.issuer_connector.clone(),
    });

    processed(state, &request, "Message received and resource updated.")
}
