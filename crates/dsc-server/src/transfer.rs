//! Artifact transfer pipeline.
//!
//! An artifact request runs through four steps, each of which can end the
//! exchange:
//!
//! 1. the transfer contract is validated against the stored agreement;
//! 2. the policy decision is asked about every rule governing the
//!    artifact;
//! 3. the data is obtained from the [`DataSource`], bounded by the
//!    outbound timeout;
//! 4. an artifact response carrying the data is built.
//!
//! A denial never reveals rule text or data to the peer; the reason is
//! logged locally.

use async_trait::async_trait;
use dsc_message::{ArtifactResponseParams, MessageFields, Request, Response};
use dsc_negotiation::{validate_transfer_contract, StoredArtifact};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::background::SideEffect;
use crate::dispatch::HandlerError;
use crate::handlers::respond;
use crate::policy::{decide, PolicyContext, PolicyOutcome};
use crate::{run_blocking, AppState};

/// Optional parameters a consumer sends along with an artifact request.
///
/// They are forwarded to remote data sources and ignored for inline data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryInput {
    /// Query string parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Path appended to the access URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl QueryInput {
    /// Parses the request payload. An empty payload means no input.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::BadParameters` if the payload is present but
    /// is not a query input, or names a header that cannot be sent.
    pub fn from_payload(payload: &[u8]) -> Result<Self, HandlerError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let input: Self = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::BadParameters(format!("invalid query input: {}", e)))?;
        input.check_headers()?;
        Ok(input)
    }

    fn check_headers(&self) -> Result<(), HandlerError> {
        for (name, value) in &self.headers {
            HeaderName::try_from(name.as_str()).map_err(|e| {
                HandlerError::BadParameters(format!("invalid header name '{}': {}", name, e))
            })?;
            HeaderValue::try_from(value.as_str()).map_err(|e| {
                HandlerError::BadParameters(format!("invalid value for header '{}': {}", name, e))
            })?;
        }
        Ok(())
    }
}

/// Errors raised while obtaining artifact data.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("artifact {0} has neither inline data nor an access URL")]
    NoData(String),

    #[error("invalid access URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("data source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("data source answered with status {0}")]
    Status(u16),

    #[error("data source did not answer within {0:?}")]
    Timeout(Duration),
}

/// Where artifact data comes from.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// # Errors
    ///
    /// Returns a `RetrievalError` if the data cannot be obtained.
    async fn fetch(
        &self,
        artifact: &StoredArtifact,
        query: &QueryInput,
    ) -> Result<Vec<u8>, RetrievalError>;
}

/// Serves inline data from the store and fetches everything else over
/// HTTP.
#[derive(Debug, Clone)]
pub struct HttpDataSource {
    client: reqwest::Client,
}

impl HttpDataSource {
    /// # Errors
    ///
    /// Returns the `reqwest::Error` if the HTTP client cannot be set up.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("dsc-connector/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

/// Joins the access URL, the optional path and the query parameters.
fn access_url(base: &str, query: &QueryInput) -> Result<url::Url, RetrievalError> {
    let joined = match query.path.as_deref().map(|p| p.trim_matches('/')) {
        Some(path) if !path.is_empty() => format!("{}/{}", base.trim_end_matches('/'), path),
        _ => base.to_string(),
    };
    let mut url = url::Url::parse(&joined).map_err(|e| RetrievalError::InvalidUrl {
        url: joined.clone(),
        reason: e.to_string(),
    })?;
    if !query.params.is_empty() {
        url.query_pairs_mut().extend_pairs(query.params.iter());
    }
    Ok(url)
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch(
        &self,
        artifact: &StoredArtifact,
        query: &QueryInput,
    ) -> Result<Vec<u8>, RetrievalError> {
        if let Some(data) = &artifact.data {
            return Ok(data.clone());
        }
        let base = artifact
            .access_url
            .as_deref()
            .ok_or_else(|| RetrievalError::NoData(artifact.uri.clone()))?;
        let url = access_url(base, query)?;

        let mut builder = self.client.get(url);
        for (name, value) in &query.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Answers an artifact request with the artifact's data.
pub async fn deliver_artifact(
    state: &AppState,
    request: Request<Vec<u8>>,
) -> Result<Response<Vec<u8>>, HandlerError> {
    let (requested_artifact, transfer_contract) = match &request.header.fields {
        MessageFields::ArtifactRequest {
            requested_artifact,
            transfer_contract,
        } => (requested_artifact.clone(), transfer_contract.clone()),
        _ => (None, None),
    };
    let requested_artifact = requested_artifact
        .filter(|a| !a.trim().is_empty())
        .ok_or(HandlerError::MissingField("requestedArtifact"))?;
    let transfer_contract = transfer_contract
        .filter(|c| !c.trim().is_empty())
        .ok_or(HandlerError::MissingField("transferContract"))?;
    let query = QueryInput::from_payload(&request.body)?;

    let consumer = request.claims.issuer_connector.clone();
    let now = state.messages.now();
    let grant = {
        let consumer = consumer.clone();
        let contract = transfer_contract.clone();
        let artifact = requested_artifact.clone();
        run_blocking(&state.pool, HandlerError::Database, move |conn| {
            Ok(validate_transfer_contract(
                conn, &contract, &artifact, &consumer, now,
            )?)
        })
        .await?
    };

    let context = PolicyContext {
        consumer: &consumer,
        artifact: &grant.artifact.uri,
        agreement: &grant.agreement.uri,
        now,
    };
    if let PolicyOutcome::Deny(why) = decide(state.policy.as_ref(), &grant.rules, &context) {
        return Err(HandlerError::PolicyRestriction(why));
    }

    let timeout = state.outbound_timeout;
    let data = tokio::time::timeout(timeout, state.data_source.fetch(&grant.artifact, &query))
        .await
        .map_err(|_| RetrievalError::Timeout(timeout))??;

    tracing::info!(
        artifact = %grant.artifact.uri,
        agreement = %grant.agreement.uri,
        bytes = data.len(),
        "artifact delivered"
    );
    state.publish(SideEffect::ArtifactDelivered {
        artifact: grant.artifact.uri.clone(),
        agreement: grant.agreement.uri.clone(),
        consumer,
        byte_size: data.len(),
    });

    respond(
        state,
        ArtifactResponseParams {
            recipient: request.header.issuer().to_string(),
            correlation_message: request.header.id().to_string(),
            transfer_contract: grant.agreement.uri,
        },
        data,
    )
}
