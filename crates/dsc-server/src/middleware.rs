//! Peer authentication for the inbound exchange endpoint.
//!
//! The transport boundary turns the `Authorization: Bearer` credential of
//! an inbound call into verified [`Claims`]. A call without usable
//! credentials is not refused at the HTTP level: the dispatcher answers it
//! with a not-authenticated rejection, so the peer still receives a
//! well-formed envelope.

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dsc_types::{normalize_uri, Claims};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::AppState;

/// Claims of the calling peer, stored in request extensions.
///
/// `None` when the call carried no credential or the credential could not
/// be verified.
#[derive(Clone, Debug, Default)]
pub struct PeerClaims(pub Option<Claims>);

/// Errors raised while verifying a peer credential.
#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("authorization header is not a bearer credential")]
    NotBearer,

    #[error("credential is not issued to any known peer")]
    UnknownCredential,
}

/// Turns a bearer credential into verified claims.
pub trait ClaimsVerifier: Send + Sync {
    /// # Errors
    ///
    /// Returns `ClaimsError::UnknownCredential` if the token is not
    /// accepted.
    fn verify(&self, token: &str) -> Result<Claims, ClaimsError>;
}

/// Allow-list of bearer tokens, each issued to one peer connector.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    tokens: BTreeMap<String, String>,
}

impl PeerTable {
    pub fn new(tokens: BTreeMap<String, String>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|(token, connector)| (token, normalize_uri(&connector)))
            .collect();
        Self { tokens }
    }
}

impl ClaimsVerifier for PeerTable {
    fn verify(&self, token: &str) -> Result<Claims, ClaimsError> {
        self.tokens
            .get(token)
            .map(|connector| Claims::for_connector(connector.clone()))
            .ok_or(ClaimsError::UnknownCredential)
    }
}

/// Extracts the bearer token from the request headers, if any.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ClaimsError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| ClaimsError::NotBearer)?;
    value
        .strip_prefix("Bearer ")
        .map(|token| Some(token.trim()))
        .ok_or(ClaimsError::NotBearer)
}

/// Middleware that verifies the peer credential and inserts
/// [`PeerClaims`] into the request extensions.
pub async fn claims_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let claims = match bearer_token(req.headers()) {
        Ok(Some(token)) => match state.verifier.verify(token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::warn!("peer credential rejected: {}", e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("unusable authorization header: {}", e);
            None
        }
    };

    req.extensions_mut().insert(PeerClaims(claims));
    Ok(next.run(req).await)
}
