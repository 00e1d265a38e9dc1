//! Shared types for the dataspace connector.
//!
//! This crate holds the domain vocabulary every other connector crate
//! speaks: usage rules and contracts, resource and catalog descriptions,
//! the claims a peer presents, and the rejection reasons returned to it.
//!
//! It depends on nothing but serialization and time crates, so the
//! message, negotiation and server crates can share these definitions
//! without depending on each other.

pub mod contract;
pub mod resource;
pub mod uri;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use contract::{
    targets_of, Action, Constraint, ContractAgreement, ContractOffer, ContractRequest, Operator,
    Rule, RuleKind,
};
pub use resource::{
    ArtifactDescription, CatalogDescription, ConnectorDescription, ResourceDescription,
};
pub use uri::{normalize_uri, uris_equal};

/// Reason codes carried by a rejection sent back to a peer.
///
/// The set is closed: every failure inside the connector is mapped onto
/// exactly one of these before it leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// The request was structurally valid but carried unusable parameters.
    BadParameters,
    /// The header or payload could not be parsed.
    MalformedMessage,
    /// The sender could not be authenticated.
    NotAuthenticated,
    /// The sender is authenticated but not permitted to do this.
    NotAuthorized,
    /// The requested element does not exist.
    NotFound,
    /// A dependency of the recipient is currently unavailable.
    TemporarilyNotAvailable,
    /// The sender's information model version is not accepted.
    VersionNotSupported,
    /// Any other failure inside the recipient.
    InternalRecipientError,
}

impl RejectionReason {
    /// Returns the canonical wire label for this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadParameters => "BAD_PARAMETERS",
            Self::MalformedMessage => "MALFORMED_MESSAGE",
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::NotAuthorized => "NOT_AUTHORIZED",
            Self::NotFound => "NOT_FOUND",
            Self::TemporarilyNotAvailable => "TEMPORARILY_NOT_AVAILABLE",
            Self::VersionNotSupported => "VERSION_NOT_SUPPORTED",
            Self::InternalRecipientError => "INTERNAL_RECIPIENT_ERROR",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RejectionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BAD_PARAMETERS" => Ok(Self::BadParameters),
            "MALFORMED_MESSAGE" => Ok(Self::MalformedMessage),
            "NOT_AUTHENTICATED" => Ok(Self::NotAuthenticated),
            "NOT_AUTHORIZED" => Ok(Self::NotAuthorized),
            "NOT_FOUND" => Ok(Self::NotFound),
            "TEMPORARILY_NOT_AVAILABLE" => Ok(Self::TemporarilyNotAvailable),
            "VERSION_NOT_SUPPORTED" => Ok(Self::VersionNotSupported),
            "INTERNAL_RECIPIENT_ERROR" => Ok(Self::InternalRecipientError),
            _ => Err(format!("unknown rejection reason: {}", s)),
        }
    }
}

/// Verified claims about the peer on the other end of an exchange.
///
/// Claims are produced by the transport boundary after the peer's
/// credential has been checked; nothing inside the connector verifies
/// tokens itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Connector identifier the credential was issued to.
    pub issuer_connector: String,
    /// Free-form subject of the credential, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Expiry of the credential, if the verifier knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Claims {
    /// Creates claims for a connector with no subject and no expiry.
    pub fn for_connector(issuer_connector: impl Into<String>) -> Self {
        Self {
            issuer_connector: issuer_connector.into(),
            subject: None,
            expires_at: None,
        }
    }

    /// Returns `true` if the claims are still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expiry| now < expiry)
    }
}
