//! Transfer-contract checks run before an artifact is released.

use chrono::{DateTime, Utc};
use dsc_types::{uris_equal, Rule};
use rusqlite::Connection;

use crate::error::NegotiationError;
use crate::store::{find_agreement, find_local_artifact, StoredAgreement, StoredArtifact};

/// An artifact request that passed the transfer-contract checks.
#[derive(Debug, Clone)]
pub struct TransferGrant {
    pub agreement: StoredAgreement,
    pub artifact: StoredArtifact,
    /// The agreement's rules for the artifact, for the policy decision.
    pub rules: Vec<Rule>,
}

/// Checks that `transfer_contract` entitles `issuer` to `requested_artifact`.
///
/// Checks run in order: the agreement exists, the artifact exists, the
/// agreement is linked to the artifact, it is confirmed, it is in force at
/// `now`, and it was concluded with `issuer`.
pub fn validate_transfer_contract(
    conn: &Connection,
    transfer_contract: &str,
    requested_artifact: &str,
    issuer: &str,
    now: DateTime<Utc>,
) -> Result<TransferGrant, NegotiationError> {
    let agreement = find_agreement(conn, transfer_contract)?
        .ok_or_else(|| NegotiationError::AgreementNotFound(transfer_contract.to_string()))?;

    let artifact = find_local_artifact(conn, requested_artifact)?
        .ok_or_else(|| NegotiationError::ArtifactNotFound(requested_artifact.to_string()))?;

    if !agreement.artifacts.iter().any(|a| uris_equal(a, &artifact.uri)) {
        return Err(NegotiationError::ArtifactNotCovered {
            agreement: agreement.uri,
            artifact: artifact.uri,
        });
    }

    if !agreement.confirmed {
        return Err(NegotiationError::NotConfirmed(agreement.uri));
    }

    if agreement.value.is_expired_at(now) || agreement.value.is_pending_at(now) {
        return Err(NegotiationError::NotInForce(agreement.uri));
    }

    if !uris_equal(&agreement.value.consumer, issuer) {
        return Err(NegotiationError::ConsumerMismatch {
            agreement: agreement.uri,
            consumer: agreement.value.consumer,
            issuer: issuer.to_string(),
        });
    }

    let rules = agreement.value.rules_for(&artifact.uri).cloned().collect();
    Ok(TransferGrant {
        agreement,
        artifact,
        rules,
    })
}
