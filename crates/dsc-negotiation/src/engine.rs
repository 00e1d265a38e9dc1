//! The contract negotiation state machine.
//!
//! Provider side, each transition consumes the previous state:
//!
//! ```text
//! RequestReceived ─validate_rules─▶ RulesValidated ─resolve_targets─▶ TargetsResolved
//!     ─check_offers─▶ TargetsResolved ─build_agreement─▶ AgreementBuilt ─persist─▶ AgreementPersisted
//! ```
//!
//! Any transition may fail with a [`NegotiationError`]; a failed
//! negotiation leaves no rows behind.
//!
//! Consumer side, [`accept_agreement`] compares a received agreement with
//! the request this connector sent and stores it unconfirmed. Either side
//! confirms through [`confirm_agreement`] or [`confirm_received`], the only
//! writers of the confirmation flag.

use chrono::{DateTime, Utc};
use dsc_types::{normalize_uri, uris_equal, ContractAgreement, ContractRequest, Rule};
use rusqlite::Connection;

use crate::error::NegotiationError;
use crate::rules::{bind_offer_rules, rules_by_target, rules_match, validate_rules};
use crate::store::{
    find_agreement, find_artifact_by_remote_id, find_local_artifact, link_artifact_to_agreement,
    mark_confirmed, offers_for_artifact, save_agreement, StoredAgreement, StoredArtifact,
};

/// A contract request as received from `consumer`.
#[derive(Debug, Clone)]
pub struct RequestReceived {
    request: ContractRequest,
    consumer: String,
}

/// A request whose rules are non-empty and all targeted.
#[derive(Debug, Clone)]
pub struct RulesValidated {
    request: ContractRequest,
    consumer: String,
}

/// One locally offered artifact and the requested rules governing it.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub artifact: StoredArtifact,
    pub rules: Vec<Rule>,
}

/// A request narrowed to the artifacts this connector offers.
#[derive(Debug, Clone)]
pub struct TargetsResolved {
    request: ContractRequest,
    consumer: String,
    targets: Vec<ResolvedTarget>,
}

/// An agreement drawn up but not yet stored.
#[derive(Debug, Clone)]
pub struct AgreementBuilt {
    agreement: ContractAgreement,
    artifact_ids: Vec<i64>,
}

/// A stored, unconfirmed agreement linked to its artifacts.
#[derive(Debug, Clone)]
pub struct AgreementPersisted {
    pub agreement_id: i64,
    pub agreement: ContractAgreement,
    pub linked: usize,
}

impl RequestReceived {
    pub fn new(request: ContractRequest, consumer: impl Into<String>) -> Self {
        Self {
            request,
            consumer: consumer.into(),
        }
    }

    pub fn validate_rules(self) -> Result<RulesValidated, NegotiationError> {
        validate_rules(&self.request.rules)?;
        Ok(RulesValidated {
            request: self.request,
            consumer: self.consumer,
        })
    }
}

impl RulesValidated {
    /// Keeps the targets that are artifacts of the local catalog.
    ///
    /// # Errors
    ///
    /// Returns `NegotiationError::NoAffectedResource` if no target is.
    pub fn resolve_targets(self, conn: &Connection) -> Result<TargetsResolved, NegotiationError> {
        let mut targets = Vec::new();
        for (target, rules) in rules_by_target(&self.request.rules) {
            match find_local_artifact(conn, &target)? {
                Some(artifact) => targets.push(ResolvedTarget { artifact, rules }),
                None => tracing::debug!(%target, "ignoring target not offered here"),
            }
        }

        if targets.is_empty() {
            return Err(NegotiationError::NoAffectedResource);
        }
        Ok(TargetsResolved {
            request: self.request,
            consumer: self.consumer,
            targets,
        })
    }
}

impl TargetsResolved {
    pub fn targets(&self) -> &[ResolvedTarget] {
        &self.targets
    }

    /// Checks every target's requested rules against the contract offers
    /// stored for it.
    ///
    /// # Errors
    ///
    /// Returns `NegotiationError::NoOfferAvailable` if a target has no offer
    /// open to the consumer, or `NegotiationError::OfferMismatch` if the
    /// requested rules equal none of the open offers.
    pub fn check_offers(self, conn: &Connection) -> Result<Self, NegotiationError> {
        for target in &self.targets {
            let offers: Vec<_> = offers_for_artifact(conn, target.artifact.id)?
                .into_iter()
                .filter(|offer| offer.is_open_to(&self.consumer))
                .collect();

            if offers.is_empty() {
                return Err(NegotiationError::NoOfferAvailable {
                    target: target.artifact.uri.clone(),
                    consumer: self.consumer.clone(),
                });
            }

            let matched = offers.iter().any(|offer| {
                rules_match(
                    &bind_offer_rules(&offer.rules, &target.artifact.uri),
                    &target.rules,
                )
            });
            if !matched {
                return Err(NegotiationError::OfferMismatch {
                    target: target.artifact.uri.clone(),
                });
            }
        }
        Ok(self)
    }

    /// Draws up the agreement between `provider` and the requesting
    /// consumer. Contract start defaults to `now`.
    pub fn build_agreement(
        self,
        provider: &str,
        agreement_id: String,
        now: DateTime<Utc>,
    ) -> AgreementBuilt {
        let rules = self
            .targets
            .iter()
            .flat_map(|t| t.rules.iter().cloned())
            .collect();
        AgreementBuilt {
            agreement: ContractAgreement {
                id: agreement_id,
                consumer: self.consumer,
                provider: provider.to_string(),
                contract_date: now,
                contract_start: self.request.contract_start.unwrap_or(now),
                contract_end: self.request.contract_end,
                rules,
            },
            artifact_ids: self.targets.iter().map(|t| t.artifact.id).collect(),
        }
    }
}

impl AgreementBuilt {
    pub fn agreement(&self) -> &ContractAgreement {
        &self.agreement
    }

    /// Stores the agreement unconfirmed and links it to its artifacts in
    /// one savepoint.
    pub fn persist(self, conn: &mut Connection) -> Result<AgreementPersisted, NegotiationError> {
        let sp = conn.savepoint()?;
        let agreement_id = save_agreement(&sp, &self.agreement.id, None, &self.agreement)?;
        let mut linked = 0;
        for artifact_id in &self.artifact_ids {
            if link_artifact_to_agreement(&sp, agreement_id, *artifact_id)? {
                linked += 1;
            }
        }
        sp.commit()?;

        tracing::info!(
            agreement = %self.agreement.id,
            consumer = %self.agreement.consumer,
            linked,
            "agreement persisted"
        );
        Ok(AgreementPersisted {
            agreement_id,
            agreement: self.agreement,
            linked,
        })
    }
}

/// Mints an agreement identifier under `provider`.
pub fn mint_agreement_id(provider: &str) -> String {
    format!(
        "{}/agreements/{}",
        normalize_uri(provider),
        uuid::Uuid::new_v4()
    )
}

/// Runs the whole provider-side negotiation for one contract request.
pub fn negotiate(
    conn: &mut Connection,
    request: ContractRequest,
    consumer: &str,
    provider: &str,
    now: DateTime<Utc>,
) -> Result<AgreementPersisted, NegotiationError> {
    RequestReceived::new(request, consumer)
        .validate_rules()?
        .resolve_targets(conn)?
        .check_offers(conn)?
        .build_agreement(provider, mint_agreement_id(provider), now)
        .persist(conn)
}

// ── Consumer side ──

/// Compares an agreement received from a provider with the request this
/// connector sent.
///
/// # Errors
///
/// Returns `NegotiationError::AgreementMismatch` unless the rule sets are
/// equal.
pub fn verify_agreement(
    request: &ContractRequest,
    agreement: &ContractAgreement,
) -> Result<(), NegotiationError> {
    if rules_match(&request.rules, &agreement.rules) {
        Ok(())
    } else {
        tracing::warn!(agreement = %agreement.id, "agreement rules differ from request");
        Err(NegotiationError::AgreementMismatch(agreement.id.clone()))
    }
}

/// Verifies a received agreement and stores it unconfirmed under
/// `local_uri`, keeping the provider's identifier as its remote id.
pub fn accept_agreement(
    conn: &Connection,
    request: &ContractRequest,
    agreement: &ContractAgreement,
    local_uri: &str,
) -> Result<StoredAgreement, NegotiationError> {
    verify_agreement(request, agreement)?;
    save_agreement(conn, local_uri, Some(&agreement.id), agreement)?;
    find_agreement(conn, local_uri)?
        .ok_or_else(|| NegotiationError::AgreementNotFound(local_uri.to_string()))
}

/// Confirms a stored agreement. Returns `true` if this call confirmed it.
pub fn confirm_agreement(conn: &Connection, uri: &str) -> Result<bool, NegotiationError> {
    let stored = find_agreement(conn, uri)?
        .ok_or_else(|| NegotiationError::AgreementNotFound(uri.to_string()))?;
    let confirmed = mark_confirmed(conn, stored.id)?;
    if confirmed {
        tracing::info!(agreement = %stored.uri, "agreement confirmed");
    }
    Ok(confirmed)
}

/// Confirms the agreement a consumer sent back to this provider.
///
/// The received agreement must equal the stored one and `issuer` must be
/// its consumer. Returns the stored agreement and whether this call
/// confirmed it.
pub fn confirm_received(
    conn: &Connection,
    received: &ContractAgreement,
    issuer: &str,
) -> Result<(StoredAgreement, bool), NegotiationError> {
    let stored = find_agreement(conn, &received.id)?
        .ok_or_else(|| NegotiationError::AgreementNotFound(received.id.clone()))?;

    if !uris_equal(&stored.value.consumer, issuer) {
        return Err(NegotiationError::ConsumerMismatch {
            agreement: stored.uri.clone(),
            consumer: stored.value.consumer.clone(),
            issuer: issuer.to_string(),
        });
    }
    if stored.value != *received {
        tracing::warn!(agreement = %stored.uri, "confirmation differs from stored agreement");
        return Err(NegotiationError::AgreementMismatch(stored.uri.clone()));
    }

    let confirmed = confirm_agreement(conn, &stored.uri)?;
    let stored = find_agreement(conn, &stored.uri)?
        .ok_or_else(|| NegotiationError::AgreementNotFound(received.id.clone()))?;
    Ok((stored, confirmed))
}

/// Links the copied artifacts with the given remote identifiers to an
/// agreement. Unknown identifiers are skipped. Returns the number of new
/// links.
pub fn link_remote_artifacts<'a>(
    conn: &mut Connection,
    agreement_id: i64,
    remote_ids: impl IntoIterator<Item = &'a str>,
) -> Result<usize, NegotiationError> {
    let sp = conn.savepoint()?;
    let mut linked = 0;
    for remote_id in remote_ids {
        match find_artifact_by_remote_id(&sp, remote_id)? {
            Some(artifact) => {
                if link_artifact_to_agreement(&sp, agreement_id, artifact.id)? {
                    linked += 1;
                }
            }
            None => tracing::debug!(artifact = %remote_id, "no local copy to link"),
        }
    }
    sp.commit()?;
    Ok(linked)
}
