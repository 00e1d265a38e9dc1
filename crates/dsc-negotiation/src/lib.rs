//! Contract negotiation for the dataspace connector.
//!
//! A consumer asks for usage rules on a provider's artifacts with a
//! contract request. The provider checks the rules, narrows them to the
//! artifacts it actually offers, compares them with its contract offers
//! and answers with an agreement, which both sides store unconfirmed and
//! confirm once the other side has acknowledged it. Afterwards an
//! agreement is immutable except for the set of artifacts linked to it,
//! which only grows.
//!
//! The crate also owns the catalog tables the negotiation reads from and
//! the transfer-contract check that gates artifact delivery.

pub mod catalog;
pub mod engine;
mod error;
pub mod rules;
pub mod store;
pub mod usage;

pub use catalog::{
    find_element, offered_catalogs, register_catalog, save_metadata, DescribedElement,
    OfferedArtifact, OfferedCatalog, OfferedResource, SavedResource,
};
pub use engine::{
    accept_agreement, confirm_agreement, confirm_received, link_remote_artifacts,
    mint_agreement_id, negotiate, verify_agreement, AgreementBuilt, AgreementPersisted,
    RequestReceived, ResolvedTarget, RulesValidated, TargetsResolved,
};
pub use error::NegotiationError;
pub use rules::{rules_match, validate_rules, RuleKey};
pub use store::{
    add_subscription, find_agreement, find_agreement_by_remote_id, find_artifact_by_remote_id,
    find_artifact_by_uri, find_local_artifact, find_resource_by_remote_id,
    link_artifact_to_agreement, save_pending_request, subscriptions_for, take_pending_request,
    PendingRequest, StoredAgreement, StoredArtifact, StoredResource, Subscription,
};
pub use usage::{validate_transfer_contract, TransferGrant};
