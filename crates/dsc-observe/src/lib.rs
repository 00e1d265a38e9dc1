//! Exchange event log for the dataspace connector.
//!
//! Outcomes of inter-connector exchanges are recorded in an append-only
//! log: agreements persisted and confirmed, artifacts linked and
//! delivered, exchanges rejected, and resource metadata updated. The log
//! is the connector's default audit record and the source of what is
//! forwarded to a clearing house.
//!
//! # Event domains
//!
//! | Domain | Example events |
//! |--------|---------------|
//! | `NEGOTIATION` | `AGREEMENT_PERSISTED`, `AGREEMENT_CONFIRMED`, `ARTIFACTS_LINKED` |
//! | `TRANSFER` | `ARTIFACT_DELIVERED` |
//! | `EXCHANGE` | `EXCHANGE_REJECTED` |
//! | `METADATA` | `RESOURCE_UPDATED`, `SUBSCRIBERS_NOTIFIED` |
//!
//! # Usage
//!
//! ```rust,ignore
//! use dsc_observe::{emit_event, EventPayload};
//!
//! emit_event(
//!     &conn,
//!     connector_id,
//!     &agreement.id,
//!     &EventPayload::AgreementConfirmed {
//!         agreement: agreement.id.clone(),
//!         consumer: agreement.consumer.clone(),
//!         provider: agreement.provider.clone(),
//!         issuer_connector: Some(claims.issuer_connector.clone()),
//!     },
//! )?;
//! ```

mod error;
mod event;
mod store;

pub use error::ObserveError;
pub use event::{EventDomain, EventPayload, ExchangeEvent, ParseEventDomainError};
pub use store::{emit_event, query_events, EventFilter};
