//! Event domain, payload, and record types for the exchange event log.

use serde::{Deserialize, Serialize};

/// Exchange event domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventDomain {
    /// Agreements persisted, confirmed and linked to artifacts.
    #[serde(rename = "NEGOTIATION")]
    Negotiation,
    /// Artifact data released to a peer.
    #[serde(rename = "TRANSFER")]
    Transfer,
    /// Exchanges answered with a rejection.
    #[serde(rename = "EXCHANGE")]
    Exchange,
    /// Resource metadata accepted from a peer and fanned out to subscribers.
    #[serde(rename = "METADATA")]
    Metadata,
}

impl EventDomain {
    /// Returns the canonical string label for this domain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Negotiation => "NEGOTIATION",
            Self::Transfer => "TRANSFER",
            Self::Exchange => "EXCHANGE",
            Self::Metadata => "METADATA",
        }
    }
}

impl std::fmt::Display for EventDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventDomain {
    type Err = ParseEventDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEGOTIATION" => Ok(Self::Negotiation),
            "TRANSFER" => Ok(Self::Transfer),
            "EXCHANGE" => Ok(Self::Exchange),
            "METADATA" => Ok(Self::Metadata),
            _ => Err(ParseEventDomainError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event domain string.
#[derive(Debug, Clone)]
pub struct ParseEventDomainError(pub String);

impl std::fmt::Display for ParseEventDomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event domain: {}", self.0)
    }
}

impl std::error::Error for ParseEventDomainError {}

/// Structured event payloads, one variant per event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // ── Negotiation domain ───────────────────────────────────────────
    /// An agreement was stored, not yet confirmed.
    AgreementPersisted {
        agreement: String,
        consumer: String,
        provider: String,
    },

    /// Both parties acknowledged an agreement.
    AgreementConfirmed {
        agreement: String,
        consumer: String,
        provider: String,
        /// Connector named by the verified claims of the confirming request;
        /// `None` when this connector confirmed an agreement it negotiated.
        issuer_connector: Option<String>,
    },

    /// Artifacts were linked to a stored agreement.
    ArtifactsLinked { agreement: String, linked: usize },

    // ── Transfer domain ──────────────────────────────────────────────
    ArtifactDelivered {
        artifact: String,
        agreement: String,
        consumer: String,
        byte_size: usize,
    },

    // ── Exchange domain ──────────────────────────────────────────────
    /// An inbound exchange was answered with a rejection. Only the reason
    /// code is recorded, never the internal cause.
    ExchangeRejected {
        message_kind: String,
        reason: String,
        issuer_connector: Option<String>,
    },

    // ── Metadata domain ──────────────────────────────────────────────
    /// Resource metadata sent by a peer was accepted and stored.
    ResourceUpdated {
        resource: String,
        issuer_connector: String,
    },

    SubscribersNotified {
        resource: String,
        delivered: usize,
        failed: usize,
    },
}

impl EventPayload {
    /// Returns the canonical event type string for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgreementPersisted { .. } => "AGREEMENT_PERSISTED",
            Self::AgreementConfirmed { .. } => "AGREEMENT_CONFIRMED",
            Self::ArtifactsLinked { .. } => "ARTIFACTS_LINKED",
            Self::ArtifactDelivered { .. } => "ARTIFACT_DELIVERED",
            Self::ExchangeRejected { .. } => "EXCHANGE_REJECTED",
            Self::ResourceUpdated { .. } => "RESOURCE_UPDATED",
            Self::SubscribersNotified { .. } => "SUBSCRIBERS_NOTIFIED",
        }
    }

    /// Returns the entity type for this payload, used as the `entity_type`
    /// column in the event log.
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::AgreementPersisted { .. }
            | Self::AgreementConfirmed { .. }
            | Self::ArtifactsLinked { .. } => "agreement",
            Self::ArtifactDelivered { .. } => "artifact",
            Self::ExchangeRejected { .. } => "message",
            Self::ResourceUpdated { .. } | Self::SubscribersNotified { .. } => "resource",
        }
    }

    /// Returns the domain for this payload.
    pub fn domain(&self) -> EventDomain {
        match self {
            Self::AgreementPersisted { .. }
            | Self::AgreementConfirmed { .. }
            | Self::ArtifactsLinked { .. } => EventDomain::Negotiation,
            Self::ArtifactDelivered { .. } => EventDomain::Transfer,
            Self::ExchangeRejected { .. } => EventDomain::Exchange,
            Self::ResourceUpdated { .. } | Self::SubscribersNotified { .. } => {
                EventDomain::Metadata
            }
        }
    }
}

/// A single row from the `exchange_event_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeEvent {
    pub id: i64,
    /// The connector that recorded this event.
    pub connector_id: String,
    pub domain: String,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    /// Monotonically increasing sequence number within the connector.
    pub seq: i64,
    /// The structured event payload as a JSON string.
    pub payload_json: String,
    pub occurred_at: String,
}
