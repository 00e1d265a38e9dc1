//! Typed message headers.
//!
//! A [`Message`] is the header half of an envelope: the fields every kind
//! shares ([`MessageHeader`]) flattened together with the kind-specific
//! fields ([`MessageFields`]), which also carry the `@type` tag.

use chrono::{DateTime, Utc};
use dsc_types::RejectionReason;
use serde::{Deserialize, Serialize};

use crate::kind::MessageKind;

/// Fields carried by every message regardless of kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    /// Unique identifier of this message.
    #[serde(rename = "@id")]
    pub id: String,
    /// Connector that issued the message.
    pub issuer_connector: String,
    /// Agent on whose behalf the connector acts.
    pub sender_agent: String,
    /// Intended recipients. Empty only on rejections whose request could
    /// not be attributed to anyone.
    #[serde(default)]
    pub recipient_connector: Vec<String>,
    pub issued: DateTime<Utc>,
    /// Information model version the issuer speaks.
    pub model_version: String,
    /// Credential presented by the issuer.
    #[serde(default)]
    pub security_token: String,
    /// Identifier of the request this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_message: Option<String>,
}

impl MessageHeader {
    /// Returns the name of the first mandatory field that is empty.
    pub(crate) fn first_missing_field(&self) -> Option<&'static str> {
        if self.id.trim().is_empty() {
            Some("@id")
        } else if self.issuer_connector.trim().is_empty() {
            Some("issuerConnector")
        } else if self.sender_agent.trim().is_empty() {
            Some("senderAgent")
        } else if self.model_version.trim().is_empty() {
            Some("modelVersion")
        } else if self.security_token.trim().is_empty() {
            Some("securityToken")
        } else {
            None
        }
    }
}

/// Kind-specific header fields, tagged by `@type`.
///
/// Fields a handler needs but a peer may omit are `Option`s so that their
/// absence reaches the handler as a bad-parameters case instead of failing
/// the whole header decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum MessageFields {
    #[serde(rename = "ids:DescriptionRequestMessage", rename_all = "camelCase")]
    DescriptionRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_element: Option<String>,
    },
    #[serde(rename = "ids:DescriptionResponseMessage")]
    DescriptionResponse,
    #[serde(rename = "ids:ArtifactRequestMessage", rename_all = "camelCase")]
    ArtifactRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_artifact: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_contract: Option<String>,
    },
    #[serde(rename = "ids:ArtifactResponseMessage", rename_all = "camelCase")]
    ArtifactResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_contract: Option<String>,
    },
    #[serde(rename = "ids:ContractRequestMessage", rename_all = "camelCase")]
    ContractRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_contract: Option<String>,
    },
    #[serde(rename = "ids:ContractAgreementMessage", rename_all = "camelCase")]
    ContractAgreement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_contract: Option<String>,
    },
    #[serde(rename = "ids:ContractRejectionMessage", rename_all = "camelCase")]
    ContractRejection { rejection_reason: RejectionReason },
    #[serde(rename = "ids:NotificationMessage")]
    Notification,
    #[serde(rename = "ids:LogMessage")]
    Log,
    #[serde(rename = "ids:MessageProcessedNotificationMessage")]
    MessageProcessedNotification,
    #[serde(rename = "ids:RejectionMessage", rename_all = "camelCase")]
    Rejection { rejection_reason: RejectionReason },
    #[serde(rename = "ids:ResourceUpdateMessage", rename_all = "camelCase")]
    ResourceUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        affected_resource: Option<String>,
    },
}

impl MessageFields {
    /// Returns the kind these fields belong to.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::DescriptionRequest { .. } => MessageKind::DescriptionRequest,
            Self::DescriptionResponse => MessageKind::DescriptionResponse,
            Self::ArtifactRequest { .. } => MessageKind::ArtifactRequest,
            Self::ArtifactResponse { .. } => MessageKind::ArtifactResponse,
            Self::ContractRequest { .. } => MessageKind::ContractRequest,
            Self::ContractAgreement { .. } => MessageKind::ContractAgreement,
            Self::ContractRejection { .. } => MessageKind::ContractRejection,
            Self::Notification => MessageKind::Notification,
            Self::Log => MessageKind::Log,
            Self::MessageProcessedNotification => MessageKind::MessageProcessedNotification,
            Self::Rejection { .. } => MessageKind::Rejection,
            Self::ResourceUpdate { .. } => MessageKind::ResourceUpdate,
        }
    }
}

/// A complete message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub header: MessageHeader,
    #[serde(flatten)]
    pub fields: MessageFields,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        self.fields.kind()
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn issuer(&self) -> &str {
        &self.header.issuer_connector
    }

    pub fn correlation_message(&self) -> Option<&str> {
        self.header.correlation_message.as_deref()
    }

    /// Returns the rejection reason for rejection-class messages.
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        match self.fields {
            MessageFields::Rejection { rejection_reason }
            | MessageFields::ContractRejection { rejection_reason } => Some(rejection_reason),
            _ => None,
        }
    }

    /// Returns the transfer contract named by the message, if its kind
    /// carries one.
    pub fn transfer_contract(&self) -> Option<&str> {
        match &self.fields {
            MessageFields::ArtifactRequest {
                transfer_contract, ..
            }
            | MessageFields::ArtifactResponse { transfer_contract }
            | MessageFields::ContractRequest { transfer_contract }
            | MessageFields::ContractAgreement { transfer_contract } => {
                transfer_contract.as_deref()
            }
            _ => None,
        }
    }
}
