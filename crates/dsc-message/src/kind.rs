//! The closed set of message kinds and how they pair up.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every message kind the connector sends or receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "ids:DescriptionRequestMessage")]
    DescriptionRequest,
    #[serde(rename = "ids:DescriptionResponseMessage")]
    DescriptionResponse,
    #[serde(rename = "ids:ArtifactRequestMessage")]
    ArtifactRequest,
    #[serde(rename = "ids:ArtifactResponseMessage")]
    ArtifactResponse,
    #[serde(rename = "ids:ContractRequestMessage")]
    ContractRequest,
    #[serde(rename = "ids:ContractAgreementMessage")]
    ContractAgreement,
    #[serde(rename = "ids:ContractRejectionMessage")]
    ContractRejection,
    #[serde(rename = "ids:NotificationMessage")]
    Notification,
    #[serde(rename = "ids:LogMessage")]
    Log,
    #[serde(rename = "ids:MessageProcessedNotificationMessage")]
    MessageProcessedNotification,
    #[serde(rename = "ids:RejectionMessage")]
    Rejection,
    #[serde(rename = "ids:ResourceUpdateMessage")]
    ResourceUpdate,
}

impl MessageKind {
    /// All kinds, in declaration order.
    pub const ALL: [MessageKind; 12] = [
        Self::DescriptionRequest,
        Self::DescriptionResponse,
        Self::ArtifactRequest,
        Self::ArtifactResponse,
        Self::ContractRequest,
        Self::ContractAgreement,
        Self::ContractRejection,
        Self::Notification,
        Self::Log,
        Self::MessageProcessedNotification,
        Self::Rejection,
        Self::ResourceUpdate,
    ];

    /// Returns the `@type` label used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DescriptionRequest => "ids:DescriptionRequestMessage",
            Self::DescriptionResponse => "ids:DescriptionResponseMessage",
            Self::ArtifactRequest => "ids:ArtifactRequestMessage",
            Self::ArtifactResponse => "ids:ArtifactResponseMessage",
            Self::ContractRequest => "ids:ContractRequestMessage",
            Self::ContractAgreement => "ids:ContractAgreementMessage",
            Self::ContractRejection => "ids:ContractRejectionMessage",
            Self::Notification => "ids:NotificationMessage",
            Self::Log => "ids:LogMessage",
            Self::MessageProcessedNotification => "ids:MessageProcessedNotificationMessage",
            Self::Rejection => "ids:RejectionMessage",
            Self::ResourceUpdate => "ids:ResourceUpdateMessage",
        }
    }

    /// Returns `true` for kinds that may answer a request.
    ///
    /// A contract agreement is both: it answers a contract request and is
    /// itself sent as a request when the consumer confirms it.
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::DescriptionResponse
                | Self::ArtifactResponse
                | Self::ContractAgreement
                | Self::ContractRejection
                | Self::MessageProcessedNotification
                | Self::Rejection
        )
    }

    /// Returns `true` for the two kinds that signal refusal.
    pub fn is_rejection(self) -> bool {
        matches!(self, Self::Rejection | Self::ContractRejection)
    }

    /// Returns the response kind a successful exchange started with this
    /// kind ends with, or `None` if this kind never starts an exchange.
    pub fn expected_response(self) -> Option<MessageKind> {
        match self {
            Self::DescriptionRequest => Some(Self::DescriptionResponse),
            Self::ArtifactRequest => Some(Self::ArtifactResponse),
            Self::ContractRequest => Some(Self::ContractAgreement),
            Self::ContractAgreement
            | Self::Notification
            | Self::Log
            | Self::ResourceUpdate => Some(Self::MessageProcessedNotification),
            Self::DescriptionResponse
            | Self::ArtifactResponse
            | Self::ContractRejection
            | Self::MessageProcessedNotification
            | Self::Rejection => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown message kind: {}", s))
    }
}
