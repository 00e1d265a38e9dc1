//! Outbound message builders.
//!
//! Each outbound kind has a parameter struct implementing [`BuildMessage`].
//! The shared header fields come from a [`BuildContext`], which bundles
//! the clock, the connector identity and the credential source. Nothing
//! here reads global state, so tests can pin the clock and identity.

use chrono::{DateTime, Utc};
use dsc_types::RejectionReason;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BuildError;
use crate::kind::MessageKind;
use crate::message::{Message, MessageFields, MessageHeader};

/// Source of the `issued` timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Who this connector is.
pub trait IdentityProvider: Send + Sync {
    /// URI identifying this connector; becomes `issuerConnector`.
    fn connector_id(&self) -> &str;
    /// URI of the agent the connector acts for; becomes `senderAgent`.
    fn sender_agent(&self) -> &str;
    /// Information model version emitted in every header.
    fn model_version(&self) -> &str;
}

/// Supplies the credential attached to outbound messages.
pub trait CredentialProvider: Send + Sync {
    /// Returns the current security token, or `None` if none is available.
    fn security_token(&self) -> Option<String>;
}

/// Everything a builder needs besides its own parameters.
#[derive(Clone)]
pub struct BuildContext {
    clock: Arc<dyn Clock>,
    identity: Arc<dyn IdentityProvider>,
    credentials: Arc<dyn CredentialProvider>,
}

impl BuildContext {
    pub fn new(
        clock: Arc<dyn Clock>,
        identity: Arc<dyn IdentityProvider>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            clock,
            identity,
            credentials,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn connector_id(&self) -> &str {
        self.identity.connector_id()
    }

    pub fn model_version(&self) -> &str {
        self.identity.model_version()
    }

    /// Builds a message from its parameters.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::MissingField` if a structurally required field
    /// is empty.
    pub fn build<P: BuildMessage>(&self, params: P) -> Result<Message, BuildError> {
        params.build(self)
    }

    /// Builds a rejection answering `request`, or answering nobody in
    /// particular if the request could not be decoded.
    ///
    /// Never fails: a rejection must always be producible. A missing
    /// credential yields an empty token rather than an error, which the
    /// receiving side decodes as a malformed header.
    pub fn rejection(&self, reason: RejectionReason, request: Option<&Message>) -> Message {
        self.rejection_of_kind(MessageKind::Rejection, reason, request)
    }

    /// Like [`rejection`](Self::rejection) but answers with a contract
    /// rejection, for refusals inside a contract negotiation.
    pub fn contract_rejection(&self, reason: RejectionReason, request: Option<&Message>) -> Message {
        self.rejection_of_kind(MessageKind::ContractRejection, reason, request)
    }

    fn rejection_of_kind(
        &self,
        kind: MessageKind,
        reason: RejectionReason,
        request: Option<&Message>,
    ) -> Message {
        let header = MessageHeader {
            id: new_message_id(),
            issuer_connector: self.identity.connector_id().to_string(),
            sender_agent: self.identity.sender_agent().to_string(),
            recipient_connector: request
                .map(|r| vec![r.issuer().to_string()])
                .unwrap_or_default(),
            issued: self.clock.now(),
            model_version: self.identity.model_version().to_string(),
            security_token: self.credentials.security_token().unwrap_or_default(),
            correlation_message: request.map(|r| r.id().to_string()),
        };
        let fields = match kind {
            MessageKind::ContractRejection => MessageFields::ContractRejection {
                rejection_reason: reason,
            },
            _ => MessageFields::Rejection {
                rejection_reason: reason,
            },
        };
        Message { header, fields }
    }

    /// Assembles the shared header fields, checking identity and
    /// credential completeness.
    fn header(
        &self,
        kind: MessageKind,
        recipient: &str,
        correlation_message: Option<&str>,
    ) -> Result<MessageHeader, BuildError> {
        let recipient = required(kind, "recipientConnector", recipient)?;
        let issuer = required(kind, "issuerConnector", self.identity.connector_id())?;
        let agent = required(kind, "senderAgent", self.identity.sender_agent())?;
        let version = required(kind, "modelVersion", self.identity.model_version())?;
        let token = self
            .credentials
            .security_token()
            .filter(|t| !t.trim().is_empty())
            .ok_or(BuildError::MissingField {
                kind,
                field: "securityToken",
            })?;
        let correlation_message = match correlation_message {
            Some(id) => Some(required(kind, "correlationMessage", id)?),
            None if kind.is_response() && kind != MessageKind::ContractAgreement => {
                return Err(BuildError::MissingField {
                    kind,
                    field: "correlationMessage",
                })
            }
            None => None,
        };

        Ok(MessageHeader {
            id: new_message_id(),
            issuer_connector: issuer,
            sender_agent: agent,
            recipient_connector: vec![recipient],
            issued: self.clock.now(),
            model_version: version,
            security_token: token,
            correlation_message,
        })
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("connector_id", &self.identity.connector_id())
            .field("model_version", &self.identity.model_version())
            .finish_non_exhaustive()
    }
}

fn new_message_id() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

fn required(kind: MessageKind, field: &'static str, value: &str) -> Result<String, BuildError> {
    if value.trim().is_empty() {
        Err(BuildError::MissingField { kind, field })
    } else {
        Ok(value.to_string())
    }
}

fn required_opt(
    kind: MessageKind,
    field: &'static str,
    value: &str,
) -> Result<Option<String>, BuildError> {
    required(kind, field, value).map(Some)
}

/// Parameters for one outbound message kind.
pub trait BuildMessage {
    /// The kind of message these parameters build.
    const KIND: MessageKind;

    /// # Errors
    ///
    /// Returns `BuildError::MissingField` if a required field is empty.
    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError>;
}

/// Asks a peer for its self-description or for one of its elements.
#[derive(Debug, Clone, Default)]
pub struct DescriptionRequestParams {
    pub recipient: String,
    pub requested_element: Option<String>,
}

impl BuildMessage for DescriptionRequestParams {
    const KIND: MessageKind = MessageKind::DescriptionRequest;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        let requested_element = match self.requested_element {
            Some(element) => required_opt(Self::KIND, "requestedElement", &element)?,
            None => None,
        };
        Ok(Message {
            header: ctx.header(Self::KIND, &self.recipient, None)?,
            fields: MessageFields::DescriptionRequest { requested_element },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DescriptionResponseParams {
    pub recipient: String,
    pub correlation_message: String,
}

impl BuildMessage for DescriptionResponseParams {
    const KIND: MessageKind = MessageKind::DescriptionResponse;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(
                Self::KIND,
                &self.recipient,
                Some(&self.correlation_message),
            )?,
            fields: MessageFields::DescriptionResponse,
        })
    }
}

/// Asks a peer for artifact data under an agreed contract.
#[derive(Debug, Clone, Default)]
pub struct ArtifactRequestParams {
    pub recipient: String,
    pub requested_artifact: String,
    pub transfer_contract: String,
}

impl BuildMessage for ArtifactRequestParams {
    const KIND: MessageKind = MessageKind::ArtifactRequest;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(Self::KIND, &self.recipient, None)?,
            fields: MessageFields::ArtifactRequest {
                requested_artifact: required_opt(
                    Self::KIND,
                    "requestedArtifact",
                    &self.requested_artifact,
                )?,
                transfer_contract: required_opt(
                    Self::KIND,
                    "transferContract",
                    &self.transfer_contract,
                )?,
            },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactResponseParams {
    pub recipient: String,
    pub correlation_message: String,
    pub transfer_contract: String,
}

impl BuildMessage for ArtifactResponseParams {
    const KIND: MessageKind = MessageKind::ArtifactResponse;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(
                Self::KIND,
                &self.recipient,
                Some(&self.correlation_message),
            )?,
            fields: MessageFields::ArtifactResponse {
                transfer_contract: required_opt(
                    Self::KIND,
                    "transferContract",
                    &self.transfer_contract,
                )?,
            },
        })
    }
}

/// Opens a negotiation. `transfer_contract` names the contract request
/// carried in the payload.
#[derive(Debug, Clone, Default)]
pub struct ContractRequestParams {
    pub recipient: String,
    pub transfer_contract: String,
}

impl BuildMessage for ContractRequestParams {
    const KIND: MessageKind = MessageKind::ContractRequest;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(Self::KIND, &self.recipient, None)?,
            fields: MessageFields::ContractRequest {
                transfer_contract: required_opt(
                    Self::KIND,
                    "transferContract",
                    &self.transfer_contract,
                )?,
            },
        })
    }
}

/// Sends an agreement: as the provider's answer to a contract request
/// (with a correlation) or as the consumer's confirmation (without).
#[derive(Debug, Clone, Default)]
pub struct ContractAgreementParams {
    pub recipient: String,
    pub correlation_message: Option<String>,
    pub transfer_contract: String,
}

impl BuildMessage for ContractAgreementParams {
    const KIND: MessageKind = MessageKind::ContractAgreement;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(
                Self::KIND,
                &self.recipient,
                self.correlation_message.as_deref(),
            )?,
            fields: MessageFields::ContractAgreement {
                transfer_contract: required_opt(
                    Self::KIND,
                    "transferContract",
                    &self.transfer_contract,
                )?,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct ContractRejectionParams {
    pub recipient: String,
    pub correlation_message: String,
    pub reason: RejectionReason,
}

impl BuildMessage for ContractRejectionParams {
    const KIND: MessageKind = MessageKind::ContractRejection;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(
                Self::KIND,
                &self.recipient,
                Some(&self.correlation_message),
            )?,
            fields: MessageFields::ContractRejection {
                rejection_reason: self.reason,
            },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationParams {
    pub recipient: String,
}

impl BuildMessage for NotificationParams {
    const KIND: MessageKind = MessageKind::Notification;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(Self::KIND, &self.recipient, None)?,
            fields: MessageFields::Notification,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogParams {
    pub recipient: String,
}

impl BuildMessage for LogParams {
    const KIND: MessageKind = MessageKind::Log;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(Self::KIND, &self.recipient, None)?,
            fields: MessageFields::Log,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageProcessedParams {
    pub recipient: String,
    pub correlation_message: String,
}

impl BuildMessage for MessageProcessedParams {
    const KIND: MessageKind = MessageKind::MessageProcessedNotification;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(
                Self::KIND,
                &self.recipient,
                Some(&self.correlation_message),
            )?,
            fields: MessageFields::MessageProcessedNotification,
        })
    }
}

/// Tells a peer that one of its copies of our resources changed.
#[derive(Debug, Clone, Default)]
pub struct ResourceUpdateParams {
    pub recipient: String,
    pub affected_resource: String,
}

impl BuildMessage for ResourceUpdateParams {
    const KIND: MessageKind = MessageKind::ResourceUpdate;

    fn build(self, ctx: &BuildContext) -> Result<Message, BuildError> {
        Ok(Message {
            header: ctx.header(Self::KIND, &self.recipient, None)?,
            fields: MessageFields::ResourceUpdate {
                affected_resource: required_opt(
                    Self::KIND,
                    "affectedResource",
                    &self.affected_resource,
                )?,
            },
        })
    }
}

/// A fixed identity, handy for tests and for connectors configured from a
/// file.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    pub connector_id: String,
    pub sender_agent: String,
    pub model_version: String,
}

impl IdentityProvider for StaticIdentity {
    fn connector_id(&self) -> &str {
        &self.connector_id
    }

    fn sender_agent(&self) -> &str {
        &self.sender_agent
    }

    fn model_version(&self) -> &str {
        &self.model_version
    }
}

/// A credential that never changes.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub Option<String>);

impl CredentialProvider for StaticCredential {
    fn security_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn context(token: Option<&str>) -> BuildContext {
        BuildContext::new(
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 5, 4, 3, 2, 1).unwrap())),
            Arc::new(StaticIdentity {
                connector_id: "https://consumer.example.com".to_string(),
                sender_agent: "https://consumer.example.com/agent".to_string(),
                model_version: "4.2.7".to_string(),
            }),
            Arc::new(StaticCredential(token.map(str::to_string))),
        )
    }

    #[test]
    fn header_fields_come_from_context() {
        let ctx = context(Some("token-1"));
        let message = ctx
            .build(NotificationParams {
                recipient: "https://provider.example.com".to_string(),
            })
            .unwrap();

        assert_eq!(message.kind(), MessageKind::Notification);
        assert_eq!(message.issuer(), "https://consumer.example.com");
        assert_eq!(message.header.sender_agent, "https://consumer.example.com/agent");
        assert_eq!(message.header.security_token, "token-1");
        assert_eq!(message.header.model_version, "4.2.7");
        assert_eq!(
            message.header.issued,
            Utc.with_ymd_and_hms(2026, 5, 4, 3, 2, 1).unwrap()
        );
        assert_eq!(
            message.header.recipient_connector,
            vec!["https://provider.example.com".to_string()]
        );
        assert!(message.id().starts_with("urn:uuid:"));
    }

    #[test]
    fn each_build_mints_a_fresh_id() {
        let ctx = context(Some("token"));
        let params = LogParams {
            recipient: "https://clearing.example.com".to_string(),
        };
        let a = ctx.build(params.clone()).unwrap();
        let b = ctx.build(params).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn missing_recipient_is_a_build_error() {
        let err = context(Some("token"))
            .build(DescriptionRequestParams::default())
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::MissingField {
                kind: MessageKind::DescriptionRequest,
                field: "recipientConnector",
            }
        );
    }

    #[test]
    fn missing_credential_is_a_build_error() {
        let err = context(None)
            .build(NotificationParams {
                recipient: "https://provider.example.com".to_string(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::MissingField {
                field: "securityToken",
                ..
            }
        ));
    }

    #[test]
    fn artifact_request_requires_transfer_contract() {
        let err = context(Some("token"))
            .build(ArtifactRequestParams {
                recipient: "https://provider.example.com".to_string(),
                requested_artifact: "https://provider.example.com/artifacts/1".to_string(),
                transfer_contract: String::new(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::MissingField {
                field: "transferContract",
                ..
            }
        ));
    }

    #[test]
    fn response_requires_correlation() {
        let err = context(Some("token"))
            .build(MessageProcessedParams {
                recipient: "https://provider.example.com".to_string(),
                correlation_message: " ".to_string(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::MissingField {
                field: "correlationMessage",
                ..
            }
        ));
    }

    #[test]
    fn agreement_confirmation_needs_no_correlation() {
        let message = context(Some("token"))
            .build(ContractAgreementParams {
                recipient: "https://provider.example.com".to_string(),
                correlation_message: None,
                transfer_contract: "https://provider.example.com/agreements/1".to_string(),
            })
            .unwrap();
        assert_eq!(message.correlation_message(), None);
        assert_eq!(
            message.transfer_contract(),
            Some("https://provider.example.com/agreements/1")
        );
    }

    #[test]
    fn rejection_is_built_even_without_credential() {
        let ctx = context(None);
        let rejection = ctx.rejection(RejectionReason::MalformedMessage, None);
        assert_eq!(rejection.kind(), MessageKind::Rejection);
        assert_eq!(
            rejection.rejection_reason(),
            Some(RejectionReason::MalformedMessage)
        );
        assert!(rejection.header.recipient_connector.is_empty());
        assert_eq!(rejection.correlation_message(), None);
    }

    #[test]
    fn rejection_answers_the_request_issuer() {
        let provider = BuildContext::new(
            Arc::new(SystemClock),
            Arc::new(StaticIdentity {
                connector_id: "https://provider.example.com".to_string(),
                sender_agent: "https://provider.example.com".to_string(),
                model_version: "4.2.7".to_string(),
            }),
            Arc::new(StaticCredential(Some("p".to_string()))),
        );
        let request = context(Some("token"))
            .build(ContractRequestParams {
                recipient: "https://provider.example.com".to_string(),
                transfer_contract: "urn:uuid:request".to_string(),
            })
            .unwrap();

        let rejection = provider.contract_rejection(RejectionReason::NotFound, Some(&request));
        assert_eq!(rejection.kind(), MessageKind::ContractRejection);
        assert_eq!(rejection.correlation_message(), Some(request.id()));
        assert_eq!(
            rejection.header.recipient_connector,
            vec!["https://consumer.example.com".to_string()]
        );
    }
}
