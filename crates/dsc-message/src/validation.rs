//! Classification of responses to outbound requests.
//!
//! A caller that sent a request of kind `K` hands the raw response to
//! [`validate`] together with `K`. The outcome is one of:
//!
//! - [`ResponseOutcome::Ok`]: the response has the kind `K` expects;
//! - [`ResponseOutcome::Rejected`]: the peer refused, with its reason and
//!   payload passed through verbatim;
//! - [`ResponseOutcome::Invalid`]: anything else.
//!
//! Rejection is classified before the kind check, so a rejection is never
//! reported as an unexpected kind.

use dsc_types::RejectionReason;
use serde_json::{Map, Value};

use crate::codec::{decode, Envelope};
use crate::kind::MessageKind;

/// What a peer said when it refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Either `Rejection` or `ContractRejection`.
    pub kind: MessageKind,
    pub reason: RejectionReason,
    pub correlation_message: Option<String>,
    /// The rejection payload exactly as received.
    pub payload: Vec<u8>,
}

impl Rejection {
    /// Returns the payload as a JSON object.
    ///
    /// Payloads that are not a JSON object are wrapped as
    /// `{"message": <payload text>}`; an empty payload yields an empty map.
    pub fn payload_map(&self) -> Map<String, Value> {
        if self.payload.is_empty() {
            return Map::new();
        }
        match serde_json::from_slice::<Value>(&self.payload) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = Map::new();
                map.insert(
                    "message".to_string(),
                    Value::String(String::from_utf8_lossy(&self.payload).into_owned()),
                );
                map
            }
        }
    }
}

/// Why a response could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidResponse {
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("expected {expected} but received {actual}")]
    UnexpectedKind {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("{0} does not start an exchange")]
    NotARequest(MessageKind),

    #[error("response correlates to {actual:?}, expected {expected}")]
    Uncorrelated {
        expected: String,
        actual: Option<String>,
    },
}

/// The classification of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The expected response; its payload is `envelope.payload`.
    Ok(Envelope),
    Rejected(Rejection),
    Invalid(InvalidResponse),
}

impl ResponseOutcome {
    /// Downgrades an `Ok` or `Rejected` outcome to `Invalid` unless the
    /// response names `request_id` as its correlation message.
    pub fn correlated_to(self, request_id: &str) -> ResponseOutcome {
        let correlation = match &self {
            ResponseOutcome::Ok(envelope) => envelope.header.correlation_message(),
            ResponseOutcome::Rejected(rejection) => rejection.correlation_message.as_deref(),
            ResponseOutcome::Invalid(_) => return self,
        };
        if correlation == Some(request_id) {
            self
        } else {
            ResponseOutcome::Invalid(InvalidResponse::Uncorrelated {
                expected: request_id.to_string(),
                actual: correlation.map(str::to_string),
            })
        }
    }

    /// Returns the envelope of an `Ok` outcome.
    pub fn ok(self) -> Option<Envelope> {
        match self {
            ResponseOutcome::Ok(envelope) => Some(envelope),
            _ => None,
        }
    }
}

/// Classifies a raw response to a request of kind `expected_request`.
pub fn validate(
    expected_request: MessageKind,
    raw_header: &[u8],
    raw_payload: Option<&[u8]>,
) -> ResponseOutcome {
    match decode(raw_header, raw_payload) {
        Ok(envelope) => validate_envelope(expected_request, envelope),
        Err(e) => ResponseOutcome::Invalid(InvalidResponse::Malformed(e.to_string())),
    }
}

/// Classifies an already decoded response to a request of kind
/// `expected_request`.
pub fn validate_envelope(expected_request: MessageKind, envelope: Envelope) -> ResponseOutcome {
    let actual = envelope.kind();

    if let Some(reason) = envelope.header.rejection_reason() {
        return ResponseOutcome::Rejected(Rejection {
            kind: actual,
            reason,
            correlation_message: envelope.header.header.correlation_message,
            payload: envelope.payload,
        });
    }

    let Some(expected) = expected_request.expected_response() else {
        return ResponseOutcome::Invalid(InvalidResponse::NotARequest(expected_request));
    };

    if actual != expected {
        tracing::debug!(%expected, %actual, "response kind mismatch");
        return ResponseOutcome::Invalid(InvalidResponse::UnexpectedKind { expected, actual });
    }

    ResponseOutcome::Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: &str, extra: &str) -> Vec<u8> {
        format!(
            r#"{{
                "@type": "{kind}",
                "@id": "urn:uuid:response",
                "issuerConnector": "https://provider.example.com",
                "senderAgent": "https://provider.example.com",
                "issued": "2026-03-01T12:00:00Z",
                "modelVersion": "4.2.7",
                "securityToken": "token",
                "correlationMessage": "urn:uuid:request"{extra}
            }}"#
        )
        .into_bytes()
    }

    #[test]
    fn expected_kind_is_ok_with_payload() {
        let outcome = validate(
            MessageKind::DescriptionRequest,
            &raw("ids:DescriptionResponseMessage", ""),
            Some(b"{\"@id\":\"x\"}".as_slice()),
        );
        let envelope = outcome.ok().expect("description response should be ok");
        assert_eq!(envelope.payload, b"{\"@id\":\"x\"}");
    }

    #[test]
    fn rejection_wins_over_kind_mismatch() {
        let outcome = validate(
            MessageKind::ArtifactRequest,
            &raw(
                "ids:RejectionMessage",
                r#", "rejectionReason": "NOT_AUTHORIZED""#,
            ),
            Some(b"policy says no".as_slice()),
        );
        match outcome {
            ResponseOutcome::Rejected(rejection) => {
                assert_eq!(rejection.reason, RejectionReason::NotAuthorized);
                assert_eq!(rejection.payload, b"policy says no");
                assert_eq!(
                    rejection.payload_map()["message"],
                    Value::String("policy says no".to_string())
                );
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn contract_rejection_is_a_rejection() {
        let outcome = validate(
            MessageKind::ContractRequest,
            &raw(
                "ids:ContractRejectionMessage",
                r#", "rejectionReason": "BAD_PARAMETERS""#,
            ),
            Some(br#"{"detail":"rules differ"}"#.as_slice()),
        );
        match outcome {
            ResponseOutcome::Rejected(rejection) => {
                assert_eq!(rejection.kind, MessageKind::ContractRejection);
                assert_eq!(rejection.payload_map()["detail"], "rules differ");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn wrong_kind_is_invalid() {
        let outcome = validate(
            MessageKind::DescriptionRequest,
            &raw("ids:ArtifactResponseMessage", ""),
            None,
        );
        assert_eq!(
            outcome,
            ResponseOutcome::Invalid(InvalidResponse::UnexpectedKind {
                expected: MessageKind::DescriptionResponse,
                actual: MessageKind::ArtifactResponse,
            })
        );
    }

    #[test]
    fn undecodable_header_is_invalid() {
        let outcome = validate(MessageKind::Notification, b"{", None);
        assert!(matches!(
            outcome,
            ResponseOutcome::Invalid(InvalidResponse::Malformed(_))
        ));
    }

    #[test]
    fn correlation_must_match_request() {
        let ok = validate(
            MessageKind::Notification,
            &raw("ids:MessageProcessedNotificationMessage", ""),
            None,
        );
        assert!(matches!(
            ok.clone().correlated_to("urn:uuid:request"),
            ResponseOutcome::Ok(_)
        ));
        assert!(matches!(
            ok.correlated_to("urn:uuid:other"),
            ResponseOutcome::Invalid(InvalidResponse::Uncorrelated { .. })
        ));
    }

    #[test]
    fn empty_rejection_payload_maps_to_empty_object() {
        let rejection = Rejection {
            kind: MessageKind::Rejection,
            reason: RejectionReason::NotFound,
            correlation_message: None,
            payload: Vec::new(),
        };
        assert!(rejection.payload_map().is_empty());
    }
}
