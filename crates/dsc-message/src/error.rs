//! Error types for the message layer.

use crate::kind::MessageKind;

/// Errors raised while decoding an inbound envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The header part is missing, not JSON, of an unknown kind, or lacks
    /// a mandatory field.
    #[error("malformed message header: {0}")]
    MalformedHeader(String),
}

/// Errors raised while encoding an outbound envelope.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to serialize message header: {0}")]
    Header(#[from] serde_json::Error),
}

/// Errors raised by outbound message builders.
///
/// Builders only fail on structural grounds; whether a message should be
/// sent at all is decided by the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A structurally required field was empty or absent.
    #[error("missing required field '{field}' for {kind}")]
    MissingField {
        /// The kind of message being built.
        kind: MessageKind,
        /// Wire name of the missing field.
        field: &'static str,
    },
}

/// Errors raised when assembling a route message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// A response was assembled from a header that is not response-class.
    #[error("{0} is not a response message")]
    NotAResponse(MessageKind),
}
