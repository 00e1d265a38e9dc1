//! Error types for contract negotiation and usage checks.

/// Errors raised while negotiating, storing or enforcing an agreement.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// The contract request carried no rules at all.
    #[error("contract request carries no rules")]
    MissingRules,

    /// A rule did not name the artifact it applies to.
    #[error("rule at position {index} names no target")]
    MissingTargetInRule { index: usize },

    /// None of the request's targets is an artifact this connector offers.
    #[error("no rule targets an artifact offered by this connector")]
    NoAffectedResource,

    /// No contract offer for the target is open to the requesting consumer.
    #[error("no contract offer for {target} is open to {consumer}")]
    NoOfferAvailable { target: String, consumer: String },

    /// The requested rules for a target differ from every offer for it.
    #[error("requested rules for {target} match no contract offer")]
    OfferMismatch { target: String },

    /// A received agreement differs from the request or stored agreement
    /// it is compared against.
    #[error("agreement {0} does not match the negotiated contract")]
    AgreementMismatch(String),

    #[error("artifact {0} not found")]
    ArtifactNotFound(String),

    #[error("resource {0} not found")]
    ResourceNotFound(String),

    #[error("agreement {0} not found")]
    AgreementNotFound(String),

    /// The transfer contract does not govern the requested artifact.
    #[error("agreement {agreement} does not cover artifact {artifact}")]
    ArtifactNotCovered { agreement: String, artifact: String },

    #[error("agreement {0} has not been confirmed")]
    NotConfirmed(String),

    /// The agreement has expired or has not started yet.
    #[error("agreement {0} is not in force")]
    NotInForce(String),

    /// The agreement was concluded with a different consumer.
    #[error("agreement {agreement} belongs to {consumer}, not {issuer}")]
    ConsumerMismatch {
        agreement: String,
        consumer: String,
        issuer: String,
    },

    /// A response correlates to no contract request this connector sent.
    #[error("no pending contract request {0}")]
    UnknownRequest(String),

    #[error("negotiation database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("negotiation serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
