//! Message layer for the dataspace connector.
//!
//! Every interaction between connectors is an [`Envelope`]: a typed JSON
//! header ([`Message`]) and an opaque payload. This crate owns:
//!
//! - the closed set of [`MessageKind`]s and how requests pair with
//!   responses;
//! - the two-part codec ([`decode`] / [`encode`]);
//! - one builder per outbound kind, fed by a [`BuildContext`] holding the
//!   clock, identity and credential source;
//! - the response validator that turns a raw reply into
//!   [`ResponseOutcome::Ok`], [`ResponseOutcome::Rejected`] or
//!   [`ResponseOutcome::Invalid`];
//! - the route messages handlers consume and produce.
//!
//! Nothing here performs I/O.

pub mod builder;
pub mod codec;
pub mod error;
pub mod kind;
pub mod message;
pub mod route;
pub mod validation;

pub use builder::{
    ArtifactRequestParams, ArtifactResponseParams, BuildContext, BuildMessage, Clock,
    ContractAgreementParams, ContractRejectionParams, ContractRequestParams, CredentialProvider,
    DescriptionRequestParams, DescriptionResponseParams, FixedClock, IdentityProvider, LogParams,
    MessageProcessedParams, NotificationParams, ResourceUpdateParams, StaticCredential,
    StaticIdentity, SystemClock,
};
pub use codec::{decode, encode, Envelope};
pub use error::{BuildError, DecodeError, EncodeError, RouteError};
pub use kind::MessageKind;
pub use message::{Message, MessageFields, MessageHeader};
pub use route::{Request, Response};
pub use validation::{validate, validate_envelope, InvalidResponse, Rejection, ResponseOutcome};
