//! Route messages: what handlers receive and what they return.

use dsc_types::Claims;

use crate::codec::Envelope;
use crate::error::RouteError;
use crate::message::Message;

/// An inbound request paired with the verified claims of its sender.
#[derive(Debug, Clone)]
pub struct Request<B> {
    pub header: Message,
    pub body: B,
    pub claims: Claims,
}

impl<B> Request<B> {
    pub fn new(header: Message, body: B, claims: Claims) -> Self {
        Self {
            header,
            body,
            claims,
        }
    }

    /// Replaces the body, keeping header and claims.
    pub fn map_body<T>(self, f: impl FnOnce(B) -> T) -> Request<T> {
        Request {
            header: self.header,
            body: f(self.body),
            claims: self.claims,
        }
    }
}

/// An outbound response.
///
/// A `Response` can only be built from a response-class header, so a
/// handler cannot accidentally answer with a request kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<B> {
    header: Message,
    body: B,
}

impl<B> Response<B> {
    /// # Errors
    ///
    /// Returns `RouteError::NotAResponse` if the header's kind cannot
    /// answer a request.
    pub fn new(header: Message, body: B) -> Result<Self, RouteError> {
        let kind = header.kind();
        if !kind.is_response() {
            return Err(RouteError::NotAResponse(kind));
        }
        Ok(Self { header, body })
    }

    pub fn header(&self) -> &Message {
        &self.header
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn into_parts(self) -> (Message, B) {
        (self.header, self.body)
    }
}

impl<B: Into<Vec<u8>>> Response<B> {
    pub fn into_envelope(self) -> Envelope {
        Envelope::new(self.header, self.body)
    }
}
