//! Two-part envelope codec.
//!
//! An envelope travels as two independently parseable parts: a JSON header
//! and an opaque payload. Decoding and encoding are pure; transports hand
//! raw bytes in and take raw bytes out.

use crate::error::{DecodeError, EncodeError};
use crate::kind::MessageKind;
use crate::message::Message;

/// A typed header paired with its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Message,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(header: Message, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Creates an envelope with an empty payload.
    pub fn header_only(header: Message) -> Self {
        Self {
            header,
            payload: Vec::new(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.header.kind()
    }

    /// Returns the payload as UTF-8 text, replacing invalid sequences.
    pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Decodes a raw header and optional raw payload into an [`Envelope`].
///
/// An absent or empty payload decodes to an empty body.
///
/// # Errors
///
/// Returns `DecodeError::MalformedHeader` if the header is empty, is not
/// valid JSON, names an unknown `@type`, or leaves a mandatory field empty.
pub fn decode(raw_header: &[u8], raw_payload: Option<&[u8]>) -> Result<Envelope, DecodeError> {
    if raw_header.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::MalformedHeader("header is empty".to_string()));
    }

    let header: Message = serde_json::from_slice(raw_header)
        .map_err(|e| DecodeError::MalformedHeader(e.to_string()))?;

    if let Some(field) = header.header.first_missing_field() {
        return Err(DecodeError::MalformedHeader(format!(
            "mandatory field '{}' is empty",
            field
        )));
    }

    Ok(Envelope {
        header,
        payload: raw_payload.map(<[u8]>::to_vec).unwrap_or_default(),
    })
}

/// Encodes an envelope into its raw header and raw payload parts.
///
/// # Errors
///
/// Returns `EncodeError::Header` if the header cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<(Vec<u8>, Vec<u8>), EncodeError> {
    let raw_header = serde_json::to_vec(&envelope.header)?;
    Ok((raw_header, envelope.payload.clone()))
}
