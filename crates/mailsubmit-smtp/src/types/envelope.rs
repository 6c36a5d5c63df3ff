//! Submission envelope.

use super::Address;
use crate::error::{Error, Result};

/// What is transmitted after the recipients are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Literal message bytes, sent with `DATA`. Not yet dot-stuffed.
    Data(Vec<u8>),
    /// URL of a message already stored on the server, sent with `BURL`.
    Reference(String),
}

impl Payload {
    /// Size used for progress reporting: byte count for data, 1 for a reference.
    #[must_use]
    pub fn progress_total(&self) -> usize {
        match self {
            Self::Data(data) => data.len(),
            Self::Reference(_) => 1,
        }
    }
}

/// Sender, recipients and payload of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    from: Address,
    to: Vec<Address>,
    payload: Payload,
}

impl Envelope {
    /// Creates an envelope for literal message data.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no recipients.
    pub fn new(from: Address, to: Vec<Address>, data: impl Into<Vec<u8>>) -> Result<Self> {
        Self::with_payload(from, to, Payload::Data(data.into()))
    }

    /// Creates an envelope that submits a stored message by reference.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no recipients or the URL is unusable.
    pub fn by_reference(from: Address, to: Vec<Address>, url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if url.is_empty() || url.chars().any(|c| c.is_whitespace()) {
            return Err(Error::InvalidState(format!("Invalid BURL reference: {url:?}")));
        }
        Self::with_payload(from, to, Payload::Reference(url))
    }

    fn with_payload(from: Address, to: Vec<Address>, payload: Payload) -> Result<Self> {
        if to.is_empty() {
            return Err(Error::InvalidState("Envelope has no recipients".into()));
        }
        Ok(Self { from, to, payload })
    }

    /// Returns the sender.
    #[must_use]
    pub const fn from(&self) -> &Address {
        &self.from
    }

    /// Returns the recipients in submission order.
    #[must_use]
    pub fn to(&self) -> &[Address] {
        &self.to
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }
}
