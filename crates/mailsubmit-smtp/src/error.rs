//! Error types for SMTP submission.

use std::io;
use std::sync::Arc;

use crate::types::{EnhancedStatus, ReplyCode};

/// Result type alias for SMTP submission operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Phase of the transaction in which the server rejected the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectedStage {
    /// `MAIL FROM` was refused.
    Sender,
    /// A `RCPT TO` was refused.
    Recipient,
    /// `DATA`, the message body, or `BURL` was refused.
    Message,
}

impl std::fmt::Display for RejectedStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sender => "sender",
            Self::Recipient => "recipient",
            Self::Message => "message",
        })
    }
}

/// SMTP submission error types.
///
/// Cloneable so the same failure can be both reported as an event and
/// returned to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// A connect or read did not complete in time.
    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    /// The server closed the connection before the submission finished.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// The submission was cancelled by the caller.
    #[error("Submission cancelled")]
    Cancelled,

    /// A server line matched neither reply shape.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// The server refused service (554 greeting or 421 at any point).
    #[error("Service unavailable ({code}): {text}")]
    ServiceUnavailable {
        /// Reply code.
        code: u16,
        /// Server text.
        text: String,
    },

    /// Authentication was rejected.
    #[error("Authentication failed ({code}): {text}")]
    AuthenticationFailed {
        /// Reply code.
        code: u16,
        /// Server text.
        text: String,
    },

    /// The server rejected the sender, a recipient, or the message.
    #[error("Server rejected {stage} ({code}): {text}")]
    Rejected {
        /// Transaction phase that failed.
        stage: RejectedStage,
        /// Reply code (e.g., 550).
        code: u16,
        /// RFC 3463 enhanced status, when the server sent one.
        enhanced: Option<EnhancedStatus>,
        /// Server text.
        text: String,
    },

    /// The server sent a reply code that is not valid for the last command.
    #[error("Unexpected reply {code} to {command}: {text}")]
    UnexpectedReply {
        /// Command the reply answered.
        command: &'static str,
        /// Reply code.
        code: u16,
        /// Server text.
        text: String,
    },

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message exceeds the server's advertised SIZE limit.
    #[error("Message of {size} bytes exceeds server limit of {limit} bytes")]
    MessageTooLarge {
        /// Message size in bytes.
        size: usize,
        /// Advertised limit.
        limit: usize,
    },

    /// Feature required by the configuration is not offered by the server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl Error {
    /// Creates a rejection error from a reply code and text.
    #[must_use]
    pub fn rejected(
        stage: RejectedStage,
        code: ReplyCode,
        enhanced: Option<EnhancedStatus>,
        text: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            stage,
            code: code.as_u16(),
            enhanced,
            text: text.into(),
        }
    }

    /// Returns the server reply code carried by this error, if any.
    #[must_use]
    pub const fn reply_code(&self) -> Option<u16> {
        match self {
            Self::ServiceUnavailable { code, .. }
            | Self::AuthenticationFailed { code, .. }
            | Self::Rejected { code, .. }
            | Self::UnexpectedReply { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.reply_code(), Some(code) if code >= 500 && code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.reply_code(), Some(code) if code >= 400 && code < 500)
    }

    /// Returns true if the caller should re-prompt for credentials.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}
