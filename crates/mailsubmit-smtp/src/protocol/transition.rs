//! Reply dispatch table.
//!
//! SMTP reply codes only mean something relative to the command that
//! provoked them, so the next action is a function of the pair
//! (last command, reply code). The function is pure; the protocol layer
//! applies its result.

use super::LastCommand;
use crate::error::{Error, RejectedStage};
use crate::types::{Reply, ReplyCode};

/// What to do after a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move on to the given step.
    Advance(Next),
    /// Fold the line into the capability set (EHLO 250).
    FoldCapability,
    /// EHLO was refused; retry the greeting with HELO.
    Retry,
    /// Abort the submission.
    Fail(Failure),
}

/// Steps the protocol can advance to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Issue EHLO.
    Ehlo,
    /// Greeting exchange finished; choose STARTTLS, AUTH or MAIL.
    Negotiated,
    /// Perform the TLS handshake, then greet again.
    TlsHandshake,
    /// Send the SASL credentials.
    Credentials,
    /// Issue MAIL FROM.
    MailFrom,
    /// Sender accepted; issue the first RCPT TO.
    FirstRecipient,
    /// Recipient accepted; issue the next RCPT TO or the payload command.
    NextRecipient,
    /// Transmit the message body.
    Body,
    /// Message accepted; issue QUIT.
    Quit,
    /// Close the connection.
    Close,
}

/// Reason a reply aborts the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The server is refusing service.
    ServiceUnavailable,
    /// STARTTLS was refused.
    TlsUnavailable,
    /// Authentication was rejected.
    AuthRejected,
    /// MAIL FROM was rejected.
    SenderRejected,
    /// RCPT TO was rejected.
    RecipientRejected,
    /// DATA, the body, or BURL was rejected.
    MessageRejected,
    /// The code is not valid for the command.
    Unexpected,
}

impl Failure {
    /// Builds the error reported for this failure.
    #[must_use]
    pub fn into_error(self, last: LastCommand, reply: &Reply, text: String) -> Error {
        let code = reply.code.as_u16();
        match self {
            Self::ServiceUnavailable => Error::ServiceUnavailable { code, text },
            Self::TlsUnavailable => Error::NotSupported(format!("STARTTLS ({code}: {text})")),
            Self::AuthRejected => Error::AuthenticationFailed { code, text },
            Self::SenderRejected => {
                Error::rejected(RejectedStage::Sender, reply.code, reply.enhanced_status, text)
            }
            Self::RecipientRejected => {
                Error::rejected(RejectedStage::Recipient, reply.code, reply.enhanced_status, text)
            }
            Self::MessageRejected => {
                Error::rejected(RejectedStage::Message, reply.code, reply.enhanced_status, text)
            }
            Self::Unexpected => Error::UnexpectedReply {
                command: last.as_str(),
                code,
                text,
            },
        }
    }
}

/// Decides the next action from the last command and the reply code.
///
/// Any pair not listed fails closed with [`Failure::Unexpected`].
#[must_use]
pub const fn transition(last: LastCommand, code: ReplyCode) -> Transition {
    use Transition::{Advance, Fail, FoldCapability, Retry};

    let code = code.as_u16();
    // 421 may answer anything: the server is shutting the channel
    if code == 421 {
        return Fail(Failure::ServiceUnavailable);
    }

    match (last, code) {
        (LastCommand::Init, 220) => Advance(Next::Ehlo),
        (LastCommand::Init, 554) => Fail(Failure::ServiceUnavailable),

        (LastCommand::Ehlo, 250) => FoldCapability,
        (LastCommand::Ehlo, 550 | 502) => Retry,

        (LastCommand::Helo, 250) => Advance(Next::Negotiated),

        (LastCommand::StartTls, 220) => Advance(Next::TlsHandshake),
        (LastCommand::StartTls, 454 | 501) => Fail(Failure::TlsUnavailable),

        (LastCommand::Auth, 334) => Advance(Next::Credentials),
        (LastCommand::Auth, 235) => Advance(Next::MailFrom),
        (LastCommand::Auth, 454 | 500 | 534 | 535 | 538) => Fail(Failure::AuthRejected),

        (LastCommand::Mail, 250) => Advance(Next::FirstRecipient),
        (LastCommand::Mail, 451 | 452 | 455 | 503 | 550 | 552 | 553 | 555) => {
            Fail(Failure::SenderRejected)
        }

        (LastCommand::Rcpt, 250 | 251) => Advance(Next::NextRecipient),
        (LastCommand::Rcpt, 450 | 451 | 452 | 455 | 503 | 550 | 551 | 552 | 553 | 555) => {
            Fail(Failure::RecipientRejected)
        }

        (LastCommand::Data, 354) => Advance(Next::Body),
        (LastCommand::Data | LastCommand::Burl, 250) => Advance(Next::Quit),
        (LastCommand::Data | LastCommand::Burl, 450 | 451 | 452 | 503 | 550 | 552 | 554) => {
            Fail(Failure::MessageRejected)
        }

        (LastCommand::Quit, 220 | 221) => Advance(Next::Close),

        _ => Fail(Failure::Unexpected),
    }
}
