//! Protocol state types.

use crate::command::Verb;

/// Connection-level state of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolState {
    /// No connection yet.
    #[default]
    Disconnected,
    /// Socket open, server greeting awaited.
    Connecting,
    /// Greeting received; commands are issued one round trip at a time.
    Ready,
    /// A pipelined batch is in flight (PIPELINING negotiated).
    Pipelining,
    /// Terminal: QUIT completed or the submission failed.
    Closed,
}

impl ProtocolState {
    /// Returns true if commands may be exchanged.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Ready | Self::Pipelining)
    }
}

/// The command whose reply is being interpreted.
///
/// `Init` stands for the connection itself, answered by the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LastCommand {
    /// Connection opened; greeting awaited.
    Init,
    /// HELO
    Helo,
    /// EHLO
    Ehlo,
    /// STARTTLS
    StartTls,
    /// AUTH (including its continuation lines)
    Auth,
    /// MAIL FROM
    Mail,
    /// RCPT TO
    Rcpt,
    /// DATA and the message body that follows it
    Data,
    /// BURL
    Burl,
    /// QUIT
    Quit,
}

impl LastCommand {
    /// Returns a display name for error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "greeting",
            Self::Helo => "HELO",
            Self::Ehlo => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth => "AUTH",
            Self::Mail => "MAIL",
            Self::Rcpt => "RCPT",
            Self::Data => "DATA",
            Self::Burl => "BURL",
            Self::Quit => "QUIT",
        }
    }
}

impl From<Verb> for LastCommand {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Helo => Self::Helo,
            Verb::Ehlo => Self::Ehlo,
            Verb::StartTls => Self::StartTls,
            Verb::Auth => Self::Auth,
            Verb::Mail => Self::Mail,
            Verb::Rcpt => Self::Rcpt,
            Verb::Data => Self::Data,
            Verb::Burl => Self::Burl,
            Verb::Quit => Self::Quit,
        }
    }
}
