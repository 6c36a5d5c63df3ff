//! SMTP command builder.
//!
//! A command is a verb plus an ordered list of atomic tokens. It is
//! serialized as the tokens joined by single spaces and terminated by CRLF.

mod tag_generator;

pub use tag_generator::{Tag, TagGenerator};

use crate::types::{Address, AuthMechanism};

/// The SMTP verb a command belongs to.
///
/// Replies are interpreted relative to the verb that provoked them, so the
/// SASL continuation line sent during AUTH is also tagged [`Verb::Auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// HELO - legacy greeting
    Helo,
    /// EHLO - extended greeting
    Ehlo,
    /// STARTTLS - upgrade to TLS
    StartTls,
    /// AUTH and its continuation lines
    Auth,
    /// MAIL FROM - start transaction
    Mail,
    /// RCPT TO - add recipient
    Rcpt,
    /// DATA - begin message data
    Data,
    /// BURL - submit by reference
    Burl,
    /// QUIT - close connection
    Quit,
}

impl Verb {
    /// Returns the command keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
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

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: Verb,
    tokens: Vec<String>,
    sensitive: bool,
}

impl Command {
    fn new(verb: Verb, tokens: Vec<String>) -> Self {
        Self {
            verb,
            tokens,
            sensitive: false,
        }
    }

    /// `HELO <hostname>`
    #[must_use]
    pub fn helo(hostname: &str) -> Self {
        Self::new(Verb::Helo, vec!["HELO".into(), hostname.into()])
    }

    /// `EHLO <hostname>`
    #[must_use]
    pub fn ehlo(hostname: &str) -> Self {
        Self::new(Verb::Ehlo, vec!["EHLO".into(), hostname.into()])
    }

    /// `STARTTLS`
    #[must_use]
    pub fn starttls() -> Self {
        Self::new(Verb::StartTls, vec!["STARTTLS".into()])
    }

    /// `AUTH <mechanism>` without an initial response.
    #[must_use]
    pub fn auth(mechanism: AuthMechanism) -> Self {
        Self::new(Verb::Auth, vec!["AUTH".into(), mechanism.as_str().into()])
    }

    /// A bare SASL response line (already base64 encoded).
    ///
    /// The line is marked sensitive and never logged verbatim.
    #[must_use]
    pub fn auth_response(encoded: String) -> Self {
        Self {
            verb: Verb::Auth,
            tokens: vec![encoded],
            sensitive: true,
        }
    }

    /// `MAIL FROM:<address>` with an optional `SIZE=` parameter.
    #[must_use]
    pub fn mail_from(from: &Address, size: Option<usize>) -> Self {
        let mut tokens = vec!["MAIL".into(), format!("FROM:{}", from.to_path())];
        if let Some(size) = size {
            tokens.push(format!("SIZE={size}"));
        }
        Self::new(Verb::Mail, tokens)
    }

    /// `RCPT TO:<address>`
    #[must_use]
    pub fn rcpt_to(to: &Address) -> Self {
        Self::new(Verb::Rcpt, vec!["RCPT".into(), format!("TO:{}", to.to_path())])
    }

    /// `DATA`
    #[must_use]
    pub fn data() -> Self {
        Self::new(Verb::Data, vec!["DATA".into()])
    }

    /// `BURL <url> LAST`
    #[must_use]
    pub fn burl(url: &str) -> Self {
        Self::new(Verb::Burl, vec!["BURL".into(), url.into(), "LAST".into()])
    }

    /// `QUIT`
    #[must_use]
    pub fn quit() -> Self {
        Self::new(Verb::Quit, vec!["QUIT".into()])
    }

    /// Returns the verb.
    #[must_use]
    pub const fn verb(&self) -> Verb {
        self.verb
    }

    /// Returns the tokens.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Serializes the command to bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                buf.push(b' ');
            }
            buf.extend_from_slice(token.as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns a loggable rendering with credentials masked.
    #[must_use]
    pub fn redacted(&self) -> String {
        if self.sensitive {
            "<credentials>".to_string()
        } else {
            self.tokens.join(" ")
        }
    }
}
