//! EHLO capability negotiation.
//!
//! Each line of a (possibly multi-line) EHLO reply is folded into a
//! [`Capabilities`] value. The first line also carries the server's
//! greeting domain, which never matches a known keyword.

use tracing::trace;

use crate::types::{AuthMechanism, AuthMechanisms, Extension, Extensions, Reply};

/// Server capabilities accumulated from an EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Server domain from the first EHLO line.
    pub hostname: String,
    extensions: Extensions,
    auth_mechanisms: AuthMechanisms,
    size_limit: Option<usize>,
    lines: usize,
    complete: bool,
}

impl Capabilities {
    /// Creates an empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one EHLO reply line.
    ///
    /// Every line is folded as a capability. The first line also supplies
    /// the hostname. Negotiation completes on the final line.
    pub fn fold_reply(&mut self, reply: &Reply) {
        if self.lines == 0 {
            self.hostname = reply
                .text
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
        }
        self.fold_line(&reply.text);
        self.lines += 1;
        if reply.is_final() {
            self.complete = true;
        }
    }

    /// Folds the text of a single capability line.
    ///
    /// Unknown keywords are ignored.
    pub fn fold_line(&mut self, text: &str) {
        let text = text.trim();
        // Some servers still send the pre-RFC 4954 form `AUTH=PLAIN LOGIN`.
        let (keyword, params) = match text.find([' ', '=']) {
            Some(idx) => (&text[..idx], &text[idx + 1..]),
            None => (text, ""),
        };

        let Some(ext) = Extension::from_keyword(keyword) else {
            trace!(keyword, "ignoring unknown capability");
            return;
        };
        self.extensions.insert(ext);

        match ext {
            Extension::Auth => {
                for mechanism in params.split(' ').filter_map(AuthMechanism::parse) {
                    self.auth_mechanisms.insert(mechanism);
                }
            }
            Extension::Size => {
                // SIZE 0 means no fixed limit
                self.size_limit = params.trim().parse().ok().filter(|&n| n > 0);
            }
            _ => {}
        }
    }

    /// Returns true once the final EHLO line has been folded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns the negotiated extensions.
    #[must_use]
    pub const fn extensions(&self) -> Extensions {
        self.extensions
    }

    /// Returns the advertised authentication mechanisms.
    #[must_use]
    pub const fn auth_mechanisms(&self) -> AuthMechanisms {
        self.auth_mechanisms
    }

    /// Checks if the server supports an extension.
    #[must_use]
    pub const fn supports(&self, ext: Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Returns true if AUTH PLAIN can be used.
    #[must_use]
    pub const fn supports_auth_plain(&self) -> bool {
        self.supports(Extension::Auth) && self.auth_mechanisms.contains(AuthMechanism::Plain)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub const fn max_message_size(&self) -> Option<usize> {
        self.size_limit
    }
}
