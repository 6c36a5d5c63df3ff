//! SMTP extension types.

/// SMTP extensions this client understands, as discovered from EHLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade (RFC 3207)
    StartTls,
    /// SIZE - Maximum message size (RFC 1870)
    Size,
    /// PIPELINING - Command pipelining (RFC 2920)
    Pipelining,
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// DSN - Delivery status notifications
    Dsn,
    /// AUTH - Authentication (RFC 4954)
    Auth,
    /// ENHANCEDSTATUSCODES - RFC 3463 codes in replies (RFC 2034)
    EnhancedStatusCodes,
    /// BURL - Submission by reference (RFC 4468)
    Burl,
}

impl Extension {
    /// All known extensions, in bit order.
    pub const ALL: [Self; 8] = [
        Self::StartTls,
        Self::Size,
        Self::Pipelining,
        Self::EightBitMime,
        Self::Dsn,
        Self::Auth,
        Self::EnhancedStatusCodes,
        Self::Burl,
    ];

    /// Matches an EHLO keyword, ignoring case.
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ext| ext.as_str().eq_ignore_ascii_case(keyword))
    }

    /// Returns the EHLO keyword.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartTls => "STARTTLS",
            Self::Size => "SIZE",
            Self::Pipelining => "PIPELINING",
            Self::EightBitMime => "8BITMIME",
            Self::Dsn => "DSN",
            Self::Auth => "AUTH",
            Self::EnhancedStatusCodes => "ENHANCEDSTATUSCODES",
            Self::Burl => "BURL",
        }
    }

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Set of negotiated extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Extensions(u16);

impl Extensions {
    /// Creates an empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Adds an extension.
    pub const fn insert(&mut self, ext: Extension) {
        self.0 |= ext.bit();
    }

    /// Checks membership.
    #[must_use]
    pub const fn contains(self, ext: Extension) -> bool {
        self.0 & ext.bit() != 0
    }

    /// Returns true if no extension is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the members in bit order.
    pub fn iter(self) -> impl Iterator<Item = Extension> {
        Extension::ALL
            .into_iter()
            .filter(move |ext| self.contains(*ext))
    }
}

impl FromIterator<Extension> for Extensions {
    fn from_iter<I: IntoIterator<Item = Extension>>(iter: I) -> Self {
        let mut set = Self::empty();
        for ext in iter {
            set.insert(ext);
        }
        set
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication (RFC 4616)
    Plain,
    /// LOGIN - legacy plaintext
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if s.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// Set of advertised authentication mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct AuthMechanisms(u8);

impl AuthMechanisms {
    /// Creates an empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Adds a mechanism.
    pub const fn insert(&mut self, mechanism: AuthMechanism) {
        self.0 |= mechanism.bit();
    }

    /// Checks membership.
    #[must_use]
    pub const fn contains(self, mechanism: AuthMechanism) -> bool {
        self.0 & mechanism.bit() != 0
    }

    /// Returns true if no mechanism is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<AuthMechanism> for AuthMechanisms {
    fn from_iter<I: IntoIterator<Item = AuthMechanism>>(iter: I) -> Self {
        let mut set = Self::empty();
        for mechanism in iter {
            set.insert(mechanism);
        }
        set
    }
}
