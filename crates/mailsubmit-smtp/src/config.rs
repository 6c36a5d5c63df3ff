//! Submission configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Security {
    /// No encryption. **Not recommended for production.**
    None,
    /// Start with plaintext, upgrade with STARTTLS (port 587).
    #[default]
    StartTls,
    /// TLS from the start (port 465).
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::StartTls => 587,
            Self::Implicit => 465,
        }
    }
}

/// Connection and policy parameters for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Whether AUTH must succeed before MAIL FROM.
    pub require_auth: bool,
    /// SASL user name.
    pub user: String,
    /// Name announced in EHLO/HELO.
    pub client_hostname: String,
    /// Connection timeout.
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    /// Read/write timeout.
    #[serde(with = "secs")]
    pub io_timeout: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl SubmissionConfig {
    /// Creates a configuration using STARTTLS on port 587, without auth.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Security::StartTls.default_port(),
            security: Security::StartTls,
            require_auth: false,
            user: String::new(),
            client_hostname: "localhost".to_string(),
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> SubmissionConfigBuilder {
        SubmissionConfigBuilder::new(host)
    }

    /// Returns true if the connection starts with a TLS handshake.
    #[must_use]
    pub const fn use_implicit_tls(&self) -> bool {
        matches!(self.security, Security::Implicit)
    }

    /// Returns true if the plaintext connection must be upgraded.
    #[must_use]
    pub const fn use_start_tls(&self) -> bool {
        matches!(self.security, Security::StartTls)
    }
}

/// Builder for [`SubmissionConfig`].
#[derive(Debug, Clone)]
pub struct SubmissionConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    user: Option<String>,
    client_hostname: Option<String>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl SubmissionConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::StartTls,
            user: None,
            client_hostname: None,
            connect_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(60),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Requires AUTH PLAIN as the given user.
    #[must_use]
    pub fn auth(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the name announced in EHLO/HELO.
    #[must_use]
    pub fn client_hostname(mut self, name: impl Into<String>) -> Self {
        self.client_hostname = Some(name.into());
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> SubmissionConfig {
        SubmissionConfig {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            require_auth: self.user.is_some(),
            user: self.user.unwrap_or_default(),
            client_hostname: self
                .client_hostname
                .unwrap_or_else(|| "localhost".to_string()),
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
    }
}

/// Durations as whole seconds in serialized settings.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
