//! Async submission driver.
//!
//! [`Submission`] owns a transport and pumps bytes between it and the
//! sans-I/O [`Protocol`]. Progress and the outcome are reported as
//! [`SubmissionEvent`]s on an unbounded channel; the password and
//! cancellation flow back in through a [`SubmissionHandle`].
//!
//! # Example
//!
//! ```ignore
//! use mailsubmit_smtp::{Address, Submission, SubmissionConfig, SubmissionEvent};
//!
//! let config = SubmissionConfig::builder("smtp.example.com")
//!     .auth("alice@example.com")
//!     .build();
//! let (submission, mut events) = Submission::new(config);
//! let handle = submission.handle();
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         if let SubmissionEvent::CredentialRequested { .. } = event {
//!             handle.set_credential("app-password");
//!         }
//!     }
//! });
//!
//! submission
//!     .submit(
//!         Address::new("alice@example.com")?,
//!         vec![Address::new("bob@example.com")?],
//!         b"Subject: Hi\r\n\r\nHello Bob\r\n".to_vec(),
//!     )
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::config::SubmissionConfig;
use crate::connection::{Connector, TcpConnector, Transport};
use crate::error::{Error, Result};
use crate::protocol::{Protocol, ProtocolEvent};
use crate::types::{Address, Envelope};

/// Events observed while a submission runs.
///
/// Exactly one of [`SubmissionEvent::Succeeded`] or
/// [`SubmissionEvent::Failed`] is sent, and it is the last event.
#[derive(Debug, Clone)]
pub enum SubmissionEvent {
    /// AUTH is required; answer with [`SubmissionHandle::set_credential`].
    CredentialRequested {
        /// SASL user name.
        user: String,
        /// Server host.
        host: String,
    },
    /// Total progress units (message bytes, or 1 for BURL).
    ProgressTotal(usize),
    /// Progress so far.
    Progress(usize),
    /// The server accepted the message.
    Succeeded,
    /// The submission failed.
    Failed(Error),
}

enum Control {
    Credential(String),
    Cancel,
}

/// Sends the password or a cancellation to a running submission.
#[derive(Debug, Clone)]
pub struct SubmissionHandle {
    control: mpsc::UnboundedSender<Control>,
}

impl SubmissionHandle {
    /// Supplies the password. AUTH resumes if it was waiting for it.
    pub fn set_credential(&self, password: impl Into<String>) {
        if self.control.send(Control::Credential(password.into())).is_err() {
            debug!("submission already finished, credential dropped");
        }
    }

    /// Aborts the submission and closes the connection.
    pub fn cancel(&self) {
        if self.control.send(Control::Cancel).is_err() {
            debug!("submission already finished, cancel ignored");
        }
    }
}

/// One message submission over its own connection.
pub struct Submission<C = TcpConnector> {
    config: SubmissionConfig,
    connector: C,
    credential: Option<String>,
    events: mpsc::UnboundedSender<SubmissionEvent>,
    control: mpsc::UnboundedReceiver<Control>,
    handle: SubmissionHandle,
}

impl Submission {
    /// Creates a submission over real TCP/TLS sockets.
    #[must_use]
    pub fn new(config: SubmissionConfig) -> (Self, mpsc::UnboundedReceiver<SubmissionEvent>) {
        Self::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> Submission<C> {
    /// Creates a submission that opens its connection through `connector`.
    #[must_use]
    pub fn with_connector(
        config: SubmissionConfig,
        connector: C,
    ) -> (Self, mpsc::UnboundedReceiver<SubmissionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control) = mpsc::unbounded_channel();
        let submission = Self {
            config,
            connector,
            credential: None,
            events,
            control,
            handle: SubmissionHandle {
                control: control_tx,
            },
        };
        (submission, events_rx)
    }

    /// Supplies the password up front so no credential is requested.
    #[must_use]
    pub fn with_credential(mut self, password: impl Into<String>) -> Self {
        self.credential = Some(password.into());
        self
    }

    /// Returns a handle for supplying the password or cancelling.
    #[must_use]
    pub fn handle(&self) -> SubmissionHandle {
        self.handle.clone()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    /// Submits literal message bytes with `DATA`.
    ///
    /// # Errors
    ///
    /// Returns the same error that is reported as [`SubmissionEvent::Failed`].
    pub async fn submit(
        self,
        from: Address,
        recipients: Vec<Address>,
        data: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let envelope = Envelope::new(from, recipients, data);
        self.run(envelope).await
    }

    /// Submits a message stored on the server, by URL, with `BURL`.
    ///
    /// # Errors
    ///
    /// Returns the same error that is reported as [`SubmissionEvent::Failed`].
    pub async fn submit_by_reference(
        self,
        from: Address,
        recipients: Vec<Address>,
        url: impl Into<String>,
    ) -> Result<()> {
        let envelope = Envelope::by_reference(from, recipients, url);
        self.run(envelope).await
    }

    async fn run(mut self, envelope: Result<Envelope>) -> Result<()> {
        let mut outcome = Outcome::default();
        let mut protocol = Protocol::new(self.config.clone());
        if let Some(password) = self.credential.take() {
            protocol.set_credential(password);
        }

        let started = envelope.and_then(|envelope| protocol.submit(envelope));
        match started {
            Ok(events) => self.dispatch(events, &mut outcome),
            Err(err) => {
                self.emit(SubmissionEvent::Failed(err.clone()));
                return Err(err);
            }
        }

        self.drive(&mut protocol, &mut outcome).await;
        outcome.finish(&protocol)
    }

    async fn drive(&mut self, protocol: &mut Protocol, outcome: &mut Outcome) {
        let host = self.config.host.clone();
        info!(host = %host, port = self.config.port, security = ?self.config.security, "connecting");

        let connected = {
            let connect = timeout(
                self.config.connect_timeout,
                self.connector
                    .connect(&host, self.config.port, self.config.use_implicit_tls()),
            );
            tokio::pin!(connect);

            loop {
                tokio::select! {
                    result = &mut connect => {
                        break result.map_err(|_| Error::Timeout("connect")).and_then(|r| r);
                    }
                    Some(control) = self.control.recv() => {
                        let events = apply_control(protocol, control);
                        self.dispatch(events, outcome);
                        if protocol.is_finished() {
                            return;
                        }
                    }
                }
            }
        };

        let transport = match connected {
            Ok(transport) => transport,
            Err(err) => {
                let events = protocol.connection_lost(err);
                self.dispatch(events, outcome);
                return;
            }
        };
        debug!(tls = transport.is_tls(), "connected");
        protocol.connected();

        self.exchange(protocol, transport, outcome).await;
    }

    /// Pumps the established connection until the protocol closes.
    async fn exchange(
        &mut self,
        protocol: &mut Protocol,
        mut transport: C::Transport,
        outcome: &mut Outcome,
    ) {
        let io_timeout = self.config.io_timeout;
        let mut buf = Vec::new();

        loop {
            while let Some(transmit) = protocol.poll_transmit() {
                let write = transport.write_all(&transmit.data);
                if let Err(err) = with_timeout(io_timeout, "write", write).await {
                    let events = protocol.connection_lost(err);
                    self.dispatch(events, outcome);
                    break;
                }
            }

            if protocol.is_finished() {
                break;
            }

            if std::mem::take(&mut outcome.upgrade_tls) {
                let upgrade = transport.upgrade_to_tls(&self.config.host);
                match with_timeout(io_timeout, "TLS handshake", upgrade).await {
                    Ok(upgraded) => {
                        transport = upgraded;
                        protocol.tls_established();
                        continue;
                    }
                    Err(err) => {
                        // The plaintext stream was consumed by the handshake.
                        let events = protocol.connection_lost(err);
                        self.dispatch(events, outcome);
                        return;
                    }
                }
            }

            // No deadline while parked on the caller's credential.
            let limit = (!protocol.is_awaiting_credential()).then_some(io_timeout);

            tokio::select! {
                read = read_with_limit(&mut transport, &mut buf, limit) => {
                    let events = match read {
                        Ok(0) => protocol.connection_lost(Error::ConnectionClosed),
                        Ok(_) => {
                            let line = std::mem::take(&mut buf);
                            protocol.handle_line(&line)
                        }
                        Err(err) => protocol.connection_lost(err),
                    };
                    self.dispatch(events, outcome);
                }
                Some(control) = self.control.recv() => {
                    let events = apply_control(protocol, control);
                    self.dispatch(events, outcome);
                }
            }
        }

        if let Err(err) = with_timeout(io_timeout, "shutdown", transport.shutdown()).await {
            trace!(%err, "shutdown failed");
        }
        info!(succeeded = protocol.is_succeeded(), "connection closed");
    }

    fn dispatch(&self, events: Vec<ProtocolEvent>, outcome: &mut Outcome) {
        for event in events {
            let event = match event {
                ProtocolEvent::UpgradeTls => {
                    outcome.upgrade_tls = true;
                    continue;
                }
                ProtocolEvent::CredentialRequested { user, host } => {
                    info!(%user, %host, "credential requested");
                    SubmissionEvent::CredentialRequested { user, host }
                }
                ProtocolEvent::ProgressTotal(n) => SubmissionEvent::ProgressTotal(n),
                ProtocolEvent::Progress(n) => SubmissionEvent::Progress(n),
                ProtocolEvent::Succeeded => SubmissionEvent::Succeeded,
                ProtocolEvent::Failed(err) => {
                    outcome.error = Some(err.clone());
                    SubmissionEvent::Failed(err)
                }
            };
            self.emit(event);
        }
    }

    fn emit(&self, event: SubmissionEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

impl<C> std::fmt::Debug for Submission<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submission")
            .field("config", &self.config)
            .field("has_credential", &self.credential.is_some())
            .finish_non_exhaustive()
    }
}

/// What the driver has learned from protocol events.
#[derive(Debug, Default)]
struct Outcome {
    error: Option<Error>,
    upgrade_tls: bool,
}

impl Outcome {
    fn finish(self, protocol: &Protocol) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None if protocol.is_succeeded() => Ok(()),
            None => Err(Error::ConnectionClosed),
        }
    }
}

fn apply_control(protocol: &mut Protocol, control: Control) -> Vec<ProtocolEvent> {
    match control {
        Control::Credential(password) => {
            protocol.set_credential(password);
            Vec::new()
        }
        Control::Cancel => {
            info!("submission cancelled");
            protocol.cancel()
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(operation))?
}

async fn read_with_limit<T: Transport>(
    transport: &mut T,
    buf: &mut Vec<u8>,
    limit: Option<Duration>,
) -> Result<usize> {
    match limit {
        Some(limit) => with_timeout(limit, "read", transport.read_line(buf)).await,
        None => transport.read_line(buf).await,
    }
}
