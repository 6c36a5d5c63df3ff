//! Sans-I/O SMTP submission state machine.
//!
//! [`Protocol`] drives one submission without touching a socket. The I/O
//! layer feeds it reply lines with [`Protocol::handle_line`], writes
//! whatever [`Protocol::poll_transmit`] returns, and reacts to the
//! [`ProtocolEvent`]s it produces.
//!
//! # Example
//!
//! ```
//! use mailsubmit_smtp::protocol::Protocol;
//! use mailsubmit_smtp::{Address, Envelope, Security, SubmissionConfig};
//!
//! let config = SubmissionConfig::builder("mx.example.com")
//!     .security(Security::None)
//!     .build();
//! let mut protocol = Protocol::new(config);
//!
//! let from = Address::new("alice@example.com").unwrap();
//! let to = vec![Address::new("bob@example.com").unwrap()];
//! let envelope = Envelope::new(from, to, b"Subject: hi\r\n\r\nHello\r\n".to_vec()).unwrap();
//! protocol.submit(envelope).unwrap();
//! protocol.connected();
//!
//! protocol.handle_line(b"220 mx.example.com ESMTP\r\n");
//! let transmit = protocol.poll_transmit().unwrap();
//! assert_eq!(transmit.as_str(), Some("EHLO localhost\r\n"));
//! ```

mod state;
mod transition;
mod transmit;

use std::collections::VecDeque;

use base64::Engine;
use tracing::{debug, info, trace, warn};

pub use state::{LastCommand, ProtocolState};
pub use transition::{Failure, Next, Transition, transition};
pub use transmit::Transmit;

use crate::capability::Capabilities;
use crate::command::{Command, Verb};
use crate::config::SubmissionConfig;
use crate::data::encode_body;
use crate::error::Error;
use crate::parser::parse_line;
use crate::queue::CommandQueue;
use crate::types::{AuthMechanism, Envelope, Extension, Payload, Reply, ReplyCode};

/// Events produced by the protocol state machine.
#[derive(Debug)]
pub enum ProtocolEvent {
    /// AUTH is required and no password is known yet.
    CredentialRequested {
        /// SASL user name.
        user: String,
        /// Server host.
        host: String,
    },
    /// Total amount of progress units for this submission.
    ProgressTotal(usize),
    /// Progress so far.
    Progress(usize),
    /// The server accepted STARTTLS; the transport must be upgraded before
    /// [`Protocol::tls_established`] is called.
    UpgradeTls,
    /// The server accepted the message.
    Succeeded,
    /// The submission failed. No further events follow.
    Failed(Error),
}

/// Sans-I/O SMTP submission state machine.
pub struct Protocol {
    config: SubmissionConfig,
    state: ProtocolState,
    capabilities: Capabilities,
    queue: CommandQueue,
    outbound: VecDeque<Transmit>,
    envelope: Option<Envelope>,
    /// Index of the next recipient to send RCPT for.
    next_recipient: usize,
    /// Text lines of the reply being assembled.
    reply_text: Vec<String>,
    credential: Option<String>,
    credential_requested: bool,
    awaiting_credential: bool,
    credentials_sent: bool,
    authenticated: bool,
    tls_active: bool,
    greeting_pending: bool,
    pipelined: bool,
    succeeded: bool,
}

impl Protocol {
    /// Creates a protocol instance in the disconnected state.
    #[must_use]
    pub fn new(config: SubmissionConfig) -> Self {
        let tls_active = config.use_implicit_tls();
        Self {
            config,
            state: ProtocolState::Disconnected,
            capabilities: Capabilities::new(),
            queue: CommandQueue::new(),
            outbound: VecDeque::new(),
            envelope: None,
            next_recipient: 0,
            reply_text: Vec::new(),
            credential: None,
            credential_requested: false,
            awaiting_credential: false,
            credentials_sent: false,
            authenticated: false,
            tls_active,
            greeting_pending: false,
            pipelined: false,
            succeeded: false,
        }
    }

    /// Returns the current protocol state.
    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    /// Returns the capabilities negotiated so far.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    /// Returns the command the next reply will be interpreted against.
    #[must_use]
    pub fn last_command(&self) -> Option<LastCommand> {
        if self.greeting_pending {
            return Some(LastCommand::Init);
        }
        self.queue.awaiting().map(|f| f.verb.into())
    }

    /// Returns true if the protocol is parked until a credential arrives.
    #[must_use]
    pub const fn is_awaiting_credential(&self) -> bool {
        self.awaiting_credential
    }

    /// Returns true once the submission has succeeded or failed and QUIT
    /// (if any) has been handled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == ProtocolState::Closed
    }

    /// Returns true if the message was accepted.
    #[must_use]
    pub const fn is_succeeded(&self) -> bool {
        self.succeeded
    }

    /// Returns the next data to transmit, if any.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outbound.pop_front()
    }

    /// Begins a submission attempt.
    ///
    /// Emits the progress bounds and, when AUTH is required without a known
    /// password, a credential request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if a submission was already started.
    pub fn submit(&mut self, envelope: Envelope) -> crate::Result<Vec<ProtocolEvent>> {
        if self.envelope.is_some() || self.state != ProtocolState::Disconnected {
            return Err(Error::InvalidState(
                "a submission was already started on this connection".into(),
            ));
        }

        let mut events = vec![
            ProtocolEvent::ProgressTotal(envelope.payload().progress_total()),
            ProtocolEvent::Progress(0),
        ];
        info!(
            host = %self.config.host,
            recipients = envelope.to().len(),
            "starting submission"
        );
        self.envelope = Some(envelope);

        if self.config.require_auth && self.credential.is_none() {
            self.request_credential(&mut events);
        }
        Ok(events)
    }

    /// Marks the transport as connected; the greeting is awaited next.
    pub fn connected(&mut self) {
        if self.state == ProtocolState::Disconnected {
            self.state = ProtocolState::Connecting;
            self.greeting_pending = true;
        }
    }

    /// Supplies the password. Resumes a parked AUTH.
    pub fn set_credential(&mut self, password: impl Into<String>) {
        self.credential = Some(password.into());
        if self.awaiting_credential && !self.is_finished() {
            self.awaiting_credential = false;
            debug!("credential arrived, resuming AUTH");
            self.start_auth();
        }
    }

    /// Reports that the STARTTLS handshake completed.
    ///
    /// All capability state is discarded and EHLO is issued again.
    pub fn tls_established(&mut self) {
        if self.is_finished() {
            return;
        }
        info!("TLS established, renegotiating capabilities");
        self.tls_active = true;
        self.send_ehlo();
    }

    /// Cancels the submission. Only closes; protocol state is not rewound.
    pub fn cancel(&mut self) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        if !self.is_finished() {
            self.fail(Error::Cancelled, false, &mut events);
        }
        events
    }

    /// Reports that the transport closed or failed.
    pub fn connection_lost(&mut self, err: Error) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        if self.is_finished() {
            return events;
        }
        if self.succeeded {
            // Message already accepted; a dropped QUIT does not matter.
            debug!("connection closed after acceptance");
            self.state = ProtocolState::Closed;
        } else {
            self.fail(err, false, &mut events);
        }
        events
    }

    /// Feeds one reply line into the protocol.
    pub fn handle_line(&mut self, line: &[u8]) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        if self.is_finished() {
            trace!("ignoring input after close");
            return events;
        }

        match parse_line(line) {
            Ok(reply) => {
                debug!("S: {reply}");
                self.handle_reply(reply, &mut events);
            }
            Err(err) => {
                warn!(%err, "unparseable server reply");
                self.fail(err, true, &mut events);
            }
        }
        events
    }

    fn handle_reply(&mut self, reply: Reply, events: &mut Vec<ProtocolEvent>) {
        let Some(last) = self.last_command() else {
            let err = Error::UnexpectedReply {
                command: "none",
                code: reply.code.as_u16(),
                text: reply.text,
            };
            self.fail(err, true, events);
            return;
        };

        let step = transition(last, reply.code);

        if reply.is_multiline {
            if step == Transition::FoldCapability {
                self.capabilities.fold_reply(&reply);
            } else {
                self.reply_text.push(reply.text);
            }
            return;
        }

        // Final line: the reply is complete.
        let mut lines = std::mem::take(&mut self.reply_text);
        lines.push(reply.text.clone());
        let text = lines.join("\n");

        if last == LastCommand::Init {
            self.greeting_pending = false;
        } else if !reply.code.is_intermediate() {
            self.queue.acknowledge();
            if self.state == ProtocolState::Pipelining && self.queue.in_flight_len() == 0 {
                self.state = ProtocolState::Ready;
            }
        }

        match step {
            Transition::FoldCapability => {
                self.capabilities.fold_reply(&reply);
                self.negotiated(events);
            }
            Transition::Retry => {
                info!(code = %reply.code, "EHLO refused, falling back to HELO");
                self.capabilities = Capabilities::new();
                self.send(Command::helo(&self.config.client_hostname));
            }
            Transition::Advance(next) => self.advance(next, events),
            Transition::Fail(failure) => {
                if last == LastCommand::Quit && self.succeeded {
                    warn!(code = %reply.code, "unexpected reply to QUIT after acceptance");
                    self.close();
                    return;
                }
                // 421 means the server is already closing the channel
                let send_quit = reply.code != ReplyCode::SERVICE_UNAVAILABLE;
                let err = failure.into_error(last, &reply, text);
                self.fail(err, send_quit, events);
            }
        }
    }

    fn advance(&mut self, next: Next, events: &mut Vec<ProtocolEvent>) {
        match next {
            Next::Ehlo => {
                self.state = ProtocolState::Ready;
                self.send_ehlo();
            }
            Next::Negotiated => self.negotiated(events),
            Next::TlsHandshake => events.push(ProtocolEvent::UpgradeTls),
            Next::Credentials => self.send_credentials(events),
            Next::MailFrom => {
                info!("authenticated");
                self.authenticated = true;
                self.start_transaction(events);
            }
            Next::FirstRecipient | Next::NextRecipient => {
                if !self.pipelined {
                    self.send_next_recipient();
                }
            }
            Next::Body => self.send_body(events),
            Next::Quit => {
                info!("message accepted");
                self.succeeded = true;
                if let Some(Payload::Reference(_)) = self.envelope.as_ref().map(Envelope::payload) {
                    events.push(ProtocolEvent::Progress(1));
                }
                events.push(ProtocolEvent::Succeeded);
                self.send(Command::quit());
            }
            Next::Close => self.close(),
        }
    }

    /// Greeting exchange is complete: STARTTLS, then AUTH, then MAIL.
    fn negotiated(&mut self, events: &mut Vec<ProtocolEvent>) {
        if self.config.use_start_tls() && !self.tls_active {
            if self.capabilities.supports(Extension::StartTls) {
                self.send(Command::starttls());
            } else {
                self.fail(Error::NotSupported("STARTTLS".into()), true, events);
            }
            return;
        }

        if self.config.require_auth && !self.authenticated {
            if !self.capabilities.supports_auth_plain() {
                self.fail(Error::NotSupported("AUTH PLAIN".into()), true, events);
                return;
            }
            if self.credential.is_none() {
                debug!("AUTH pending until a credential is supplied");
                self.awaiting_credential = true;
                if !self.credential_requested {
                    self.request_credential(events);
                }
                return;
            }
            self.start_auth();
            return;
        }

        self.start_transaction(events);
    }

    fn request_credential(&mut self, events: &mut Vec<ProtocolEvent>) {
        self.credential_requested = true;
        events.push(ProtocolEvent::CredentialRequested {
            user: self.config.user.clone(),
            host: self.config.host.clone(),
        });
    }

    fn start_auth(&mut self) {
        self.credentials_sent = false;
        self.send(Command::auth(AuthMechanism::Plain));
    }

    fn send_credentials(&mut self, events: &mut Vec<ProtocolEvent>) {
        if self.credentials_sent {
            let err = Error::AuthenticationFailed {
                code: 334,
                text: "server requested further authentication data".into(),
            };
            self.fail(err, true, events);
            return;
        }
        let Some(password) = &self.credential else {
            self.fail(Error::InvalidState("no credential for AUTH".into()), true, events);
            return;
        };

        let plain = format!("\0{}\0{password}", self.config.user);
        let encoded = base64::engine::general_purpose::STANDARD.encode(plain.as_bytes());
        let command = Command::auth_response(encoded);
        debug!("C: {}", command.redacted());
        self.outbound.push_back(Transmit::raw(command.serialize()));
        self.credentials_sent = true;
    }

    fn start_transaction(&mut self, events: &mut Vec<ProtocolEvent>) {
        let Some(envelope) = self.envelope.clone() else {
            self.fail(Error::InvalidState("no envelope to submit".into()), true, events);
            return;
        };

        let size = match envelope.payload() {
            Payload::Data(data) => {
                if let Some(limit) = self.capabilities.max_message_size() {
                    if data.len() > limit {
                        let err = Error::MessageTooLarge {
                            size: data.len(),
                            limit,
                        };
                        self.fail(err, true, events);
                        return;
                    }
                }
                self.capabilities
                    .supports(Extension::Size)
                    .then_some(data.len())
            }
            Payload::Reference(_) => {
                if !self.capabilities.supports(Extension::Burl) {
                    self.fail(Error::NotSupported("BURL".into()), true, events);
                    return;
                }
                None
            }
        };

        self.queue.enqueue(Command::mail_from(envelope.from(), size));

        if self.capabilities.supports(Extension::Pipelining) {
            self.pipelined = true;
            for rcpt in envelope.to() {
                self.queue.enqueue(Command::rcpt_to(rcpt));
            }
            self.next_recipient = envelope.to().len();
            self.queue.enqueue(payload_command(envelope.payload()));
            if let Some(batch) = self.queue.drain_all() {
                debug!(commands = batch.tags.len(), "pipelining transaction");
                self.outbound.push_back(batch);
            }
            self.state = ProtocolState::Pipelining;
        } else {
            self.flush_one();
        }
    }

    fn send_next_recipient(&mut self) {
        let Some(envelope) = &self.envelope else {
            return;
        };
        let command = envelope.to().get(self.next_recipient).map_or_else(
            || payload_command(envelope.payload()),
            Command::rcpt_to,
        );
        if command.verb() == Verb::Rcpt {
            self.next_recipient += 1;
        }
        self.send(command);
    }

    fn send_body(&mut self, events: &mut Vec<ProtocolEvent>) {
        let Some(Payload::Data(data)) = self.envelope.as_ref().map(Envelope::payload) else {
            self.fail(Error::InvalidState("DATA without message data".into()), true, events);
            return;
        };
        let total = data.len();
        let wire = encode_body(data);
        debug!("C: <{} bytes of message data>", wire.len());
        self.outbound.push_back(Transmit::raw(wire));
        events.push(ProtocolEvent::Progress(total));
    }

    fn send_ehlo(&mut self) {
        self.capabilities = Capabilities::new();
        self.send(Command::ehlo(&self.config.client_hostname));
    }

    /// Enqueues a command and sends it immediately.
    fn send(&mut self, command: Command) {
        self.queue.enqueue(command);
        self.flush_one();
    }

    fn flush_one(&mut self) {
        if let Some(transmit) = self.queue.drain() {
            self.outbound.push_back(transmit);
        }
    }

    fn close(&mut self) {
        debug!("closing submission");
        self.queue.clear();
        self.state = ProtocolState::Closed;
    }

    fn fail(&mut self, err: Error, send_quit: bool, events: &mut Vec<ProtocolEvent>) {
        warn!(%err, "submission failed");
        self.awaiting_credential = false;
        let open = self.state.is_open() || self.state == ProtocolState::Connecting;
        // A pipelined DATA may still get 354, and QUIT would land in the body
        let data_pending = self.queue.is_in_flight(Verb::Data);
        self.queue.clear();
        if send_quit && open && !data_pending {
            let quit = Command::quit();
            debug!("C: {}", quit.redacted());
            self.outbound.push_back(Transmit::raw(quit.serialize()));
        }
        self.state = ProtocolState::Closed;
        events.push(ProtocolEvent::Failed(err));
    }
}

fn payload_command(payload: &Payload) -> Command {
    match payload {
        Payload::Data(_) => Command::data(),
        Payload::Reference(url) => Command::burl(url),
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("state", &self.state)
            .field("last_command", &self.last_command())
            .field("capabilities", &self.capabilities)
            .field("queued", &self.queue.queued_len())
            .field("in_flight", &self.queue.in_flight_len())
            .field("outbound_count", &self.outbound.len())
            .field("tls_active", &self.tls_active)
            .field("has_credential", &self.credential.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::config::Security;
    use crate::types::Address;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn plain_config() -> SubmissionConfig {
        SubmissionConfig::builder("mx.example.com")
            .security(Security::None)
            .build()
    }

    fn auth_config() -> SubmissionConfig {
        SubmissionConfig::builder("mx.example.com")
            .security(Security::None)
            .auth("alice@example.com")
            .build()
    }

    fn envelope(recipients: &[&str], body: &[u8]) -> Envelope {
        Envelope::new(
            addr("alice@example.com"),
            recipients.iter().map(|r| addr(r)).collect(),
            body.to_vec(),
        )
        .unwrap()
    }

    /// Starts a submission and consumes the greeting.
    fn started(config: SubmissionConfig, envelope: Envelope) -> Protocol {
        let mut protocol = Protocol::new(config);
        protocol.submit(envelope).unwrap();
        protocol.connected();
        protocol.handle_line(b"220 mx.example.com ESMTP\r\n");
        protocol
    }

    /// Feeds a block of reply lines, collecting every event.
    fn feed(protocol: &mut Protocol, input: &str) -> Vec<ProtocolEvent> {
        input
            .split_inclusive('\n')
            .flat_map(|line| protocol.handle_line(line.as_bytes()))
            .collect()
    }

    /// Drains everything waiting to be written.
    fn sent(protocol: &mut Protocol) -> String {
        let mut out = String::new();
        while let Some(transmit) = protocol.poll_transmit() {
            out.push_str(&String::from_utf8_lossy(&transmit.data));
        }
        out
    }

    fn failure(events: &[ProtocolEvent]) -> Option<&Error> {
        events.iter().find_map(|e| match e {
            ProtocolEvent::Failed(err) => Some(err),
            _ => None,
        })
    }

    #[test]
    fn test_protocol_new() {
        let protocol = Protocol::new(plain_config());
        assert_eq!(protocol.state(), ProtocolState::Disconnected);
        assert!(!protocol.capabilities().is_complete());
        assert_eq!(protocol.last_command(), None);
    }

    #[test]
    fn test_submit_emits_progress_bounds() {
        let mut protocol = Protocol::new(plain_config());
        let events = protocol.submit(envelope(&["bob@example.com"], b"hello\r\n")).unwrap();
        assert!(matches!(events[0], ProtocolEvent::ProgressTotal(7)));
        assert!(matches!(events[1], ProtocolEvent::Progress(0)));
        assert_eq!(events.len(), 2);

        let again = protocol.submit(envelope(&["bob@example.com"], b"x"));
        assert!(matches!(again, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_greeting_sends_ehlo() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        assert_eq!(sent(&mut protocol), "EHLO localhost\r\n");
        assert_eq!(protocol.state(), ProtocolState::Ready);
        assert_eq!(protocol.last_command(), Some(LastCommand::Ehlo));
    }

    #[test]
    fn test_greeting_rejected() {
        let mut protocol = Protocol::new(plain_config());
        protocol.submit(envelope(&["bob@example.com"], b"x")).unwrap();
        protocol.connected();
        let events = protocol.handle_line(b"554 No service for you\r\n");
        assert!(matches!(
            failure(&events),
            Some(Error::ServiceUnavailable { code: 554, .. })
        ));
        assert_eq!(sent(&mut protocol), "QUIT\r\n");
        assert!(protocol.is_finished());
    }

    #[test]
    fn test_ehlo_capabilities_lead_to_auth() {
        let mut protocol = started(auth_config(), envelope(&["bob@example.com"], b"x\r\n"));
        protocol.set_credential("secret");
        sent(&mut protocol);

        let events = feed(
            &mut protocol,
            "250-PIPELINING\r\n250-AUTH PLAIN LOGIN\r\n250 8BITMIME\r\n",
        );
        assert!(events.is_empty());

        let caps = protocol.capabilities();
        assert!(caps.supports(Extension::Pipelining));
        assert!(caps.supports(Extension::Auth));
        assert!(caps.supports(Extension::EightBitMime));
        assert!(caps.auth_mechanisms().contains(AuthMechanism::Plain));
        assert!(caps.auth_mechanisms().contains(AuthMechanism::Login));
        assert_eq!(sent(&mut protocol), "AUTH PLAIN\r\n");
    }

    #[test]
    fn test_auth_plain_exchange() {
        let mut protocol = started(auth_config(), envelope(&["bob@example.com"], b"x\r\n"));
        protocol.set_credential("secret");
        feed(&mut protocol, "250-mx.example.com\r\n250 AUTH PLAIN\r\n");
        assert_eq!(sent(&mut protocol), "EHLO localhost\r\nAUTH PLAIN\r\n");

        protocol.handle_line(b"334 \r\n");
        assert_eq!(sent(&mut protocol), "AGFsaWNlQGV4YW1wbGUuY29tAHNlY3JldA==\r\n");
        assert_eq!(protocol.last_command(), Some(LastCommand::Auth));

        protocol.handle_line(b"235 2.7.0 Authentication successful\r\n");
        assert_eq!(sent(&mut protocol), "MAIL FROM:<alice@example.com>\r\n");
    }

    #[test]
    fn test_auth_rejected() {
        let mut protocol = started(auth_config(), envelope(&["bob@example.com"], b"x\r\n"));
        protocol.set_credential("wrong");
        feed(&mut protocol, "250-mx.example.com\r\n250 AUTH PLAIN\r\n");
        protocol.handle_line(b"334 \r\n");
        sent(&mut protocol);

        let events = protocol.handle_line(b"535 5.7.8 Authentication credentials invalid\r\n");
        let err = failure(&events).unwrap();
        assert!(err.is_auth());
        assert_eq!(sent(&mut protocol), "QUIT\r\n");
    }

    #[test]
    fn test_second_challenge_fails() {
        let mut protocol = started(auth_config(), envelope(&["bob@example.com"], b"x\r\n"));
        protocol.set_credential("secret");
        feed(&mut protocol, "250-mx.example.com\r\n250 AUTH PLAIN\r\n");
        protocol.handle_line(b"334 \r\n");
        let events = protocol.handle_line(b"334 \r\n");
        assert!(matches!(
            failure(&events),
            Some(Error::AuthenticationFailed { code: 334, .. })
        ));
    }

    #[test]
    fn test_auth_without_plain_is_not_supported() {
        let mut protocol = started(auth_config(), envelope(&["bob@example.com"], b"x\r\n"));
        protocol.set_credential("secret");
        let events = feed(&mut protocol, "250-mx.example.com\r\n250 AUTH LOGIN\r\n");
        assert!(matches!(failure(&events), Some(Error::NotSupported(_))));
    }

    #[test]
    fn test_credential_parking() {
        let mut protocol = Protocol::new(auth_config());
        let events = protocol.submit(envelope(&["bob@example.com"], b"x\r\n")).unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ProtocolEvent::CredentialRequested { user, host }
                if user == "alice@example.com" && host == "mx.example.com"
        )));

        protocol.connected();
        protocol.handle_line(b"220 mx.example.com ESMTP\r\n");
        let events = feed(&mut protocol, "250-mx.example.com\r\n250 AUTH PLAIN\r\n");
        // Already requested at submit time.
        assert!(events.is_empty());
        assert_eq!(sent(&mut protocol), "EHLO localhost\r\n");
        assert!(protocol.is_awaiting_credential());

        protocol.set_credential("secret");
        assert!(!protocol.is_awaiting_credential());
        assert_eq!(sent(&mut protocol), "AUTH PLAIN\r\n");
    }

    #[test]
    fn test_recipients_in_order_then_data() {
        let body = b"Subject: hi\r\n\r\n.leading dot\r\n";
        let mut protocol = started(
            plain_config(),
            envelope(&["bob@example.com", "carol@example.com"], body),
        );
        feed(&mut protocol, "250 mx.example.com\r\n");
        assert_eq!(
            sent(&mut protocol),
            "EHLO localhost\r\nMAIL FROM:<alice@example.com>\r\n"
        );

        protocol.handle_line(b"250 2.1.0 Sender OK\r\n");
        assert_eq!(sent(&mut protocol), "RCPT TO:<bob@example.com>\r\n");

        protocol.handle_line(b"251 2.1.5 Will forward\r\n");
        assert_eq!(sent(&mut protocol), "RCPT TO:<carol@example.com>\r\n");

        protocol.handle_line(b"250 2.1.5 Recipient OK\r\n");
        assert_eq!(sent(&mut protocol), "DATA\r\n");

        let events = protocol.handle_line(b"354 Start mail input\r\n");
        assert!(matches!(events[..], [ProtocolEvent::Progress(n)] if n == body.len()));
        assert_eq!(
            sent(&mut protocol),
            "Subject: hi\r\n\r\n..leading dot\r\n.\r\n"
        );

        let events = protocol.handle_line(b"250 2.0.0 Queued as 12345\r\n");
        assert!(matches!(events[..], [ProtocolEvent::Succeeded]));
        assert!(protocol.is_succeeded());
        assert_eq!(sent(&mut protocol), "QUIT\r\n");

        protocol.handle_line(b"221 2.0.0 Bye\r\n");
        assert!(protocol.is_finished());
    }

    #[test]
    fn test_sender_rejected_sends_no_recipients() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        feed(&mut protocol, "250 mx.example.com\r\n");
        sent(&mut protocol);

        let events = protocol.handle_line(b"552 5.3.4 Message size exceeds limit\r\n");
        match failure(&events) {
            Some(Error::Rejected {
                stage,
                code,
                enhanced,
                ..
            }) => {
                assert_eq!(*stage, crate::error::RejectedStage::Sender);
                assert_eq!(*code, 552);
                assert_eq!(enhanced.map(|e| e.to_string()).as_deref(), Some("5.3.4"));
            }
            other => panic!("expected sender rejection, got {other:?}"),
        }
        let out = sent(&mut protocol);
        assert!(!out.contains("RCPT"));
        assert_eq!(out, "QUIT\r\n");

        // Nothing more happens once closed.
        assert!(protocol.handle_line(b"250 OK\r\n").is_empty());
    }

    #[test]
    fn test_recipient_rejected() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        feed(&mut protocol, "250 mx.example.com\r\n250 OK\r\n");
        let events = protocol.handle_line(b"550 5.1.1 No such user\r\n");
        assert!(matches!(
            failure(&events),
            Some(Error::Rejected {
                stage: crate::error::RejectedStage::Recipient,
                code: 550,
                ..
            })
        ));
    }

    #[test]
    fn test_multiline_rejection_text_is_joined() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        feed(&mut protocol, "250 mx.example.com\r\n");
        let events = feed(&mut protocol, "550-first line\r\n550 second line\r\n");
        match failure(&events) {
            Some(Error::Rejected { text, .. }) => assert_eq!(text, "first line\nsecond line"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_starttls_renegotiates() {
        let config = SubmissionConfig::builder("mx.example.com").build();
        let mut protocol = started(config, envelope(&["bob@example.com"], b"x\r\n"));
        feed(
            &mut protocol,
            "250-mx.example.com\r\n250-STARTTLS\r\n250 PIPELINING\r\n",
        );
        assert_eq!(sent(&mut protocol), "EHLO localhost\r\nSTARTTLS\r\n");

        let events = protocol.handle_line(b"220 2.0.0 Ready to start TLS\r\n");
        assert!(matches!(events[..], [ProtocolEvent::UpgradeTls]));
        assert!(sent(&mut protocol).is_empty());

        protocol.tls_established();
        assert!(!protocol.capabilities().is_complete());
        assert!(!protocol.capabilities().supports(Extension::Pipelining));
        assert_eq!(sent(&mut protocol), "EHLO localhost\r\n");

        feed(&mut protocol, "250-mx.example.com\r\n250 AUTH PLAIN\r\n");
        assert_eq!(sent(&mut protocol), "MAIL FROM:<alice@example.com>\r\n");
    }

    #[test]
    fn test_starttls_missing_does_not_downgrade() {
        let config = SubmissionConfig::builder("mx.example.com").build();
        let mut protocol = started(config, envelope(&["bob@example.com"], b"x\r\n"));
        let events = feed(&mut protocol, "250-mx.example.com\r\n250 8BITMIME\r\n");
        assert!(matches!(failure(&events), Some(Error::NotSupported(_))));
        assert_eq!(sent(&mut protocol), "EHLO localhost\r\nQUIT\r\n");
    }

    #[test]
    fn test_implicit_tls_skips_starttls() {
        let config = SubmissionConfig::builder("mx.example.com")
            .security(Security::Implicit)
            .build();
        let mut protocol = started(config, envelope(&["bob@example.com"], b"x\r\n"));
        feed(&mut protocol, "250-mx.example.com\r\n250 STARTTLS\r\n");
        assert_eq!(
            sent(&mut protocol),
            "EHLO localhost\r\nMAIL FROM:<alice@example.com>\r\n"
        );
    }

    #[test]
    fn test_pipelined_transaction() {
        let mut protocol = started(
            plain_config(),
            envelope(&["bob@example.com", "carol@example.com"], b"hi\r\n"),
        );
        sent(&mut protocol);
        feed(&mut protocol, "250-mx.example.com\r\n250 PIPELINING\r\n");

        let batch = protocol.poll_transmit().unwrap();
        assert_eq!(batch.tags.len(), 4);
        assert_eq!(
            batch.as_str(),
            Some(
                "MAIL FROM:<alice@example.com>\r\nRCPT TO:<bob@example.com>\r\n\
                 RCPT TO:<carol@example.com>\r\nDATA\r\n"
            )
        );
        assert!(protocol.poll_transmit().is_none());
        assert_eq!(protocol.state(), ProtocolState::Pipelining);

        feed(&mut protocol, "250 OK\r\n250 OK\r\n250 OK\r\n");
        assert!(sent(&mut protocol).is_empty());
        assert_eq!(protocol.last_command(), Some(LastCommand::Data));

        protocol.handle_line(b"354 Go ahead\r\n");
        assert_eq!(sent(&mut protocol), "hi\r\n.\r\n");

        let events = protocol.handle_line(b"250 Queued\r\n");
        assert!(matches!(events[..], [ProtocolEvent::Succeeded]));
        assert_eq!(protocol.state(), ProtocolState::Ready);
        assert_eq!(sent(&mut protocol), "QUIT\r\n");
    }

    #[test]
    fn test_pipelined_recipient_rejection() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"hi\r\n"));
        feed(&mut protocol, "250-mx.example.com\r\n250 PIPELINING\r\n");
        sent(&mut protocol);

        let events = feed(&mut protocol, "250 OK\r\n550 No such user\r\n554 No valid recipients\r\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            failure(&events),
            Some(Error::Rejected {
                stage: crate::error::RejectedStage::Recipient,
                ..
            })
        ));
    }

    #[test]
    fn test_pipelined_rejection_skips_quit_while_data_pending() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"hi\r\n"));
        feed(&mut protocol, "250-mx.example.com\r\n250 PIPELINING\r\n");
        sent(&mut protocol);

        feed(&mut protocol, "250 OK\r\n550 No such user\r\n");
        assert!(protocol.is_finished());
        assert_eq!(sent(&mut protocol), "");

        // A late 354 for the pipelined DATA is ignored
        assert!(protocol.handle_line(b"354 Go ahead\r\n").is_empty());
        assert_eq!(sent(&mut protocol), "");
    }

    #[test]
    fn test_single_line_ehlo_capabilities() {
        let mut protocol = started(auth_config(), envelope(&["bob@example.com"], b"x\r\n"));
        protocol.set_credential("secret");
        sent(&mut protocol);

        let events = feed(&mut protocol, "250 AUTH PLAIN\r\n");
        assert!(events.is_empty());
        assert_eq!(sent(&mut protocol), "AUTH PLAIN\r\n");
    }

    #[test]
    fn test_helo_fallback() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        sent(&mut protocol);
        protocol.handle_line(b"502 Command not implemented\r\n");
        assert_eq!(sent(&mut protocol), "HELO localhost\r\n");

        protocol.handle_line(b"250 mx.example.com\r\n");
        assert_eq!(sent(&mut protocol), "MAIL FROM:<alice@example.com>\r\n");
    }

    #[test]
    fn test_size_limit_exceeded() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], &[b'a'; 64]));
        let events = feed(&mut protocol, "250-mx.example.com\r\n250 SIZE 10\r\n");
        assert!(matches!(
            failure(&events),
            Some(Error::MessageTooLarge { size: 64, limit: 10 })
        ));
    }

    #[test]
    fn test_size_parameter_declared() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"hello\r\n"));
        sent(&mut protocol);
        feed(&mut protocol, "250-mx.example.com\r\n250 SIZE 35882577\r\n");
        assert_eq!(sent(&mut protocol), "MAIL FROM:<alice@example.com> SIZE=7\r\n");
    }

    #[test]
    fn test_burl_submission() {
        let url = "imap://alice@imap.example.com/Drafts;UIDVALIDITY=1/;UID=20;urlauth=submit+alice:internal:91354a473744909de610943775f92038";
        let envelope =
            Envelope::by_reference(addr("alice@example.com"), vec![addr("bob@example.com")], url)
                .unwrap();
        let mut protocol = started(plain_config(), envelope);
        sent(&mut protocol);
        feed(&mut protocol, "250-mx.example.com\r\n250 BURL imap\r\n250 OK\r\n250 OK\r\n");
        assert_eq!(
            sent(&mut protocol),
            format!("MAIL FROM:<alice@example.com>\r\nRCPT TO:<bob@example.com>\r\nBURL {url} LAST\r\n")
        );

        let events = protocol.handle_line(b"250 2.5.0 Ok\r\n");
        assert!(matches!(
            events[..],
            [ProtocolEvent::Progress(1), ProtocolEvent::Succeeded]
        ));
    }

    #[test]
    fn test_burl_without_extension() {
        let envelope = Envelope::by_reference(
            addr("alice@example.com"),
            vec![addr("bob@example.com")],
            "imap://imap.example.com/INBOX;UID=1",
        )
        .unwrap();
        let mut protocol = started(plain_config(), envelope);
        let events = feed(&mut protocol, "250 mx.example.com\r\n");
        assert!(matches!(failure(&events), Some(Error::NotSupported(s)) if s == "BURL"));
    }

    #[test]
    fn test_malformed_reply_fails() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        let events = protocol.handle_line(b"hello there\r\n");
        assert!(matches!(failure(&events), Some(Error::MalformedReply(_))));
        assert!(protocol.is_finished());
    }

    #[test]
    fn test_service_closing_sends_no_quit() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        sent(&mut protocol);
        let events = protocol.handle_line(b"421 4.3.2 Shutting down\r\n");
        assert!(matches!(
            failure(&events),
            Some(Error::ServiceUnavailable { code: 421, .. })
        ));
        assert!(sent(&mut protocol).is_empty());
    }

    #[test]
    fn test_unsolicited_reply_fails() {
        let mut protocol = started(auth_config(), envelope(&["bob@example.com"], b"x\r\n"));
        feed(&mut protocol, "250-mx.example.com\r\n250 AUTH PLAIN\r\n");
        // Parked on the credential: nothing is in flight.
        let events = protocol.handle_line(b"250 OK\r\n");
        assert!(matches!(failure(&events), Some(Error::UnexpectedReply { .. })));
    }

    #[test]
    fn test_cancel() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        sent(&mut protocol);
        let events = protocol.cancel();
        assert!(matches!(failure(&events), Some(Error::Cancelled)));
        assert!(protocol.is_finished());
        assert!(sent(&mut protocol).is_empty());
        assert!(protocol.cancel().is_empty());
        assert!(protocol.handle_line(b"250 OK\r\n").is_empty());
    }

    #[test]
    fn test_connection_lost_after_acceptance() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        feed(&mut protocol, "250 mx.example.com\r\n250 OK\r\n250 OK\r\n354 Go\r\n250 Queued\r\n");
        assert!(protocol.is_succeeded());
        let events = protocol.connection_lost(Error::ConnectionClosed);
        assert!(events.is_empty());
        assert!(protocol.is_finished());
    }

    #[test]
    fn test_odd_quit_reply_after_acceptance() {
        let mut protocol = started(plain_config(), envelope(&["bob@example.com"], b"x\r\n"));
        feed(&mut protocol, "250 mx.example.com\r\n250 OK\r\n250 OK\r\n354 Go\r\n250 Queued\r\n");
        let events = protocol.handle_line(b"500 What?\r\n");
        assert!(events.is_empty());
        assert!(protocol.is_finished());
    }
}
