//! # mailsubmit-smtp
//!
//! An SMTP message submission client (RFC 5321, RFC 6409).
//!
//! ## Features
//!
//! - **Sans-I/O core**: [`protocol::Protocol`] consumes reply lines and
//!   produces bytes to write, so every exchange can be tested without a socket
//! - **Capability negotiation**: EHLO folding with HELO fallback, re-run after
//!   STARTTLS
//! - **TLS support**: Both implicit TLS (port 465) and STARTTLS
//! - **Authentication**: AUTH PLAIN, with the password requested on demand
//! - **Extensions**: PIPELINING, SIZE, 8BITMIME, ENHANCEDSTATUSCODES, BURL
//! - **Events**: progress and the outcome arrive on a tokio channel
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailsubmit_smtp::{Address, Submission, SubmissionConfig, SubmissionEvent};
//!
//! #[tokio::main]
//! async fn main() -> mailsubmit_smtp::Result<()> {
//!     let config = SubmissionConfig::builder("smtp.example.com")
//!         .auth("sender@example.com")
//!         .build();
//!
//!     let (submission, mut events) = Submission::new(config);
//!     let submission = submission.with_credential("app-password");
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     });
//!
//!     let from = Address::new("sender@example.com")?;
//!     let to = vec![Address::new("recipient@example.com")?];
//!     submission
//!         .submit(from, to, b"Subject: Test\r\n\r\nHello, World!\r\n".to_vec())
//!         .await
//! }
//! ```
//!
//! ## Submission flow
//!
//! ```text
//! greeting ─→ EHLO ─→ [STARTTLS ─→ EHLO] ─→ [AUTH PLAIN] ─→ MAIL FROM
//!                                                             │
//!             QUIT ←── DATA + body / BURL ←── RCPT TO × N ←───┘
//! ```
//!
//! With PIPELINING, MAIL FROM, every RCPT TO and DATA/BURL leave in a single
//! write and their replies are matched in order.
//!
//! ## Modules
//!
//! - [`capability`]: EHLO capability folding
//! - [`command`]: SMTP command builders and tags
//! - [`config`]: Connection and policy configuration
//! - [`connection`]: Transport abstraction, TCP and TLS streams
//! - [`data`]: Dot-stuffing for the DATA phase
//! - [`parser`]: Reply line parser
//! - [`protocol`]: Sans-I/O state machine
//! - [`queue`]: Command queue and in-flight tracking
//! - [`submission`]: Async driver and events
//! - [`types`]: Core SMTP types (addresses, extensions, replies)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod capability;
pub mod command;
pub mod config;
pub mod connection;
pub mod data;
mod error;
pub mod parser;
pub mod protocol;
pub mod queue;
pub mod submission;
pub mod types;

pub use capability::Capabilities;
pub use config::{Security, SubmissionConfig, SubmissionConfigBuilder};
pub use connection::{Connector, SmtpStream, TcpConnector, Transport};
pub use error::{Error, RejectedStage, Result};
pub use submission::{Submission, SubmissionEvent, SubmissionHandle};
pub use types::{
    Address, AuthMechanism, EnhancedStatus, Envelope, Extension, Payload, Reply, ReplyCode,
};
