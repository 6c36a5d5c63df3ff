//! Byte transport under the submission driver.
//!
//! The driver only needs line reads, writes and a TLS upgrade, so the socket
//! is abstracted behind [`Transport`]. A [`Connector`] opens transports;
//! [`TcpConnector`] is the real network implementation and tests substitute
//! a scripted one.

mod stream;

use std::future::Future;

pub use stream::{SmtpStream, TcpConnector};

use crate::error::Result;

/// A connected, line-oriented byte stream to an SMTP server.
pub trait Transport: Send + Sized {
    /// Reads up to and including the next `\n`, appending to `buf`.
    ///
    /// Returns the number of bytes appended; `0` means end of stream. Partial
    /// lines stay in `buf` if the future is dropped, so the same buffer must
    /// be passed again.
    fn read_line(&mut self, buf: &mut Vec<u8>) -> impl Future<Output = Result<usize>> + Send;

    /// Writes and flushes `data`.
    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Performs the client side of a TLS handshake over this transport.
    fn upgrade_to_tls(self, hostname: &str) -> impl Future<Output = Result<Self>> + Send;

    /// Returns true if the stream is encrypted.
    fn is_tls(&self) -> bool;

    /// Closes the write side.
    fn shutdown(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens transports to a server.
pub trait Connector: Send + Sync {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Connects to `hostname:port`, handshaking TLS first if `implicit_tls`.
    fn connect(
        &self,
        hostname: &str,
        port: u16,
        implicit_tls: bool,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}
