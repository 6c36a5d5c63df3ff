//! TCP and TLS streams.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};
use tracing::debug;

use super::{Connector, Transport};
use crate::error::{Error, Result};

/// Longest reply line accepted before the server is considered broken.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// SMTP stream (TCP or TLS).
#[derive(Debug)]
pub enum SmtpStream {
    /// Plain TCP connection.
    Tcp(BufReader<TcpStream>),
    /// TLS-encrypted connection.
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

impl SmtpStream {
    /// Connects over plain TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(hostname: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((hostname, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self::Tcp(BufReader::new(stream)))
    }

    /// Connects and immediately performs the TLS handshake (port 465).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or TLS handshake fails.
    pub async fn connect_tls(hostname: &str, port: u16) -> Result<Self> {
        Self::connect(hostname, port)
            .await?
            .upgrade_to_tls(hostname)
            .await
    }
}

impl Transport for SmtpStream {
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        match self {
            Self::Tcp(reader) => read_bounded_line(reader, buf).await,
            Self::Tls(reader) => read_bounded_line(&mut **reader, buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Tcp(reader) => write_flush(reader.get_mut(), data).await,
            Self::Tls(reader) => write_flush(reader.get_mut(), data).await,
        }
    }

    async fn upgrade_to_tls(self, hostname: &str) -> Result<Self> {
        let reader = match self {
            Self::Tcp(reader) => reader,
            Self::Tls(_) => return Err(Error::InvalidState("Already using TLS".into())),
        };
        if !reader.buffer().is_empty() {
            // Plaintext injected after the STARTTLS reply
            return Err(Error::MalformedReply(
                "unexpected data before TLS handshake".into(),
            ));
        }

        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::InvalidState(format!("Invalid hostname: {hostname}")))?;

        debug!(hostname, "starting TLS handshake");
        let tls_stream = create_tls_connector()
            .connect(server_name, reader.into_inner())
            .await
            .map_err(tls_error)?;
        Ok(Self::Tls(Box::new(BufReader::new(tls_stream))))
    }

    fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    async fn shutdown(&mut self) -> Result<()> {
        match self {
            Self::Tcp(reader) => reader.get_mut().shutdown().await?,
            Self::Tls(reader) => reader.get_mut().shutdown().await?,
        }
        Ok(())
    }
}

/// Connector for real TCP/TLS sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Transport = SmtpStream;

    async fn connect(&self, hostname: &str, port: u16, implicit_tls: bool) -> Result<SmtpStream> {
        if implicit_tls {
            SmtpStream::connect_tls(hostname, port).await
        } else {
            SmtpStream::connect(hostname, port).await
        }
    }
}

/// Reads through the next `\n` into `buf`.
///
/// Bytes are moved into `buf` as soon as they are consumed from the reader,
/// so a dropped call loses nothing.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut appended = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(appended);
        }
        let (used, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        buf.extend_from_slice(&available[..used]);
        reader.consume(used);
        appended += used;

        if done {
            return Ok(appended);
        }
        if buf.len() > MAX_LINE_LENGTH {
            return Err(Error::MalformedReply(format!(
                "reply line exceeds {MAX_LINE_LENGTH} bytes"
            )));
        }
    }
}

async fn write_flush<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Surfaces the rustls error wrapped inside a handshake I/O error.
fn tls_error(err: std::io::Error) -> Error {
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        Some(tls) => Error::Tls(tls.clone()),
        None => err.into(),
    }
}

/// Creates a TLS connector with the Mozilla root certificates.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_line_across_segments() {
        let mock = Builder::new()
            .read(b"250-mx.exa")
            .read(b"mple.com\r\n250 OK\r\n")
            .build();
        let mut reader = BufReader::new(mock);

        let mut buf = Vec::new();
        let n = read_bounded_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 20);
        assert_eq!(buf, b"250-mx.example.com\r\n");

        buf.clear();
        read_bounded_line(&mut reader, &mut buf).await.unwrap();
        assert_eq!(buf, b"250 OK\r\n");

        buf.clear();
        assert_eq!(read_bounded_line(&mut reader, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_line_too_long() {
        let line = vec![b'a'; MAX_LINE_LENGTH + 16];
        let mock = Builder::new().read(&line).build();
        let mut reader = BufReader::new(mock);

        let mut buf = Vec::new();
        let err = read_bounded_line(&mut reader, &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::MalformedReply(_)));
    }

    #[tokio::test]
    async fn test_write_flush() {
        let mut mock = Builder::new().write(b"EHLO client.example.com\r\n").build();
        write_flush(&mut mock, b"EHLO client.example.com\r\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reads_lines_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220-first\r\n220 second\r\n").await.unwrap();
        });

        let mut stream = TcpConnector.connect("127.0.0.1", port, false).await.unwrap();
        assert!(!stream.is_tls());

        let mut buf = Vec::new();
        stream.read_line(&mut buf).await.unwrap();
        assert_eq!(buf, b"220-first\r\n");
        buf.clear();
        stream.read_line(&mut buf).await.unwrap();
        assert_eq!(buf, b"220 second\r\n");

        server.await.unwrap();
        buf.clear();
        assert_eq!(stream.read_line(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_hostname_for_tls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move { listener.accept().await });

        let stream = SmtpStream::connect("127.0.0.1", port).await.unwrap();
        let err = stream.upgrade_to_tls("not a hostname!").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
