//! Byte-stream transport
//!
//! The session only needs three things from the network: append whatever
//! bytes are available to a buffer, write a buffer out in full, and close.
//! [`StreamTransport`] provides them for any tokio stream (plain TCP, a TLS
//! stream supplied by the caller, or an in-memory duplex in tests).

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Ordered, reliable byte stream used by a session
#[async_trait]
pub trait Transport: Send {
    /// Append available bytes to `buf`, waiting for at least one.
    ///
    /// Returns the number of bytes read. End of stream is reported as
    /// [`Error::ConnectionClosed`], an expired read timeout as [`Error::Timeout`].
    async fn fill(&mut self, buf: &mut BytesMut) -> Result<usize>;

    /// Write all of `data` and flush
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Shut the stream down. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Total bytes read so far
    fn bytes_read(&self) -> u64;

    /// Total bytes written so far
    fn bytes_written(&self) -> u64;
}

/// [`Transport`] over any `AsyncRead + AsyncWrite` stream
pub struct StreamTransport<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    read_timeout: Option<Duration>,
    bytes_read: u64,
    bytes_written: u64,
    closed: bool,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::with_capacity(64 * 1024, read_half),
            writer: BufWriter::with_capacity(64 * 1024, write_half),
            read_timeout: None,
            bytes_read: 0,
            bytes_written: 0,
            closed: false,
        }
    }

    /// Fail reads that stall longer than `read_timeout`
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn fill(&mut self, buf: &mut BytesMut) -> Result<usize> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let n = match self.read_timeout {
            Some(limit) => timeout(limit, self.reader.read_buf(buf))
                .await
                .map_err(|_| Error::Timeout)??,
            None => self.reader.read_buf(buf).await?,
        };

        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        self.bytes_read += n as u64;
        Ok(n)
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Open a TCP connection within `connect_timeout`
pub async fn connect_tcp(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    nodelay: bool,
) -> Result<TcpStream> {
    let addr = format!("{}:{}", host, port);

    let socket = timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(Error::Io)?;

    if nodelay {
        socket.set_nodelay(true)?;
    }

    tracing::debug!(addr = %addr, "TCP connected");
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fill_and_send_count_bytes() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let mut transport = StreamTransport::new(local);

        transport.send(b"hello").await.unwrap();
        let mut echo = [0u8; 5];
        remote.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"hello");

        remote.write_all(b"world!").await.unwrap();
        let mut buf = BytesMut::new();
        let n = transport.fill(&mut buf).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[..], b"world!");

        assert_eq!(transport.bytes_written(), 5);
        assert_eq!(transport.bytes_read(), 6);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_connection_closed() {
        let (local, remote) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(local);
        drop(remote);

        let mut buf = BytesMut::new();
        assert!(matches!(
            transport.fill(&mut buf).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut transport =
            StreamTransport::new(local).with_read_timeout(Duration::from_millis(20));

        let mut buf = BytesMut::new();
        assert!(matches!(transport.fill(&mut buf).await, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (local, _remote) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(local);

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.is_closed());
        assert!(matches!(transport.send(b"x").await, Err(Error::ConnectionClosed)));
    }
}
