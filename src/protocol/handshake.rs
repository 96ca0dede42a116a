//! RTMP handshake implementation
//!
//! The RTMP handshake consists of three phases:
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! [`Handshake`] is the sans-IO state machine for the plain exchange.
//! [`HandshakeStrategy`] drives an exchange over a [`Transport`]; encrypted
//! variants plug in through the same trait.
//!
//! Reference: RTMP Specification Section 5.2

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngExt;

use crate::error::{Error, HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};
use crate::transport::Transport;

/// Size of S0 + S1 + S2
const SERVER_REPLY_SIZE: usize = 1 + HANDSHAKE_SIZE * 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    /// Need to send C0C1
    Initial,
    /// C0C1 sent, waiting for S0S1S2
    WaitingForServer,
    /// C2 produced
    Done,
}

/// Client side handshake state machine
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    /// Our C1, kept to check the S2 echo
    c1: Option<Box<[u8; HANDSHAKE_SIZE]>>,
    /// Whether S2 echoed C1's random bytes
    echo_matched: bool,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Initial,
            c1: None,
            echo_matched: false,
        }
    }

    /// Check if handshake is complete
    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Whether the server's S2 was a faithful echo of C1
    pub fn echo_matched(&self) -> bool {
        self.echo_matched
    }

    /// Bytes required before [`Handshake::process`] can make progress
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::WaitingForServer => SERVER_REPLY_SIZE,
            _ => 0,
        }
    }

    /// Produce C0 + C1 (1 + 1536 bytes)
    pub fn generate_c0c1(&mut self) -> Result<Bytes> {
        if self.state != HandshakeState::Initial {
            return Err(HandshakeError::InvalidState.into());
        }

        let c1 = generate_packet();
        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&c1[..]);

        self.c1 = Some(c1);
        self.state = HandshakeState::WaitingForServer;
        Ok(buf.freeze())
    }

    /// Consume S0S1S2 from `data` and return C2.
    ///
    /// Returns Ok(None) and leaves `data` untouched while fewer than
    /// 3073 bytes are buffered. Bytes after S2 stay in `data`.
    pub fn process(&mut self, data: &mut BytesMut) -> Result<Option<Bytes>> {
        if self.state != HandshakeState::WaitingForServer {
            return Err(HandshakeError::InvalidState.into());
        }
        if data.len() < SERVER_REPLY_SIZE {
            return Ok(None);
        }

        let version = data.get_u8();
        if version != RTMP_VERSION {
            return Err(HandshakeError::InvalidVersion(version).into());
        }

        let s1 = data.split_to(HANDSHAKE_SIZE);
        let s2 = data.split_to(HANDSHAKE_SIZE);

        // S2 should carry our timestamp and random bytes back
        self.echo_matched = match &self.c1 {
            Some(c1) => s2[0..4] == c1[0..4] && s2[8..] == c1[8..],
            None => false,
        };
        if !self.echo_matched {
            tracing::warn!("Handshake S2 does not echo C1");
        }

        let server_time = u32::from_be_bytes([s1[0], s1[1], s1[2], s1[3]]);
        tracing::debug!(server_time, "Handshake S1 received");

        self.state = HandshakeState::Done;
        Ok(Some(generate_echo(&s1)))
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Performs the opening exchange on a fresh transport
#[async_trait]
pub trait HandshakeStrategy: Send {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Run the exchange to completion.
    ///
    /// Any bytes the server sent after its handshake reply must be left in
    /// `read_buf` for the chunk decoder.
    async fn perform(&mut self, transport: &mut dyn Transport, read_buf: &mut BytesMut)
        -> Result<()>;
}

/// Plain (unencrypted, undigested) handshake
#[derive(Debug, Default)]
pub struct SimpleHandshake {
    handshake: Handshake,
}

impl SimpleHandshake {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandshakeStrategy for SimpleHandshake {
    fn name(&self) -> &'static str {
        "simple"
    }

    async fn perform(
        &mut self,
        transport: &mut dyn Transport,
        read_buf: &mut BytesMut,
    ) -> Result<()> {
        let c0c1 = self.handshake.generate_c0c1()?;
        transport.send(&c0c1).await?;

        loop {
            if let Some(c2) = self.handshake.process(read_buf)? {
                transport.send(&c2).await?;
                return Ok(());
            }

            match transport.fill(read_buf).await {
                Ok(_) => {}
                Err(Error::ConnectionClosed) => {
                    return Err(HandshakeError::ShortRead {
                        expected: SERVER_REPLY_SIZE,
                        received: read_buf.len(),
                    }
                    .into())
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Strategy that always fails, for variants the engine does not implement
#[derive(Debug)]
pub struct UnsupportedHandshake {
    variant: &'static str,
}

impl UnsupportedHandshake {
    pub fn new(variant: &'static str) -> Self {
        Self { variant }
    }
}

#[async_trait]
impl HandshakeStrategy for UnsupportedHandshake {
    fn name(&self) -> &'static str {
        self.variant
    }

    async fn perform(
        &mut self,
        _transport: &mut dyn Transport,
        _read_buf: &mut BytesMut,
    ) -> Result<()> {
        Err(HandshakeError::Unsupported(self.variant.to_string()).into())
    }
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// Generate C1
///
/// Format (1536 bytes):
/// - Bytes 0-3: Timestamp (32-bit, big-endian)
/// - Bytes 4-7: Zero
/// - Bytes 8-1535: Random data
fn generate_packet() -> Box<[u8; HANDSHAKE_SIZE]> {
    let mut packet = Box::new([0u8; HANDSHAKE_SIZE]);
    packet[0..4].copy_from_slice(&now_millis().to_be_bytes());

    let mut rng = rand::rng();
    for chunk in packet[8..].chunks_mut(4) {
        let bytes = rng.random::<u32>().to_be_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }

    packet
}

/// Generate C2: S1 with our timestamp in bytes 4-7
fn generate_echo(s1: &[u8]) -> Bytes {
    let mut echo = BytesMut::from(s1);
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build S0S1S2 the way a conforming server would
    fn server_reply(c0c1: &[u8]) -> BytesMut {
        let mut reply = BytesMut::with_capacity(SERVER_REPLY_SIZE);
        reply.put_u8(RTMP_VERSION);
        let s1: Vec<u8> = (0..HANDSHAKE_SIZE).map(|i| (i % 199) as u8).collect();
        reply.put_slice(&s1);
        reply.put_slice(&c0c1[1..]);
        reply
    }

    #[test]
    fn test_client_handshake() {
        let mut handshake = Handshake::new();
        let c0c1 = handshake.generate_c0c1().unwrap();
        assert_eq!(c0c1.len(), 1 + HANDSHAKE_SIZE);
        assert_eq!(c0c1[0], RTMP_VERSION);
        assert_eq!(&c0c1[5..9], &[0, 0, 0, 0]);

        let mut reply = server_reply(&c0c1);
        let c2 = handshake.process(&mut reply).unwrap().unwrap();
        assert!(handshake.is_done());
        assert!(handshake.echo_matched());
        assert!(reply.is_empty());

        // C2 echoes S1 except for our timestamp
        assert_eq!(c2.len(), HANDSHAKE_SIZE);
        let s1: Vec<u8> = (0..HANDSHAKE_SIZE).map(|i| (i % 199) as u8).collect();
        assert_eq!(&c2[0..4], &s1[0..4]);
        assert_eq!(&c2[8..], &s1[8..]);
    }

    #[test]
    fn test_partial_reply_waits() {
        let mut handshake = Handshake::new();
        let c0c1 = handshake.generate_c0c1().unwrap();
        let mut reply = server_reply(&c0c1);
        let mut partial = reply.split_to(1000);

        assert!(handshake.process(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 1000);
        assert_eq!(handshake.bytes_needed(), SERVER_REPLY_SIZE);
    }

    #[test]
    fn test_trailing_bytes_preserved() {
        let mut handshake = Handshake::new();
        let c0c1 = handshake.generate_c0c1().unwrap();
        let mut reply = server_reply(&c0c1);
        reply.put_slice(&[0x02, 0xAA]);

        handshake.process(&mut reply).unwrap().unwrap();
        assert_eq!(&reply[..], &[0x02, 0xAA]);
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let mut handshake = Handshake::new();
        let c0c1 = handshake.generate_c0c1().unwrap();
        let mut reply = server_reply(&c0c1);
        reply[0] = 6;

        let err = handshake.process(&mut reply).unwrap_err();
        assert!(matches!(err, Error::Handshake(HandshakeError::InvalidVersion(6))));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_bad_echo_is_tolerated() {
        let mut handshake = Handshake::new();
        let c0c1 = handshake.generate_c0c1().unwrap();
        let mut reply = server_reply(&c0c1);
        let last = reply.len() - 1;
        reply[last] ^= 0xFF;

        assert!(handshake.process(&mut reply).unwrap().is_some());
        assert!(!handshake.echo_matched());
    }

    #[test]
    fn test_c0c1_only_once() {
        let mut handshake = Handshake::new();
        handshake.generate_c0c1().unwrap();
        assert!(handshake.generate_c0c1().is_err());
    }

    #[test]
    fn test_random_bytes_differ() {
        let a = generate_packet();
        let b = generate_packet();
        assert_ne!(&a[8..], &b[8..]);
    }

    #[tokio::test]
    async fn test_simple_strategy_over_duplex() {
        use crate::transport::StreamTransport;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (local, mut remote) = tokio::io::duplex(16 * 1024);
        let server = tokio::spawn(async move {
            let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
            remote.read_exact(&mut c0c1).await.unwrap();
            let mut reply = server_reply(&c0c1);
            reply.put_slice(&[0x02]);
            remote.write_all(&reply).await.unwrap();

            let mut c2 = vec![0u8; HANDSHAKE_SIZE];
            remote.read_exact(&mut c2).await.unwrap();
            c2
        });

        let mut transport = StreamTransport::new(local);
        let mut read_buf = BytesMut::new();
        let mut strategy = SimpleHandshake::new();
        strategy.perform(&mut transport, &mut read_buf).await.unwrap();

        let c2 = server.await.unwrap();
        assert_eq!(c2[100], (100 % 199) as u8);
        assert_eq!(&read_buf[..], &[0x02]);
    }

    #[tokio::test]
    async fn test_short_read() {
        use crate::transport::StreamTransport;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (local, mut remote) = tokio::io::duplex(16 * 1024);
        tokio::spawn(async move {
            let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
            remote.read_exact(&mut c0c1).await.unwrap();
            remote.write_all(&[RTMP_VERSION; 10]).await.unwrap();
        });

        let mut transport = StreamTransport::new(local);
        let mut read_buf = BytesMut::new();
        let err = SimpleHandshake::new()
            .perform(&mut transport, &mut read_buf)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Handshake(HandshakeError::ShortRead { received: 10, .. })
        ));
    }
}
