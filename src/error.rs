//! Unified error types for rtmp-client

use std::fmt;
use std::io;

use crate::session::state::SessionPhase;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all RTMP client operations
#[derive(Debug)]
pub enum Error {
    /// I/O error on the byte-stream transport
    Io(io::Error),
    /// Chunk stream or message framing violation
    Protocol(ProtocolError),
    /// AMF encoding/decoding error
    Amf(AmfError),
    /// Handshake failure
    Handshake(HandshakeError),
    /// API called in the wrong session phase
    Usage(UsageError),
    /// Peer answered an invoke with `_error` or a failing status
    Remote(RemoteError),
    /// Resumed stream does not line up with the cached original
    ResumeMismatch(String),
    /// Transport read or connect timed out
    Timeout,
    /// Connection was closed
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl Error {
    /// Whether this error terminates the session.
    ///
    /// Transport and framing errors leave the chunk stream unaligned, so the
    /// session is closed. Usage, remote and AMF errors are scoped to one call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Protocol(_)
                | Error::Handshake(_)
                | Error::Timeout
                | Error::ConnectionClosed
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Amf(e) => write!(f, "AMF error: {}", e),
            Error::Handshake(e) => write!(f, "Handshake error: {}", e),
            Error::Usage(e) => write!(f, "Usage error: {}", e),
            Error::Remote(e) => write!(f, "Remote error: {}", e),
            Error::ResumeMismatch(msg) => write!(f, "Resume mismatch: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AmfError> for Error {
    fn from(err: AmfError) -> Self {
        Error::Amf(err)
    }
}

impl From<HandshakeError> for Error {
    fn from(err: HandshakeError) -> Self {
        Error::Handshake(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Error::Remote(err)
    }
}

/// Protocol-level errors
#[derive(Debug)]
pub enum ProtocolError {
    InvalidChunkHeader,
    /// A chunk header form that cannot follow the channel's current state
    UnexpectedChunkFormat { csid: u32, fmt: u8 },
    MessageTooLarge { size: u32, max: u32 },
    InvalidChunkSize(u32),
    /// Chunk stream id outside 2..=65599
    InvalidChunkStreamId(u32),
    MalformedMessage { message_type: u8 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidChunkHeader => write!(f, "Invalid chunk header"),
            ProtocolError::UnexpectedChunkFormat { csid, fmt } => {
                write!(f, "Unexpected chunk format {} on chunk stream {}", fmt, csid)
            }
            ProtocolError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max {})", size, max)
            }
            ProtocolError::InvalidChunkSize(size) => write!(f, "Invalid chunk size: {}", size),
            ProtocolError::InvalidChunkStreamId(csid) => {
                write!(f, "Invalid chunk stream id: {}", csid)
            }
            ProtocolError::MalformedMessage { message_type } => {
                write!(f, "Malformed message of type {}", message_type)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// AMF encoding/decoding errors
#[derive(Debug)]
pub enum AmfError {
    UnknownMarker(u8),
    UnexpectedEof,
    InvalidUtf8,
    NestingTooDeep,
    InvalidObjectEnd,
    /// Well-formed value of the wrong type, e.g. a command without a name
    UnexpectedType { expected: &'static str, marker: u8 },
}

impl fmt::Display for AmfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmfError::UnknownMarker(m) => write!(f, "Unknown AMF marker: 0x{:02x}", m),
            AmfError::UnexpectedEof => write!(f, "Unexpected end of AMF data"),
            AmfError::InvalidUtf8 => write!(f, "Invalid UTF-8 in AMF string"),
            AmfError::NestingTooDeep => write!(f, "AMF nesting too deep"),
            AmfError::InvalidObjectEnd => write!(f, "Invalid object end marker"),
            AmfError::UnexpectedType { expected, marker } => {
                write!(f, "Expected {}, found AMF marker 0x{:02x}", expected, marker)
            }
        }
    }
}

impl std::error::Error for AmfError {}

/// Handshake-specific errors
#[derive(Debug)]
pub enum HandshakeError {
    InvalidVersion(u8),
    InvalidState,
    /// Peer closed the connection before the exchange completed
    ShortRead { expected: usize, received: usize },
    /// No handshake strategy is available for the protocol variant
    Unsupported(String),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidVersion(v) => write!(f, "Invalid RTMP version: {}", v),
            HandshakeError::InvalidState => write!(f, "Invalid handshake state"),
            HandshakeError::ShortRead { expected, received } => {
                write!(f, "Short handshake read: got {} of {} bytes", received, expected)
            }
            HandshakeError::Unsupported(variant) => {
                write!(f, "Unsupported handshake variant: {}", variant)
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Caller errors: the session is left untouched
#[derive(Debug)]
pub enum UsageError {
    /// Operation is not allowed in the current phase
    WrongPhase {
        operation: &'static str,
        phase: SessionPhase,
    },
    /// The media read sequence already ended with EOF or an error
    ReadTerminated,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::WrongPhase { operation, phase } => {
                write!(f, "{} is not allowed while the session is {:?}", operation, phase)
            }
            UsageError::ReadTerminated => write!(f, "Read sequence already terminated"),
        }
    }
}

impl std::error::Error for UsageError {}

/// Failure reported by the peer for a single invoke
#[derive(Debug, Clone)]
pub struct RemoteError {
    /// Method of the failed invoke
    pub method: String,
    /// Status code (e.g. `NetStream.Play.StreamNotFound`) when supplied
    pub code: Option<String>,
    /// Human readable description when supplied
    pub description: Option<String>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", self.method)?;
        if let Some(code) = &self.code {
            write!(f, ": {}", code)?;
        }
        if let Some(description) = &self.description {
            write!(f, " ({})", description)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}
