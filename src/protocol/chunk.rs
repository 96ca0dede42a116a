//! RTMP chunk stream codec
//!
//! RTMP messages are split into chunks for multiplexing. Each chunk has a header
//! that identifies the chunk stream and message being sent.
//!
//! ```text
//! Chunk Format:
//! +-------------+----------------+-------------------+
//! | Basic Header| Message Header | Chunk Data        |
//! | (1-3 bytes) | (0,3,7,11 bytes)| (variable)       |
//! +-------------+----------------+-------------------+
//!
//! Basic Header formats:
//! - 1 byte:  fmt(2) + csid(6)        for csid 2-63
//! - 2 bytes: fmt(2) + 0 + csid(8)    for csid 64-319
//! - 3 bytes: fmt(2) + 1 + csid(16)   for csid 64-65599
//!
//! Message Header formats (based on fmt):
//! - Type 0 (11 bytes): timestamp(3) + length(3) + type(1) + stream_id(4)
//! - Type 1 (7 bytes):  timestamp_delta(3) + length(3) + type(1)
//! - Type 2 (3 bytes):  timestamp_delta(3)
//! - Type 3 (0 bytes):  (use previous chunk's values)
//!
//! Extended timestamp (4 bytes) is appended when timestamp >= 0xFFFFFF
//! ```
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// Largest chunk stream id expressible in a 3-byte basic header
pub const MAX_CSID: u32 = 65599;

/// A complete RTMP message (reassembled from chunks)
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpPacket {
    /// Chunk stream ID (for multiplexing)
    pub csid: u32,
    /// Absolute message timestamp (milliseconds)
    pub timestamp: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID
    pub stream_id: u32,
    /// Message payload
    pub payload: Bytes,
}

impl RtmpPacket {
    pub fn new(csid: u32, message_type: u8, timestamp: u32, stream_id: u32, payload: Bytes) -> Self {
        Self {
            csid,
            timestamp,
            message_type,
            stream_id,
            payload,
        }
    }
}

/// Message header compression form (the fmt field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderForm {
    /// All fields: timestamp, length, type, stream id
    Large,
    /// Timestamp delta, length and type; stream id unchanged
    Medium,
    /// Timestamp delta only
    Small,
    /// No fields: continuation of the current message
    Minimum,
}

impl HeaderForm {
    fn from_fmt(fmt: u8) -> Self {
        match fmt & 0x03 {
            CHUNK_FMT_0 => HeaderForm::Large,
            CHUNK_FMT_1 => HeaderForm::Medium,
            CHUNK_FMT_2 => HeaderForm::Small,
            _ => HeaderForm::Minimum,
        }
    }

    fn fmt(self) -> u8 {
        match self {
            HeaderForm::Large => CHUNK_FMT_0,
            HeaderForm::Medium => CHUNK_FMT_1,
            HeaderForm::Small => CHUNK_FMT_2,
            HeaderForm::Minimum => CHUNK_FMT_3,
        }
    }

    /// Size of the message header that follows the basic header
    fn header_len(self) -> usize {
        match self {
            HeaderForm::Large => 11,
            HeaderForm::Medium => 7,
            HeaderForm::Small => 3,
            HeaderForm::Minimum => 0,
        }
    }
}

/// Last message header seen or sent on a chunk stream
#[derive(Debug, Clone, Copy, Default)]
struct MessageHeader {
    /// Absolute timestamp
    timestamp: u32,
    /// Value of the last timestamp field (absolute for type 0, delta otherwise)
    timestamp_delta: u32,
    message_length: u32,
    message_type: u8,
    stream_id: u32,
    /// Whether the timestamp field carried the extended marker
    extended: bool,
}

/// Message being reassembled on one chunk stream
#[derive(Debug)]
struct InboundMessage {
    header: MessageHeader,
    body: BytesMut,
    body_size: u32,
}

impl InboundMessage {
    fn new(header: MessageHeader) -> Self {
        Self {
            header,
            body: BytesMut::with_capacity(header.message_length as usize),
            body_size: header.message_length,
        }
    }

    fn bytes_received(&self) -> u32 {
        self.body.len() as u32
    }

    fn is_complete(&self) -> bool {
        self.bytes_received() == self.body_size
    }
}

/// Per-chunk-stream state
#[derive(Debug, Default)]
struct ChannelState {
    last: Option<MessageHeader>,
    in_progress: Option<InboundMessage>,
}

enum ChunkOutcome {
    /// Not enough bytes buffered for the next whole chunk
    Incomplete,
    /// Chunk consumed, message still partial
    Partial,
    Complete(RtmpPacket),
}

/// Chunk stream decoder
///
/// Handles chunk demultiplexing and message reassembly. A chunk is consumed
/// from the buffer only once all of its bytes are available, so callers can
/// feed arbitrary slices of the transport stream.
pub struct ChunkDecoder {
    /// Maximum incoming chunk size
    chunk_size: u32,
    /// Per-chunk-stream state, created on first use
    streams: HashMap<u32, ChannelState>,
    /// Maximum message size (sanity limit)
    max_message_size: u32,
}

impl ChunkDecoder {
    /// Create a new decoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Set the chunk size (called when receiving SetChunkSize message)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Number of chunk streams seen so far
    pub fn channel_count(&self) -> usize {
        self.streams.len()
    }

    /// Whether a message is partially reassembled on `csid`
    pub fn has_partial(&self, csid: u32) -> bool {
        self.streams
            .get(&csid)
            .is_some_and(|s| s.in_progress.is_some())
    }

    /// Try to decode a complete message from the buffer
    ///
    /// Returns Ok(Some(packet)) if a complete message was decoded,
    /// Ok(None) if more data is needed, or Err on protocol error.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RtmpPacket>> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkOutcome::Incomplete => return Ok(None),
                ChunkOutcome::Partial => continue,
                ChunkOutcome::Complete(packet) => return Ok(Some(packet)),
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkOutcome> {
        let (fmt, csid, basic_len) = match parse_basic_header(buf) {
            Some(v) => v,
            None => return Ok(ChunkOutcome::Incomplete),
        };
        let form = HeaderForm::from_fmt(fmt);

        let (last, received, body_size) = match self.streams.get(&csid) {
            Some(state) => (
                state.last,
                state.in_progress.as_ref().map(|m| m.bytes_received()),
                state.in_progress.as_ref().map(|m| m.body_size),
            ),
            None => (None, None, None),
        };

        // Compressed forms need a previous header; only continuations may
        // arrive while a message is in progress.
        let continuing = received.is_some();
        let consistent = match form {
            HeaderForm::Large => !continuing,
            HeaderForm::Medium | HeaderForm::Small => !continuing && last.is_some(),
            HeaderForm::Minimum => last.is_some(),
        };
        if !consistent {
            return Err(ProtocolError::UnexpectedChunkFormat { csid, fmt }.into());
        }
        let prev = last.unwrap_or_default();

        let mut pos = basic_len;
        let header_len = form.header_len();
        if buf.len() < pos + header_len {
            return Ok(ChunkOutcome::Incomplete);
        }

        let h = &buf[pos..pos + header_len];
        let (ts_field, message_length, message_type, stream_id) = match form {
            HeaderForm::Large => (
                read_u24(&h[0..3]),
                read_u24(&h[3..6]),
                h[6],
                // Stream ID is little-endian!
                u32::from_le_bytes([h[7], h[8], h[9], h[10]]),
            ),
            HeaderForm::Medium => (read_u24(&h[0..3]), read_u24(&h[3..6]), h[6], prev.stream_id),
            HeaderForm::Small => (
                read_u24(&h[0..3]),
                prev.message_length,
                prev.message_type,
                prev.stream_id,
            ),
            HeaderForm::Minimum => (
                prev.timestamp_delta,
                prev.message_length,
                prev.message_type,
                prev.stream_id,
            ),
        };
        pos += header_len;

        let extended = match form {
            HeaderForm::Minimum => prev.extended,
            _ => ts_field >= EXTENDED_TIMESTAMP_THRESHOLD,
        };
        let ts_value = if extended {
            if buf.len() < pos + 4 {
                return Ok(ChunkOutcome::Incomplete);
            }
            let v = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
            pos += 4;
            v
        } else {
            ts_field
        };

        if !continuing && message_length > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: message_length,
                max: self.max_message_size,
            }
            .into());
        }

        let body_size = body_size.unwrap_or(message_length);
        let remaining = body_size - received.unwrap_or(0);
        let data_len = remaining.min(self.chunk_size) as usize;
        if buf.len() < pos + data_len {
            return Ok(ChunkOutcome::Incomplete);
        }

        // Whole chunk is available: commit
        buf.advance(pos);
        let data = buf.split_to(data_len);
        let state = self.streams.entry(csid).or_default();

        if !continuing {
            let timestamp = match form {
                HeaderForm::Large => ts_value,
                _ => prev.timestamp.wrapping_add(ts_value),
            };
            let header = MessageHeader {
                timestamp,
                timestamp_delta: ts_value,
                message_length,
                message_type,
                stream_id,
                extended,
            };
            state.last = Some(header);
            state.in_progress = Some(InboundMessage::new(header));
        }

        let message = match state.in_progress.as_mut() {
            Some(m) => m,
            None => return Err(ProtocolError::InvalidChunkHeader.into()),
        };
        message.body.extend_from_slice(&data);

        if !message.is_complete() {
            return Ok(ChunkOutcome::Partial);
        }

        match state.in_progress.take() {
            Some(done) => Ok(ChunkOutcome::Complete(RtmpPacket {
                csid,
                timestamp: done.header.timestamp,
                message_type: done.header.message_type,
                stream_id: done.header.stream_id,
                payload: done.body.freeze(),
            })),
            None => Err(ProtocolError::InvalidChunkHeader.into()),
        }
    }

    /// Abort a message on a chunk stream (when receiving Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.in_progress = None;
        }
    }

    /// Drop all channel state, releasing partial message buffers
    pub fn reset(&mut self) {
        self.streams.clear();
        self.chunk_size = DEFAULT_CHUNK_SIZE;
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse basic header and return (fmt, csid, header_length)
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = (first >> 6) & 0x03;

    match first & 0x3F {
        0 => {
            // 2-byte header: csid = 64 + second byte
            let second = *buf.get(1)?;
            Some((fmt, 64 + second as u32, 2))
        }
        1 => {
            // 3-byte header: csid = 64 + second + third*256
            let second = *buf.get(1)?;
            let third = *buf.get(2)?;
            Some((fmt, 64 + second as u32 + (third as u32) * 256, 3))
        }
        low => Some((fmt, low as u32, 1)),
    }
}

/// Chunk stream encoder
///
/// Encodes messages into chunks for transmission.
pub struct ChunkEncoder {
    /// Outgoing chunk size
    chunk_size: u32,
    /// Last header sent per chunk stream, for compression
    streams: HashMap<u32, MessageHeader>,
}

impl ChunkEncoder {
    /// Create a new encoder with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    /// Set the chunk size (call after announcing it with SetChunkSize)
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Get current chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Drop the per-channel compression state
    pub fn reset(&mut self) {
        self.streams.clear();
        self.chunk_size = DEFAULT_CHUNK_SIZE;
    }

    /// Encode a message into chunks, returning the header form of the first chunk
    pub fn encode(&mut self, packet: &RtmpPacket, buf: &mut BytesMut) -> Result<HeaderForm> {
        let csid = packet.csid;
        if !(2..=MAX_CSID).contains(&csid) {
            return Err(ProtocolError::InvalidChunkStreamId(csid).into());
        }
        let payload_len = packet.payload.len() as u32;
        if payload_len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload_len,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        let chunk_size = self.chunk_size as usize;
        let last = self.streams.get(&csid).copied();
        let form = select_form(packet, last.as_ref());

        // Large carries the absolute timestamp, the others a delta
        let ts_value = match (form, last) {
            (HeaderForm::Large, _) | (_, None) => packet.timestamp,
            (_, Some(prev)) => packet.timestamp.wrapping_sub(prev.timestamp),
        };
        let extended = ts_value >= EXTENDED_TIMESTAMP_THRESHOLD;
        let ts_field = ts_value.min(EXTENDED_TIMESTAMP_THRESHOLD);

        write_basic_header(csid, form.fmt(), buf);
        match form {
            HeaderForm::Large => {
                write_u24(ts_field, buf);
                write_u24(payload_len, buf);
                buf.put_u8(packet.message_type);
                buf.put_u32_le(packet.stream_id);
            }
            HeaderForm::Medium => {
                write_u24(ts_field, buf);
                write_u24(payload_len, buf);
                buf.put_u8(packet.message_type);
            }
            HeaderForm::Small => {
                write_u24(ts_field, buf);
            }
            HeaderForm::Minimum => {}
        }
        if extended {
            buf.put_u32(ts_value);
        }

        let mut chunks = packet.payload.chunks(chunk_size);
        if let Some(first) = chunks.next() {
            buf.put_slice(first);
        }
        for chunk in chunks {
            write_basic_header(csid, CHUNK_FMT_3, buf);
            if extended {
                buf.put_u32(ts_value);
            }
            buf.put_slice(chunk);
        }

        self.streams.insert(
            csid,
            MessageHeader {
                timestamp: packet.timestamp,
                timestamp_delta: ts_value,
                message_length: payload_len,
                message_type: packet.message_type,
                stream_id: packet.stream_id,
                extended,
            },
        );

        Ok(form)
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Select the most compact header form for the first chunk of a message
fn select_form(packet: &RtmpPacket, last: Option<&MessageHeader>) -> HeaderForm {
    let last = match last {
        Some(l) => l,
        None => return HeaderForm::Large,
    };

    // Deltas are unsigned, so a timestamp regression needs an absolute value
    if packet.stream_id != last.stream_id || packet.timestamp < last.timestamp {
        return HeaderForm::Large;
    }

    if packet.message_type != last.message_type
        || packet.payload.len() as u32 != last.message_length
    {
        return HeaderForm::Medium;
    }

    HeaderForm::Small
}

/// Write basic header
fn write_basic_header(csid: u32, fmt: u8, buf: &mut BytesMut) {
    if csid >= 64 + 256 {
        // 3-byte header
        buf.put_u8((fmt << 6) | 1);
        let csid_offset = csid - 64;
        buf.put_u8((csid_offset & 0xFF) as u8);
        buf.put_u8(((csid_offset >> 8) & 0xFF) as u8);
    } else if csid >= 64 {
        // 2-byte header
        buf.put_u8(fmt << 6);
        buf.put_u8((csid - 64) as u8);
    } else {
        // 1-byte header
        buf.put_u8((fmt << 6) | (csid as u8));
    }
}

/// Write 24-bit big-endian value
fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}
