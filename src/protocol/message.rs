//! Typed view of reassembled RTMP messages
//!
//! [`RtmpMessage::from_packet`] turns a reassembled chunk stream packet into a
//! control message, command, data message or media payload; [`RtmpMessage::encode`]
//! goes the other way. Commands carried in AMF3 containers (types 15 and 17)
//! hold AMF0 bodies after one format byte and are parsed the same way.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfValue};
use crate::error::{AmfError, ProtocolError, Result};
use crate::protocol::chunk::RtmpPacket;
use crate::protocol::constants::*;

/// Parsed RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { csid: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4)
    UserControl(UserControlEvent),

    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth { size: u32, limit_type: u8 },

    /// Audio data (type 8)
    Audio { timestamp: u32, data: Bytes },

    /// Video data (type 9)
    Video { timestamp: u32, data: Bytes },

    /// AMF0 Command (type 20)
    Command(Command),

    /// AMF0 Data message (type 18) - metadata, etc.
    Data(DataMessage),

    /// AMF3 Command (type 17)
    CommandAmf3(Command),

    /// AMF3 Data message (type 15)
    DataAmf3(DataMessage),

    /// Aggregate message (type 22)
    Aggregate { timestamp: u32, data: Bytes },

    /// Unknown message type
    Unknown { type_id: u8, data: Bytes },
}

/// User Control Event
#[derive(Debug, Clone, PartialEq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    /// Server asks for the SWF verification response
    SwfVerifyRequest,
    /// Precomputed verification response
    SwfVerifyResponse(Bytes),
    BufferEmpty(u32),
    BufferReady(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// RTMP command (connect, play, _result, onStatus, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Command name
    pub name: String,
    /// Transaction ID
    pub transaction_id: f64,
    /// Command object (often null for responses)
    pub command_object: AmfValue,
    /// Additional arguments
    pub arguments: Vec<AmfValue>,
    /// Message stream ID (from chunk)
    pub stream_id: u32,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64) -> Self {
        Command {
            name: name.into(),
            transaction_id,
            command_object: AmfValue::Null,
            arguments: Vec::new(),
            stream_id: 0,
        }
    }

    pub fn with_object(mut self, object: AmfValue) -> Self {
        self.command_object = object;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<AmfValue>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn with_stream(mut self, stream_id: u32) -> Self {
        self.stream_id = stream_id;
        self
    }

    /// Status or information object: the first object-typed argument
    pub fn info(&self) -> Option<&AmfValue> {
        self.arguments
            .iter()
            .find(|a| a.as_object().is_some())
            .or_else(|| Some(&self.command_object).filter(|o| o.as_object().is_some()))
    }

    /// `code` of the information object
    pub fn status_code(&self) -> Option<&str> {
        self.info()?.get_string("code")
    }

    /// `description` of the information object
    pub fn status_description(&self) -> Option<&str> {
        self.info()?.get_string("description")
    }
}

/// Data message (@setDataFrame, onMetaData, etc.)
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Handler name (e.g., "@setDataFrame", "onMetaData")
    pub name: String,
    /// Data values
    pub values: Vec<AmfValue>,
    /// Message stream ID
    pub stream_id: u32,
}

fn need(payload: &Bytes, len: usize, message_type: u8) -> Result<()> {
    if payload.len() < len {
        return Err(ProtocolError::MalformedMessage { message_type }.into());
    }
    Ok(())
}

impl RtmpMessage {
    /// Parse a message from a reassembled packet
    ///
    /// Truncated control messages are protocol errors. Undecodable command
    /// and data bodies surface as [`crate::Error::Amf`].
    pub fn from_packet(packet: &RtmpPacket) -> Result<Self> {
        let mut payload = packet.payload.clone();
        let message_type = packet.message_type;

        match message_type {
            MSG_SET_CHUNK_SIZE => {
                need(&payload, 4, message_type)?;
                let size = payload.get_u32() & 0x7FFFFFFF; // Ignore MSB
                Ok(RtmpMessage::SetChunkSize(size))
            }

            MSG_ABORT => {
                need(&payload, 4, message_type)?;
                Ok(RtmpMessage::Abort {
                    csid: payload.get_u32(),
                })
            }

            MSG_ACKNOWLEDGEMENT => {
                need(&payload, 4, message_type)?;
                Ok(RtmpMessage::Acknowledgement {
                    sequence: payload.get_u32(),
                })
            }

            MSG_USER_CONTROL => Self::parse_user_control(&mut payload),

            MSG_WINDOW_ACK_SIZE => {
                need(&payload, 4, message_type)?;
                Ok(RtmpMessage::WindowAckSize(payload.get_u32()))
            }

            MSG_SET_PEER_BANDWIDTH => {
                need(&payload, 4, message_type)?;
                let size = payload.get_u32();
                // Some servers omit the limit type
                let limit_type = if payload.has_remaining() {
                    payload.get_u8()
                } else {
                    BANDWIDTH_LIMIT_DYNAMIC
                };
                Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
            }

            MSG_AUDIO => Ok(RtmpMessage::Audio {
                timestamp: packet.timestamp,
                data: payload,
            }),

            MSG_VIDEO => Ok(RtmpMessage::Video {
                timestamp: packet.timestamp,
                data: payload,
            }),

            MSG_COMMAND_AMF0 => {
                let cmd = Self::parse_command(&mut payload, packet.stream_id)?;
                Ok(RtmpMessage::Command(cmd))
            }

            MSG_COMMAND_AMF3 => {
                // AMF3 command bodies start with a format byte before AMF0 values
                if !payload.is_empty() && payload[0] == 0x00 {
                    payload.advance(1);
                }
                let cmd = Self::parse_command(&mut payload, packet.stream_id)?;
                Ok(RtmpMessage::CommandAmf3(cmd))
            }

            MSG_DATA_AMF0 => {
                let data = Self::parse_data(&mut payload, packet.stream_id)?;
                Ok(RtmpMessage::Data(data))
            }

            MSG_DATA_AMF3 => {
                if !payload.is_empty() && payload[0] == 0x00 {
                    payload.advance(1);
                }
                let data = Self::parse_data(&mut payload, packet.stream_id)?;
                Ok(RtmpMessage::DataAmf3(data))
            }

            MSG_AGGREGATE => Ok(RtmpMessage::Aggregate {
                timestamp: packet.timestamp,
                data: payload,
            }),

            _ => Ok(RtmpMessage::Unknown {
                type_id: message_type,
                data: payload,
            }),
        }
    }

    /// Parse User Control message
    fn parse_user_control(payload: &mut Bytes) -> Result<Self> {
        need(payload, 2, MSG_USER_CONTROL)?;
        let event_type = payload.get_u16();

        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(read_word(payload)?),
            UC_STREAM_EOF => UserControlEvent::StreamEof(read_word(payload)?),
            UC_STREAM_DRY => UserControlEvent::StreamDry(read_word(payload)?),
            UC_SET_BUFFER_LENGTH => {
                let stream_id = read_word(payload)?;
                let buffer_ms = read_word(payload)?;
                UserControlEvent::SetBufferLength {
                    stream_id,
                    buffer_ms,
                }
            }
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(read_word(payload)?),
            UC_PING_REQUEST => UserControlEvent::PingRequest(read_word(payload)?),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(read_word(payload)?),
            UC_SWF_VERIFY_REQUEST => UserControlEvent::SwfVerifyRequest,
            UC_SWF_VERIFY_RESPONSE => UserControlEvent::SwfVerifyResponse(payload.clone()),
            UC_BUFFER_EMPTY => UserControlEvent::BufferEmpty(read_word(payload)?),
            UC_BUFFER_READY => UserControlEvent::BufferReady(read_word(payload)?),
            _ => UserControlEvent::Unknown {
                event_type,
                data: payload.clone(),
            },
        };

        Ok(RtmpMessage::UserControl(event))
    }

    /// Parse AMF0 command
    fn parse_command(payload: &mut Bytes, stream_id: u32) -> Result<Command> {
        let mut decoder = Amf0Decoder::new();

        // Command name
        let marker = payload.first().copied().unwrap_or_default();
        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s.to_string_lossy(),
            _ => {
                return Err(AmfError::UnexpectedType {
                    expected: "command name",
                    marker,
                }
                .into())
            }
        };

        // Transaction ID
        let transaction_id = match decoder.decode(payload) {
            Ok(AmfValue::Number(n)) => n,
            Ok(_) => 0.0,
            // Some notifications carry only a name
            Err(AmfError::UnexpectedEof) if payload.is_empty() => 0.0,
            Err(e) => return Err(e.into()),
        };

        // Null for most replies
        let command_object = if payload.has_remaining() {
            decoder.decode(payload)?
        } else {
            AmfValue::Null
        };

        let arguments = decoder.decode_all(payload)?;

        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments,
            stream_id,
        })
    }

    /// Parse AMF0 data message
    fn parse_data(payload: &mut Bytes, stream_id: u32) -> Result<DataMessage> {
        let mut decoder = Amf0Decoder::new();

        let name = match decoder.decode(payload)? {
            AmfValue::String(s) => s.to_string_lossy(),
            _ => String::new(),
        };
        let values = decoder.decode_all(payload)?;

        Ok(DataMessage {
            name,
            values,
            stream_id,
        })
    }

    /// Type id and payload for the chunk layer
    pub fn encode(&self) -> (u8, Bytes) {
        match self {
            RtmpMessage::SetChunkSize(size) => (MSG_SET_CHUNK_SIZE, u32_body(*size)),

            RtmpMessage::Abort { csid } => (MSG_ABORT, u32_body(*csid)),

            RtmpMessage::Acknowledgement { sequence } => {
                (MSG_ACKNOWLEDGEMENT, u32_body(*sequence))
            }

            RtmpMessage::WindowAckSize(size) => (MSG_WINDOW_ACK_SIZE, u32_body(*size)),

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (MSG_SET_PEER_BANDWIDTH, buf.freeze())
            }

            RtmpMessage::UserControl(event) => (MSG_USER_CONTROL, encode_user_control(event)),

            RtmpMessage::Audio { data, .. } => (MSG_AUDIO, data.clone()),

            RtmpMessage::Video { data, .. } => (MSG_VIDEO, data.clone()),

            RtmpMessage::Command(cmd) => (MSG_COMMAND_AMF0, encode_command(cmd)),

            RtmpMessage::CommandAmf3(cmd) => {
                let mut buf = BytesMut::new();
                buf.put_u8(0x00);
                buf.put_slice(&encode_command(cmd));
                (MSG_COMMAND_AMF3, buf.freeze())
            }

            RtmpMessage::Data(data) => (MSG_DATA_AMF0, encode_data(data)),

            RtmpMessage::DataAmf3(data) => {
                let mut buf = BytesMut::new();
                buf.put_u8(0x00);
                buf.put_slice(&encode_data(data));
                (MSG_DATA_AMF3, buf.freeze())
            }

            RtmpMessage::Aggregate { data, .. } => (MSG_AGGREGATE, data.clone()),

            RtmpMessage::Unknown { type_id, data } => (*type_id, data.clone()),
        }
    }

    /// Chunk stream a message of this kind is sent on
    pub fn default_csid(&self) -> u32 {
        match self {
            RtmpMessage::SetChunkSize(_)
            | RtmpMessage::Abort { .. }
            | RtmpMessage::Acknowledgement { .. }
            | RtmpMessage::WindowAckSize(_)
            | RtmpMessage::SetPeerBandwidth { .. }
            | RtmpMessage::UserControl(_) => CSID_PROTOCOL_CONTROL,
            RtmpMessage::Audio { .. } => CSID_AUDIO,
            RtmpMessage::Video { .. } => CSID_VIDEO,
            RtmpMessage::Data(_) | RtmpMessage::DataAmf3(_) => CSID_DATA,
            RtmpMessage::Command(cmd) | RtmpMessage::CommandAmf3(cmd) if cmd.stream_id != 0 => {
                CSID_STREAM_COMMAND
            }
            _ => CSID_COMMAND,
        }
    }
}

fn read_word(payload: &mut Bytes) -> Result<u32> {
    need(payload, 4, MSG_USER_CONTROL)?;
    Ok(payload.get_u32())
}

fn u32_body(value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u32(value);
    buf.freeze()
}

fn encode_user_control(event: &UserControlEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    match event {
        UserControlEvent::StreamBegin(id) => {
            buf.put_u16(UC_STREAM_BEGIN);
            buf.put_u32(*id);
        }
        UserControlEvent::StreamEof(id) => {
            buf.put_u16(UC_STREAM_EOF);
            buf.put_u32(*id);
        }
        UserControlEvent::StreamDry(id) => {
            buf.put_u16(UC_STREAM_DRY);
            buf.put_u32(*id);
        }
        UserControlEvent::SetBufferLength {
            stream_id,
            buffer_ms,
        } => {
            buf.put_u16(UC_SET_BUFFER_LENGTH);
            buf.put_u32(*stream_id);
            buf.put_u32(*buffer_ms);
        }
        UserControlEvent::StreamIsRecorded(id) => {
            buf.put_u16(UC_STREAM_IS_RECORDED);
            buf.put_u32(*id);
        }
        UserControlEvent::PingRequest(ts) => {
            buf.put_u16(UC_PING_REQUEST);
            buf.put_u32(*ts);
        }
        UserControlEvent::PingResponse(ts) => {
            buf.put_u16(UC_PING_RESPONSE);
            buf.put_u32(*ts);
        }
        UserControlEvent::SwfVerifyRequest => {
            buf.put_u16(UC_SWF_VERIFY_REQUEST);
        }
        UserControlEvent::SwfVerifyResponse(data) => {
            buf.put_u16(UC_SWF_VERIFY_RESPONSE);
            buf.put_slice(data);
        }
        UserControlEvent::BufferEmpty(id) => {
            buf.put_u16(UC_BUFFER_EMPTY);
            buf.put_u32(*id);
        }
        UserControlEvent::BufferReady(id) => {
            buf.put_u16(UC_BUFFER_READY);
            buf.put_u32(*id);
        }
        UserControlEvent::Unknown { event_type, data } => {
            buf.put_u16(*event_type);
            buf.put_slice(data);
        }
    }
    buf.freeze()
}

/// Name, transaction id, command object, then arguments
fn encode_command(cmd: &Command) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(&AmfValue::from(cmd.name.as_str()));
    encoder.encode(&AmfValue::Number(cmd.transaction_id));
    encoder.encode(&cmd.command_object);
    encoder.encode_all(&cmd.arguments);
    encoder.finish()
}

/// Handler name followed by its values
fn encode_data(data: &DataMessage) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(&AmfValue::from(data.name.as_str()));
    encoder.encode_all(&data.values);
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::amf0::encode_all;
    use crate::amf::AmfObject;
    use crate::error::Error;

    fn packet(message_type: u8, payload: Bytes) -> RtmpPacket {
        RtmpPacket::new(CSID_COMMAND, message_type, 0, 0, payload)
    }

    #[test]
    fn test_command_roundtrip() {
        let cmd = Command::new(CMD_CONNECT, 1.0)
            .with_object(AmfValue::Object(AmfObject::new().with("app", "live")))
            .with_arg("test");

        let (message_type, payload) = RtmpMessage::Command(cmd.clone()).encode();
        assert_eq!(message_type, MSG_COMMAND_AMF0);

        let parsed = RtmpMessage::from_packet(&packet(message_type, payload)).unwrap();
        assert_eq!(parsed, RtmpMessage::Command(cmd));
    }

    #[test]
    fn test_amf3_command_skips_format_byte() {
        let cmd = Command::new(CMD_RESULT, 2.0).with_arg(1.0);
        let (message_type, payload) = RtmpMessage::CommandAmf3(cmd.clone()).encode();
        assert_eq!(payload[0], 0x00);

        match RtmpMessage::from_packet(&packet(message_type, payload)).unwrap() {
            RtmpMessage::CommandAmf3(parsed) => assert_eq!(parsed, cmd),
            other => panic!("expected AMF3 command, got {:?}", other),
        }
    }

    #[test]
    fn test_status_accessors() {
        let info = AmfObject::new()
            .with("level", "error")
            .with("code", NS_PLAY_STREAM_NOT_FOUND)
            .with("description", "no such stream");
        let cmd = Command::new(CMD_ON_STATUS, 0.0).with_arg(AmfValue::Object(info));

        assert_eq!(cmd.status_code(), Some(NS_PLAY_STREAM_NOT_FOUND));
        assert_eq!(cmd.status_description(), Some("no such stream"));
        assert_eq!(Command::new(CMD_RESULT, 1.0).status_code(), None);
    }

    #[test]
    fn test_control_messages() {
        let cases = [
            RtmpMessage::SetChunkSize(4096),
            RtmpMessage::Abort { csid: 6 },
            RtmpMessage::Acknowledgement { sequence: 2_500_000 },
            RtmpMessage::WindowAckSize(2_500_000),
            RtmpMessage::SetPeerBandwidth {
                size: 2_500_000,
                limit_type: BANDWIDTH_LIMIT_DYNAMIC,
            },
            RtmpMessage::UserControl(UserControlEvent::PingRequest(1234)),
            RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
                stream_id: 1,
                buffer_ms: 3000,
            }),
            RtmpMessage::UserControl(UserControlEvent::BufferEmpty(1)),
            RtmpMessage::UserControl(UserControlEvent::SwfVerifyRequest),
        ];

        for message in cases {
            let (message_type, payload) = message.encode();
            let parsed = RtmpMessage::from_packet(&packet(message_type, payload)).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn test_chunk_size_ignores_msb() {
        let payload = Bytes::from_static(&[0x80, 0x00, 0x10, 0x00]);
        let parsed = RtmpMessage::from_packet(&packet(MSG_SET_CHUNK_SIZE, payload)).unwrap();
        assert_eq!(parsed, RtmpMessage::SetChunkSize(4096));
    }

    #[test]
    fn test_peer_bandwidth_without_limit_type() {
        let payload = Bytes::from_static(&[0x00, 0x26, 0x25, 0xA0]);
        let parsed = RtmpMessage::from_packet(&packet(MSG_SET_PEER_BANDWIDTH, payload)).unwrap();
        assert_eq!(
            parsed,
            RtmpMessage::SetPeerBandwidth {
                size: 2_500_000,
                limit_type: BANDWIDTH_LIMIT_DYNAMIC,
            }
        );
    }

    #[test]
    fn test_truncated_control_is_protocol_error() {
        let payload = Bytes::from_static(&[0x00, 0x06, 0x00]);
        let err = RtmpMessage::from_packet(&packet(MSG_USER_CONTROL, payload)).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MalformedMessage { message_type: 4 })
        ));
    }

    #[test]
    fn test_undecodable_command_is_amf_error() {
        // String marker then a truncated length
        let payload = Bytes::from_static(&[0x02, 0x00, 0x07, b'c', b'o']);
        let err = RtmpMessage::from_packet(&packet(MSG_COMMAND_AMF0, payload)).unwrap_err();
        assert!(matches!(err, Error::Amf(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_nameless_command_is_amf_error() {
        // A complete number where the command name belongs
        let payload = encode_all(&[AmfValue::Number(1.0), AmfValue::Null]);
        let err = RtmpMessage::from_packet(&packet(MSG_COMMAND_AMF0, payload)).unwrap_err();
        assert!(matches!(
            err,
            Error::Amf(AmfError::UnexpectedType {
                expected: "command name",
                marker: 0x00
            })
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_metadata_message() {
        let data = DataMessage {
            name: CMD_ON_METADATA.into(),
            values: vec![AmfValue::EcmaArray(
                AmfObject::new().with("duration", 12.5).with("width", 1280.0),
            )],
            stream_id: 1,
        };
        let (message_type, payload) = RtmpMessage::Data(data.clone()).encode();
        let mut p = packet(message_type, payload);
        p.stream_id = 1;

        match RtmpMessage::from_packet(&p).unwrap() {
            RtmpMessage::Data(parsed) => {
                assert_eq!(parsed.name, CMD_ON_METADATA);
                assert_eq!(parsed.values[0].get_number("duration"), Some(12.5));
            }
            other => panic!("expected data message, got {:?}", other),
        }
    }

    #[test]
    fn test_default_csid() {
        assert_eq!(RtmpMessage::SetChunkSize(1).default_csid(), CSID_PROTOCOL_CONTROL);
        assert_eq!(
            RtmpMessage::Command(Command::new(CMD_CONNECT, 1.0)).default_csid(),
            CSID_COMMAND
        );
        assert_eq!(
            RtmpMessage::Command(Command::new(CMD_PLAY, 0.0).with_stream(1)).default_csid(),
            CSID_STREAM_COMMAND
        );
        assert_eq!(
            RtmpMessage::Video {
                timestamp: 0,
                data: Bytes::new()
            }
            .default_csid(),
            CSID_VIDEO
        );
    }
}
