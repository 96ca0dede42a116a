//! Wire constants used by the client
//!
//! Values follow the Adobe RTMP specification (December 2012, mirrored as
//! RFC 7425) and the conventions of deployed servers.

pub const RTMP_VERSION: u8 = 3;

// Default ports per scheme family
pub const RTMP_PORT: u16 = 1935;
pub const RTMPT_PORT: u16 = 80;
pub const RTMPS_PORT: u16 = 443;

/// Size of C1/C2 and S1/S2
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size both directions start from
pub const DEFAULT_CHUNK_SIZE: u32 = 128;
/// Outbound chunk size announced after connect unless configured otherwise
pub const RECOMMENDED_CHUNK_SIZE: u32 = 4096;
/// Largest chunk size accepted from the peer (24 bit field)
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;
/// Reassembly refuses messages larger than this
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Timestamps at or above this move to the 4 byte extended field
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

// Chunk stream ids the client writes on

pub const CSID_PROTOCOL_CONTROL: u32 = 2;
/// connect, createStream and other NetConnection commands
pub const CSID_COMMAND: u32 = 3;
pub const CSID_AUDIO: u32 = 4;
pub const CSID_DATA: u32 = 5;
pub const CSID_VIDEO: u32 = 6;
/// play, pause, seek and publish on a created stream
pub const CSID_STREAM_COMMAND: u32 = 8;

// Message type ids

pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
/// Data message whose body is AMF0 after a leading format byte
pub const MSG_DATA_AMF3: u8 = 15;
/// Command whose body is AMF0 after a leading format byte
pub const MSG_COMMAND_AMF3: u8 = 17;
/// onMetaData, @setDataFrame
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;
/// Run of FLV tags sharing one message header
pub const MSG_AGGREGATE: u8 = 22;

// User control event types

pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_STREAM_EOF: u16 = 1;
pub const UC_STREAM_DRY: u16 = 2;
pub const UC_SET_BUFFER_LENGTH: u16 = 3;
pub const UC_STREAM_IS_RECORDED: u16 = 4;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;
pub const UC_SWF_VERIFY_REQUEST: u16 = 26;
pub const UC_SWF_VERIFY_RESPONSE: u16 = 27;
/// Server side buffer drained (buffer toggling)
pub const UC_BUFFER_EMPTY: u16 = 31;
pub const UC_BUFFER_READY: u16 = 32;

// Set Peer Bandwidth limit types

pub const BANDWIDTH_LIMIT_HARD: u8 = 0;
/// Hard or soft depending on the previous limit
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// Command names

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CLOSE: &str = "close";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PAUSE: &str = "pause";
pub const CMD_SEEK: &str = "seek";
pub const CMD_SET_PLAYLIST: &str = "set_playlist";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";
pub const CMD_ON_STATUS: &str = "onStatus";
pub const CMD_ON_BW_DONE: &str = "onBWDone";
pub const CMD_CHECK_BW: &str = "_checkbw";
pub const CMD_ON_BW_CHECK: &str = "_onbwcheck";
pub const CMD_ON_BW_DONE_INTERNAL: &str = "_onbwdone";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_FC_UNPUBLISH: &str = "FCUnpublish";
pub const CMD_FC_SUBSCRIBE: &str = "FCSubscribe";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";
pub const CMD_ON_METADATA: &str = "onMetaData";

// onStatus codes

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NC_CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";
pub const NC_CONNECT_INVALID_APP: &str = "NetConnection.Connect.InvalidApp";

pub const NS_FAILED: &str = "NetStream.Failed";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";
pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";
pub const NS_PLAY_COMPLETE: &str = "NetStream.Play.Complete";
pub const NS_PLAY_FAILED: &str = "NetStream.Play.Failed";
pub const NS_PLAY_STREAM_NOT_FOUND: &str = "NetStream.Play.StreamNotFound";
pub const NS_PLAY_UNPUBLISH_NOTIFY: &str = "NetStream.Play.UnpublishNotify";
pub const NS_SEEK_NOTIFY: &str = "NetStream.Seek.Notify";
pub const NS_PAUSE_NOTIFY: &str = "NetStream.Pause.Notify";
pub const NS_UNPAUSE_NOTIFY: &str = "NetStream.Unpause.Notify";

// Client defaults

/// Acknowledgement window until the server announces one
pub const DEFAULT_WINDOW_ACK_SIZE: u32 = 2_500_000;
/// Buffer length sent with SetBufferLength, in ms
pub const DEFAULT_BUFFER_LENGTH: u32 = 1000;
pub const DEFAULT_FLASH_VER: &str = "LNX 9,0,124,2";

// Chunk basic header formats

/// 11 byte message header
pub const CHUNK_FMT_0: u8 = 0;
/// 7 bytes, same stream id
pub const CHUNK_FMT_1: u8 = 1;
/// 3 bytes, timestamp delta only
pub const CHUNK_FMT_2: u8 = 2;
/// No message header
pub const CHUNK_FMT_3: u8 = 3;
