//! FLV tags
//!
//! FLV (Flash Video) is the container format used by RTMP for audio/video data.
//! Each RTMP audio/video message is essentially an FLV tag without the tag header.
//!
//! FLV Tag Structure:
//! ```text
//! +--------+-------------+--------+--------+-------------+---------+--------------+
//! | Type(1)| DataSize(3) | TS(3)  | TSx(1) | StreamID(3) | Data(N) | PrevSize(4)  |
//! +--------+-------------+--------+--------+-------------+---------+--------------+
//! ```
//!
//! Aggregate messages (type 22) carry a run of complete tags, back-pointers
//! included. [`split_aggregate`] turns one into individual tags.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::{MSG_AGGREGATE, MSG_AUDIO, MSG_DATA_AMF0, MSG_VIDEO};

/// Size of the FLV file header plus the first back-pointer
pub const FLV_HEADER_SIZE: usize = 13;

/// Size of a tag header
pub const TAG_HEADER_SIZE: usize = 11;

const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;

/// FLV tag type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_type_id(type_id: u8) -> Option<Self> {
        match type_id {
            MSG_AUDIO => Some(FlvTagType::Audio),
            MSG_VIDEO => Some(FlvTagType::Video),
            MSG_DATA_AMF0 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn type_id(self) -> u8 {
        match self {
            FlvTagType::Audio => MSG_AUDIO,
            FlvTagType::Video => MSG_VIDEO,
            FlvTagType::Script => MSG_DATA_AMF0,
        }
    }
}

/// One FLV tag
#[derive(Debug, Clone, PartialEq)]
pub struct FlvTag {
    /// Tag type
    pub tag_type: FlvTagType,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Raw tag data (including codec headers)
    pub data: Bytes,
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        // Enhanced RTMP sets the top bit and uses the next three for the frame type
        let frame_type = if b & 0x80 != 0 {
            (b >> 4) & 0x07
        } else {
            (b >> 4) & 0x0F
        };
        match frame_type {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe)
    }
}

/// Whether a video payload starts a keyframe
pub fn is_video_keyframe(data: &[u8]) -> bool {
    data.first()
        .and_then(|b| VideoFrameType::from_byte(*b))
        .is_some_and(|ft| ft.is_keyframe())
}

impl FlvTag {
    pub fn new(tag_type: FlvTagType, timestamp: u32, data: Bytes) -> Self {
        Self {
            tag_type,
            timestamp,
            data,
        }
    }

    /// Create a new video tag
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Video, timestamp, data)
    }

    /// Create a new audio tag
    pub fn audio(timestamp: u32, data: Bytes) -> Self {
        Self::new(FlvTagType::Audio, timestamp, data)
    }

    /// Check if this is a video tag
    pub fn is_video(&self) -> bool {
        self.tag_type == FlvTagType::Video
    }

    /// Check if this is an audio tag
    pub fn is_audio(&self) -> bool {
        self.tag_type == FlvTagType::Audio
    }

    /// Check if this is a keyframe
    pub fn is_keyframe(&self) -> bool {
        self.is_video() && is_video_keyframe(&self.data)
    }

    /// Get the size of the tag data
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes this tag occupies in a file, back-pointer included
    pub fn encoded_len(&self) -> usize {
        TAG_HEADER_SIZE + self.data.len() + 4
    }

    /// Append the tag header, data and back-pointer
    pub fn write(&self, out: &mut BytesMut) {
        let size = self.data.len() as u32;
        out.reserve(self.encoded_len());
        out.put_u8(self.tag_type.type_id());
        put_u24(out, size);
        put_u24(out, self.timestamp & 0x00FF_FFFF);
        out.put_u8((self.timestamp >> 24) as u8);
        put_u24(out, 0);
        out.put_slice(&self.data);
        out.put_u32(TAG_HEADER_SIZE as u32 + size);
    }
}

/// Append the 9-byte FLV header followed by the zero back-pointer
pub fn write_header(has_audio: bool, has_video: bool, out: &mut BytesMut) {
    let mut flags = 0;
    if has_audio {
        flags |= FLAG_AUDIO;
    }
    if has_video {
        flags |= FLAG_VIDEO;
    }

    out.put_slice(b"FLV");
    out.put_u8(1);
    out.put_u8(flags);
    out.put_u32(9);
    out.put_u32(0);
}

/// Split an aggregate message into its tags
///
/// Sub-tag timestamps are rebased so the first tag lands on `timestamp`,
/// the timestamp of the aggregate message itself. Tags of unknown type are
/// skipped.
pub fn split_aggregate(timestamp: u32, payload: &Bytes) -> Result<Vec<FlvTag>> {
    let malformed = || ProtocolError::MalformedMessage {
        message_type: MSG_AGGREGATE,
    };

    let mut buf = payload.clone();
    let mut tags = Vec::new();
    let mut first_ts: Option<u32> = None;

    while buf.remaining() >= TAG_HEADER_SIZE {
        let type_id = buf.get_u8() & 0x1F;
        let size = get_u24(&mut buf) as usize;
        let low = get_u24(&mut buf);
        let high = buf.get_u8() as u32;
        let _stream_id = get_u24(&mut buf);

        if buf.remaining() < size {
            return Err(malformed().into());
        }
        let data = buf.split_to(size);

        // Back-pointer; the final one is sometimes omitted
        if buf.remaining() >= 4 {
            buf.advance(4);
        } else {
            buf.advance(buf.remaining());
        }

        let tag_ts = (high << 24) | low;
        let base = *first_ts.get_or_insert(tag_ts);
        let rebased = timestamp.wrapping_add(tag_ts.wrapping_sub(base));

        match FlvTagType::from_type_id(type_id) {
            Some(tag_type) => tags.push(FlvTag::new(tag_type, rebased, data)),
            None => tracing::debug!(type_id, "Skipping aggregate sub-tag"),
        }
    }

    if buf.has_remaining() {
        return Err(malformed().into());
    }
    Ok(tags)
}

fn put_u24(out: &mut BytesMut, value: u32) {
    out.put_u8((value >> 16) as u8);
    out.put_u8((value >> 8) as u8);
    out.put_u8(value as u8);
}

fn get_u24(buf: &mut Bytes) -> u32 {
    let b = [buf.get_u8(), buf.get_u8(), buf.get_u8()];
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_frame_type() {
        // Keyframe + AVC
        assert_eq!(VideoFrameType::from_byte(0x17), Some(VideoFrameType::Keyframe));
        // Inter frame + AVC
        assert_eq!(VideoFrameType::from_byte(0x27), Some(VideoFrameType::InterFrame));
        // Enhanced RTMP keyframe
        assert_eq!(VideoFrameType::from_byte(0x90), Some(VideoFrameType::Keyframe));

        assert!(is_video_keyframe(&[0x17, 0x01]));
        assert!(!is_video_keyframe(&[0x27, 0x01]));
        assert!(!is_video_keyframe(&[]));
    }

    #[test]
    fn test_header_layout() {
        let mut out = BytesMut::new();
        write_header(true, true, &mut out);
        assert_eq!(
            &out[..],
            &[b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 9, 0, 0, 0, 0]
        );
        assert_eq!(out.len(), FLV_HEADER_SIZE);

        let mut out = BytesMut::new();
        write_header(false, true, &mut out);
        assert_eq!(out[4], 0x01);
    }

    #[test]
    fn test_tag_layout() {
        let tag = FlvTag::audio(0x0102_0304, Bytes::from_static(&[0xAF, 0x01, 0x21]));
        let mut out = BytesMut::new();
        tag.write(&mut out);

        assert_eq!(out.len(), tag.encoded_len());
        assert_eq!(out[0], MSG_AUDIO);
        assert_eq!(&out[1..4], &[0, 0, 3]);
        // Lower 24 bits then the extension byte
        assert_eq!(&out[4..8], &[0x02, 0x03, 0x04, 0x01]);
        assert_eq!(&out[8..11], &[0, 0, 0]);
        assert_eq!(&out[11..14], &[0xAF, 0x01, 0x21]);
        assert_eq!(&out[14..18], &14u32.to_be_bytes());
    }

    #[test]
    fn test_split_aggregate_rebases_timestamps() {
        let mut payload = BytesMut::new();
        FlvTag::video(5000, Bytes::from_static(&[0x17, 0x01])).write(&mut payload);
        FlvTag::audio(5020, Bytes::from_static(&[0xAF, 0x01])).write(&mut payload);
        FlvTag::video(5040, Bytes::from_static(&[0x27, 0x01])).write(&mut payload);

        let tags = split_aggregate(100, &payload.freeze()).unwrap();
        let summary: Vec<(FlvTagType, u32)> =
            tags.iter().map(|t| (t.tag_type, t.timestamp)).collect();
        assert_eq!(
            summary,
            [
                (FlvTagType::Video, 100),
                (FlvTagType::Audio, 120),
                (FlvTagType::Video, 140)
            ]
        );
        assert!(tags[0].is_keyframe());
    }

    #[test]
    fn test_split_aggregate_without_final_back_pointer() {
        let mut payload = BytesMut::new();
        FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x01])).write(&mut payload);
        payload.truncate(payload.len() - 4);

        let tags = split_aggregate(7, &payload.freeze()).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].timestamp, 7);
    }

    #[test]
    fn test_split_aggregate_truncated() {
        let mut payload = BytesMut::new();
        FlvTag::video(0, Bytes::from_static(&[0x17, 0x01, 0x02, 0x03])).write(&mut payload);
        payload.truncate(TAG_HEADER_SIZE + 2);

        assert!(split_aggregate(0, &payload.freeze()).is_err());
    }
}
