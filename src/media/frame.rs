//! Media frames as seen by the caller

use bytes::Bytes;

use crate::protocol::constants::*;

use super::flv::{is_video_keyframe, FlvTag, FlvTagType};

/// Kind of data carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Audio,
    Video,
    /// Script data (onMetaData and other notifications)
    Metadata,
}

impl FrameKind {
    pub fn from_type_id(type_id: u8) -> Option<Self> {
        match type_id {
            MSG_AUDIO => Some(FrameKind::Audio),
            MSG_VIDEO => Some(FrameKind::Video),
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => Some(FrameKind::Metadata),
            _ => None,
        }
    }

    /// Message type used to send this kind
    pub fn type_id(self) -> u8 {
        match self {
            FrameKind::Audio => MSG_AUDIO,
            FrameKind::Video => MSG_VIDEO,
            FrameKind::Metadata => MSG_DATA_AMF0,
        }
    }

    /// Chunk stream used to send this kind
    pub fn csid(self) -> u32 {
        match self {
            FrameKind::Audio => CSID_AUDIO,
            FrameKind::Video => CSID_VIDEO,
            FrameKind::Metadata => CSID_DATA,
        }
    }
}

impl From<FlvTagType> for FrameKind {
    fn from(tag_type: FlvTagType) -> Self {
        match tag_type {
            FlvTagType::Audio => FrameKind::Audio,
            FlvTagType::Video => FrameKind::Video,
            FlvTagType::Script => FrameKind::Metadata,
        }
    }
}

/// One audio, video or script frame
///
/// `payload` is a reference-counted slice of the received message body.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFrame {
    pub kind: FrameKind,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    pub payload: Bytes,
}

impl MediaFrame {
    pub fn new(kind: FrameKind, timestamp: u32, payload: Bytes) -> Self {
        Self {
            kind,
            timestamp,
            payload,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.kind == FrameKind::Video && is_video_keyframe(&self.payload)
    }

    pub fn to_flv_tag(&self) -> FlvTag {
        let tag_type = match self.kind {
            FrameKind::Audio => FlvTagType::Audio,
            FrameKind::Video => FlvTagType::Video,
            FrameKind::Metadata => FlvTagType::Script,
        };
        FlvTag::new(tag_type, self.timestamp, self.payload.clone())
    }
}

impl From<FlvTag> for MediaFrame {
    fn from(tag: FlvTag) -> Self {
        MediaFrame::new(tag.tag_type.into(), tag.timestamp, tag.data)
    }
}
