//! Media handling for RTMP
//!
//! Frame model, FLV file output and aggregate message splitting.
//! Payloads are passed through untouched; no codec parsing happens here.

pub mod flv;
pub mod frame;

pub use flv::{FlvTag, FlvTagType, VideoFrameType};
pub use frame::{FrameKind, MediaFrame};
