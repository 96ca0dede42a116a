//! AMF (Action Message Format) implementation
//!
//! AMF0 is the loosely-typed object notation RTMP uses to encode command
//! invocations and stream metadata. AMF3 command messages (type 17) carry
//! an AMF0 payload behind a one-byte prefix, so only AMF0 is implemented.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::{AmfObject, AmfString, AmfValue};
