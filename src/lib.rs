//! rtmp-client: async RTMP client engine
//!
//! Connects to an RTMP server, negotiates the handshake, multiplexes the
//! chunk stream and exchanges AMF0 commands, then delivers media frames
//! pulled by the caller:
//! - AMF0 value codec
//! - URL and link configuration parsing (librtmp style options)
//! - Chunk stream fragmentation and reassembly with header compression
//! - Control protocol: chunk size, window acknowledgements, ping, buffer events
//! - connect / createStream / play / publish with transaction tracking
//! - Frame or FLV reading with resume and seek
//!
//! # Example: Pull a stream
//!
//! ```no_run
//! use rtmp_client::{ClientConfig, RtmpPuller};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::parse("rtmp://localhost/live/stream1 live=1")?;
//!     let mut puller = RtmpPuller::open(config).await?;
//!
//!     while let Some(frame) = puller.next_frame().await? {
//!         println!("{:?} at {} ms, {} bytes", frame.kind, frame.timestamp, frame.payload.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod transport;

// Re-export main types for convenience
pub use client::config::{ClientConfig, LinkConfig};
pub use client::connector::{CloseHandle, RtmpConnector};
pub use client::puller::{ResumeOptions, RtmpPuller};
pub use error::{Error, Result};
pub use media::{FrameKind, MediaFrame};
pub use transport::{StreamTransport, Transport};
