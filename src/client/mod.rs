//! RTMP client implementation
//!
//! - [`config`]: caller options and the resolved link configuration
//! - [`commands`]: builders for the commands a client sends
//! - [`connector`]: the session itself
//! - [`puller`]: pull-based media reading with resume and seek

pub mod commands;
pub mod config;
pub mod connector;
pub mod puller;

pub use config::{ClientConfig, LinkConfig, ParsedUrl, Protocol};
pub use connector::{CloseHandle, RtmpConnector};
pub use puller::{ReadCursor, ReadStatus, ResumeOptions, RtmpPuller};
