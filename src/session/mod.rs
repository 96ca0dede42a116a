//! RTMP session state management
//!
//! This module tracks the state the connector mutates as messages flow:
//! - Connection phase (handshake, connect, play/publish, close)
//! - Flow control counters and control-message responses
//! - Outstanding invokes keyed by transaction id

pub mod invoke;
pub mod state;

pub use invoke::{InvokeRegistry, PendingCall, PendingInvoke};
pub use state::{BandwidthState, ControlEffect, PauseState, SessionPhase, SessionState};
