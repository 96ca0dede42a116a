//! Session phase, flow control and control-message handling

use bytes::Bytes;

use crate::client::config::LinkConfig;
use crate::error::{ProtocolError, Result, UsageError};
use crate::protocol::constants::*;
use crate::protocol::message::{RtmpMessage, UserControlEvent};

/// Connection sequencing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Handshaking,
    /// connect sent, waiting for `_result`
    Connecting,
    /// Application connected; createStream may be outstanding
    Connected,
    Playing,
    Publishing,
    Closing,
    Closed,
}

impl SessionPhase {
    /// Closing or Closed
    pub fn is_closed(self) -> bool {
        matches!(self, SessionPhase::Closing | SessionPhase::Closed)
    }

    /// Media flowing in either direction
    pub fn is_streaming(self) -> bool {
        matches!(self, SessionPhase::Playing | SessionPhase::Publishing)
    }
}

/// Inbound byte accounting and peer bandwidth
#[derive(Debug, Clone)]
pub struct BandwidthState {
    /// Total bytes received from the transport
    pub bytes_in: u64,
    /// `bytes_in` at the last acknowledgement
    pub bytes_in_acked: u64,
    /// Acknowledge after this many unacknowledged bytes
    pub window_ack_size: u32,
    /// Limit requested with Set Peer Bandwidth
    pub peer_bandwidth: u32,
    pub limit_type: u8,
    /// Window size last announced to the peer
    pub announced_window: u32,
}

impl Default for BandwidthState {
    fn default() -> Self {
        Self {
            bytes_in: 0,
            bytes_in_acked: 0,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            peer_bandwidth: DEFAULT_WINDOW_ACK_SIZE,
            limit_type: BANDWIDTH_LIMIT_DYNAMIC,
            announced_window: 0,
        }
    }
}

impl BandwidthState {
    /// Count received bytes; returns the sequence number to acknowledge
    /// once a full window is outstanding.
    pub fn record_received(&mut self, n: usize) -> Option<u32> {
        self.bytes_in += n as u64;
        if self.window_ack_size == 0 {
            return None;
        }
        if self.bytes_in - self.bytes_in_acked >= self.window_ack_size as u64 {
            self.bytes_in_acked = self.bytes_in;
            // Sequence numbers wrap at 32 bits
            return Some(self.bytes_in as u32);
        }
        None
    }

    pub fn unacked(&self) -> u64 {
        self.bytes_in - self.bytes_in_acked
    }
}

/// Buffer-empty pause toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PauseState {
    #[default]
    Running,
    /// Paused by the caller
    Paused,
    /// Paused because the server buffer ran dry
    BufferPaused,
}

/// What the connector must do after a control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEffect {
    None,
    /// Apply a new inbound chunk size
    InChunkSize(u32),
    /// Drop the partial message on a chunk stream
    AbortChannel(u32),
    /// Send this message back
    Reply(RtmpMessage),
    /// Send pause(true) or pause(false) at the current media timestamp
    TogglePause(bool),
}

/// Mutable per-session state owned by the connector
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Message stream id from createStream (0 = none yet)
    pub stream_id: u32,
    pub bandwidth: BandwidthState,
    pub in_chunk_size: u32,
    pub out_chunk_size: u32,
    pub pause: PauseState,
    /// Timestamp of the last media frame received
    pub media_timestamp: u32,
    /// Duration from onMetaData, in seconds
    pub duration: Option<f64>,
    /// Server-side seek in progress
    pub seeking: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            stream_id: 0,
            bandwidth: BandwidthState::default(),
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            pause: PauseState::Running,
            media_timestamp: 0,
            duration: None,
            seeking: false,
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `operation` unless the session is in one of `allowed`
    pub fn require(&self, operation: &'static str, allowed: &[SessionPhase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(UsageError::WrongPhase {
                operation,
                phase: self.phase,
            }
            .into())
        }
    }

    pub fn transition(&mut self, to: SessionPhase) {
        if self.phase != to {
            tracing::debug!(from = ?self.phase, to = ?to, "Session phase change");
            self.phase = to;
        }
    }

    /// Apply a protocol control or user control message
    pub fn apply_control(&mut self, msg: &RtmpMessage, link: &LinkConfig) -> Result<ControlEffect> {
        match msg {
            RtmpMessage::SetChunkSize(size) => {
                if *size == 0 || *size > MAX_CHUNK_SIZE {
                    return Err(ProtocolError::InvalidChunkSize(*size).into());
                }
                tracing::debug!(size, "Peer chunk size changed");
                self.in_chunk_size = *size;
                Ok(ControlEffect::InChunkSize(*size))
            }

            RtmpMessage::Abort { csid } => Ok(ControlEffect::AbortChannel(*csid)),

            RtmpMessage::Acknowledgement { sequence } => {
                tracing::trace!(sequence, "Peer acknowledged");
                Ok(ControlEffect::None)
            }

            RtmpMessage::WindowAckSize(size) => {
                tracing::debug!(size, "Window ack size set");
                self.bandwidth.window_ack_size = *size;
                Ok(ControlEffect::None)
            }

            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                // Dynamic keeps the previous limit type
                if *limit_type != BANDWIDTH_LIMIT_DYNAMIC {
                    self.bandwidth.limit_type = *limit_type;
                }
                self.bandwidth.peer_bandwidth = *size;
                tracing::debug!(size, limit_type, "Peer bandwidth set");

                if self.bandwidth.announced_window != *size {
                    self.bandwidth.announced_window = *size;
                    return Ok(ControlEffect::Reply(RtmpMessage::WindowAckSize(*size)));
                }
                Ok(ControlEffect::None)
            }

            RtmpMessage::UserControl(event) => Ok(self.apply_user_control(event, link)),

            _ => Ok(ControlEffect::None),
        }
    }

    fn apply_user_control(&mut self, event: &UserControlEvent, link: &LinkConfig) -> ControlEffect {
        match event {
            UserControlEvent::PingRequest(timestamp) => ControlEffect::Reply(
                RtmpMessage::UserControl(UserControlEvent::PingResponse(*timestamp)),
            ),

            UserControlEvent::BufferEmpty(stream_id) => {
                if link.flags.buffer_toggle && self.pause == PauseState::Running {
                    tracing::debug!(stream_id, "Server buffer empty, pausing");
                    self.pause = PauseState::BufferPaused;
                    return ControlEffect::TogglePause(true);
                }
                ControlEffect::None
            }

            UserControlEvent::BufferReady(stream_id) => {
                if self.pause == PauseState::BufferPaused {
                    tracing::debug!(stream_id, "Server buffer ready, resuming");
                    self.pause = PauseState::Running;
                    return ControlEffect::TogglePause(false);
                }
                ControlEffect::None
            }

            UserControlEvent::SwfVerifyRequest => match swf_response(link) {
                Some(response) => ControlEffect::Reply(RtmpMessage::UserControl(
                    UserControlEvent::SwfVerifyResponse(response),
                )),
                None => {
                    tracing::warn!("SWF verification requested but not configured");
                    ControlEffect::None
                }
            },

            UserControlEvent::StreamBegin(id)
            | UserControlEvent::StreamEof(id)
            | UserControlEvent::StreamDry(id)
            | UserControlEvent::StreamIsRecorded(id) => {
                tracing::debug!(stream_id = id, event = ?event, "Stream event");
                ControlEffect::None
            }

            UserControlEvent::Unknown { event_type, .. } => {
                tracing::warn!(event_type, "Unknown user control event");
                ControlEffect::None
            }

            _ => ControlEffect::None,
        }
    }
}

fn swf_response(link: &LinkConfig) -> Option<Bytes> {
    if !link.flags.swf_verify {
        return None;
    }
    link.swf_verification.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::config::ClientConfig;
    use crate::error::Error;

    fn link() -> LinkConfig {
        LinkConfig::from_config(&ClientConfig::new("rtmp://localhost/live/stream1")).unwrap()
    }

    #[test]
    fn test_ack_window() {
        let mut bw = BandwidthState {
            window_ack_size: 1000,
            ..Default::default()
        };
        assert_eq!(bw.record_received(600), None);
        assert_eq!(bw.unacked(), 600);
        assert_eq!(bw.record_received(400), Some(1000));
        assert_eq!(bw.unacked(), 0);
        assert_eq!(bw.record_received(999), None);
        assert_eq!(bw.record_received(5), Some(2004));
    }

    #[test]
    fn test_ack_sequence_wraps() {
        let mut bw = BandwidthState {
            window_ack_size: 10,
            bytes_in: u32::MAX as u64,
            bytes_in_acked: u32::MAX as u64,
            ..Default::default()
        };
        assert_eq!(bw.record_received(11), Some(10));
    }

    #[test]
    fn test_ping_answered_with_same_timestamp() {
        let mut state = SessionState::new();
        let effect = state
            .apply_control(
                &RtmpMessage::UserControl(UserControlEvent::PingRequest(0xDEAD)),
                &link(),
            )
            .unwrap();
        assert_eq!(
            effect,
            ControlEffect::Reply(RtmpMessage::UserControl(UserControlEvent::PingResponse(
                0xDEAD
            )))
        );
    }

    #[test]
    fn test_chunk_size_change() {
        let mut state = SessionState::new();
        let effect = state
            .apply_control(&RtmpMessage::SetChunkSize(4096), &link())
            .unwrap();
        assert_eq!(effect, ControlEffect::InChunkSize(4096));
        assert_eq!(state.in_chunk_size, 4096);

        let err = state
            .apply_control(&RtmpMessage::SetChunkSize(0), &link())
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidChunkSize(0))));
        assert!(err.is_fatal());
        assert_eq!(state.in_chunk_size, 4096);
    }

    #[test]
    fn test_peer_bandwidth_announces_window_once() {
        let mut state = SessionState::new();
        let msg = RtmpMessage::SetPeerBandwidth {
            size: 5_000_000,
            limit_type: BANDWIDTH_LIMIT_HARD,
        };
        assert_eq!(
            state.apply_control(&msg, &link()).unwrap(),
            ControlEffect::Reply(RtmpMessage::WindowAckSize(5_000_000))
        );
        assert_eq!(state.apply_control(&msg, &link()).unwrap(), ControlEffect::None);

        let dynamic = RtmpMessage::SetPeerBandwidth {
            size: 5_000_000,
            limit_type: BANDWIDTH_LIMIT_DYNAMIC,
        };
        state.apply_control(&dynamic, &link()).unwrap();
        assert_eq!(state.bandwidth.limit_type, BANDWIDTH_LIMIT_HARD);
    }

    #[test]
    fn test_window_ack_size_updates_threshold() {
        let mut state = SessionState::new();
        state
            .apply_control(&RtmpMessage::WindowAckSize(128), &link())
            .unwrap();
        assert_eq!(state.bandwidth.window_ack_size, 128);
        assert_eq!(state.bandwidth.record_received(128), Some(128));
    }

    #[test]
    fn test_buffer_toggle() {
        let mut toggled = link();
        toggled.flags.buffer_toggle = true;
        let mut state = SessionState::new();

        let empty = RtmpMessage::UserControl(UserControlEvent::BufferEmpty(1));
        let ready = RtmpMessage::UserControl(UserControlEvent::BufferReady(1));

        assert_eq!(
            state.apply_control(&empty, &toggled).unwrap(),
            ControlEffect::TogglePause(true)
        );
        assert_eq!(state.pause, PauseState::BufferPaused);
        // Already paused
        assert_eq!(state.apply_control(&empty, &toggled).unwrap(), ControlEffect::None);
        assert_eq!(
            state.apply_control(&ready, &toggled).unwrap(),
            ControlEffect::TogglePause(false)
        );
        assert_eq!(state.pause, PauseState::Running);

        // Toggle disabled
        let mut state = SessionState::new();
        assert_eq!(state.apply_control(&empty, &link()).unwrap(), ControlEffect::None);
    }

    #[test]
    fn test_swf_verification() {
        let request = RtmpMessage::UserControl(UserControlEvent::SwfVerifyRequest);
        let mut state = SessionState::new();
        assert_eq!(state.apply_control(&request, &link()).unwrap(), ControlEffect::None);

        let mut verified = link();
        verified.flags.swf_verify = true;
        verified.swf_verification = Some(Bytes::from_static(&[1, 1, 0xAB]));
        assert_eq!(
            state.apply_control(&request, &verified).unwrap(),
            ControlEffect::Reply(RtmpMessage::UserControl(
                UserControlEvent::SwfVerifyResponse(Bytes::from_static(&[1, 1, 0xAB]))
            ))
        );
    }

    #[test]
    fn test_require_phase() {
        let mut state = SessionState::new();
        assert!(state.require("play", &[SessionPhase::Connected]).is_err());
        state.transition(SessionPhase::Connected);
        assert!(state.require("play", &[SessionPhase::Connected]).is_ok());
        assert!(SessionPhase::Closing.is_closed());
        assert!(SessionPhase::Playing.is_streaming());
        assert!(!SessionPhase::Connected.is_streaming());
    }
}
