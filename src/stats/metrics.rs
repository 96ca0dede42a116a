//! Statistics and metrics for RTMP sessions

use std::time::{Duration, Instant};

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Total bytes received
    pub bytes_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Number of video frames received
    pub video_frames: u64,
    /// Number of audio frames received
    pub audio_frames: u64,
    /// Number of metadata messages received
    pub metadata_frames: u64,
    /// Number of keyframes received
    pub keyframes: u64,
    /// Frames dropped while resuming or seeking
    pub dropped_frames: u64,
    /// Frames written while publishing
    pub frames_sent: u64,
    /// Acknowledgements sent
    pub acks_sent: u64,
    /// When the session connected
    pub connected_at: Option<Instant>,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Time since the session connected
    pub fn duration(&self) -> Duration {
        self.connected_at
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// Average receive bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }

    /// Media frames received of any kind
    pub fn frames_received(&self) -> u64 {
        self.video_frames + self.audio_frames + self.metadata_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconnected_stats() {
        let stats = SessionStats::new();
        assert_eq!(stats.duration(), Duration::ZERO);
        assert_eq!(stats.bitrate(), 0);
    }

    #[test]
    fn test_frames_received() {
        let stats = SessionStats {
            video_frames: 3,
            audio_frames: 4,
            metadata_frames: 1,
            ..Default::default()
        };
        assert_eq!(stats.frames_received(), 8);
    }
}
