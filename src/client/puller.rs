//! RTMP stream puller
//!
//! Pull-based media reading on top of [`RtmpConnector`]. Each call to
//! [`RtmpPuller::next_frame`] yields one frame in arrival order; the
//! sequence ends with `None` once the session closes, and stops for good
//! after an error.
//!
//! A read can resume an earlier one: frames before the resume point are
//! discarded until the stream lines up with what the original read saw,
//! and a stream that never lines up ends the read with
//! [`Error::ResumeMismatch`].

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use crate::amf::amf0;
use crate::error::{Error, Result, UsageError};
use crate::media::flv::{self, split_aggregate, FLV_HEADER_SIZE};
use crate::media::{FrameKind, MediaFrame};
use crate::protocol::chunk::RtmpPacket;
use crate::protocol::constants::*;
use crate::stats::SessionStats;
use crate::transport::Transport;

use super::config::ClientConfig;
use super::connector::{CloseHandle, RtmpConnector};

/// Frames a resumed read may discard before giving up
pub const MAX_IGNORED_FRAMES: u32 = 50;

/// Frames buffered to decide the FLV header flags
const HEADER_SCAN_FRAMES: usize = 32;

/// Outcome of the last frame handed to a [`ReadCursor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    /// Frame discarded while resuming or seeking
    Ignore,
    Eof,
    Error,
    /// First frame after the resume point lined up
    ResumeComplete,
}

/// Where an earlier read left off
#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    /// Timestamp of the frame to resume at, usually the last keyframe delivered
    pub timestamp: u32,
    /// Frame the original read delivered at `timestamp`
    pub initial_frame: Option<MediaFrame>,
    /// onMetaData body the original read delivered
    pub metadata: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ReadFlags {
    need_header: bool,
    resuming: bool,
    seeking: bool,
    seen_video: bool,
}

/// Media consumption state
///
/// Decides frame by frame whether to deliver, discard or fail.
#[derive(Debug, Clone)]
pub struct ReadCursor {
    flags: ReadFlags,
    status: ReadStatus,
    timestamp: u32,
    resume: ResumeOptions,
    ignored_audio: u32,
    ignored_video: u32,
}

impl Default for ReadCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadCursor {
    pub fn new() -> Self {
        Self {
            flags: ReadFlags {
                need_header: true,
                ..Default::default()
            },
            status: ReadStatus::Ok,
            timestamp: 0,
            resume: ResumeOptions::default(),
            ignored_audio: 0,
            ignored_video: 0,
        }
    }

    /// Cursor for a read that continues an earlier one
    ///
    /// No FLV header is produced; the earlier read already wrote it.
    pub fn resuming(resume: ResumeOptions) -> Self {
        Self {
            flags: ReadFlags {
                resuming: true,
                ..Default::default()
            },
            resume,
            ..Self::new()
        }
    }

    pub fn status(&self) -> ReadStatus {
        self.status
    }

    /// Timestamp of the last delivered frame
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn is_resuming(&self) -> bool {
        self.flags.resuming
    }

    pub fn is_seeking(&self) -> bool {
        self.flags.seeking
    }

    pub fn needs_header(&self) -> bool {
        self.flags.need_header
    }

    pub fn header_written(&mut self) {
        self.flags.need_header = false;
    }

    /// Frames discarded while resuming
    pub fn ignored_frames(&self) -> u32 {
        self.ignored_audio + self.ignored_video
    }

    /// Eof or Error; nothing more will be delivered
    pub fn is_terminated(&self) -> bool {
        matches!(self.status, ReadStatus::Eof | ReadStatus::Error)
    }

    /// Discard everything up to the next keyframe
    pub fn start_seek(&mut self) {
        self.flags.seeking = true;
    }

    pub fn finish(&mut self) {
        if self.status != ReadStatus::Error {
            self.status = ReadStatus::Eof;
        }
    }

    pub fn fail(&mut self) {
        self.status = ReadStatus::Error;
    }

    /// Classify `frame`
    ///
    /// `Ok` and `ResumeComplete` mean deliver, `Ignore` means discard.
    pub fn accept(&mut self, frame: &MediaFrame) -> Result<ReadStatus> {
        if self.is_terminated() {
            return Err(UsageError::ReadTerminated.into());
        }
        if frame.kind == FrameKind::Video {
            self.flags.seen_video = true;
        }

        let status = if self.flags.resuming {
            self.accept_resumed(frame)?
        } else if self.flags.seeking {
            self.accept_seeking(frame)
        } else {
            ReadStatus::Ok
        };

        if status != ReadStatus::Ignore {
            self.timestamp = frame.timestamp;
        }
        self.status = status;
        Ok(status)
    }

    fn accept_resumed(&mut self, frame: &MediaFrame) -> Result<ReadStatus> {
        if frame.kind == FrameKind::Metadata {
            if let Some(cached) = &self.resume.metadata {
                if is_on_metadata(&frame.payload) && *cached != frame.payload {
                    return Err(self.mismatch("metadata differs from the original stream".into()));
                }
            }
            return Ok(ReadStatus::Ignore);
        }

        let expected = self
            .resume
            .initial_frame
            .as_ref()
            .map(|f| f.kind)
            .unwrap_or(FrameKind::Video);

        let aligned = frame.timestamp >= self.resume.timestamp
            && frame.kind == expected
            && (expected != FrameKind::Video || frame.is_keyframe());

        if !aligned {
            match frame.kind {
                FrameKind::Audio => self.ignored_audio += 1,
                _ => self.ignored_video += 1,
            }
            if self.ignored_frames() > MAX_IGNORED_FRAMES {
                let msg = format!(
                    "no {:?} frame at {} ms within {} frames",
                    expected, self.resume.timestamp, MAX_IGNORED_FRAMES
                );
                return Err(self.mismatch(msg));
            }
            return Ok(ReadStatus::Ignore);
        }

        if let Some(initial) = &self.resume.initial_frame {
            if frame.timestamp == self.resume.timestamp && initial.payload != frame.payload {
                return Err(self.mismatch("initial frame differs from the original stream".into()));
            }
        }

        tracing::debug!(
            timestamp = frame.timestamp,
            ignored_audio = self.ignored_audio,
            ignored_video = self.ignored_video,
            "Resume aligned"
        );
        self.flags.resuming = false;
        Ok(ReadStatus::ResumeComplete)
    }

    fn accept_seeking(&mut self, frame: &MediaFrame) -> ReadStatus {
        match frame.kind {
            FrameKind::Metadata => ReadStatus::Ok,
            FrameKind::Video if frame.is_keyframe() => {
                self.flags.seeking = false;
                ReadStatus::Ok
            }
            // Audio-only streams have no keyframes to wait for
            FrameKind::Audio if !self.flags.seen_video => {
                self.flags.seeking = false;
                ReadStatus::Ok
            }
            _ => ReadStatus::Ignore,
        }
    }

    fn mismatch(&mut self, msg: String) -> Error {
        tracing::warn!(
            resume_timestamp = self.resume.timestamp,
            ignored = self.ignored_frames(),
            reason = %msg,
            "Resumed stream does not match"
        );
        self.status = ReadStatus::Error;
        Error::ResumeMismatch(msg)
    }
}

fn is_on_metadata(payload: &Bytes) -> bool {
    matches!(
        amf0::decode(payload.clone()),
        Ok(value) if value.as_str() == Some(CMD_ON_METADATA)
    )
}

/// Pull-based stream reader
pub struct RtmpPuller {
    connector: RtmpConnector,
    cursor: ReadCursor,
    pending: VecDeque<MediaFrame>,
}

impl RtmpPuller {
    /// Connect to `config.url` and start playing
    pub async fn open(config: ClientConfig) -> Result<Self> {
        let connector = RtmpConnector::connect(config).await?;
        Self::start(connector, ReadCursor::new()).await
    }

    /// [`RtmpPuller::open`] over an already open transport
    pub async fn open_with(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
        let mut connector = RtmpConnector::with_transport(config, transport)?;
        connector.establish().await?;
        Self::start(connector, ReadCursor::new()).await
    }

    /// Connect and continue a read that stopped at `resume.timestamp`
    pub async fn resume(mut config: ClientConfig, resume: ResumeOptions) -> Result<Self> {
        config.seek_ms = resume.timestamp;
        let connector = RtmpConnector::connect(config).await?;
        Self::start(connector, ReadCursor::resuming(resume)).await
    }

    /// [`RtmpPuller::resume`] over an already open transport
    pub async fn resume_with(
        mut config: ClientConfig,
        transport: impl Transport + 'static,
        resume: ResumeOptions,
    ) -> Result<Self> {
        config.seek_ms = resume.timestamp;
        let mut connector = RtmpConnector::with_transport(config, transport)?;
        connector.establish().await?;
        Self::start(connector, ReadCursor::resuming(resume)).await
    }

    async fn start(mut connector: RtmpConnector, cursor: ReadCursor) -> Result<Self> {
        connector.play().await?;
        Ok(Self::with_cursor(connector, cursor))
    }

    /// Read from a connector that is already playing
    pub fn new(connector: RtmpConnector) -> Self {
        Self::with_cursor(connector, ReadCursor::new())
    }

    pub fn with_cursor(connector: RtmpConnector, cursor: ReadCursor) -> Self {
        Self {
            connector,
            cursor,
            pending: VecDeque::new(),
        }
    }

    /// Next frame, or `None` at the end of the stream
    ///
    /// After an error every further call fails with
    /// [`UsageError::ReadTerminated`].
    pub async fn next_frame(&mut self) -> Result<Option<MediaFrame>> {
        match self.cursor.status() {
            ReadStatus::Eof => return Ok(None),
            ReadStatus::Error => return Err(UsageError::ReadTerminated.into()),
            _ => {}
        }

        loop {
            let frame = match self.pending.pop_front() {
                Some(frame) => frame,
                None => match self.fill_pending().await {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.cursor.finish();
                        tracing::debug!(timestamp = self.cursor.timestamp(), "End of stream");
                        return Ok(None);
                    }
                    Err(e) => return Err(self.terminate(e).await),
                },
            };

            match self.cursor.accept(&frame) {
                Ok(ReadStatus::Ignore) => self.connector.record_dropped(1),
                Ok(_) => return Ok(Some(frame)),
                Err(e) => return Err(self.terminate(e).await),
            }
        }
    }

    /// Append the next FLV chunk to `out`
    ///
    /// The first call writes the FLV header before the first tag; a resumed
    /// read writes tags only. Returns the number of bytes appended, 0 at the
    /// end of the stream.
    pub async fn read_flv(&mut self, out: &mut BytesMut) -> Result<usize> {
        let mut written = 0;

        if self.cursor.needs_header() && !self.cursor.is_terminated() {
            let (has_audio, has_video) = self.scan_stream_kinds().await?;
            flv::write_header(has_audio, has_video, out);
            self.cursor.header_written();
            written += FLV_HEADER_SIZE;
        }

        if let Some(frame) = self.next_frame().await? {
            let tag = frame.to_flv_tag();
            tag.write(out);
            written += tag.encoded_len();
        }
        Ok(written)
    }

    /// Seek the stream and skip to the next keyframe
    pub async fn seek(&mut self, timestamp_ms: u32) -> Result<()> {
        self.connector.seek(timestamp_ms).await?;

        let dropped = self.pending.len() as u64;
        self.pending.clear();
        self.connector.record_dropped(dropped);
        self.cursor.start_seek();
        Ok(())
    }

    pub async fn pause(&mut self, paused: bool) -> Result<()> {
        self.connector.pause(paused).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.connector.close().await
    }

    pub fn status(&self) -> ReadStatus {
        self.cursor.status()
    }

    pub fn cursor(&self) -> &ReadCursor {
        &self.cursor
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.connector.close_handle()
    }

    pub fn stats(&self) -> &SessionStats {
        self.connector.stats()
    }

    pub fn connector(&self) -> &RtmpConnector {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut RtmpConnector {
        &mut self.connector
    }

    pub fn into_connector(self) -> RtmpConnector {
        self.connector
    }

    /// Pull one message from the session into `pending`
    ///
    /// Returns false once the session has no more media.
    async fn fill_pending(&mut self) -> Result<bool> {
        let Some(packet) = self.connector.read_media().await? else {
            return Ok(false);
        };

        match packet.message_type {
            MSG_AGGREGATE => {
                let tags = split_aggregate(packet.timestamp, &packet.payload)?;
                self.pending.extend(tags.into_iter().map(MediaFrame::from));
            }
            message_type => {
                if let Some(frame) = packet_frame(message_type, packet) {
                    self.pending.push_back(frame);
                }
            }
        }
        Ok(true)
    }

    /// Buffer the frames at timestamp 0 to see which kinds the stream has
    async fn scan_stream_kinds(&mut self) -> Result<(bool, bool)> {
        while self.pending.len() < HEADER_SCAN_FRAMES
            && self.pending.iter().all(|f| f.timestamp == 0)
        {
            match self.fill_pending().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(self.terminate(e).await),
            }
        }

        let has_audio = self.pending.iter().any(|f| f.kind == FrameKind::Audio);
        let has_video = self.pending.iter().any(|f| f.kind == FrameKind::Video);
        Ok((has_audio, has_video))
    }

    async fn terminate(&mut self, err: Error) -> Error {
        self.cursor.fail();
        self.pending.clear();
        if let Err(e) = self.connector.close().await {
            tracing::debug!(error = %e, "Close after read error failed");
        }
        err
    }
}

fn packet_frame(message_type: u8, packet: RtmpPacket) -> Option<MediaFrame> {
    let kind = FrameKind::from_type_id(message_type)?;
    let mut payload = packet.payload;

    // AMF3 data bodies carry a leading format byte before AMF0 values
    if message_type == MSG_DATA_AMF3 && payload.first() == Some(&0) {
        payload.advance(1);
    }
    if payload.is_empty() {
        return None;
    }
    Some(MediaFrame::new(kind, packet.timestamp, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf::{AmfObject, AmfValue};

    fn video(ts: u32, keyframe: bool) -> MediaFrame {
        let first = if keyframe { 0x17 } else { 0x27 };
        MediaFrame::new(FrameKind::Video, ts, Bytes::from(vec![first, 0x01, ts as u8]))
    }

    fn audio(ts: u32) -> MediaFrame {
        MediaFrame::new(FrameKind::Audio, ts, Bytes::from(vec![0xAF, 0x01, ts as u8]))
    }

    fn metadata(width: f64) -> MediaFrame {
        let body = amf0::encode_all(&[
            AmfValue::from(CMD_ON_METADATA),
            AmfValue::EcmaArray(AmfObject::new().with("width", width)),
        ]);
        MediaFrame::new(FrameKind::Metadata, 0, body)
    }

    #[test]
    fn test_plain_read_delivers_everything() {
        let mut cursor = ReadCursor::new();
        for frame in [metadata(640.0), video(0, true), audio(0), video(40, false)] {
            assert_eq!(cursor.accept(&frame).unwrap(), ReadStatus::Ok);
        }
        assert_eq!(cursor.timestamp(), 40);
        assert!(cursor.needs_header());
    }

    #[test]
    fn test_resume_emits_keyframe_first() {
        let keyframe = video(4000, true);
        let mut cursor = ReadCursor::resuming(ResumeOptions {
            timestamp: 4000,
            initial_frame: Some(keyframe.clone()),
            metadata: Some(metadata(640.0).payload),
        });
        assert!(!cursor.needs_header());

        assert_eq!(cursor.accept(&metadata(640.0)).unwrap(), ReadStatus::Ignore);
        assert_eq!(cursor.accept(&audio(3980)).unwrap(), ReadStatus::Ignore);
        assert_eq!(cursor.accept(&video(3960, false)).unwrap(), ReadStatus::Ignore);
        assert_eq!(cursor.accept(&keyframe).unwrap(), ReadStatus::ResumeComplete);
        assert_eq!(cursor.accept(&audio(4010)).unwrap(), ReadStatus::Ok);

        assert_eq!(cursor.ignored_frames(), 2);
        assert!(!cursor.is_resuming());
    }

    #[test]
    fn test_resume_metadata_mismatch() {
        let mut cursor = ReadCursor::resuming(ResumeOptions {
            timestamp: 1000,
            initial_frame: None,
            metadata: Some(metadata(640.0).payload),
        });

        let err = cursor.accept(&metadata(1280.0)).unwrap_err();
        assert!(matches!(err, Error::ResumeMismatch(_)));
        assert_eq!(cursor.status(), ReadStatus::Error);
        assert!(matches!(
            cursor.accept(&video(1000, true)),
            Err(Error::Usage(UsageError::ReadTerminated))
        ));
    }

    #[test]
    fn test_resume_initial_frame_differs() {
        let mut cursor = ReadCursor::resuming(ResumeOptions {
            timestamp: 2000,
            initial_frame: Some(video(2000, true)),
            metadata: None,
        });

        let other = MediaFrame::new(FrameKind::Video, 2000, Bytes::from_static(&[0x17, 0x01, 0xFF]));
        assert!(matches!(cursor.accept(&other), Err(Error::ResumeMismatch(_))));
    }

    #[test]
    fn test_resume_gives_up_after_ignored_frames() {
        // Original stream started with audio, this one never produces any
        let mut cursor = ReadCursor::resuming(ResumeOptions {
            timestamp: 0,
            initial_frame: Some(audio(0)),
            metadata: None,
        });

        for i in 0..MAX_IGNORED_FRAMES {
            assert_eq!(cursor.accept(&video(i * 40, i == 0)).unwrap(), ReadStatus::Ignore);
        }
        assert!(matches!(
            cursor.accept(&video(MAX_IGNORED_FRAMES * 40, false)),
            Err(Error::ResumeMismatch(_))
        ));
    }

    #[test]
    fn test_seek_waits_for_keyframe() {
        let mut cursor = ReadCursor::new();
        cursor.accept(&video(0, true)).unwrap();

        cursor.start_seek();
        assert_eq!(cursor.accept(&audio(10_000)).unwrap(), ReadStatus::Ignore);
        assert_eq!(cursor.accept(&video(10_020, false)).unwrap(), ReadStatus::Ignore);
        assert_eq!(cursor.accept(&metadata(640.0)).unwrap(), ReadStatus::Ok);
        assert_eq!(cursor.accept(&video(10_040, true)).unwrap(), ReadStatus::Ok);
        assert!(!cursor.is_seeking());
        assert_eq!(cursor.accept(&audio(10_050)).unwrap(), ReadStatus::Ok);
    }

    #[test]
    fn test_seek_audio_only() {
        let mut cursor = ReadCursor::new();
        cursor.accept(&audio(0)).unwrap();
        cursor.start_seek();
        assert_eq!(cursor.accept(&audio(5000)).unwrap(), ReadStatus::Ok);
    }

    #[test]
    fn test_finish_keeps_error() {
        let mut cursor = ReadCursor::new();
        cursor.fail();
        cursor.finish();
        assert_eq!(cursor.status(), ReadStatus::Error);

        let mut cursor = ReadCursor::new();
        cursor.finish();
        assert_eq!(cursor.status(), ReadStatus::Eof);
        assert!(cursor.is_terminated());
    }

    #[test]
    fn test_packet_frame() {
        let packet = RtmpPacket::new(CSID_DATA, MSG_DATA_AMF3, 0, 1, Bytes::from_static(&[0, 2, 0, 1, b'x']));
        let frame = packet_frame(MSG_DATA_AMF3, packet).unwrap();
        assert_eq!(frame.kind, FrameKind::Metadata);
        assert_eq!(&frame.payload[..], &[2, 0, 1, b'x']);

        let empty = RtmpPacket::new(CSID_AUDIO, MSG_AUDIO, 0, 1, Bytes::new());
        assert!(packet_frame(MSG_AUDIO, empty).is_none());
    }
}
