//! RTMP client connector
//!
//! [`RtmpConnector`] owns one session: the transport, both chunk codecs, the
//! session state and the outstanding invokes. Every public method drives the
//! same read/dispatch loop until its own reply arrives, so no two messages
//! are ever dispatched concurrently. Media that arrives while a method waits
//! is queued for [`RtmpConnector::read_media`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::amf::AmfValue;
use crate::error::{Error, RemoteError, Result};
use crate::media::flv::is_video_keyframe;
use crate::media::FrameKind;
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RtmpPacket};
use crate::protocol::constants::*;
use crate::protocol::handshake::{HandshakeStrategy, SimpleHandshake, UnsupportedHandshake};
use crate::protocol::message::{Command, DataMessage, RtmpMessage, UserControlEvent};
use crate::session::invoke::transaction_id_of;
use crate::session::{
    ControlEffect, InvokeRegistry, PauseState, PendingCall, SessionPhase, SessionState,
};
use crate::stats::SessionStats;
use crate::transport::{connect_tcp, StreamTransport, Transport};

use super::commands;
use super::config::{ClientConfig, LinkConfig, Protocol};

/// Cooperative stop signal for a session
///
/// Cloneable and `Send`, so another task can ask a session to stop. The
/// request is observed before the next read cycle and interrupts a read
/// that is waiting on the transport.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle(Arc<CloseSignal>);

#[derive(Debug, Default)]
struct CloseSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl CloseHandle {
    pub fn close(&self) {
        self.0.requested.store(true, Ordering::Release);
        self.0.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.0.requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested
    pub async fn requested(&self) {
        loop {
            let notified = self.0.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// RTMP client session
pub struct RtmpConnector {
    link: LinkConfig,
    transport: Box<dyn Transport>,
    handshake: Option<Box<dyn HandshakeStrategy>>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    chunk_decoder: ChunkDecoder,
    chunk_encoder: ChunkEncoder,
    state: SessionState,
    invokes: InvokeRegistry,
    stats: SessionStats,
    close_handle: CloseHandle,
    media: VecDeque<RtmpPacket>,
    bw_check_sent: bool,
    bw_check_counter: u32,
}

impl RtmpConnector {
    /// Open a TCP connection, handshake and connect to the application
    ///
    /// Tunneled and TLS variants need a caller-supplied transport, see
    /// [`RtmpConnector::with_transport`].
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let link = LinkConfig::from_config(&config)?;
        if link.protocol.contains(Protocol::HTTP) || link.protocol.contains(Protocol::SSL) {
            return Err(Error::Config(format!(
                "{} requires a caller-supplied transport",
                link.protocol
            )));
        }

        let socket =
            connect_tcp(&link.host, link.port, link.connect_timeout, link.tcp_nodelay).await?;
        let transport = StreamTransport::new(socket).with_read_timeout(link.read_timeout);

        let mut connector = Self::with_link(link, Box::new(transport));
        connector.establish().await?;
        Ok(connector)
    }

    /// Build a session over an already open transport
    ///
    /// Nothing is sent until [`RtmpConnector::establish`] is called.
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Result<Self> {
        let link = LinkConfig::from_config(&config)?;
        Ok(Self::with_link(link, Box::new(transport)))
    }

    fn with_link(link: LinkConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            link,
            transport,
            handshake: None,
            read_buf: BytesMut::with_capacity(64 * 1024),
            write_buf: BytesMut::with_capacity(64 * 1024),
            chunk_decoder: ChunkDecoder::new(),
            chunk_encoder: ChunkEncoder::new(),
            state: SessionState::new(),
            invokes: InvokeRegistry::new(),
            stats: SessionStats::new(),
            close_handle: CloseHandle::default(),
            media: VecDeque::new(),
            bw_check_sent: false,
            bw_check_counter: 0,
        }
    }

    /// Replace the handshake used by [`RtmpConnector::establish`]
    pub fn set_handshake(&mut self, strategy: impl HandshakeStrategy + 'static) {
        self.handshake = Some(Box::new(strategy));
    }

    /// Handshake, then `connect` to the application
    pub async fn establish(&mut self) -> Result<()> {
        self.handshake().await?;
        self.connect_app().await
    }

    async fn handshake(&mut self) -> Result<()> {
        self.state.require("handshake", &[SessionPhase::Uninitialized])?;
        self.state.transition(SessionPhase::Handshaking);

        let mut strategy = match self.handshake.take() {
            Some(strategy) => strategy,
            None => self.default_handshake(),
        };
        tracing::debug!(strategy = strategy.name(), "Starting handshake");

        let result = timeout(
            self.link.connect_timeout,
            strategy.perform(&mut *self.transport, &mut self.read_buf),
        )
        .await
        .unwrap_or(Err(Error::Timeout));

        match result {
            Ok(()) => {
                tracing::debug!(strategy = strategy.name(), "Handshake complete");
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    fn default_handshake(&self) -> Box<dyn HandshakeStrategy> {
        if self.link.protocol.contains(Protocol::ENCRYPTED) {
            Box::new(UnsupportedHandshake::new("rtmpe"))
        } else {
            Box::new(SimpleHandshake::new())
        }
    }

    async fn connect_app(&mut self) -> Result<()> {
        self.state.require("connect", &[SessionPhase::Handshaking])?;
        self.state.transition(SessionPhase::Connecting);

        let mut call = self.invoke(commands::connect(&self.link)).await?;
        let reply = match self.wait_for(&mut call).await {
            Ok(reply) => reply,
            Err(e) => {
                // Nothing can be done on a connection the server refused
                self.close().await?;
                return Err(e);
            }
        };

        self.state.transition(SessionPhase::Connected);
        self.stats.connected_at = Some(Instant::now());
        tracing::info!(
            app = %self.link.app,
            tc_url = %self.link.tc_url,
            code = reply.status_code().unwrap_or_default(),
            "Connected"
        );

        let window = self.state.bandwidth.window_ack_size;
        self.state.bandwidth.announced_window = window;
        self.send_message(&RtmpMessage::WindowAckSize(window)).await?;
        self.send_message(&RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
            stream_id: 0,
            buffer_ms: self.link.buffer_time,
        }))
        .await?;

        if self.link.chunk_size != DEFAULT_CHUNK_SIZE {
            let size = self.link.chunk_size;
            self.send_message(&RtmpMessage::SetChunkSize(size)).await?;
            self.chunk_encoder.set_chunk_size(size);
            self.state.out_chunk_size = size;
            tracing::debug!(size, "Outbound chunk size changed");
        }
        Ok(())
    }

    /// Ask the server for a message stream
    pub async fn create_stream(&mut self) -> Result<u32> {
        self.state.require("createStream", &[SessionPhase::Connected])?;

        let txn = self.invokes.next_transaction_id();
        let mut call = self.invoke(commands::create_stream(txn)).await?;
        let reply = self.wait_for(&mut call).await?;

        let stream_id = reply
            .arguments
            .iter()
            .find_map(AmfValue::as_number)
            .ok_or_else(|| RemoteError {
                method: CMD_CREATE_STREAM.to_string(),
                code: None,
                description: Some("reply carries no stream id".into()),
            })? as u32;

        self.state.stream_id = stream_id;
        tracing::info!(stream_id, "Stream created");
        Ok(stream_id)
    }

    /// Create a stream and play the configured playpath
    ///
    /// Returns once the server reports `NetStream.Play.Start`.
    pub async fn play(&mut self) -> Result<()> {
        self.state.require("play", &[SessionPhase::Connected])?;

        let subscribe = match (&self.link.subscribe_path, self.link.flags.live) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(self.link.playpath.clone()),
            (None, false) => None,
        };
        if let Some(path) = subscribe {
            let txn = self.invokes.next_transaction_id();
            self.send_command(commands::fc_subscribe(txn, &path)).await?;
        }

        let stream_id = match self.state.stream_id {
            0 => self.create_stream().await?,
            id => id,
        };

        if self.link.flags.playlist {
            let cmd = commands::set_playlist(stream_id, &self.link.playpath);
            self.send_command(cmd).await?;
        }

        let txn = self.invokes.next_transaction_id();
        let cmd = commands::play(&self.link, txn, stream_id, self.link.seek_ms);
        let mut call = self.invoke(cmd).await?;
        self.send_message(&RtmpMessage::UserControl(UserControlEvent::SetBufferLength {
            stream_id,
            buffer_ms: self.link.buffer_time,
        }))
        .await?;

        self.wait_for(&mut call).await?;
        tracing::info!(stream_id, playpath = %self.link.playpath, "Playing");
        Ok(())
    }

    /// Create a stream and publish to the configured playpath
    pub async fn publish(&mut self) -> Result<()> {
        self.state.require("publish", &[SessionPhase::Connected])?;

        let playpath = self.link.playpath.clone();
        // Not every server answers these; nothing waits on them
        let txn = self.invokes.next_transaction_id();
        self.send_command(commands::release_stream(txn, &playpath)).await?;
        let txn = self.invokes.next_transaction_id();
        self.send_command(commands::fc_publish(txn, &playpath)).await?;

        let stream_id = match self.state.stream_id {
            0 => self.create_stream().await?,
            id => id,
        };

        let txn = self.invokes.next_transaction_id();
        let mut call = self.invoke(commands::publish(txn, stream_id, &playpath)).await?;
        self.wait_for(&mut call).await?;
        tracing::info!(stream_id, playpath = %playpath, "Publishing");
        Ok(())
    }

    /// Pause or resume playback at the current media timestamp
    pub async fn pause(&mut self, paused: bool) -> Result<()> {
        self.state.require("pause", &[SessionPhase::Playing])?;

        let txn = self.invokes.next_transaction_id();
        let cmd = commands::pause(txn, self.state.stream_id, paused, self.state.media_timestamp);
        let mut call = self.invoke(cmd).await?;
        self.wait_for(&mut call).await?;

        self.state.pause = if paused {
            PauseState::Paused
        } else {
            PauseState::Running
        };
        Ok(())
    }

    /// Seek to `timestamp_ms`
    ///
    /// Queued media from before the seek is discarded. Returns once the
    /// server reports `NetStream.Seek.Notify`.
    pub async fn seek(&mut self, timestamp_ms: u32) -> Result<()> {
        self.state.require("seek", &[SessionPhase::Playing])?;

        self.state.seeking = true;
        self.drop_queued();

        let txn = self.invokes.next_transaction_id();
        let mut call = self.invoke(commands::seek(txn, self.state.stream_id, timestamp_ms)).await?;
        self.wait_for(&mut call).await?;

        self.state.media_timestamp = timestamp_ms;
        tracing::debug!(timestamp_ms, "Seek complete");
        Ok(())
    }

    /// Invoke `method` on the connection stream
    ///
    /// The reply is delivered to the returned call; pass it to
    /// [`RtmpConnector::wait_for`] to drive the session until it arrives.
    pub async fn call(
        &mut self,
        method: &str,
        object: AmfValue,
        arguments: Vec<AmfValue>,
    ) -> Result<PendingCall> {
        self.state.require(
            "call",
            &[
                SessionPhase::Connected,
                SessionPhase::Playing,
                SessionPhase::Publishing,
            ],
        )?;

        let txn = self.invokes.next_transaction_id();
        let mut cmd = Command::new(method, txn as f64).with_object(object);
        cmd.arguments = arguments;
        self.invoke(cmd).await
    }

    /// Run the read loop until `call` has been answered
    pub async fn wait_for(&mut self, call: &mut PendingCall) -> Result<Command> {
        loop {
            if let Some(result) = call.try_result() {
                return result;
            }
            if self.state.phase == SessionPhase::Closed {
                return Err(Error::ConnectionClosed);
            }
            self.pump().await?;
        }
    }

    /// Next audio, video, data or aggregate message
    ///
    /// Returns `None` once the session has closed and queued media is
    /// drained.
    pub async fn read_media(&mut self) -> Result<Option<RtmpPacket>> {
        self.state.require(
            "read",
            &[
                SessionPhase::Playing,
                SessionPhase::Closing,
                SessionPhase::Closed,
            ],
        )?;

        loop {
            if let Some(packet) = self.media.pop_front() {
                return Ok(Some(packet));
            }
            if self.state.phase.is_closed() {
                return Ok(None);
            }
            match self.pump().await {
                Ok(()) | Err(Error::ConnectionClosed) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Send one frame while publishing
    pub async fn write_frame(&mut self, kind: FrameKind, timestamp: u32, payload: Bytes) -> Result<()> {
        self.state.require("write_frame", &[SessionPhase::Publishing])?;

        let packet = RtmpPacket::new(
            kind.csid(),
            kind.type_id(),
            timestamp,
            self.state.stream_id,
            payload,
        );
        self.send_packet(&packet).await?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Send `@setDataFrame onMetaData` while publishing
    pub async fn write_metadata(&mut self, metadata: AmfValue) -> Result<()> {
        self.state.require("write_metadata", &[SessionPhase::Publishing])?;

        let data = commands::set_data_frame(self.state.stream_id, metadata);
        self.send_message(&RtmpMessage::Data(data)).await
    }

    /// Close the session
    ///
    /// A publishing session sends FCUnpublish, a created stream is deleted,
    /// then the transport is released and every pending invoke fails with
    /// [`Error::ConnectionClosed`]. Closing a closed session does nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.state.phase.is_closed() {
            return Ok(());
        }
        let was = self.state.phase;
        self.state.transition(SessionPhase::Closing);

        let stream_id = self.state.stream_id;
        if stream_id != 0 {
            if was == SessionPhase::Publishing {
                let txn = self.invokes.next_transaction_id();
                let cmd = commands::fc_unpublish(txn, &self.link.playpath);
                self.send_best_effort(cmd).await;
            }
            let txn = self.invokes.next_transaction_id();
            self.send_best_effort(commands::delete_stream(txn, stream_id)).await;
        }

        if self.state.phase != SessionPhase::Closed {
            self.shutdown().await;
        }
        Ok(())
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }

    pub fn link(&self) -> &LinkConfig {
        &self.link
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn stream_id(&self) -> u32 {
        self.state.stream_id
    }

    /// Duration announced in onMetaData, in seconds
    pub fn duration(&self) -> Option<f64> {
        self.state.duration
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Number of invokes still waiting for a reply
    pub fn pending_invokes(&self) -> usize {
        self.invokes.len()
    }

    pub(crate) fn record_dropped(&mut self, frames: u64) {
        self.stats.dropped_frames += frames;
    }

    /// One read cycle: reassemble and dispatch a single message
    async fn pump(&mut self) -> Result<()> {
        if self.close_handle.is_requested() {
            tracing::debug!("Close requested");
            return self.close().await;
        }
        let packet = self.read_packet().await?;
        self.dispatch(packet).await
    }

    async fn read_packet(&mut self) -> Result<RtmpPacket> {
        if self.state.phase == SessionPhase::Closed {
            return Err(Error::ConnectionClosed);
        }

        loop {
            match self.chunk_decoder.decode(&mut self.read_buf) {
                Ok(Some(packet)) => return Ok(packet),
                Ok(None) => {}
                Err(e) => return Err(self.fail(e).await),
            }

            let handle = self.close_handle.clone();
            let filled = tokio::select! {
                biased;
                _ = handle.requested() => None,
                result = self.transport.fill(&mut self.read_buf) => Some(result),
            };
            match filled {
                Some(Ok(_)) => {}
                Some(Err(e)) if !self.close_handle.is_requested() => {
                    return Err(self.fail(e).await)
                }
                // Interrupted by a stop request, or timed out after one
                _ => {
                    tracing::debug!("Close requested during read");
                    self.close().await?;
                    return Err(Error::ConnectionClosed);
                }
            }
            self.account_received().await?;
        }
    }

    /// Count new inbound bytes and acknowledge a full window
    async fn account_received(&mut self) -> Result<()> {
        let total = self.transport.bytes_read();
        let fresh = total.saturating_sub(self.state.bandwidth.bytes_in);
        self.stats.bytes_received = total;

        if let Some(sequence) = self.state.bandwidth.record_received(fresh as usize) {
            tracing::debug!(sequence, "Sending acknowledgement");
            self.send_message(&RtmpMessage::Acknowledgement { sequence }).await?;
            self.stats.acks_sent += 1;
        }
        Ok(())
    }

    async fn dispatch(&mut self, packet: RtmpPacket) -> Result<()> {
        let msg = match RtmpMessage::from_packet(&packet) {
            Ok(msg) => msg,
            Err(Error::Amf(e)) => {
                tracing::warn!(
                    csid = packet.csid,
                    message_type = packet.message_type,
                    error = %e,
                    "Skipping undecodable message"
                );
                return Ok(());
            }
            Err(e) => return Err(self.fail(e).await),
        };

        match msg {
            control @ (RtmpMessage::SetChunkSize(_)
            | RtmpMessage::Abort { .. }
            | RtmpMessage::Acknowledgement { .. }
            | RtmpMessage::UserControl(_)
            | RtmpMessage::WindowAckSize(_)
            | RtmpMessage::SetPeerBandwidth { .. }) => self.handle_control(control).await,

            RtmpMessage::Audio { timestamp, .. } => {
                self.stats.audio_frames += 1;
                self.state.media_timestamp = timestamp;
                self.queue_media(packet);
                Ok(())
            }

            RtmpMessage::Video { timestamp, data } => {
                self.stats.video_frames += 1;
                if is_video_keyframe(&data) {
                    self.stats.keyframes += 1;
                }
                self.state.media_timestamp = timestamp;
                self.queue_media(packet);
                Ok(())
            }

            RtmpMessage::Aggregate { timestamp, .. } => {
                self.state.media_timestamp = timestamp;
                self.queue_media(packet);
                Ok(())
            }

            RtmpMessage::Data(data) | RtmpMessage::DataAmf3(data) => {
                self.record_metadata(&data);
                self.queue_media(packet);
                Ok(())
            }

            RtmpMessage::Command(cmd) | RtmpMessage::CommandAmf3(cmd) => {
                self.handle_command(cmd).await
            }

            RtmpMessage::Unknown { type_id, data } => {
                tracing::debug!(type_id, size = data.len(), "Ignoring message");
                Ok(())
            }
        }
    }

    async fn handle_control(&mut self, msg: RtmpMessage) -> Result<()> {
        let effect = match self.state.apply_control(&msg, &self.link) {
            Ok(effect) => effect,
            Err(e) => return Err(self.fail(e).await),
        };

        match effect {
            ControlEffect::None => {}
            ControlEffect::InChunkSize(size) => self.chunk_decoder.set_chunk_size(size),
            ControlEffect::AbortChannel(csid) => self.chunk_decoder.abort(csid),
            ControlEffect::Reply(reply) => self.send_message(&reply).await?,
            ControlEffect::TogglePause(paused) => {
                let cmd = commands::pause(
                    0,
                    self.state.stream_id,
                    paused,
                    self.state.media_timestamp,
                );
                self.send_command(cmd).await?;
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        tracing::debug!(
            name = %cmd.name,
            transaction_id = cmd.transaction_id,
            "Command received"
        );

        let name = cmd.name.clone();
        match name.as_str() {
            CMD_RESULT | CMD_ERROR => self.handle_reply(cmd),
            CMD_ON_STATUS => return self.handle_status(cmd).await,
            CMD_ON_BW_DONE => {
                if !self.bw_check_sent {
                    self.bw_check_sent = true;
                    let txn = self.invokes.next_transaction_id();
                    self.send_command(commands::check_bw(txn)).await?;
                }
            }
            CMD_ON_BW_CHECK => {
                let counter = self.bw_check_counter;
                self.bw_check_counter += 1;
                self.send_command(commands::bw_check_result(cmd.transaction_id, counter))
                    .await?;
            }
            CMD_ON_BW_DONE_INTERNAL => tracing::debug!("Bandwidth check finished"),
            CMD_CLOSE => {
                tracing::info!("Server requested close");
                self.close().await?;
            }
            other => tracing::debug!(name = other, "Ignoring server call"),
        }
        Ok(())
    }

    fn handle_reply(&mut self, cmd: Command) {
        let Some(transaction_id) = transaction_id_of(&cmd) else {
            tracing::warn!(name = %cmd.name, "Reply without a usable transaction id");
            return;
        };
        let Some(method) = self.invokes.method_of(transaction_id).map(str::to_owned) else {
            tracing::debug!(transaction_id, "Reply to unknown transaction");
            return;
        };

        let result = if cmd.name == CMD_ERROR {
            Err(remote_error(&method, &cmd).into())
        } else {
            Ok(cmd)
        };
        self.invokes.resolve(transaction_id, result);
    }

    async fn handle_status(&mut self, cmd: Command) -> Result<()> {
        let code = cmd.status_code().unwrap_or_default().to_owned();
        tracing::info!(
            code = %code,
            description = cmd.status_description().unwrap_or_default(),
            "Status"
        );

        match code.as_str() {
            NS_PLAY_START => {
                if self.state.phase == SessionPhase::Connected {
                    self.state.transition(SessionPhase::Playing);
                }
                self.resolve_oldest(CMD_PLAY, Ok(cmd));
            }
            NS_PUBLISH_START => {
                if self.state.phase == SessionPhase::Connected {
                    self.state.transition(SessionPhase::Publishing);
                }
                self.resolve_oldest(CMD_PUBLISH, Ok(cmd));
            }
            NS_PLAY_STOP | NS_PLAY_COMPLETE | NS_PLAY_UNPUBLISH_NOTIFY => {
                tracing::info!(code = %code, "Stream ended");
                self.close().await?;
            }
            NS_FAILED | NS_PLAY_FAILED | NS_PLAY_STREAM_NOT_FOUND | NC_CONNECT_INVALID_APP => {
                let methods: &[&str] = if code == NC_CONNECT_INVALID_APP {
                    &[CMD_CONNECT]
                } else {
                    &[CMD_PLAY, CMD_PUBLISH]
                };
                let target = methods
                    .iter()
                    .filter_map(|method| self.invokes.oldest(method))
                    .min();

                match target {
                    Some(txn) => {
                        let method = self.invokes.method_of(txn).unwrap_or_default().to_owned();
                        let err = remote_error(&method, &cmd);
                        self.invokes.resolve(txn, Err(err.into()));
                    }
                    None => tracing::warn!(code = %code, "Failure status with nothing outstanding"),
                }
            }
            NS_SEEK_NOTIFY => {
                self.state.seeking = false;
                self.drop_queued();
                self.resolve_oldest(CMD_SEEK, Ok(cmd));
            }
            NS_PAUSE_NOTIFY => {
                if self.state.pause == PauseState::Running {
                    self.state.pause = PauseState::Paused;
                }
                self.resolve_oldest(CMD_PAUSE, Ok(cmd));
            }
            NS_UNPAUSE_NOTIFY => {
                self.state.pause = PauseState::Running;
                self.resolve_oldest(CMD_PAUSE, Ok(cmd));
            }
            _ => {}
        }
        Ok(())
    }

    fn resolve_oldest(&mut self, method: &str, result: Result<Command>) {
        if let Some(txn) = self.invokes.oldest(method) {
            self.invokes.resolve(txn, result);
        }
    }

    /// Track onMetaData, sent bare or wrapped in @setDataFrame
    fn record_metadata(&mut self, data: &DataMessage) {
        let metadata = match data.name.as_str() {
            CMD_ON_METADATA => data.values.first(),
            CMD_SET_DATA_FRAME
                if data.values.first().and_then(AmfValue::as_str) == Some(CMD_ON_METADATA) =>
            {
                data.values.get(1)
            }
            _ => None,
        };
        let Some(metadata) = metadata else {
            return;
        };

        self.stats.metadata_frames += 1;
        if let Some(duration) = metadata.get_number("duration") {
            tracing::debug!(duration, "Stream duration");
            self.state.duration = Some(duration);
        }
    }

    fn queue_media(&mut self, packet: RtmpPacket) {
        if self.state.phase == SessionPhase::Publishing {
            return;
        }
        // Media sent ahead of Seek.Notify belongs to the old position
        if self.state.seeking {
            self.stats.dropped_frames += 1;
            return;
        }
        self.media.push_back(packet);
    }

    fn drop_queued(&mut self) {
        let dropped = self.media.len() as u64;
        if dropped > 0 {
            tracing::debug!(dropped, "Discarding queued media");
            self.media.clear();
            self.stats.dropped_frames += dropped;
        }
    }

    /// Register `cmd` under its transaction id and send it
    async fn invoke(&mut self, cmd: Command) -> Result<PendingCall> {
        let call = self.invokes.register(cmd.transaction_id as u32, cmd.name.clone());
        self.send_command(cmd).await?;
        Ok(call)
    }

    async fn send_command(&mut self, cmd: Command) -> Result<()> {
        tracing::debug!(
            name = %cmd.name,
            transaction_id = cmd.transaction_id,
            stream_id = cmd.stream_id,
            "Sending command"
        );
        self.send_message(&RtmpMessage::Command(cmd)).await
    }

    async fn send_best_effort(&mut self, cmd: Command) {
        let name = cmd.name.clone();
        if let Err(e) = self.send_command(cmd).await {
            tracing::debug!(name = %name, error = %e, "Send during close failed");
        }
    }

    async fn send_message(&mut self, msg: &RtmpMessage) -> Result<()> {
        let (message_type, payload) = msg.encode();
        let (timestamp, stream_id) = match msg {
            RtmpMessage::Audio { timestamp, .. } | RtmpMessage::Video { timestamp, .. } => {
                (*timestamp, self.state.stream_id)
            }
            RtmpMessage::Command(cmd) | RtmpMessage::CommandAmf3(cmd) => (0, cmd.stream_id),
            RtmpMessage::Data(data) | RtmpMessage::DataAmf3(data) => (0, data.stream_id),
            _ => (0, 0),
        };

        let packet = RtmpPacket::new(msg.default_csid(), message_type, timestamp, stream_id, payload);
        self.send_packet(&packet).await
    }

    async fn send_packet(&mut self, packet: &RtmpPacket) -> Result<()> {
        if self.state.phase == SessionPhase::Closed {
            return Err(Error::ConnectionClosed);
        }

        self.write_buf.clear();
        self.chunk_encoder.encode(packet, &mut self.write_buf)?;

        if let Err(e) = self.transport.send(&self.write_buf).await {
            return Err(self.fail(e).await);
        }
        self.stats.bytes_sent = self.transport.bytes_written();
        Ok(())
    }

    /// Close the session if `err` is fatal, then hand it back
    async fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() && self.state.phase != SessionPhase::Closed {
            match err {
                Error::ConnectionClosed => tracing::info!("Peer closed the connection"),
                _ => {
                    tracing::warn!(error = %err, phase = ?self.state.phase, "Session failed");
                    self.media.clear();
                }
            }
            self.shutdown().await;
        }
        err
    }

    /// Release the transport and fail everything still outstanding
    async fn shutdown(&mut self) {
        if let Err(e) = self.transport.close().await {
            tracing::debug!(error = %e, "Transport close failed");
        }
        self.chunk_decoder.reset();
        self.read_buf.clear();
        self.state.transition(SessionPhase::Closed);

        let failed = self.invokes.fail_all();
        self.stats.bytes_sent = self.transport.bytes_written();
        tracing::info!(
            pending_failed = failed,
            bytes_received = self.stats.bytes_received,
            bytes_sent = self.stats.bytes_sent,
            "Session closed"
        );
    }
}

fn remote_error(method: &str, cmd: &Command) -> RemoteError {
    RemoteError {
        method: method.to_string(),
        code: cmd.status_code().map(str::to_owned),
        description: cmd.status_description().map(str::to_owned),
    }
}
