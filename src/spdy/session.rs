//! SPDY session loop
//!
//! One `SpdySession` owns one client connection and runs the server side
//! of the protocol: it pumps input from the transport through the framer,
//! validates and dispatches frames, fans accepted streams out to worker
//! tasks on the executor, and merges their output back onto the wire
//! through the scheduler.
//!
//! The loop is strictly sequential on its own thread. Per iteration it
//! checks for transport abort, sweeps stream state, reads input (blocking
//! only when there are no active streams and nothing sendable), dispatches
//! parsed frames, then drains every currently sendable output frame. A
//! failed write closes the session immediately; queued output is
//! discarded.

use std::sync::Arc;
use std::time::Duration;

use super::codec::SpdyFramer;
use super::config::ServerConfig;
use super::error::{GoawayStatus, RstStreamStatus, SessionError};
use super::executor::{Executor, PanicGuardTask, StreamTaskFactory};
use super::frames::{
    ControlFlags, Frame, GoawayFrame, RstStreamFrame, SettingsFrame, SpdyVersion, SynStreamFrame,
    WindowUpdateFrame,
};
use super::io::{ReadStatus, SessionIo, WriteStatus};
use super::scheduler::OutputScheduler;
use super::settings::{SettingsEntry, SettingsId};
use super::stream::{SessionShared, SpdyStream, StreamId, StreamRegistry};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// How long the loop parks when only workers can make progress
const ACTIVITY_WAIT: Duration = Duration::from_millis(10);

/// Headers a SYN_STREAM must carry to describe a request
const REQUIRED_HEADERS_V2: &[&str] = &["host", "method", "scheme", "url", "version"];
const REQUIRED_HEADERS_V3: &[&str] = &[":host", ":method", ":path", ":scheme", ":version"];

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial SETTINGS not yet on the wire
    Startup,
    /// Normal operation
    Running,
    /// No new streams; in-flight output is being flushed
    Draining,
    /// Loop finished, executor stopped
    Closed,
}

/// Server-side session over one connection
pub struct SpdySession<'a> {
    version: SpdyVersion,
    config: &'a ServerConfig,
    io: &'a mut dyn SessionIo,
    task_factory: &'a dyn StreamTaskFactory,
    executor: &'a dyn Executor,
    framer: SpdyFramer,
    registry: StreamRegistry,
    scheduler: OutputScheduler,
    shared: Arc<SessionShared>,
    initial_send_window: u32,
    state: SessionState,
    input_closed: bool,
    goaway_sent: bool,
    saw_input: bool,
}

impl<'a> SpdySession<'a> {
    /// Create a session over the given collaborators
    pub fn new(
        version: SpdyVersion,
        config: &'a ServerConfig,
        io: &'a mut dyn SessionIo,
        task_factory: &'a dyn StreamTaskFactory,
        executor: &'a dyn Executor,
    ) -> Self {
        SpdySession {
            version,
            config,
            io,
            task_factory,
            executor,
            framer: SpdyFramer::new(version),
            registry: StreamRegistry::new(),
            scheduler: OutputScheduler::new(),
            shared: Arc::new(SessionShared::new(version, config.enable_server_push)),
            initial_send_window: DEFAULT_INITIAL_WINDOW_SIZE,
            state: SessionState::Startup,
            input_closed: false,
            goaway_sent: false,
            saw_input: false,
        }
    }

    /// Protocol version for this session
    pub fn spdy_version(&self) -> SpdyVersion {
        self.version
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Returns once the connection is done, a transport write failed, the
    /// transport was aborted, or the drain after an error finished. The
    /// executor is stopped on every exit path.
    pub fn run(&mut self) {
        log::debug!("{} session starting", self.version);

        // The first frame on the wire is always our SETTINGS.
        let settings = self.framer.encode_settings(&self.startup_settings());
        match self.io.send_frame_raw(&settings) {
            WriteStatus::Success => self.state = SessionState::Running,
            status => {
                log::debug!("startup SETTINGS write failed: {:?}", status);
                return self.shutdown();
            }
        }

        loop {
            if self.io.is_connection_aborted() {
                log::debug!("connection aborted");
                return self.shutdown();
            }

            let epoch = self.shared.epoch();
            self.sweep_streams();
            self.accept_push_requests();

            let mut progressed = false;
            let mut read_blocked = false;
            let mut read_closed = false;
            if !self.input_closed {
                let block =
                    !self.registry.has_active() && !self.scheduler.has_pending(&self.registry);
                read_blocked = block;
                let status = self.io.process_available_input(block, &mut self.framer);

                while let Some(frame) = self.framer.pop_frame() {
                    progressed = true;
                    self.saw_input = true;
                    log::trace!("received {}", frame);
                    if let Err(err) = self.handle_frame(frame) {
                        self.apply_error(err);
                    }
                }

                if self.framer.has_error() {
                    let reason = self
                        .framer
                        .parse_error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "parse error".to_string());
                    progressed = true;
                    self.saw_input = true;
                    self.input_closed = true;
                    self.apply_error(SessionError::protocol(reason));
                } else {
                    match status {
                        ReadStatus::Success => {}
                        ReadStatus::ConnectionClosed => {
                            read_closed = true;
                            if !self.saw_input
                                && self.registry.len() == 0
                                && !self.scheduler.has_queued(&self.registry)
                            {
                                // The peer never spoke; nothing to say back.
                                log::debug!("connection closed before any input");
                                return self.shutdown();
                            }
                            // No new streams; flush what remains. Input is
                            // still polled: in-flight streams may need
                            // WINDOW_UPDATE credit that is already queued
                            // behind the close signal.
                            if self.state == SessionState::Running {
                                progressed = true;
                                self.begin_drain();
                            }
                        }
                        ReadStatus::Error => {
                            // Transport-level read failure: the input side
                            // is unusable for good.
                            progressed = true;
                            self.input_closed = true;
                            self.begin_drain();
                        }
                    }
                }
            }

            // Pick up output produced by tasks run during dispatch.
            self.sweep_streams();

            while let Some(frame) = self.scheduler.next_frame(&self.registry) {
                progressed = true;
                match self.send_frame(&frame) {
                    WriteStatus::Success => self.sweep_streams(),
                    status => {
                        log::debug!("write failed ({:?}); closing session", status);
                        return self.shutdown();
                    }
                }
            }

            let quiescent = !self.registry.has_active();
            let queued = self.scheduler.has_queued(&self.registry);
            if (self.state == SessionState::Draining || self.input_closed) && quiescent && !queued {
                if !self.goaway_sent && self.config.send_goaway_on_shutdown {
                    let frame = GoawayFrame {
                        last_good_stream_id: self.registry.last_client_stream_id(),
                        status: GoawayStatus::Ok,
                    };
                    self.goaway_sent = true;
                    let _ = self.io.send_frame_raw(&self.framer.encode_goaway(&frame));
                }
                return self.shutdown();
            }

            // Everything left is window-blocked and the peer is gone: the
            // credit to unblock it can never arrive. Only decided on an
            // iteration that made no progress, since a write above may
            // have provoked fresh input (transport acks) not yet read.
            if read_closed && quiescent && queued && !progressed {
                log::debug!("discarding window-blocked output after connection close");
                return self.shutdown();
            }

            // Workers are still running but there is nothing to read or
            // write; park until a stream produces something.
            if !progressed && !read_blocked {
                self.shared.wait_for_activity(epoch, ACTIVITY_WAIT);
            }
        }
    }

    fn startup_settings(&self) -> SettingsFrame {
        let mut entries = vec![SettingsEntry::new(
            SettingsId::MaxConcurrentStreams,
            self.config.max_concurrent_streams,
        )];
        if self.version.has_flow_control() {
            entries.push(SettingsEntry::new(
                SettingsId::InitialWindowSize,
                self.config.initial_recv_window_size,
            ));
        }
        SettingsFrame::new(entries)
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        match frame {
            // The server answers pings with the same id; it never
            // originates its own.
            Frame::Ping(ping) => {
                self.scheduler.enqueue_control(Frame::Ping(ping));
                Ok(())
            }
            Frame::Settings(settings) => self.handle_settings(settings),
            Frame::WindowUpdate(update) => self.handle_window_update(update),
            Frame::SynStream(syn) => self.handle_syn_stream(syn),
            Frame::Data(_) | Frame::Headers(_) => self.route_stream_frame(frame),
            Frame::Goaway(goaway) => {
                log::debug!(
                    "client GOAWAY (last accepted {})",
                    goaway.last_good_stream_id
                );
                self.begin_drain();
                Ok(())
            }
            Frame::RstStream(rst) => {
                log::debug!("client reset stream {} ({})", rst.stream_id, rst.status);
                if let Some(stream) = self.registry.remove(rst.stream_id) {
                    stream.abort();
                    self.scheduler.forget_stream(rst.stream_id);
                }
                Ok(())
            }
            Frame::SynReply(reply) => Err(SessionError::protocol(format!(
                "unexpected SYN_REPLY from client on stream {}",
                reply.stream_id
            ))),
        }
    }

    fn handle_settings(&mut self, frame: SettingsFrame) -> Result<(), SessionError> {
        for entry in &frame.entries {
            match entry.known_id() {
                Some(SettingsId::InitialWindowSize) => {
                    if !self.version.has_flow_control() {
                        return Err(SessionError::protocol(
                            "SETTINGS_INITIAL_WINDOW_SIZE is not valid on spdy/2",
                        ));
                    }
                    if entry.value == 0 || entry.value > MAX_WINDOW_SIZE {
                        return Err(SessionError::protocol(format!(
                            "SETTINGS_INITIAL_WINDOW_SIZE {} outside valid range",
                            entry.value
                        )));
                    }
                    let delta = entry.value as i64 - self.initial_send_window as i64;
                    self.registry.adjust_all_send_windows(delta);
                    self.initial_send_window = entry.value;
                    log::debug!("initial send window is now {}", entry.value);
                }
                Some(id) => log::trace!("ignoring client setting {}", id),
                None => log::trace!("ignoring unknown client setting {}", entry.id),
            }
        }
        Ok(())
    }

    fn handle_window_update(&mut self, update: WindowUpdateFrame) -> Result<(), SessionError> {
        // An update may race with normal stream completion; unknown
        // stream ids are not an error.
        let Some(stream) = self.registry.get(update.stream_id).cloned() else {
            log::trace!("WINDOW_UPDATE for unknown stream {}", update.stream_id);
            return Ok(());
        };
        stream
            .increase_send_window(update.delta_window_size)
            .map_err(|_| {
                SessionError::Stream(update.stream_id, RstStreamStatus::FlowControlError)
            })
    }

    fn handle_syn_stream(&mut self, syn: SynStreamFrame) -> Result<(), SessionError> {
        if self.state == SessionState::Draining {
            log::debug!("ignoring SYN_STREAM {} while draining", syn.stream_id);
            return Ok(());
        }

        if !syn
            .flags
            .only(ControlFlags::FIN | ControlFlags::UNIDIRECTIONAL)
        {
            return Err(SessionError::protocol(format!(
                "SYN_STREAM with invalid flags {:#x}",
                syn.flags.as_u8()
            )));
        }
        self.registry.validate_client_stream_id(syn.stream_id)?;

        let required = match self.version {
            SpdyVersion::V2 => REQUIRED_HEADERS_V2,
            SpdyVersion::V3 => REQUIRED_HEADERS_V3,
        };
        for name in required {
            if !syn.headers.contains_key(*name) {
                return Err(SessionError::protocol(format!(
                    "SYN_STREAM missing required header '{}'",
                    name
                )));
            }
        }

        if self.registry.len() >= self.config.max_concurrent_streams as usize {
            self.registry.note_refused_stream(syn.stream_id);
            return Err(SessionError::Stream(
                syn.stream_id,
                RstStreamStatus::RefusedStream,
            ));
        }

        let unidirectional = syn.flags.is_unidirectional();
        let priority = syn.priority;
        let stream_id = syn.stream_id;
        let stream = SpdyStream::new(
            stream_id,
            syn.associated_stream_id,
            priority,
            false,
            self.version,
            self.initial_send_window,
            self.config.initial_recv_window_size,
            self.shared.clone(),
        );

        // The worker sees the SYN_STREAM itself as its first input frame.
        stream
            .push_input(Frame::SynStream(syn))
            .map_err(|_| SessionError::Stream(stream_id, RstStreamStatus::FlowControlError))?;
        if unidirectional {
            stream.close_send_half();
        }

        log::debug!("accepted stream {} at priority {}", stream_id, priority);
        self.registry.insert_client_stream(stream.clone());
        let task = self.task_factory.new_stream_task(stream.clone());
        self.executor
            .add_task(Box::new(PanicGuardTask::new(task, stream)), priority);
        Ok(())
    }

    fn route_stream_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        let stream_id = frame.stream_id();
        let stream = match self.registry.get(stream_id) {
            Some(stream) if !stream.is_recv_closed() => stream.clone(),
            _ => {
                return Err(SessionError::Stream(
                    stream_id,
                    RstStreamStatus::InvalidStream,
                ))
            }
        };
        stream
            .push_input(frame)
            .map_err(|_| SessionError::Stream(stream_id, RstStreamStatus::FlowControlError))
    }

    /// Reap per-stream conditions: worker failures become RST_STREAM,
    /// consumed input becomes WINDOW_UPDATE credit, and fully closed
    /// streams with nothing left to send are dropped.
    fn sweep_streams(&mut self) {
        let mut failed = Vec::new();
        let mut credits = Vec::new();
        let mut finished = Vec::new();
        for stream in self.registry.streams() {
            let id = stream.stream_id();
            if stream.take_failure() {
                failed.push(id);
                continue;
            }
            if self.version.has_flow_control() {
                let consumed = stream.take_consumed_input();
                if consumed > 0 {
                    credits.push((id, consumed as u32));
                }
            }
            if stream.is_closed() && !stream.has_queued_output() {
                finished.push(id);
            }
        }

        for id in failed {
            log::warn!("worker for stream {} failed", id);
            self.reset_stream(id, RstStreamStatus::InternalError);
        }
        for (id, delta) in credits {
            self.scheduler
                .enqueue_control(Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id: id,
                    delta_window_size: delta,
                }));
        }
        for id in finished {
            log::debug!("stream {} closed", id);
            self.registry.remove(id);
            self.scheduler.forget_stream(id);
        }
    }

    /// Create streams for worker-requested pushes
    fn accept_push_requests(&mut self) {
        for request in self.shared.take_push_requests() {
            if self.state != SessionState::Running {
                continue;
            }
            if self.registry.get(request.associated_stream_id).is_none() {
                log::debug!(
                    "dropping push for finished stream {}",
                    request.associated_stream_id
                );
                continue;
            }
            let Some(stream_id) = self.registry.allocate_push_stream_id() else {
                log::warn!("push stream ids exhausted");
                continue;
            };

            let stream = SpdyStream::new(
                stream_id,
                request.associated_stream_id,
                request.priority,
                true,
                self.version,
                self.initial_send_window,
                self.config.initial_recv_window_size,
                self.shared.clone(),
            );
            // The push worker reads the pushed resource's request headers
            // as a synthetic SYN_STREAM; FIN because the client sends
            // nothing on a pushed stream.
            let mut flags = ControlFlags::from_u8(ControlFlags::FIN);
            flags.set(ControlFlags::UNIDIRECTIONAL);
            let syn = SynStreamFrame {
                stream_id,
                associated_stream_id: request.associated_stream_id,
                priority: request.priority,
                flags,
                headers: request.headers,
            };
            if stream.push_input(Frame::SynStream(syn)).is_err() {
                continue;
            }

            log::debug!(
                "starting push stream {} for stream {}",
                stream_id,
                request.associated_stream_id
            );
            self.registry.insert_push_stream(stream.clone());
            let task = self.task_factory.new_stream_task(stream.clone());
            self.executor
                .add_task(Box::new(PanicGuardTask::new(task, stream)), request.priority);
        }
    }

    fn apply_error(&mut self, error: SessionError) {
        match error {
            SessionError::Session(status, reason) => {
                log::warn!("session error: {}", reason);
                self.send_goaway(status);
                self.begin_drain();
            }
            SessionError::Stream(id, status) => {
                log::debug!("resetting stream {}: {}", id, status);
                self.reset_stream(id, status);
            }
        }
    }

    fn reset_stream(&mut self, id: StreamId, status: RstStreamStatus) {
        self.scheduler
            .enqueue_control(Frame::RstStream(RstStreamFrame {
                stream_id: id,
                status,
            }));
        if let Some(stream) = self.registry.remove(id) {
            stream.abort();
            self.scheduler.forget_stream(id);
        }
    }

    fn send_goaway(&mut self, status: GoawayStatus) {
        if self.goaway_sent {
            return;
        }
        self.goaway_sent = true;
        self.scheduler.enqueue_control(Frame::Goaway(GoawayFrame {
            last_good_stream_id: self.registry.last_client_stream_id(),
            status,
        }));
    }

    fn begin_drain(&mut self) {
        if self.state == SessionState::Running {
            log::debug!("session draining");
            self.state = SessionState::Draining;
            self.shared.set_draining();
        }
    }

    fn send_frame(&mut self, frame: &Frame) -> WriteStatus {
        match self.framer.encode_frame(frame) {
            Ok(bytes) => {
                log::trace!("sending {}", frame);
                self.io.send_frame_raw(&bytes)
            }
            Err(e) => {
                log::error!("failed to encode {}: {}", frame.name(), e);
                WriteStatus::Error
            }
        }
    }

    fn shutdown(&mut self) {
        log::debug!("session closed");
        self.state = SessionState::Closed;
        self.shared.set_draining();
        self.registry.abort_all();
        self.executor.stop();
    }
}
