//! SPDY stream management
//!
//! A stream is the unit of multiplexing (SPDY/3 draft Section 2.3). Each
//! accepted stream is shared between the session loop and one worker task:
//! the session appends incoming frames to the stream's input queue and
//! drains its output queue onto the wire; the worker consumes input and
//! produces output. The queues, flow control windows and close flags are
//! the only state touched from both sides and sit behind one mutex, with a
//! condvar so a worker can block for input without polling.
//!
//! There is deliberately no stream-to-session pointer. The pieces of
//! session state a worker may touch (activity wakeups, server push
//! requests, the draining flag) live in [`SessionShared`], which both
//! sides hold through an `Arc`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

use super::error::{Error, Result, SessionError};
use super::flow_control::FlowControlWindow;
use super::frames::{
    ControlFlags, DataFrame, Frame, HeaderBlock, HeadersFrame, SpdyVersion, SynReplyFrame,
    SynStreamFrame,
};
use super::MAX_STREAM_ID;

/// Stream ID type (31-bit, client streams odd, server streams even)
pub type StreamId = u32;

/// A server push requested by a worker, pending session-side validation
#[derive(Debug)]
pub(crate) struct PushRequest {
    /// Client stream the push is associated with
    pub associated_stream_id: StreamId,
    /// Priority for the pushed stream
    pub priority: u8,
    /// Request headers describing the pushed resource
    pub headers: HeaderBlock,
}

/// Session state shared with stream workers.
///
/// Carries the activity condvar the session parks on, the queue of push
/// requests, and the flags a worker needs for fast-fail push validation.
pub(crate) struct SessionShared {
    version: SpdyVersion,
    push_enabled: bool,
    draining: AtomicBool,
    epoch: Mutex<u64>,
    activity: Condvar,
    push_requests: Mutex<VecDeque<PushRequest>>,
}

impl SessionShared {
    pub fn new(version: SpdyVersion, push_enabled: bool) -> Self {
        SessionShared {
            version,
            push_enabled,
            draining: AtomicBool::new(false),
            epoch: Mutex::new(0),
            activity: Condvar::new(),
            push_requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Record activity and wake the session if it is parked
    pub fn bump(&self) {
        let mut epoch = lock(&self.epoch);
        *epoch += 1;
        self.activity.notify_all();
    }

    /// Current activity epoch
    pub fn epoch(&self) -> u64 {
        *lock(&self.epoch)
    }

    /// Park until the epoch moves past `seen` or the timeout elapses
    pub fn wait_for_activity(&self, seen: u64, timeout: Duration) {
        let mut epoch = lock(&self.epoch);
        while *epoch == seen {
            let (guard, result) = self
                .activity
                .wait_timeout(epoch, timeout)
                .unwrap_or_else(|e| e.into_inner());
            epoch = guard;
            if result.timed_out() {
                break;
            }
        }
    }

    /// Stop accepting new streams and push requests
    pub fn set_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Enqueue a push request after fast-fail validation
    pub fn request_push(&self, request: PushRequest) -> Result<()> {
        if self.version != SpdyVersion::V3 || !self.push_enabled || self.is_draining() {
            return Err(Error::PushUnavailable);
        }
        lock(&self.push_requests).push_back(request);
        self.bump();
        Ok(())
    }

    /// Drain pending push requests
    pub fn take_push_requests(&self) -> Vec<PushRequest> {
        lock(&self.push_requests).drain(..).collect()
    }
}

/// Result of asking a stream for its next outgoing frame
#[derive(Debug)]
pub enum PopOutput {
    /// A frame ready for the wire
    Frame(Frame),
    /// Output exists but the send window allows none of it
    WindowBlocked,
    /// Nothing queued
    Empty,
}

/// Mutable stream state shared between session and worker
struct StreamInner {
    input: VecDeque<Frame>,
    output: VecDeque<Frame>,
    send_window: FlowControlWindow,
    recv_window: FlowControlWindow,
    recv_closed: bool,
    send_closed: bool,
    reset: bool,
    failed: bool,
    consumed_input: usize,
}

/// A single SPDY stream
///
/// Created by the session when a SYN_STREAM is accepted or a server push
/// starts, and handed to exactly one worker task as a [`StreamHandle`].
pub struct SpdyStream {
    id: StreamId,
    associated_stream_id: StreamId,
    priority: u8,
    server_push: bool,
    version: SpdyVersion,
    shared: Arc<SessionShared>,
    inner: Mutex<StreamInner>,
    input_ready: Condvar,
}

/// Shared, reference-counted stream handle
pub type StreamHandle = Arc<SpdyStream>;

/// Poison-tolerant lock. A worker that panicked mid-send must not wedge
/// the session; the panic itself is reported through the failure flag.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SpdyStream {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: StreamId,
        associated_stream_id: StreamId,
        priority: u8,
        server_push: bool,
        version: SpdyVersion,
        send_window_size: u32,
        recv_window_size: u32,
        shared: Arc<SessionShared>,
    ) -> StreamHandle {
        Arc::new(SpdyStream {
            id,
            associated_stream_id,
            priority,
            server_push,
            version,
            shared,
            inner: Mutex::new(StreamInner {
                input: VecDeque::new(),
                output: VecDeque::new(),
                send_window: FlowControlWindow::new(send_window_size),
                recv_window: FlowControlWindow::new(recv_window_size),
                recv_closed: false,
                send_closed: false,
                reset: false,
                failed: false,
                consumed_input: 0,
            }),
            input_ready: Condvar::new(),
        })
    }

    /// Stream ID
    pub fn stream_id(&self) -> StreamId {
        self.id
    }

    /// Associated stream ID (0 when unassociated)
    pub fn associated_stream_id(&self) -> StreamId {
        self.associated_stream_id
    }

    /// Stream priority (0 = highest)
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Whether this is a server-initiated push stream
    pub fn is_server_push(&self) -> bool {
        self.server_push
    }

    // ---- worker side ----

    /// Get the next input frame, optionally blocking until one arrives.
    ///
    /// Returns `None` when the stream was reset, or when the receive half
    /// is closed and the queue is drained, or (non-blocking) when the
    /// queue is momentarily empty.
    pub fn get_input_frame(&self, block: bool) -> Option<Frame> {
        let mut inner = lock(&self.inner);
        loop {
            if inner.reset {
                return None;
            }
            if let Some(frame) = inner.input.pop_front() {
                if let Frame::Data(ref data) = frame {
                    if !data.data.is_empty() {
                        inner.consumed_input += data.data.len();
                        self.shared.bump();
                    }
                }
                return Some(frame);
            }
            if inner.recv_closed || !block {
                return None;
            }
            inner = self
                .input_ready
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Send the SYN_REPLY opening the server's half of a client stream
    pub fn send_syn_reply(&self, headers: HeaderBlock, fin: bool) -> Result<()> {
        let frame = Frame::SynReply(SynReplyFrame {
            stream_id: self.id,
            fin,
            headers,
        });
        self.queue_output(frame, fin)
    }

    /// Send the SYN_STREAM opening a server push stream
    pub fn send_syn_stream(&self, headers: HeaderBlock, fin: bool) -> Result<()> {
        if !self.server_push {
            return Err(Error::Protocol(
                "SYN_STREAM output is reserved for push streams".to_string(),
            ));
        }
        let mut flags = ControlFlags::from_u8(ControlFlags::UNIDIRECTIONAL);
        if fin {
            flags.set(ControlFlags::FIN);
        }
        let frame = Frame::SynStream(SynStreamFrame {
            stream_id: self.id,
            associated_stream_id: self.associated_stream_id,
            priority: self.priority,
            flags,
            headers,
        });
        self.queue_output(frame, fin)
    }

    /// Send an additional header block
    pub fn send_headers(&self, headers: HeaderBlock, fin: bool) -> Result<()> {
        let frame = Frame::Headers(HeadersFrame {
            stream_id: self.id,
            fin,
            headers,
        });
        self.queue_output(frame, fin)
    }

    /// Send a DATA frame
    ///
    /// The frame is queued whole; the session fragments it against the
    /// send window when it pops output for the wire.
    pub fn send_data(&self, data: impl Into<Bytes>, fin: bool) -> Result<()> {
        let frame = Frame::Data(DataFrame::new(self.id, data.into(), fin));
        self.queue_output(frame, fin)
    }

    /// Request a server push associated with this stream.
    ///
    /// The headers describe the pushed resource; they are delivered to
    /// the push worker as its input SYN_STREAM. Fails immediately when
    /// the session cannot push (SPDY/2, push disabled, session draining,
    /// or this stream already reset).
    pub fn start_server_push(&self, headers: HeaderBlock, priority: u8) -> Result<()> {
        if lock(&self.inner).reset {
            return Err(Error::StreamReset(self.id));
        }
        self.shared.request_push(PushRequest {
            associated_stream_id: self.id,
            priority,
            headers,
        })
    }

    fn queue_output(&self, frame: Frame, fin: bool) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.reset {
            return Err(Error::StreamReset(self.id));
        }
        if inner.send_closed {
            return Err(Error::StreamClosed(self.id));
        }
        inner.output.push_back(frame);
        if fin {
            inner.send_closed = true;
        }
        drop(inner);
        self.shared.bump();
        Ok(())
    }

    // ---- session side ----

    /// Append an incoming frame to the input queue.
    ///
    /// On SPDY/3, DATA is charged against the receive window; an overrun
    /// is a flow control violation the caller turns into RST_STREAM.
    pub(crate) fn push_input(&self, frame: Frame) -> Result<()> {
        let fin = frame.is_fin();
        let mut inner = lock(&self.inner);
        if let Frame::Data(ref data) = frame {
            if self.version.has_flow_control() {
                inner.recv_window.decrease(data.data.len());
                if inner.recv_window.size() < 0 {
                    return Err(Error::FlowControl(format!(
                        "stream {} receive window overrun",
                        self.id
                    )));
                }
            }
        }
        inner.input.push_back(frame);
        if fin {
            inner.recv_closed = true;
        }
        drop(inner);
        self.input_ready.notify_all();
        Ok(())
    }

    /// Pop the next frame for the wire, fragmenting DATA to fit both the
    /// `max_data` cap and (SPDY/3) the current send window.
    pub(crate) fn pop_output(&self, max_data: usize) -> PopOutput {
        let mut inner = lock(&self.inner);
        let data_len = match inner.output.front() {
            None => return PopOutput::Empty,
            Some(Frame::Data(data)) => data.data.len(),
            Some(_) => 0,
        };

        if data_len > 0 {
            let available = if self.version.has_flow_control() {
                std::cmp::max(inner.send_window.size(), 0) as usize
            } else {
                usize::MAX
            };
            if available == 0 {
                return PopOutput::WindowBlocked;
            }

            let take = data_len.min(max_data).min(available);
            if self.version.has_flow_control() {
                inner.send_window.consume(take);
            }
            if take < data_len {
                // Partial send: the FIN stays with the remainder.
                let chunk = match inner.output.front_mut() {
                    Some(Frame::Data(data)) => data.data.split_to(take),
                    _ => unreachable!("front changed under lock"),
                };
                return PopOutput::Frame(Frame::Data(DataFrame::new(self.id, chunk, false)));
            }
        }

        match inner.output.pop_front() {
            Some(frame) => PopOutput::Frame(frame),
            None => PopOutput::Empty,
        }
    }

    /// Whether at least one queued frame could go to the wire right now
    pub(crate) fn has_sendable_output(&self) -> bool {
        let inner = lock(&self.inner);
        match inner.output.front() {
            None => false,
            Some(Frame::Data(data)) if !data.data.is_empty() => {
                !self.version.has_flow_control() || inner.send_window.has_capacity()
            }
            Some(_) => true,
        }
    }

    /// Whether any output is queued, sendable or not
    pub(crate) fn has_queued_output(&self) -> bool {
        !lock(&self.inner).output.is_empty()
    }

    /// Both halves closed, or reset
    pub fn is_closed(&self) -> bool {
        let inner = lock(&self.inner);
        inner.reset || (inner.recv_closed && inner.send_closed)
    }

    /// Receive half closed (no more input accepted)
    pub(crate) fn is_recv_closed(&self) -> bool {
        let inner = lock(&self.inner);
        inner.reset || inner.recv_closed
    }

    /// Close the send half without emitting a FIN (UNIDIRECTIONAL streams)
    pub(crate) fn close_send_half(&self) {
        lock(&self.inner).send_closed = true;
    }

    /// Reset the stream: drop queued frames and wake the worker
    pub fn abort(&self) {
        let mut inner = lock(&self.inner);
        inner.reset = true;
        inner.input.clear();
        inner.output.clear();
        drop(inner);
        self.input_ready.notify_all();
        self.shared.bump();
    }

    /// Mark the stream failed by its worker (panic or abnormal abort)
    pub(crate) fn fail(&self) {
        {
            let mut inner = lock(&self.inner);
            inner.failed = true;
            inner.reset = true;
            inner.input.clear();
            inner.output.clear();
        }
        self.input_ready.notify_all();
        self.shared.bump();
    }

    /// Take the worker-failure flag (true at most once)
    pub(crate) fn take_failure(&self) -> bool {
        let mut inner = lock(&self.inner);
        std::mem::take(&mut inner.failed)
    }

    /// Take the count of DATA bytes the worker consumed since last asked
    pub(crate) fn take_consumed_input(&self) -> usize {
        let mut inner = lock(&self.inner);
        let consumed = std::mem::take(&mut inner.consumed_input);
        inner.recv_window.adjust(consumed as i64);
        consumed
    }

    /// Apply a SETTINGS-driven change to the send window
    pub(crate) fn adjust_send_window(&self, delta: i64) {
        lock(&self.inner).send_window.adjust(delta);
        self.shared.bump();
    }

    /// Apply a WINDOW_UPDATE to the send window
    pub(crate) fn increase_send_window(&self, delta: u32) -> Result<()> {
        lock(&self.inner).send_window.increase(delta)?;
        self.shared.bump();
        Ok(())
    }

    /// Current send window size
    #[cfg(test)]
    pub(crate) fn send_window_size(&self) -> i64 {
        lock(&self.inner).send_window.size()
    }
}

/// The set of streams alive on one session.
///
/// Enforces the id invariants: nonzero, odd and strictly increasing for
/// client streams, even and locally allocated for push streams, never
/// reused within the session.
pub(crate) struct StreamRegistry {
    streams: BTreeMap<StreamId, StreamHandle>,
    last_client_stream_id: StreamId,
    next_push_stream_id: StreamId,
}

impl StreamRegistry {
    pub fn new() -> Self {
        StreamRegistry {
            streams: BTreeMap::new(),
            last_client_stream_id: 0,
            next_push_stream_id: 2,
        }
    }

    /// Validate a client SYN_STREAM id against the registry invariants
    pub fn validate_client_stream_id(&self, id: StreamId) -> std::result::Result<(), SessionError> {
        if id == 0 {
            return Err(SessionError::protocol("SYN_STREAM with stream id 0"));
        }
        if id % 2 == 0 {
            return Err(SessionError::protocol(format!(
                "client SYN_STREAM with even stream id {}",
                id
            )));
        }
        if id <= self.last_client_stream_id {
            return Err(SessionError::protocol(format!(
                "stream id {} not above last accepted id {}",
                id, self.last_client_stream_id
            )));
        }
        Ok(())
    }

    /// Register an accepted client stream
    pub fn insert_client_stream(&mut self, stream: StreamHandle) {
        self.last_client_stream_id = stream.stream_id();
        self.streams.insert(stream.stream_id(), stream);
    }

    /// Record a refused client stream id so it is never accepted later
    pub fn note_refused_stream(&mut self, id: StreamId) {
        if id > self.last_client_stream_id {
            self.last_client_stream_id = id;
        }
    }

    /// Allocate the next server push stream id, if any remain
    pub fn allocate_push_stream_id(&mut self) -> Option<StreamId> {
        if self.next_push_stream_id > MAX_STREAM_ID {
            return None;
        }
        let id = self.next_push_stream_id;
        self.next_push_stream_id += 2;
        Some(id)
    }

    /// Register a push stream
    pub fn insert_push_stream(&mut self, stream: StreamHandle) {
        self.streams.insert(stream.stream_id(), stream);
    }

    pub fn get(&self, id: StreamId) -> Option<&StreamHandle> {
        self.streams.get(&id)
    }

    pub fn remove(&mut self, id: StreamId) -> Option<StreamHandle> {
        self.streams.remove(&id)
    }

    /// Highest client stream id accepted so far (for GOAWAY)
    pub fn last_client_stream_id(&self) -> StreamId {
        self.last_client_stream_id
    }

    /// Number of registered streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether any stream still has an open half
    pub fn has_active(&self) -> bool {
        self.streams.values().any(|s| !s.is_closed())
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamHandle> {
        self.streams.values()
    }

    /// Apply a SETTINGS initial-window delta to every registered stream
    pub fn adjust_all_send_windows(&self, delta: i64) {
        for stream in self.streams.values() {
            stream.adjust_send_window(delta);
        }
    }

    /// Reset every stream (session teardown)
    pub fn abort_all(&mut self) {
        for stream in self.streams.values() {
            stream.abort();
        }
        self.streams.clear();
    }
}
