//! Output scheduling
//!
//! Merges per-stream output queues and session control frames into the
//! single ordered wire stream. Control frames originated by the session
//! loop (SETTINGS, GOAWAY, PING replies, RST_STREAM, WINDOW_UPDATE) always
//! go first; stream output is picked strictly by priority, with ties
//! broken round-robin by last service. A stream whose send window is empty
//! is skipped but keeps its place.

use std::collections::{HashMap, VecDeque};

use super::frames::Frame;
use super::stream::{PopOutput, StreamId, StreamRegistry};
use super::MAX_DATA_FRAME_PAYLOAD;

/// Priority- and flow-control-aware output merger
pub(crate) struct OutputScheduler {
    control: VecDeque<Frame>,
    serial: u64,
    last_served: HashMap<StreamId, u64>,
}

impl OutputScheduler {
    pub fn new() -> Self {
        OutputScheduler {
            control: VecDeque::new(),
            serial: 0,
            last_served: HashMap::new(),
        }
    }

    /// Queue a session-originated control frame (absolute priority)
    pub fn enqueue_control(&mut self, frame: Frame) {
        self.control.push_back(frame);
    }

    /// Pick the next frame for the transport, if any byte is sendable
    pub fn next_frame(&mut self, registry: &StreamRegistry) -> Option<Frame> {
        if let Some(frame) = self.control.pop_front() {
            return Some(frame);
        }

        let mut candidates: Vec<_> = registry
            .streams()
            .filter(|s| s.has_queued_output())
            .collect();
        candidates.sort_by_key(|s| {
            (
                s.priority(),
                self.last_served.get(&s.stream_id()).copied().unwrap_or(0),
            )
        });

        for stream in candidates {
            match stream.pop_output(MAX_DATA_FRAME_PAYLOAD) {
                PopOutput::Frame(frame) => {
                    self.serial += 1;
                    self.last_served.insert(stream.stream_id(), self.serial);
                    return Some(frame);
                }
                PopOutput::WindowBlocked | PopOutput::Empty => continue,
            }
        }
        None
    }

    /// Whether anything is sendable right now.
    ///
    /// Window-blocked stream output does not count; when every stream is
    /// blocked the session parks on input instead of spinning here.
    pub fn has_pending(&self, registry: &StreamRegistry) -> bool {
        !self.control.is_empty() || registry.streams().any(|s| s.has_sendable_output())
    }

    /// Whether any output is queued at all, window-blocked included.
    /// Drain completion is judged on this, so blocked frames are never
    /// silently dropped.
    pub fn has_queued(&self, registry: &StreamRegistry) -> bool {
        !self.control.is_empty() || registry.streams().any(|s| s.has_queued_output())
    }

    /// Drop bookkeeping for a removed stream
    pub fn forget_stream(&mut self, id: StreamId) {
        self.last_served.remove(&id);
    }
}
