//! Server-side SPDY session engine
//!
//! This module implements the server half of the SPDY v2/v3 multiplexing
//! protocol: a per-connection session loop that parses an adversarial
//! frame stream, fans requests out to worker tasks on an external
//! executor, and merges their output back into one priority-ordered,
//! flow-controlled wire stream.
//!
//! # Architecture
//!
//! - [`SpdySession`] drives everything from a single thread. It owns the
//!   framer, the stream registry and the output scheduler.
//! - [`SpdyFramer`] is the only component that touches serialized bytes,
//!   including the zlib-with-dictionary header compression.
//! - Each accepted stream is an [`SpdyStream`] shared with exactly one
//!   worker task; the per-stream queues and windows are the only state
//!   touched from both sides.
//! - The transport and the task executor are capability traits
//!   ([`SessionIo`], [`Executor`] / [`StreamTaskFactory`]) with one
//!   production and one test implementation each.
//!
//! # Example
//!
//! ```no_run
//! use spdymux::spdy::{
//!     Executor, ServerConfig, SessionIo, SpdySession, SpdyVersion, StreamHandle, StreamTask,
//!     StreamTaskFactory, TcpSessionIo, ThreadPoolExecutor,
//! };
//! use std::net::TcpListener;
//!
//! struct EchoTask {
//!     stream: StreamHandle,
//! }
//!
//! impl StreamTask for EchoTask {
//!     fn run(&mut self) {
//!         // Read the request, then reply through the stream handle.
//!         let _request = self.stream.get_input_frame(true);
//!         let mut headers = std::collections::BTreeMap::new();
//!         headers.insert(":status".to_string(), "200".to_string());
//!         headers.insert(":version".to_string(), "HTTP/1.1".to_string());
//!         let _ = self.stream.send_syn_reply(headers, false);
//!         let _ = self.stream.send_data(&b"hello"[..], true);
//!     }
//!     fn cancel(&mut self) {}
//! }
//!
//! struct EchoFactory;
//! impl StreamTaskFactory for EchoFactory {
//!     fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn StreamTask> {
//!         Box::new(EchoTask { stream })
//!     }
//! }
//!
//! let config = ServerConfig::default();
//! let executor = ThreadPoolExecutor::new(4);
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//! let (socket, _) = listener.accept().unwrap();
//! let mut io = TcpSessionIo::new(socket);
//! let mut session = SpdySession::new(SpdyVersion::V3, &config, &mut io, &EchoFactory, &executor);
//! session.run();
//! ```

pub mod codec;
pub(crate) mod compress;
pub mod config;
pub mod error;
pub mod executor;
pub mod flow_control;
pub mod frames;
pub mod io;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod stream;

pub use codec::SpdyFramer;
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{Error, GoawayStatus, Result, RstStreamStatus};
pub use executor::{
    Executor, InlineExecutor, StreamTask, StreamTaskFactory, ThreadPoolExecutor,
};
pub use frames::{Frame, FrameType, HeaderBlock, SpdyVersion};
pub use io::{ReadStatus, SessionIo, TcpSessionIo, WriteStatus};
pub use session::{SessionState, SpdySession};
pub use stream::{SpdyStream, StreamHandle, StreamId};

/// Default per-stream flow control window on SPDY/3 (64 KiB)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65536;

/// Largest legal flow control window (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

/// Largest stream id (31 bits)
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Largest DATA payload the scheduler puts in a single frame
pub const MAX_DATA_FRAME_PAYLOAD: usize = 4096;
