//! Session transport abstraction
//!
//! The session loop talks to its connection through the [`SessionIo`]
//! trait: read available bytes into the framer (optionally blocking),
//! write one encoded frame, and ask whether the transport has died. The
//! session is the sole caller; no concurrent use is required of
//! implementations.
//!
//! [`TcpSessionIo`] is the production implementation over a plain
//! `TcpStream`, using `poll(2)` to choose between blocking and
//! non-blocking reads. Tests drive the session with scripted
//! implementations instead.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

use super::codec::SpdyFramer;

/// Outcome of an input pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Input (possibly none) was fed to the framer
    Success,
    /// The peer closed its half of the connection
    ConnectionClosed,
    /// The transport failed, or the framer rejected the input
    Error,
}

/// Outcome of a frame write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The whole frame was written
    Success,
    /// The peer is gone; the frame was not delivered
    ConnectionClosed,
    /// The transport failed
    Error,
}

/// Byte transport for one session
pub trait SessionIo {
    /// Whether the connection is known dead (no reads or writes possible)
    fn is_connection_aborted(&mut self) -> bool;

    /// Read available input and feed it to the framer.
    ///
    /// With `block` set the call may wait for input to arrive; otherwise
    /// it returns immediately, with `Success` when nothing was pending.
    fn process_available_input(&mut self, block: bool, framer: &mut SpdyFramer) -> ReadStatus;

    /// Write one encoded frame to the connection
    fn send_frame_raw(&mut self, frame: &[u8]) -> WriteStatus;
}

/// Read chunk size for the input pump
const READ_CHUNK_SIZE: usize = 4096;

/// Production transport over a plain TCP stream
pub struct TcpSessionIo {
    stream: TcpStream,
    read_timeout: Option<Duration>,
    aborted: bool,
}

impl TcpSessionIo {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Self {
        TcpSessionIo {
            stream,
            read_timeout: None,
            aborted: false,
        }
    }

    /// Bound blocking reads; an expired wait reads as connection closed,
    /// which drains the session. `None` (the default) waits forever;
    /// wall-clock enforcement belongs to the transport owner.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Get a reference to the underlying stream
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    /// Poll the socket for the requested events
    fn poll(&self, events: libc::c_short, timeout_ms: libc::c_int) -> std::io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.stream.as_raw_fd(),
            events,
            revents: 0,
        };

        let result = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, timeout_ms) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(result > 0)
    }
}

impl SessionIo for TcpSessionIo {
    fn is_connection_aborted(&mut self) -> bool {
        self.aborted
    }

    fn process_available_input(&mut self, block: bool, framer: &mut SpdyFramer) -> ReadStatus {
        let timeout_ms = if block {
            self.read_timeout
                .map(|d| d.as_millis() as libc::c_int)
                .unwrap_or(-1)
        } else {
            0
        };

        match self.poll(libc::POLLIN, timeout_ms) {
            Ok(true) => {}
            Ok(false) => {
                if block {
                    // Blocking read timed out: treat the peer as gone.
                    log::debug!("read timeout after {:?}", self.read_timeout);
                    return ReadStatus::ConnectionClosed;
                }
                return ReadStatus::Success;
            }
            Err(e) => {
                log::warn!("poll failed: {}", e);
                self.aborted = true;
                return ReadStatus::Error;
            }
        }

        let mut buf = [0u8; READ_CHUNK_SIZE];
        match self.stream.read(&mut buf) {
            Ok(0) => ReadStatus::ConnectionClosed,
            Ok(n) => {
                framer.process_input(&buf[..n]);
                if framer.has_error() {
                    ReadStatus::Error
                } else {
                    ReadStatus::Success
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => ReadStatus::Success,
            Err(e) => {
                log::warn!("read failed: {}", e);
                self.aborted = true;
                ReadStatus::Error
            }
        }
    }

    fn send_frame_raw(&mut self, frame: &[u8]) -> WriteStatus {
        match self.stream.write_all(frame).and_then(|_| self.stream.flush()) {
            Ok(()) => WriteStatus::Success,
            Err(e) => {
                self.aborted = true;
                match e.kind() {
                    std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted => WriteStatus::ConnectionClosed,
                    _ => {
                        log::warn!("write failed: {}", e);
                        WriteStatus::Error
                    }
                }
            }
        }
    }
}
