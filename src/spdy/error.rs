//! SPDY error types
//!
//! This module defines error types for SPDY session operations, mapping to
//! the GOAWAY and RST_STREAM status codes defined in the SPDY/2 and SPDY/3
//! drafts.

use std::fmt;

use super::stream::StreamId;

/// SPDY errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame parse error (malformed wire data)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Header block compression or decompression failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// Protocol violation detected
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Flow control window violation
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Stream is closed for the attempted operation
    #[error("Stream closed: {0}")]
    StreamClosed(StreamId),

    /// Stream was reset
    #[error("Stream reset: {0}")]
    StreamReset(StreamId),

    /// Server push is not available (wrong version, disabled, or draining)
    #[error("Server push unavailable")]
    PushUnavailable,

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout waiting for operation
    #[error("Timeout")]
    Timeout,
}

/// Result type for SPDY operations
pub type Result<T> = std::result::Result<T, Error>;

/// GOAWAY status codes (SPDY/3 draft Section 2.6.6)
///
/// SPDY/2 GOAWAY frames carry no status code on the wire; the session
/// still tracks one so shutdown handling is version-uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GoawayStatus {
    /// Graceful shutdown
    Ok = 0x0,
    /// Protocol error detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
}

impl GoawayStatus {
    /// Convert status to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create status from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x0 => Some(GoawayStatus::Ok),
            0x1 => Some(GoawayStatus::ProtocolError),
            0x2 => Some(GoawayStatus::InternalError),
            _ => None,
        }
    }

    /// Get status name
    pub fn name(&self) -> &'static str {
        match self {
            GoawayStatus::Ok => "OK",
            GoawayStatus::ProtocolError => "PROTOCOL_ERROR",
            GoawayStatus::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for GoawayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// RST_STREAM status codes (SPDY/3 draft Section 2.6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RstStreamStatus {
    /// Generic protocol error on the stream
    ProtocolError = 0x1,
    /// Frame received for a stream that is not active
    InvalidStream = 0x2,
    /// Stream was refused before any processing
    RefusedStream = 0x3,
    /// SPDY version not supported for this stream
    UnsupportedVersion = 0x4,
    /// Stream is no longer needed
    Cancel = 0x5,
    /// Implementation fault while handling the stream
    InternalError = 0x6,
    /// Flow control windows were violated
    FlowControlError = 0x7,
    /// Stream id already in use
    StreamInUse = 0x8,
    /// Frame received for a stream that is half closed
    StreamAlreadyClosed = 0x9,
    /// Credential slot contents were not valid
    InvalidCredentials = 0xa,
    /// Frame was too large to process
    FrameTooLarge = 0xb,
}

impl RstStreamStatus {
    /// Convert status to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create status from u32
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0x1 => Some(RstStreamStatus::ProtocolError),
            0x2 => Some(RstStreamStatus::InvalidStream),
            0x3 => Some(RstStreamStatus::RefusedStream),
            0x4 => Some(RstStreamStatus::UnsupportedVersion),
            0x5 => Some(RstStreamStatus::Cancel),
            0x6 => Some(RstStreamStatus::InternalError),
            0x7 => Some(RstStreamStatus::FlowControlError),
            0x8 => Some(RstStreamStatus::StreamInUse),
            0x9 => Some(RstStreamStatus::StreamAlreadyClosed),
            0xa => Some(RstStreamStatus::InvalidCredentials),
            0xb => Some(RstStreamStatus::FrameTooLarge),
            _ => None,
        }
    }

    /// Get status name
    pub fn name(&self) -> &'static str {
        match self {
            RstStreamStatus::ProtocolError => "PROTOCOL_ERROR",
            RstStreamStatus::InvalidStream => "INVALID_STREAM",
            RstStreamStatus::RefusedStream => "REFUSED_STREAM",
            RstStreamStatus::UnsupportedVersion => "UNSUPPORTED_VERSION",
            RstStreamStatus::Cancel => "CANCEL",
            RstStreamStatus::InternalError => "INTERNAL_ERROR",
            RstStreamStatus::FlowControlError => "FLOW_CONTROL_ERROR",
            RstStreamStatus::StreamInUse => "STREAM_IN_USE",
            RstStreamStatus::StreamAlreadyClosed => "STREAM_ALREADY_CLOSED",
            RstStreamStatus::InvalidCredentials => "INVALID_CREDENTIALS",
            RstStreamStatus::FrameTooLarge => "FRAME_TOO_LARGE",
        }
    }
}

impl fmt::Display for RstStreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Classified session-loop failure.
///
/// Session-wide violations terminate the session with a GOAWAY carrying
/// the given status; per-stream violations reset one stream and leave the
/// session running.
#[derive(Debug)]
pub enum SessionError {
    /// Terminate the session: emit GOAWAY and drain
    Session(GoawayStatus, String),
    /// Reset one stream: emit RST_STREAM and continue
    Stream(StreamId, RstStreamStatus),
}

impl SessionError {
    /// A session-wide protocol violation
    pub fn protocol(reason: impl Into<String>) -> Self {
        SessionError::Session(GoawayStatus::ProtocolError, reason.into())
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Session(status, reason) => {
                write!(f, "session error {}: {}", status, reason)
            }
            SessionError::Stream(id, status) => {
                write!(f, "stream {} error {}", id, status)
            }
        }
    }
}
