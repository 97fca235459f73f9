//! SPDY frame types
//!
//! This module defines the control and data frame types of the SPDY/2 and
//! SPDY/3 wire protocols (SPDY/3 draft Section 2.6).

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

use super::error::{GoawayStatus, RstStreamStatus};
use super::settings::SettingsEntry;
use super::stream::StreamId;

/// SPDY protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpdyVersion {
    /// SPDY version 2
    V2,
    /// SPDY version 3
    V3,
}

impl SpdyVersion {
    /// Convert version to the wire value
    pub fn as_u16(self) -> u16 {
        match self {
            SpdyVersion::V2 => 2,
            SpdyVersion::V3 => 3,
        }
    }

    /// Create version from the wire value
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            2 => Some(SpdyVersion::V2),
            3 => Some(SpdyVersion::V3),
            _ => None,
        }
    }

    /// Lowest (numerically largest) stream priority for this version
    ///
    /// Priorities run from 0 (highest) to 3 on SPDY/2 and 7 on SPDY/3.
    pub fn lowest_priority(self) -> u8 {
        match self {
            SpdyVersion::V2 => 3,
            SpdyVersion::V3 => 7,
        }
    }

    /// Whether this version carries per-stream flow control
    pub fn has_flow_control(self) -> bool {
        matches!(self, SpdyVersion::V3)
    }
}

impl fmt::Display for SpdyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spdy/{}", self.as_u16())
    }
}

/// SPDY control frame types (SPDY/3 draft Section 2.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameType {
    /// SYN_STREAM (1) - Opens a stream
    SynStream = 1,
    /// SYN_REPLY (2) - Accepts a stream
    SynReply = 2,
    /// RST_STREAM (3) - Abnormally terminates a stream
    RstStream = 3,
    /// SETTINGS (4) - Conveys configuration parameters
    Settings = 4,
    /// NOOP (5) - No operation (SPDY/2 only, ignored)
    Noop = 5,
    /// PING (6) - Connection liveness probe
    Ping = 6,
    /// GOAWAY (7) - Initiates session shutdown
    Goaway = 7,
    /// HEADERS (8) - Additional header block for a stream
    Headers = 8,
    /// WINDOW_UPDATE (9) - Flow control credit (SPDY/3 only)
    WindowUpdate = 9,
    /// CREDENTIAL (10) - Client certificate slot (SPDY/3, not processed)
    Credential = 10,
}

impl FrameType {
    /// Convert frame type to u16
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Create frame type from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FrameType::SynStream),
            2 => Some(FrameType::SynReply),
            3 => Some(FrameType::RstStream),
            4 => Some(FrameType::Settings),
            5 => Some(FrameType::Noop),
            6 => Some(FrameType::Ping),
            7 => Some(FrameType::Goaway),
            8 => Some(FrameType::Headers),
            9 => Some(FrameType::WindowUpdate),
            10 => Some(FrameType::Credential),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::SynStream => "SYN_STREAM",
            FrameType::SynReply => "SYN_REPLY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::Noop => "NOOP",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::Headers => "HEADERS",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Credential => "CREDENTIAL",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u16())
    }
}

/// Control frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags(u8);

impl ControlFlags {
    /// FLAG_FIN (0x1) - sender closes its half of the stream
    pub const FIN: u8 = 0x1;

    /// FLAG_UNIDIRECTIONAL (0x2) - recipient must not send on the stream
    pub const UNIDIRECTIONAL: u8 = 0x2;

    /// Create empty flags
    pub fn empty() -> Self {
        ControlFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        ControlFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Check if FLAG_FIN is set
    pub fn is_fin(&self) -> bool {
        self.is_set(Self::FIN)
    }

    /// Check if FLAG_UNIDIRECTIONAL is set
    pub fn is_unidirectional(&self) -> bool {
        self.is_set(Self::UNIDIRECTIONAL)
    }

    /// Check that no bits outside the given mask are set
    pub fn only(&self, mask: u8) -> bool {
        (self.0 & !mask) == 0
    }
}

/// Decompressed name/value header block
///
/// SPDY header names are lowercase ASCII; a value may hold several
/// entries separated by NUL octets. The map keeps encode order stable.
pub type HeaderBlock = BTreeMap<String, String>;

/// SYN_STREAM frame (SPDY/3 draft Section 2.6.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynStreamFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Associated stream ID (0 when unassociated)
    pub associated_stream_id: StreamId,
    /// Stream priority (0 = highest)
    pub priority: u8,
    /// Raw control flags (valid: FIN, UNIDIRECTIONAL)
    pub flags: ControlFlags,
    /// Header block
    pub headers: HeaderBlock,
}

impl SynStreamFrame {
    /// Create a new SYN_STREAM frame
    pub fn new(stream_id: StreamId, priority: u8, headers: HeaderBlock) -> Self {
        SynStreamFrame {
            stream_id,
            associated_stream_id: 0,
            priority,
            flags: ControlFlags::empty(),
            headers,
        }
    }

    /// Set the associated stream id (server push)
    pub fn with_associated_stream(mut self, associated_stream_id: StreamId) -> Self {
        self.associated_stream_id = associated_stream_id;
        self
    }

    /// Set control flags
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = ControlFlags::from_u8(flags);
        self
    }
}

/// SYN_REPLY frame (SPDY/3 draft Section 2.6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynReplyFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// FLAG_FIN
    pub fin: bool,
    /// Header block
    pub headers: HeaderBlock,
}

/// RST_STREAM frame (SPDY/3 draft Section 2.6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Status code
    pub status: RstStreamStatus,
}

/// SETTINGS frame (SPDY/3 draft Section 2.6.4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    /// FLAG_SETTINGS_CLEAR_SETTINGS
    pub clear_persisted: bool,
    /// ID/value entries in wire order
    pub entries: Vec<SettingsEntry>,
}

impl SettingsFrame {
    /// Create a SETTINGS frame from entries
    pub fn new(entries: Vec<SettingsEntry>) -> Self {
        SettingsFrame {
            clear_persisted: false,
            entries,
        }
    }
}

/// PING frame (SPDY/3 draft Section 2.6.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    /// Unique ping id (client pings are odd, server pings even)
    pub id: u32,
}

/// GOAWAY frame (SPDY/3 draft Section 2.6.6)
///
/// The status code exists only in the SPDY/3 wire format; on SPDY/2 it is
/// dropped on encode and reads back as `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoawayFrame {
    /// Last client stream id accepted by the sender
    pub last_good_stream_id: StreamId,
    /// Session status
    pub status: GoawayStatus,
}

/// HEADERS frame (SPDY/3 draft Section 2.6.7)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// FLAG_FIN
    pub fin: bool,
    /// Header block
    pub headers: HeaderBlock,
}

/// WINDOW_UPDATE frame (SPDY/3 draft Section 2.6.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Window credit, 1 to 2^31 - 1
    pub delta_window_size: u32,
}

/// DATA frame (SPDY/3 draft Section 2.2.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Payload
    pub data: Bytes,
    /// FLAG_FIN
    pub fin: bool,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: StreamId, data: Bytes, fin: bool) -> Self {
        DataFrame { stream_id, data, fin }
    }
}

/// A parsed SPDY frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// SYN_STREAM control frame
    SynStream(SynStreamFrame),
    /// SYN_REPLY control frame
    SynReply(SynReplyFrame),
    /// RST_STREAM control frame
    RstStream(RstStreamFrame),
    /// SETTINGS control frame
    Settings(SettingsFrame),
    /// PING control frame
    Ping(PingFrame),
    /// GOAWAY control frame
    Goaway(GoawayFrame),
    /// HEADERS control frame
    Headers(HeadersFrame),
    /// WINDOW_UPDATE control frame
    WindowUpdate(WindowUpdateFrame),
    /// DATA frame
    Data(DataFrame),
}

impl Frame {
    /// Stream id this frame addresses (0 for session-level frames)
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::SynStream(f) => f.stream_id,
            Frame::SynReply(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::Headers(f) => f.stream_id,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Data(f) => f.stream_id,
            Frame::Settings(_) | Frame::Ping(_) | Frame::Goaway(_) => 0,
        }
    }

    /// Whether this is a DATA frame
    pub fn is_data(&self) -> bool {
        matches!(self, Frame::Data(_))
    }

    /// Whether this frame closes the sender's half of its stream
    pub fn is_fin(&self) -> bool {
        match self {
            Frame::SynStream(f) => f.flags.is_fin(),
            Frame::SynReply(f) => f.fin,
            Frame::Headers(f) => f.fin,
            Frame::Data(f) => f.fin,
            _ => false,
        }
    }

    /// Frame name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Frame::SynStream(_) => "SYN_STREAM",
            Frame::SynReply(_) => "SYN_REPLY",
            Frame::RstStream(_) => "RST_STREAM",
            Frame::Settings(_) => "SETTINGS",
            Frame::Ping(_) => "PING",
            Frame::Goaway(_) => "GOAWAY",
            Frame::Headers(_) => "HEADERS",
            Frame::WindowUpdate(_) => "WINDOW_UPDATE",
            Frame::Data(_) => "DATA",
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Data(d) => write!(
                f,
                "DATA(stream={}, len={}, fin={})",
                d.stream_id,
                d.data.len(),
                d.fin
            ),
            other => write!(f, "{}(stream={})", other.name(), other.stream_id()),
        }
    }
}
