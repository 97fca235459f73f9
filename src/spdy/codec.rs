//! SPDY frame encoding and decoding
//!
//! This module provides the framer: incremental decoding of the byte
//! stream into parsed frames, and encoding of outgoing frames, for both
//! the SPDY/2 and SPDY/3 wire formats (SPDY/3 draft Section 2.2).
//!
//! The framer is the sole owner of the session's header compression
//! contexts. Decode errors are latched: a malformed frame or a broken
//! header block poisons the framer and no further input is parsed, since
//! the shared zlib state can no longer be trusted.

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

use super::compress::{HeaderCompressor, HeaderDecompressor};
use super::error::{Error, GoawayStatus, Result, RstStreamStatus};
use super::frames::{
    ControlFlags, DataFrame, Frame, FrameType, GoawayFrame, HeaderBlock, HeadersFrame, PingFrame,
    RstStreamFrame, SettingsFrame, SpdyVersion, SynReplyFrame, SynStreamFrame, WindowUpdateFrame,
};
use super::settings::{SettingsEntry, SettingsFlags};
use super::stream::StreamId;

/// SPDY frame header size (8 bytes, control and data alike)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest control frame payload accepted before declaring a parse error.
/// Bounds buffering and decompression of adversarial input.
const MAX_CONTROL_PAYLOAD: usize = 1 << 20;

/// Maximum frame payload length expressible on the wire (24 bits)
pub const MAX_FRAME_PAYLOAD: usize = 0x00FF_FFFF;

/// Frame codec for one SPDY session
pub struct SpdyFramer {
    version: SpdyVersion,
    compressor: HeaderCompressor,
    decompressor: HeaderDecompressor,
    buffer: BytesMut,
    parsed: VecDeque<Frame>,
    error: Option<Error>,
}

impl SpdyFramer {
    /// Create a framer for the given protocol version
    pub fn new(version: SpdyVersion) -> Self {
        SpdyFramer {
            version,
            compressor: HeaderCompressor::new(version),
            decompressor: HeaderDecompressor::new(version),
            buffer: BytesMut::with_capacity(4096),
            parsed: VecDeque::new(),
            error: None,
        }
    }

    /// Protocol version this framer speaks
    pub fn version(&self) -> SpdyVersion {
        self.version
    }

    /// Feed received bytes and parse as many complete frames as possible.
    ///
    /// Frames become available through [`SpdyFramer::pop_frame`]. Once a
    /// parse error occurs the framer is poisoned and further input is
    /// discarded.
    pub fn process_input(&mut self, data: &[u8]) {
        if self.error.is_some() {
            return;
        }
        self.buffer.extend_from_slice(data);

        loop {
            match self.try_parse_frame() {
                Ok(Some(Some(frame))) => self.parsed.push_back(frame),
                Ok(Some(None)) => {} // frame consumed and ignored
                Ok(None) => break,   // need more input
                Err(e) => {
                    log::warn!("spdy parse error: {}", e);
                    self.error = Some(e);
                    break;
                }
            }
        }
    }

    /// Whether the input stream is broken
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// The latched parse error, if any
    pub fn parse_error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Take the next parsed frame
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.parsed.pop_front()
    }

    // ---- decode ----

    /// Attempt to parse one frame off the buffer.
    ///
    /// `Ok(None)` means more input is needed; `Ok(Some(None))` means a
    /// complete frame was consumed but is not surfaced (NOOP, CREDENTIAL,
    /// unknown types).
    fn try_parse_frame(&mut self) -> Result<Option<Option<Frame>>> {
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_SIZE]);
        let is_control = header[0] & 0x80 != 0;
        let length = ((header[5] as usize) << 16) | ((header[6] as usize) << 8) | header[7] as usize;

        if is_control {
            // Reject a bad version or an oversized control frame from the
            // header alone, without waiting for the payload.
            let wire_version = (((header[0] & 0x7f) as u16) << 8) | header[1] as u16;
            if wire_version != self.version.as_u16() {
                return Err(Error::Parse(format!(
                    "unsupported protocol version {}",
                    wire_version
                )));
            }
            if length > MAX_CONTROL_PAYLOAD {
                return Err(Error::Parse(format!(
                    "control frame payload of {} bytes exceeds limit",
                    length
                )));
            }
        }
        if self.buffer.len() < FRAME_HEADER_SIZE + length {
            return Ok(None);
        }

        let frame_bytes = self.buffer.split_to(FRAME_HEADER_SIZE + length).freeze();
        let payload = &frame_bytes[FRAME_HEADER_SIZE..];
        let flags = header[4];

        if !is_control {
            let stream_id = read_u31(&header[0..4]);
            if stream_id == 0 {
                return Err(Error::Parse("DATA frame with stream id 0".to_string()));
            }
            let fin = ControlFlags::from_u8(flags).is_fin();
            return Ok(Some(Some(Frame::Data(DataFrame {
                stream_id,
                data: frame_bytes.slice(FRAME_HEADER_SIZE..),
                fin,
            }))));
        }

        let type_code = ((header[2] as u16) << 8) | header[3] as u16;
        let frame_type = match FrameType::from_u16(type_code) {
            Some(t) => t,
            None => {
                log::debug!("ignoring unknown control frame type {}", type_code);
                return Ok(Some(None));
            }
        };

        let frame = match frame_type {
            FrameType::SynStream => Some(self.parse_syn_stream(flags, payload)?),
            FrameType::SynReply => Some(self.parse_syn_reply(flags, payload)?),
            FrameType::RstStream => Some(parse_rst_stream(payload)?),
            FrameType::Settings => Some(self.parse_settings(flags, payload)?),
            FrameType::Ping => Some(parse_ping(payload)?),
            FrameType::Goaway => Some(self.parse_goaway(payload)?),
            FrameType::Headers => Some(self.parse_headers(flags, payload)?),
            FrameType::WindowUpdate => {
                if self.version.has_flow_control() {
                    Some(parse_window_update(payload)?)
                } else {
                    log::debug!("ignoring WINDOW_UPDATE on {}", self.version);
                    None
                }
            }
            FrameType::Noop | FrameType::Credential => None,
        };
        Ok(Some(frame))
    }

    fn parse_syn_stream(&mut self, flags: u8, payload: &[u8]) -> Result<Frame> {
        if payload.len() < 10 {
            return Err(Error::Parse("truncated SYN_STREAM".to_string()));
        }
        let stream_id = read_u31(&payload[0..4]);
        let associated_stream_id = read_u31(&payload[4..8]);
        let priority = match self.version {
            SpdyVersion::V2 => payload[8] >> 6,
            SpdyVersion::V3 => payload[8] >> 5,
        };
        let headers = self.decode_header_block(&payload[10..])?;
        Ok(Frame::SynStream(SynStreamFrame {
            stream_id,
            associated_stream_id,
            priority,
            flags: ControlFlags::from_u8(flags),
            headers,
        }))
    }

    fn parse_syn_reply(&mut self, flags: u8, payload: &[u8]) -> Result<Frame> {
        let block_offset = match self.version {
            SpdyVersion::V2 => 6, // stream id + 2 unused bytes
            SpdyVersion::V3 => 4,
        };
        if payload.len() < block_offset {
            return Err(Error::Parse("truncated SYN_REPLY".to_string()));
        }
        let stream_id = read_u31(&payload[0..4]);
        let headers = self.decode_header_block(&payload[block_offset..])?;
        Ok(Frame::SynReply(SynReplyFrame {
            stream_id,
            fin: ControlFlags::from_u8(flags).is_fin(),
            headers,
        }))
    }

    fn parse_settings(&mut self, flags: u8, payload: &[u8]) -> Result<Frame> {
        if payload.len() < 4 {
            return Err(Error::Parse("truncated SETTINGS".to_string()));
        }
        let count = read_u32(&payload[0..4]) as usize;
        if payload.len() != 4 + count * 8 {
            return Err(Error::Parse(format!(
                "SETTINGS length {} does not match {} entries",
                payload.len(),
                count
            )));
        }

        let mut entries = Vec::with_capacity(count);
        for chunk in payload[4..].chunks_exact(8) {
            let (id, entry_flags) = match self.version {
                // SPDY/2 stores the id/flags word little-endian.
                SpdyVersion::V2 => {
                    let id = (chunk[0] as u32)
                        | ((chunk[1] as u32) << 8)
                        | ((chunk[2] as u32) << 16);
                    (id, chunk[3])
                }
                SpdyVersion::V3 => {
                    let id = ((chunk[1] as u32) << 16)
                        | ((chunk[2] as u32) << 8)
                        | (chunk[3] as u32);
                    (id, chunk[0])
                }
            };
            entries.push(SettingsEntry {
                id,
                flags: SettingsFlags::from_u8(entry_flags),
                value: read_u32(&chunk[4..8]),
            });
        }
        Ok(Frame::Settings(SettingsFrame {
            clear_persisted: flags & 0x1 != 0,
            entries,
        }))
    }

    fn parse_goaway(&mut self, payload: &[u8]) -> Result<Frame> {
        let expected = match self.version {
            SpdyVersion::V2 => 4,
            SpdyVersion::V3 => 8,
        };
        if payload.len() != expected {
            return Err(Error::Parse("bad GOAWAY length".to_string()));
        }
        let last_good_stream_id = read_u31(&payload[0..4]);
        let status = if self.version == SpdyVersion::V3 {
            let code = read_u32(&payload[4..8]);
            GoawayStatus::from_u32(code).unwrap_or_else(|| {
                log::debug!("GOAWAY with unknown status {}", code);
                GoawayStatus::Ok
            })
        } else {
            GoawayStatus::Ok
        };
        Ok(Frame::Goaway(GoawayFrame {
            last_good_stream_id,
            status,
        }))
    }

    fn parse_headers(&mut self, flags: u8, payload: &[u8]) -> Result<Frame> {
        let block_offset = match self.version {
            SpdyVersion::V2 => 6,
            SpdyVersion::V3 => 4,
        };
        if payload.len() < block_offset {
            return Err(Error::Parse("truncated HEADERS".to_string()));
        }
        let stream_id = read_u31(&payload[0..4]);
        let headers = self.decode_header_block(&payload[block_offset..])?;
        Ok(Frame::Headers(HeadersFrame {
            stream_id,
            fin: ControlFlags::from_u8(flags).is_fin(),
            headers,
        }))
    }

    fn decode_header_block(&mut self, compressed: &[u8]) -> Result<HeaderBlock> {
        let raw = self.decompressor.decompress(compressed)?;
        let (count, mut offset, len_width) = match self.version {
            SpdyVersion::V2 => {
                if raw.len() < 2 {
                    return Err(Error::Parse("truncated header block".to_string()));
                }
                (read_u16(&raw[0..2]) as usize, 2usize, 2usize)
            }
            SpdyVersion::V3 => {
                if raw.len() < 4 {
                    return Err(Error::Parse("truncated header block".to_string()));
                }
                (read_u32(&raw[0..4]) as usize, 4usize, 4usize)
            }
        };

        let read_len = |raw: &[u8], offset: usize| -> Result<usize> {
            if raw.len() < offset + len_width {
                return Err(Error::Parse("truncated header block".to_string()));
            }
            Ok(match len_width {
                2 => read_u16(&raw[offset..offset + 2]) as usize,
                _ => read_u32(&raw[offset..offset + 4]) as usize,
            })
        };

        let mut headers = HeaderBlock::new();
        for _ in 0..count {
            let name_len = read_len(&raw, offset)?;
            offset += len_width;
            let name = take_string(&raw, offset, name_len)?;
            offset += name_len;

            let value_len = read_len(&raw, offset)?;
            offset += len_width;
            let value = take_string(&raw, offset, value_len)?;
            offset += value_len;

            if name.is_empty() {
                return Err(Error::Parse("empty header name".to_string()));
            }
            if headers.insert(name.clone(), value).is_some() {
                return Err(Error::Parse(format!("duplicate header name '{}'", name)));
            }
        }
        if offset != raw.len() {
            return Err(Error::Parse("trailing bytes in header block".to_string()));
        }
        Ok(headers)
    }

    // ---- encode ----

    /// Encode any frame for the wire
    pub fn encode_frame(&mut self, frame: &Frame) -> Result<Bytes> {
        match frame {
            Frame::SynStream(f) => self.encode_syn_stream(f),
            Frame::SynReply(f) => self.encode_syn_reply(f),
            Frame::Headers(f) => self.encode_headers(f),
            Frame::RstStream(f) => Ok(self.encode_rst_stream(f)),
            Frame::Settings(f) => Ok(self.encode_settings(f)),
            Frame::Ping(f) => Ok(self.encode_ping(f)),
            Frame::Goaway(f) => Ok(self.encode_goaway(f)),
            Frame::WindowUpdate(f) => Ok(self.encode_window_update(f)),
            Frame::Data(f) => Ok(self.encode_data_frame(f)),
        }
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(&self, frame: &DataFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.data.len());
        buf.put_u32(frame.stream_id & 0x7FFF_FFFF);
        buf.put_u8(if frame.fin { ControlFlags::FIN } else { 0 });
        put_u24(&mut buf, frame.data.len());
        buf.put_slice(&frame.data);
        buf.freeze()
    }

    /// Encode a SYN_STREAM frame
    pub fn encode_syn_stream(&mut self, frame: &SynStreamFrame) -> Result<Bytes> {
        let block = self.encode_header_block(&frame.headers)?;
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 10 + block.len());
        self.put_control_header(&mut buf, FrameType::SynStream, frame.flags.as_u8(), 10 + block.len());
        buf.put_u32(frame.stream_id & 0x7FFF_FFFF);
        buf.put_u32(frame.associated_stream_id & 0x7FFF_FFFF);
        match self.version {
            SpdyVersion::V2 => buf.put_u8(frame.priority << 6),
            SpdyVersion::V3 => buf.put_u8(frame.priority << 5),
        }
        buf.put_u8(0); // unused / credential slot
        buf.put_slice(&block);
        Ok(buf.freeze())
    }

    /// Encode a SYN_REPLY frame
    pub fn encode_syn_reply(&mut self, frame: &SynReplyFrame) -> Result<Bytes> {
        let block = self.encode_header_block(&frame.headers)?;
        let fixed = match self.version {
            SpdyVersion::V2 => 6,
            SpdyVersion::V3 => 4,
        };
        let flags = if frame.fin { ControlFlags::FIN } else { 0 };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + fixed + block.len());
        self.put_control_header(&mut buf, FrameType::SynReply, flags, fixed + block.len());
        buf.put_u32(frame.stream_id & 0x7FFF_FFFF);
        if self.version == SpdyVersion::V2 {
            buf.put_u16(0); // unused
        }
        buf.put_slice(&block);
        Ok(buf.freeze())
    }

    /// Encode a HEADERS frame
    pub fn encode_headers(&mut self, frame: &HeadersFrame) -> Result<Bytes> {
        let block = self.encode_header_block(&frame.headers)?;
        let fixed = match self.version {
            SpdyVersion::V2 => 6,
            SpdyVersion::V3 => 4,
        };
        let flags = if frame.fin { ControlFlags::FIN } else { 0 };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + fixed + block.len());
        self.put_control_header(&mut buf, FrameType::Headers, flags, fixed + block.len());
        buf.put_u32(frame.stream_id & 0x7FFF_FFFF);
        if self.version == SpdyVersion::V2 {
            buf.put_u16(0);
        }
        buf.put_slice(&block);
        Ok(buf.freeze())
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream(&self, frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        self.put_control_header(&mut buf, FrameType::RstStream, 0, 8);
        buf.put_u32(frame.stream_id & 0x7FFF_FFFF);
        buf.put_u32(frame.status.as_u32());
        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings(&self, frame: &SettingsFrame) -> Bytes {
        let flags = if frame.clear_persisted { 0x1 } else { 0 };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4 + frame.entries.len() * 8);
        self.put_control_header(&mut buf, FrameType::Settings, flags, 4 + frame.entries.len() * 8);
        buf.put_u32(frame.entries.len() as u32);
        for entry in &frame.entries {
            match self.version {
                SpdyVersion::V2 => {
                    buf.put_u8((entry.id & 0xFF) as u8);
                    buf.put_u8(((entry.id >> 8) & 0xFF) as u8);
                    buf.put_u8(((entry.id >> 16) & 0xFF) as u8);
                    buf.put_u8(entry.flags.as_u8());
                }
                SpdyVersion::V3 => {
                    buf.put_u8(entry.flags.as_u8());
                    buf.put_u8(((entry.id >> 16) & 0xFF) as u8);
                    buf.put_u8(((entry.id >> 8) & 0xFF) as u8);
                    buf.put_u8((entry.id & 0xFF) as u8);
                }
            }
            buf.put_u32(entry.value);
        }
        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping(&self, frame: &PingFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        self.put_control_header(&mut buf, FrameType::Ping, 0, 4);
        buf.put_u32(frame.id);
        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway(&self, frame: &GoawayFrame) -> Bytes {
        let length = match self.version {
            SpdyVersion::V2 => 4,
            SpdyVersion::V3 => 8,
        };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + length);
        self.put_control_header(&mut buf, FrameType::Goaway, 0, length);
        buf.put_u32(frame.last_good_stream_id & 0x7FFF_FFFF);
        if self.version == SpdyVersion::V3 {
            buf.put_u32(frame.status.as_u32());
        }
        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update(&self, frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        self.put_control_header(&mut buf, FrameType::WindowUpdate, 0, 8);
        buf.put_u32(frame.stream_id & 0x7FFF_FFFF);
        buf.put_u32(frame.delta_window_size & 0x7FFF_FFFF);
        buf.freeze()
    }

    fn put_control_header(&self, buf: &mut BytesMut, frame_type: FrameType, flags: u8, length: usize) {
        buf.put_u16(0x8000 | self.version.as_u16());
        buf.put_u16(frame_type.as_u16());
        buf.put_u8(flags);
        put_u24(buf, length);
    }

    fn encode_header_block(&mut self, headers: &HeaderBlock) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        match self.version {
            SpdyVersion::V2 => {
                raw.extend_from_slice(&(headers.len() as u16).to_be_bytes());
                for (name, value) in headers {
                    raw.extend_from_slice(&(name.len() as u16).to_be_bytes());
                    raw.extend_from_slice(name.as_bytes());
                    raw.extend_from_slice(&(value.len() as u16).to_be_bytes());
                    raw.extend_from_slice(value.as_bytes());
                }
            }
            SpdyVersion::V3 => {
                raw.extend_from_slice(&(headers.len() as u32).to_be_bytes());
                for (name, value) in headers {
                    raw.extend_from_slice(&(name.len() as u32).to_be_bytes());
                    raw.extend_from_slice(name.as_bytes());
                    raw.extend_from_slice(&(value.len() as u32).to_be_bytes());
                    raw.extend_from_slice(value.as_bytes());
                }
            }
        }
        self.compressor.compress(&raw)
    }
}

fn read_u16(bytes: &[u8]) -> u16 {
    ((bytes[0] as u16) << 8) | bytes[1] as u16
}

fn read_u32(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 24) | ((bytes[1] as u32) << 16) | ((bytes[2] as u32) << 8) | bytes[3] as u32
}

fn read_u31(bytes: &[u8]) -> StreamId {
    read_u32(bytes) & 0x7FFF_FFFF
}

fn put_u24(buf: &mut BytesMut, value: usize) {
    debug_assert!(value <= MAX_FRAME_PAYLOAD);
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

fn take_string(raw: &[u8], offset: usize, len: usize) -> Result<String> {
    if raw.len() < offset + len {
        return Err(Error::Parse("truncated header block".to_string()));
    }
    String::from_utf8(raw[offset..offset + len].to_vec())
        .map_err(|_| Error::Parse("non-UTF-8 header text".to_string()))
}

fn parse_rst_stream(payload: &[u8]) -> Result<Frame> {
    if payload.len() != 8 {
        return Err(Error::Parse("bad RST_STREAM length".to_string()));
    }
    let stream_id = read_u31(&payload[0..4]);
    let code = read_u32(&payload[4..8]);
    let status = RstStreamStatus::from_u32(code)
        .ok_or_else(|| Error::Parse(format!("unknown RST_STREAM status {}", code)))?;
    Ok(Frame::RstStream(RstStreamFrame { stream_id, status }))
}

fn parse_ping(payload: &[u8]) -> Result<Frame> {
    if payload.len() != 4 {
        return Err(Error::Parse("bad PING length".to_string()));
    }
    Ok(Frame::Ping(PingFrame {
        id: read_u32(&payload[0..4]),
    }))
}

fn parse_window_update(payload: &[u8]) -> Result<Frame> {
    if payload.len() != 8 {
        return Err(Error::Parse("bad WINDOW_UPDATE length".to_string()));
    }
    Ok(Frame::WindowUpdate(WindowUpdateFrame {
        stream_id: read_u31(&payload[0..4]),
        delta_window_size: read_u32(&payload[4..8]) & 0x7FFF_FFFF,
    }))
}
