//! SPDY settings parameters
//!
//! This module defines the SETTINGS frame parameters and their per-entry
//! flags as defined in the SPDY/3 draft Section 2.6.4. The per-version
//! entry wire layouts live in the codec.

use std::fmt;

/// SETTINGS parameter ids (SPDY/3 draft Section 2.6.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SettingsId {
    /// SETTINGS_UPLOAD_BANDWIDTH (1)
    UploadBandwidth = 1,

    /// SETTINGS_DOWNLOAD_BANDWIDTH (2)
    DownloadBandwidth = 2,

    /// SETTINGS_ROUND_TRIP_TIME (3)
    RoundTripTime = 3,

    /// SETTINGS_MAX_CONCURRENT_STREAMS (4)
    /// Maximum number of concurrent streams the sender will accept
    MaxConcurrentStreams = 4,

    /// SETTINGS_CURRENT_CWND (5)
    CurrentCwnd = 5,

    /// SETTINGS_DOWNLOAD_RETRANS_RATE (6)
    DownloadRetransRate = 6,

    /// SETTINGS_INITIAL_WINDOW_SIZE (7)
    /// Initial per-stream flow control window (SPDY/3 only)
    InitialWindowSize = 7,

    /// SETTINGS_CLIENT_CERTIFICATE_VECTOR_SIZE (8)
    ClientCertificateVectorSize = 8,
}

impl SettingsId {
    /// Convert to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Create from u32
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(SettingsId::UploadBandwidth),
            2 => Some(SettingsId::DownloadBandwidth),
            3 => Some(SettingsId::RoundTripTime),
            4 => Some(SettingsId::MaxConcurrentStreams),
            5 => Some(SettingsId::CurrentCwnd),
            6 => Some(SettingsId::DownloadRetransRate),
            7 => Some(SettingsId::InitialWindowSize),
            8 => Some(SettingsId::ClientCertificateVectorSize),
            _ => None,
        }
    }

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            SettingsId::UploadBandwidth => "UPLOAD_BANDWIDTH",
            SettingsId::DownloadBandwidth => "DOWNLOAD_BANDWIDTH",
            SettingsId::RoundTripTime => "ROUND_TRIP_TIME",
            SettingsId::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsId::CurrentCwnd => "CURRENT_CWND",
            SettingsId::DownloadRetransRate => "DOWNLOAD_RETRANS_RATE",
            SettingsId::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsId::ClientCertificateVectorSize => "CLIENT_CERTIFICATE_VECTOR_SIZE",
        }
    }
}

impl fmt::Display for SettingsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

/// Per-entry flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsFlags(u8);

impl SettingsFlags {
    /// FLAG_SETTINGS_PERSIST_VALUE (0x1)
    pub const PERSIST_VALUE: u8 = 0x1;

    /// FLAG_SETTINGS_PERSISTED (0x2)
    pub const PERSISTED: u8 = 0x2;

    /// Create empty flags
    pub fn empty() -> Self {
        SettingsFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        SettingsFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// One SETTINGS entry
///
/// The id is kept raw so entries with ids this engine does not recognize
/// survive a decode/encode round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsEntry {
    /// Parameter id (24-bit on the wire)
    pub id: u32,
    /// Per-entry flags
    pub flags: SettingsFlags,
    /// Parameter value
    pub value: u32,
}

impl SettingsEntry {
    /// Create an entry for a known parameter
    pub fn new(id: SettingsId, value: u32) -> Self {
        SettingsEntry {
            id: id.as_u32(),
            flags: SettingsFlags::empty(),
            value,
        }
    }

    /// The known parameter this entry names, if any
    pub fn known_id(&self) -> Option<SettingsId> {
        SettingsId::from_u32(self.id)
    }
}
