//! spdymux - server-side SPDY session engine
//!
//! This crate provides the concurrent session core of a SPDY v2/v3
//! server: framing, stream multiplexing, flow control, priority-ordered
//! output scheduling, and the session state machine, behind small
//! transport and executor traits supplied by the embedding server.

pub mod spdy;
