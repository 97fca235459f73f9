//! SPDY flow control
//!
//! This module implements the per-stream flow control window of SPDY/3
//! (draft Section 2.6.8). SPDY/2 has no flow control; sessions on that
//! version never consult these windows.

use super::error::{Error, Result};
use super::MAX_WINDOW_SIZE;

/// Flow control window
///
/// Tracks the available byte credit for one direction of one stream. The
/// size is signed: a SETTINGS-driven reduction of the initial window may
/// push an in-flight window below zero.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Current window size
    current_size: i64,
}

impl FlowControlWindow {
    /// Create a window with the given initial size
    pub fn new(initial_size: u32) -> Self {
        FlowControlWindow {
            current_size: initial_size as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Check if the window has available capacity
    pub fn has_capacity(&self) -> bool {
        self.current_size > 0
    }

    /// Consume window capacity for sending data
    ///
    /// Returns the amount actually available, which may be less than
    /// requested (zero when the window is exhausted).
    pub fn consume(&mut self, amount: usize) -> usize {
        if amount == 0 || self.current_size <= 0 {
            return 0;
        }

        let taken = std::cmp::min(amount as i64, self.current_size) as usize;
        self.current_size -= taken as i64;
        taken
    }

    /// Increase the window (WINDOW_UPDATE)
    ///
    /// Fails if the new size would exceed 2^31 - 1 (SPDY/3 draft Section
    /// 2.6.8: the receiver must reset the stream with FLOW_CONTROL_ERROR).
    pub fn increase(&mut self, delta: u32) -> Result<i64> {
        let new_size = self.current_size + delta as i64;
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Apply a SETTINGS initial-window-size delta
    ///
    /// The delta is applied to the current size directly; the result may
    /// be negative, in which case the stream stays blocked until enough
    /// WINDOW_UPDATE credit arrives.
    pub fn adjust(&mut self, delta: i64) {
        self.current_size += delta;
    }

    /// Decrease the window (data received)
    pub fn decrease(&mut self, amount: usize) {
        self.current_size -= amount as i64;
    }
}
