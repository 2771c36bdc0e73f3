//! # Rate-Limited Logging Utilities
//!
//! Helpers for logging on high-frequency paths: a bad peer can produce a CRC
//! error per TCP segment and a noisy channel a detection failure per symbol
//! window, so those paths log through a throttle instead of directly.

use crate::util::hex::pretty_hex;
use std::time::Instant;

/// Throttling structure for rate-limiting log messages
#[derive(Debug)]
pub struct LogThrottle {
    /// Time window for throttling (in milliseconds)
    window_ms: u64,
    /// Maximum messages allowed per window
    cap: u32,
    /// Current message count in window
    count: u32,
    /// Start time of current window
    t0: Instant,
}

impl LogThrottle {
    /// Create new throttle with time window and message cap
    ///
    /// # Arguments
    /// * `window_ms` - Time window in milliseconds
    /// * `cap` - Maximum messages allowed per window
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            t0: Instant::now(),
        }
    }

    /// Check if logging is allowed (resets counter after window expires)
    ///
    /// Returns `true` if the message should be logged, `false` if it
    /// should be throttled.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.t0).as_millis() as u64 >= self.window_ms {
            self.t0 = now;
            self.count = 0;
        }
        if self.count < self.cap {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

/// Log a packet or frame as a hex dump at debug level.
pub fn log_frame_hex(label: &str, data: &[u8]) {
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("{} ({} bytes):\n{}", label, data.len(), pretty_hex(data, 16));
    }
}
