//! MinuteModem Protocol Constants
//!
//! This module defines constants used across the WALE waveform codec and the
//! MIL-STD-188-110D Appendix A DTE interface, based on MIL-STD-188-141D
//! Appendix G and MIL-STD-188-110D Appendix A.

use std::time::Duration;

/// WALE symbol rate in symbols per second (8-PSK on a 1800 Hz carrier)
pub const SYMBOL_RATE: u32 = 2400;

/// Capture probe length in symbols
pub const CAPTURE_PROBE_LEN: usize = 96;

/// Deep WALE preamble length in symbols (14 fixed + 4 exceptional di-bits)
pub const DEEP_PREAMBLE_LEN: usize = 576;

/// Fast WALE preamble length in symbols (5 fixed + 4 exceptional di-bits)
pub const FAST_PREAMBLE_LEN: usize = 288;

/// Chips radiated per preamble di-bit
pub const CHIPS_PER_DIBIT: usize = 32;

/// Symbols radiated per Walsh-16 quad-bit
pub const SYMBOLS_PER_QUADBIT: usize = 64;

/// Fast WALE data chunk length between inserted probes
pub const FAST_DATA_CHUNK_LEN: usize = 96;

/// Fast WALE inserted probe length in symbols
pub const FAST_PROBE_LEN: usize = 32;

/// Maximum preambles per frame
pub const MAX_PREAMBLE_COUNT: usize = 16;

/// Interleaver matrix rows
pub const INTERLEAVER_ROWS: usize = 12;

/// Interleaver matrix columns
pub const INTERLEAVER_COLS: usize = 16;

/// Interleaver block capacity in di-bits
pub const INTERLEAVER_DIBITS: usize = INTERLEAVER_ROWS * INTERLEAVER_COLS;

/// Convolutional code constraint length
pub const CONV_CONSTRAINT: usize = 7;

/// Zero di-bits appended to flush the convolutional encoder
pub const CONV_FLUSH_DIBITS: usize = 6;

// ----------------------------------------------------------------------------
// DTE packet framing (MIL-STD-188-110D Appendix A)
// ----------------------------------------------------------------------------

/// Three-byte packet preamble ("IPU")
pub const DTE_PREAMBLE: [u8; 3] = [0x49, 0x50, 0x55];

/// Fixed header length: preamble + type + size + header CRC
pub const DTE_HEADER_LEN: usize = 8;

/// Largest payload a packet may carry
pub const DTE_MAX_PAYLOAD: usize = 4086;

/// Protocol version carried in CONNECT / CONNECT_ACK
pub const DTE_PROTOCOL_VERSION: u8 = 12;

/// Default DTE listener port
pub const DTE_DEFAULT_PORT: u16 = 3000;

// Handshake and supervision timing
pub const DTE_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DTE_ACK_TIMEOUT: Duration = Duration::from_secs(3);
pub const DTE_PROBE_TIMEOUT: Duration = Duration::from_secs(6);
pub const DTE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);
pub const DTE_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Default upper bound on the CONNECTION_PROBE round trip
pub const DTE_MAX_SOCKET_LATENCY: Duration = Duration::from_millis(5000);

// ----------------------------------------------------------------------------
// Modem TX queue sizing
// ----------------------------------------------------------------------------

/// Maximum queued PDUs awaiting transmission
pub const TX_QUEUE_MAX_PDUS: usize = 64;

/// Maximum queued payload bytes awaiting transmission
pub const TX_QUEUE_MAX_BYTES: usize = 32 * 1024;

/// Convert a symbol count to its on-air duration in milliseconds
pub fn symbols_to_ms(symbols: usize) -> u64 {
    (symbols as u64 * 1000) / SYMBOL_RATE as u64
}

/// Number of TLC symbols radiated for a tuner-adjust window of `d_ms`
pub fn tlc_symbol_count(d_ms: u32) -> usize {
    (d_ms as usize * SYMBOL_RATE as usize) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_durations() {
        assert_eq!(symbols_to_ms(DEEP_PREAMBLE_LEN), 240);
        assert_eq!(symbols_to_ms(FAST_PREAMBLE_LEN), 120);
    }

    #[test]
    fn tlc_truncates() {
        assert_eq!(tlc_symbol_count(0), 0);
        assert_eq!(tlc_symbol_count(100), 240);
        // 1 ms of tuner time is 2.4 symbols, floored
        assert_eq!(tlc_symbol_count(1), 2);
    }
}
