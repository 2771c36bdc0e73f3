//! # MinuteModem Error Handling
//!
//! This module defines the ModemError enum, which represents the different
//! error types that can occur across the minutemodem crate.

use thiserror::Error;

/// Represents the different error types that can occur in the modem core.
#[derive(Debug, Error)]
pub enum ModemError {
    /// Indicates an error on the DTE TCP socket.
    #[error("Socket error: {0}")]
    SocketError(String),

    /// Indicates an error while parsing a DTE packet.
    #[error("Error parsing DTE packet: {0}")]
    PacketParseError(String),

    /// Indicates a CRC mismatch in a received packet.
    #[error("Invalid CRC: expected {expected:04X}, calculated {calculated:04X}")]
    InvalidCrc { expected: u16, calculated: u16 },

    /// Indicates the peer announced an unsupported protocol version.
    #[error("Protocol version mismatch: peer {peer}, local {local}")]
    VersionMismatch { peer: u8, local: u8 },

    /// Indicates a handshake state timed out before the expected packet.
    #[error("Handshake timeout in state {0}")]
    HandshakeTimeout(&'static str),

    /// Indicates the CONNECTION_PROBE round trip exceeded the allowed latency.
    #[error("Socket latency {measured_ms} ms exceeds limit {limit_ms} ms")]
    LatencyExceeded { measured_ms: u64, limit_ms: u64 },

    /// Indicates no packet arrived within the watchdog window.
    #[error("Watchdog timeout")]
    WatchdogTimeout,

    /// Indicates a PDU outside the 1..=4086 byte range was offered.
    #[error("Invalid PDU length: {0}")]
    InvalidPduLength(usize),

    /// Indicates a symbol slice too short for waveform detection.
    #[error("Frame too short: {0} symbols")]
    FrameTooShort(usize),

    /// Indicates the preamble correlation did not match a known pattern.
    #[error("Preamble pattern mismatch")]
    PatternMismatch,

    /// Indicates a preamble decoded to an unexpected waveform id.
    #[error("Wrong waveform id: {0}")]
    WrongWaveformId(u8),

    /// Indicates the modem TX queue cannot accept more data.
    #[error("TX queue full")]
    QueueFull,

    /// Indicates a TX operation that requires an armed modem.
    #[error("Modem not armed")]
    NotArmed,

    /// Indicates the modem task is gone.
    #[error("Modem unavailable")]
    ModemUnavailable,

    /// Indicates a consensus instance could not be found during recovery.
    #[error("Instance not found")]
    InstanceNotFound,

    /// Indicates recovery could not reach a slow quorum in time.
    #[error("Recovery timeout")]
    RecoveryTimeout,

    /// Indicates a proposal was abandoned by the replica.
    #[error("Proposal dropped: {0}")]
    ProposalDropped(String),

    /// Indicates a persistence failure for the instance table.
    #[error("Store error: {0}")]
    StoreError(String),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<std::io::Error> for ModemError {
    fn from(e: std::io::Error) -> Self {
        ModemError::SocketError(e.to_string())
    }
}
