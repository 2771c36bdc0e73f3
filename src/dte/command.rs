//! # DTE Command Payloads
//!
//! DATA packets carry a one-byte command code followed by command-specific
//! fields. This module defines the typed representation of every command and
//! its wire codec. An empty DATA payload is the keepalive.
//!
//! Multi-byte fields are big-endian throughout, matching the packet header.

use crate::modem::{OrderFlag, TxState, TxStatusSnapshot};
use crate::wale::Waveform;
use thiserror::Error;

// Command codes
pub const CMD_TX_DATA: u8 = 0x01;
pub const CMD_RX_DATA: u8 = 0x02;
pub const CMD_ARM: u8 = 0x03;
pub const CMD_START: u8 = 0x04;
pub const CMD_TX_STATUS: u8 = 0x05;
pub const CMD_TX_NACK: u8 = 0x06;
pub const CMD_CARRIER_DETECT: u8 = 0x07;
pub const CMD_REQUEST_TX_STATUS: u8 = 0x08;
pub const CMD_TX_SETUP: u8 = 0x09;
pub const CMD_INITIAL_SETUP: u8 = 0x0A;
pub const CMD_ABORT_TX: u8 = 0x0B;
pub const CMD_ABORT_RX: u8 = 0x0C;

/// Reasons carried in TX_NACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NackReason {
    Underrun = 1,
    NotArmed = 2,
    QueueFull = 3,
}

impl TryFrom<u8> for NackReason {
    type Error = CommandError;

    fn try_from(value: u8) -> Result<Self, CommandError> {
        match value {
            1 => Ok(NackReason::Underrun),
            2 => Ok(NackReason::NotArmed),
            3 => Ok(NackReason::QueueFull),
            other => Err(CommandError::UnknownNackReason(other)),
        }
    }
}

/// Command codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("Command payload truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Unknown order flag: {0}")]
    UnknownOrderFlag(u8),

    #[error("Unknown TX state: {0}")]
    UnknownTxState(u8),

    #[error("Unknown NACK reason: {0}")]
    UnknownNackReason(u8),

    #[error("Unknown waveform id: {0}")]
    UnknownWaveform(u8),
}

/// A decoded DATA-packet command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DteCommand {
    /// Operator payload for transmission
    TxData { order: OrderFlag, data: Vec<u8> },
    /// Received payload delivered to the DTE
    RxData { order: OrderFlag, data: Vec<u8> },
    /// Arm the transmit path
    Arm,
    /// Start transmission of the queued data
    Start,
    /// TX state report with queue counters
    TxStatus(TxStatusSnapshot),
    /// Negative acknowledgement of a TX operation
    TxNack { reason: NackReason },
    /// Carrier state report (zeros when the carrier is lost)
    CarrierDetect {
        detected: bool,
        data_rate: u32,
        blocking_factor: u16,
    },
    /// Ask for an immediate TX_STATUS
    RequestTxStatus,
    /// Transmit-side configuration
    TxSetup { waveform: Waveform, data_rate: u32 },
    /// Session-wide configuration sent once during setup
    InitialSetup { version: u8, tlc_ms: u16 },
    /// Abort the transmit path
    AbortTx,
    /// Abort the receive path
    AbortRx,
    /// Empty DATA payload exchanged to hold the watchdog off
    Keepalive,
}

impl DteCommand {
    /// Encode into a DATA packet payload.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            DteCommand::TxData { order, data } => {
                let mut out = Vec::with_capacity(2 + data.len());
                out.push(CMD_TX_DATA);
                out.push(*order as u8);
                out.extend_from_slice(data);
                out
            }
            DteCommand::RxData { order, data } => {
                let mut out = Vec::with_capacity(2 + data.len());
                out.push(CMD_RX_DATA);
                out.push(*order as u8);
                out.extend_from_slice(data);
                out
            }
            DteCommand::Arm => vec![CMD_ARM],
            DteCommand::Start => vec![CMD_START],
            DteCommand::TxStatus(status) => {
                let mut out = Vec::with_capacity(14);
                out.push(CMD_TX_STATUS);
                out.push(status.state as u8);
                out.extend_from_slice(&status.queued_bytes.to_be_bytes());
                out.extend_from_slice(&status.free_bytes.to_be_bytes());
                out.extend_from_slice(&status.fifo_space.to_be_bytes());
                out
            }
            DteCommand::TxNack { reason } => vec![CMD_TX_NACK, *reason as u8],
            DteCommand::CarrierDetect {
                detected,
                data_rate,
                blocking_factor,
            } => {
                let mut out = Vec::with_capacity(8);
                out.push(CMD_CARRIER_DETECT);
                out.push(*detected as u8);
                out.extend_from_slice(&data_rate.to_be_bytes());
                out.extend_from_slice(&blocking_factor.to_be_bytes());
                out
            }
            DteCommand::RequestTxStatus => vec![CMD_REQUEST_TX_STATUS],
            DteCommand::TxSetup {
                waveform,
                data_rate,
            } => {
                let mut out = Vec::with_capacity(6);
                out.push(CMD_TX_SETUP);
                out.push(waveform.waveform_id());
                out.extend_from_slice(&data_rate.to_be_bytes());
                out
            }
            DteCommand::InitialSetup { version, tlc_ms } => {
                let mut out = Vec::with_capacity(4);
                out.push(CMD_INITIAL_SETUP);
                out.push(*version);
                out.extend_from_slice(&tlc_ms.to_be_bytes());
                out
            }
            DteCommand::AbortTx => vec![CMD_ABORT_TX],
            DteCommand::AbortRx => vec![CMD_ABORT_RX],
            DteCommand::Keepalive => Vec::new(),
        }
    }

    /// Decode a DATA packet payload.
    pub fn decode(payload: &[u8]) -> Result<DteCommand, CommandError> {
        let Some((&code, rest)) = payload.split_first() else {
            return Ok(DteCommand::Keepalive);
        };

        match code {
            CMD_TX_DATA => {
                let (order, data) = decode_order_and_data(rest)?;
                Ok(DteCommand::TxData { order, data })
            }
            CMD_RX_DATA => {
                let (order, data) = decode_order_and_data(rest)?;
                Ok(DteCommand::RxData { order, data })
            }
            CMD_ARM => Ok(DteCommand::Arm),
            CMD_START => Ok(DteCommand::Start),
            CMD_TX_STATUS => {
                need(rest, 13)?;
                Ok(DteCommand::TxStatus(TxStatusSnapshot {
                    state: decode_tx_state(rest[0])?,
                    queued_bytes: be_u32(&rest[1..5]),
                    free_bytes: be_u32(&rest[5..9]),
                    fifo_space: be_u32(&rest[9..13]),
                }))
            }
            CMD_TX_NACK => {
                need(rest, 1)?;
                Ok(DteCommand::TxNack {
                    reason: NackReason::try_from(rest[0])?,
                })
            }
            CMD_CARRIER_DETECT => {
                need(rest, 7)?;
                Ok(DteCommand::CarrierDetect {
                    detected: rest[0] != 0,
                    data_rate: be_u32(&rest[1..5]),
                    blocking_factor: u16::from_be_bytes([rest[5], rest[6]]),
                })
            }
            CMD_REQUEST_TX_STATUS => Ok(DteCommand::RequestTxStatus),
            CMD_TX_SETUP => {
                need(rest, 5)?;
                let waveform = match rest[0] {
                    0 => Waveform::Deep,
                    1 => Waveform::Fast,
                    other => return Err(CommandError::UnknownWaveform(other)),
                };
                Ok(DteCommand::TxSetup {
                    waveform,
                    data_rate: be_u32(&rest[1..5]),
                })
            }
            CMD_INITIAL_SETUP => {
                need(rest, 3)?;
                Ok(DteCommand::InitialSetup {
                    version: rest[0],
                    tlc_ms: u16::from_be_bytes([rest[1], rest[2]]),
                })
            }
            CMD_ABORT_TX => Ok(DteCommand::AbortTx),
            CMD_ABORT_RX => Ok(DteCommand::AbortRx),
            other => Err(CommandError::UnknownCommand(other)),
        }
    }
}

fn need(data: &[u8], len: usize) -> Result<(), CommandError> {
    if data.len() < len {
        return Err(CommandError::Truncated {
            needed: len,
            actual: data.len(),
        });
    }
    Ok(())
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn decode_order_and_data(rest: &[u8]) -> Result<(OrderFlag, Vec<u8>), CommandError> {
    need(rest, 1)?;
    let order = OrderFlag::try_from(rest[0]).map_err(CommandError::UnknownOrderFlag)?;
    Ok((order, rest[1..].to_vec()))
}

fn decode_tx_state(value: u8) -> Result<TxState, CommandError> {
    TxState::try_from(value).map_err(CommandError::UnknownTxState)
}
