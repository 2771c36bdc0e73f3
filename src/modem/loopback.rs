//! # Loopback Transport
//!
//! Runs each transmitted PDU through the complete WALE pipeline and back:
//! frame assembly, waveform detection, and data decoding. Exercises exactly
//! what an over-the-air peer would, minus the channel.
//!
//! The modem prefixes every payload with a big-endian u16 length inside the
//! WALE PDU; WALE frames carry no length header, so this is what lets the
//! receive side trim the convolutional flush and interleaver padding.

use crate::error::ModemError;
use crate::modem::{ModemConfig, OrderFlag};
use crate::wale::detect::{decode_pdu, DetectStats, WaveformDetector};
use crate::wale::frame::{assemble_frame, FrameConfig, MAX_PDU_LEN};
use log::trace;

/// Largest payload the modem accepts, leaving room for the length prefix
pub const MAX_TX_PAYLOAD: usize = MAX_PDU_LEN - 2;

/// WALE encode/decode loopback channel.
#[derive(Debug)]
pub struct LoopbackChannel {
    frame_config: FrameConfig,
    detector: WaveformDetector,
}

impl LoopbackChannel {
    pub fn new(config: &ModemConfig) -> Self {
        Self {
            frame_config: FrameConfig {
                waveform: config.waveform,
                tlc_ms: config.tlc_ms as u32,
                ..FrameConfig::default()
            },
            detector: WaveformDetector::new(),
        }
    }

    /// Detection counters for supervision.
    pub fn stats(&self) -> DetectStats {
        self.detector.stats()
    }

    /// Transmit one payload through the codec and recover it.
    pub fn transmit(
        &mut self,
        payload: &[u8],
        order: OrderFlag,
    ) -> Result<(Vec<u8>, OrderFlag), ModemError> {
        if payload.is_empty() || payload.len() > MAX_TX_PAYLOAD {
            return Err(ModemError::InvalidPduLength(payload.len()));
        }

        let mut pdu = Vec::with_capacity(2 + payload.len());
        pdu.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        pdu.extend_from_slice(payload);

        let symbols = assemble_frame(&pdu, &self.frame_config)?;
        trace!(
            "loopback: {} payload bytes -> {} symbols",
            payload.len(),
            symbols.len()
        );

        let detection = self.detector.detect(&symbols)?;
        let decoded = decode_pdu(detection.waveform, &symbols[detection.data_offset..])?;

        if decoded.len() < 2 {
            return Err(ModemError::FrameTooShort(decoded.len()));
        }
        let length = u16::from_be_bytes([decoded[0], decoded[1]]) as usize;
        if decoded.len() < 2 + length {
            return Err(ModemError::PacketParseError(format!(
                "decoded {} bytes, framed length {}",
                decoded.len(),
                length
            )));
        }

        Ok((decoded[2..2 + length].to_vec(), order))
    }
}
