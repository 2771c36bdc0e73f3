//! # WALE Frame Assembly
//!
//! Builds transmit-ready 8-PSK symbol sequences for Deep WALE (§G.5.1.7) and
//! Fast WALE (§G.5.1.8). A frame is the ordered concatenation of:
//!
//! ```text
//! ┌──────────────┬──────────────────┬───────────────┬───────────────┐
//! │ TLC block    │ capture probes   │ preambles     │ data symbols  │
//! │ (tuner time) │ (async calls)    │ (1..=16)      │               │
//! └──────────────┴──────────────────┴───────────────┴───────────────┘
//! ```
//!
//! Frames carry no length header; the receiver acquires on the capture probe
//! and preamble patterns.

use crate::constants::{
    tlc_symbol_count, CAPTURE_PROBE_LEN, DEEP_PREAMBLE_LEN, FAST_DATA_CHUNK_LEN, FAST_PREAMBLE_LEN,
    FAST_PROBE_LEN, MAX_PREAMBLE_COUNT,
};
use crate::error::ModemError;
use crate::util::bits;
use crate::wale::fec::conv_encode;
use crate::wale::interleave::interleave;
use crate::wale::scramble::{scramble_preamble, DeepScrambler, FastScrambler};
use crate::wale::walsh::{exceptional_chips, normal_chips, walsh16_symbols};
use log::debug;

/// Largest PDU the codec accepts, matching the DTE payload bound
pub const MAX_PDU_LEN: usize = 4086;

/// Tuner/Level Control block: the fixed 256-symbol adjust pattern, repeated
/// and truncated to fill the requested tuner window.
pub const TLC_PATTERN: [u8; 256] = [
    7, 0, 0, 5, 7, 6, 2, 2, 2, 0, 3, 7, 6, 4, 1, 1,
    6, 6, 4, 0, 6, 5, 5, 3, 6, 0, 3, 7, 1, 0, 0, 2,
    7, 3, 3, 2, 7, 2, 3, 4, 7, 2, 7, 3, 3, 0, 2, 0,
    4, 0, 5, 2, 7, 0, 6, 5, 0, 2, 4, 1, 1, 0, 1, 3,
    0, 4, 2, 3, 3, 6, 0, 6, 1, 1, 6, 7, 6, 3, 6, 0,
    5, 3, 6, 2, 3, 4, 3, 7, 2, 6, 3, 6, 1, 6, 2, 6,
    6, 1, 7, 6, 0, 0, 5, 5, 7, 7, 6, 1, 4, 7, 0, 2,
    4, 3, 4, 2, 1, 4, 4, 7, 6, 6, 5, 2, 1, 6, 6, 7,
    0, 6, 2, 6, 1, 4, 6, 2, 5, 1, 0, 2, 0, 1, 0, 3,
    4, 0, 1, 2, 1, 1, 1, 7, 6, 2, 0, 7, 5, 7, 7, 7,
    5, 1, 5, 5, 4, 1, 4, 4, 7, 2, 0, 6, 3, 3, 5, 0,
    5, 3, 7, 6, 7, 1, 3, 6, 3, 3, 5, 1, 3, 3, 1, 7,
    1, 6, 3, 0, 2, 2, 1, 0, 0, 7, 3, 2, 2, 7, 7, 2,
    3, 1, 3, 1, 5, 0, 2, 1, 1, 4, 7, 6, 1, 7, 2, 2,
    0, 7, 5, 7, 6, 5, 0, 0, 0, 0, 1, 7, 0, 4, 7, 4,
    4, 0, 6, 5, 4, 0, 2, 0, 7, 1, 4, 4, 4, 5, 4, 2,
];

/// Capture probe: the fixed 96-symbol acquisition sequence over {0, 4} that
/// scanning receivers correlate against for asynchronous calls.
pub const CAPTURE_PROBE: [u8; CAPTURE_PROBE_LEN] = [
    4, 4, 0, 4, 0, 4, 0, 4, 0, 0, 4, 4, 0, 0, 4, 4,
    4, 0, 4, 4, 4, 0, 4, 0, 0, 4, 0, 4, 4, 0, 0, 0,
    4, 4, 0, 4, 4, 4, 4, 0, 4, 4, 0, 4, 0, 4, 4, 0,
    4, 4, 0, 0, 4, 0, 0, 4, 0, 0, 0, 4, 4, 4, 0, 0,
    0, 0, 4, 0, 4, 4, 4, 4, 4, 0, 0, 4, 0, 4, 0, 4,
    4, 4, 0, 0, 4, 4, 0, 4, 0, 0, 0, 4, 0, 0, 4, 4,
];

/// Base sequence of the Fast WALE inserted probe; the radiated probe is this
/// sequence doubled (32 symbols).
pub const FAST_PROBE_16: [u8; 16] = [
    4, 4, 0, 0, 0, 4, 0, 4, 0, 0, 0, 0, 4, 4, 0, 0,
];

/// Fixed di-bit pattern of the Deep WALE preamble (normal Walsh set)
pub const DEEP_FIXED_DIBITS: [u8; 14] = [0, 1, 2, 1, 0, 0, 2, 3, 1, 3, 3, 1, 2, 0];

/// Fixed di-bit pattern of the Fast WALE preamble (normal Walsh set)
pub const FAST_FIXED_DIBITS: [u8; 5] = [3, 3, 1, 2, 0];

/// Waveform id carried in the first exceptional preamble di-bit
pub const DEEP_WAVEFORM_ID: u8 = 0;
pub const FAST_WAVEFORM_ID: u8 = 1;

/// WALE waveform variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    /// Walsh-16 data modulation, ~150 bps (§G.5.1.7)
    Deep,
    /// BPSK data modulation with inserted probes, ~2400 bps (§G.5.1.8)
    Fast,
}

impl Waveform {
    pub fn preamble_len(&self) -> usize {
        match self {
            Waveform::Deep => DEEP_PREAMBLE_LEN,
            Waveform::Fast => FAST_PREAMBLE_LEN,
        }
    }

    pub fn waveform_id(&self) -> u8 {
        match self {
            Waveform::Deep => DEEP_WAVEFORM_ID,
            Waveform::Fast => FAST_WAVEFORM_ID,
        }
    }
}

/// Frame assembly options.
///
/// Every recognised field is explicit; defaults follow the standard's
/// synchronous single-PDU call.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Waveform variant to radiate
    pub waveform: Waveform,
    /// Asynchronous call: prefix capture probes for scanning receivers
    pub async_call: bool,
    /// Capture probe repetitions for async calls (default 1)
    pub capture_probe_count: usize,
    /// Preambles radiated ahead of data, 1..=16 (default 1)
    pub preamble_count: usize,
    /// M bit: another PDU follows this frame
    pub more_pdus: bool,
    /// Tuner-adjust window in milliseconds (0 = no TLC block)
    pub tlc_ms: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            waveform: Waveform::Deep,
            async_call: false,
            capture_probe_count: 1,
            preamble_count: 1,
            more_pdus: false,
            tlc_ms: 0,
        }
    }
}

impl FrameConfig {
    fn validate(&self) -> Result<(), ModemError> {
        if self.preamble_count == 0 || self.preamble_count > MAX_PREAMBLE_COUNT {
            return Err(ModemError::Other(format!(
                "preamble count {} outside 1..={}",
                self.preamble_count, MAX_PREAMBLE_COUNT
            )));
        }
        Ok(())
    }
}

/// Assemble a single-PDU WALE frame into an 8-PSK symbol sequence.
pub fn assemble_frame(pdu: &[u8], config: &FrameConfig) -> Result<Vec<u8>, ModemError> {
    assemble_frame_multi(&[pdu], config)
}

/// Assemble a frame carrying one or more PDUs.
///
/// Deep WALE radiates the PDUs back to back under a single data scrambler;
/// Fast WALE concatenates independent frames, each with its own scrambler
/// and preamble, with the M bit set on every frame but the last.
pub fn assemble_frame_multi(pdus: &[&[u8]], config: &FrameConfig) -> Result<Vec<u8>, ModemError> {
    config.validate()?;
    if pdus.is_empty() {
        return Err(ModemError::InvalidPduLength(0));
    }
    for pdu in pdus {
        if pdu.is_empty() || pdu.len() > MAX_PDU_LEN {
            return Err(ModemError::InvalidPduLength(pdu.len()));
        }
    }

    let mut symbols = Vec::new();
    push_envelope(&mut symbols, config);

    match config.waveform {
        Waveform::Deep => {
            let more = config.more_pdus || pdus.len() > 1;
            push_preambles(&mut symbols, Waveform::Deep, config.preamble_count, more);
            // One scrambler instance spans every PDU of the frame
            let mut scrambler = DeepScrambler::new();
            for pdu in pdus {
                let mut data = deep_data_symbols(pdu);
                scrambler.scramble(&mut data);
                symbols.extend_from_slice(&data);
            }
        }
        Waveform::Fast => {
            for (i, pdu) in pdus.iter().enumerate() {
                let last = i == pdus.len() - 1;
                if i > 0 {
                    // Follow-on frames repeat the preamble, not the envelope
                    push_preambles(&mut symbols, Waveform::Fast, config.preamble_count, !last);
                } else {
                    let more = config.more_pdus || pdus.len() > 1;
                    push_preambles(&mut symbols, Waveform::Fast, config.preamble_count, more);
                }
                symbols.extend(fast_data_symbols(pdu));
            }
        }
    }

    debug!(
        "assembled {:?} frame: {} PDUs, {} symbols ({} ms)",
        config.waveform,
        pdus.len(),
        symbols.len(),
        crate::constants::symbols_to_ms(symbols.len())
    );
    Ok(symbols)
}

/// TLC block and capture probes shared by both waveforms.
fn push_envelope(symbols: &mut Vec<u8>, config: &FrameConfig) {
    let tlc_len = tlc_symbol_count(config.tlc_ms);
    symbols.extend((0..tlc_len).map(|i| TLC_PATTERN[i % TLC_PATTERN.len()]));

    if config.async_call {
        for _ in 0..config.capture_probe_count {
            symbols.extend_from_slice(&CAPTURE_PROBE);
        }
    }
}

/// Radiate `count` preambles with a decreasing countdown.
fn push_preambles(symbols: &mut Vec<u8>, waveform: Waveform, count: usize, more_pdus: bool) {
    for i in 0..count {
        let countdown = (count - 1 - i) as u8;
        symbols.extend(build_preamble(waveform, more_pdus, countdown));
    }
}

/// Build one preamble: fixed di-bits on the normal Walsh set, then the four
/// exceptional di-bits (waveform id, M bit, countdown high, countdown low),
/// all preamble-scrambled.
pub fn build_preamble(waveform: Waveform, more_pdus: bool, countdown: u8) -> Vec<u8> {
    let fixed: &[u8] = match waveform {
        Waveform::Deep => &DEEP_FIXED_DIBITS,
        Waveform::Fast => &FAST_FIXED_DIBITS,
    };

    let mut chips = Vec::with_capacity(waveform.preamble_len());
    for &dibit in fixed {
        chips.extend_from_slice(&normal_chips(dibit));
    }

    let exceptional = exceptional_dibits(waveform, more_pdus, countdown);
    for dibit in exceptional {
        chips.extend_from_slice(&exceptional_chips(dibit));
    }

    scramble_preamble(&mut chips);
    chips
}

/// The four signalling di-bits of a preamble.
fn exceptional_dibits(waveform: Waveform, more_pdus: bool, countdown: u8) -> [u8; 4] {
    let c1 = (countdown >> 2) & 0x3;
    let c0 = countdown & 0x3;
    [waveform.waveform_id(), more_pdus as u8, c1, c0]
}

/// Deep WALE data pipeline: conv encode → interleave → quad-bits → Walsh-16.
///
/// Scrambling is applied by the caller so one scrambler can span PDUs.
fn deep_data_symbols(pdu: &[u8]) -> Vec<u8> {
    let dibits = interleave(&conv_encode(&bits::bytes_to_bits(pdu)));
    let quadbits = bits::bits_to_quadbits(&bits::dibits_to_bits(&dibits));

    let mut symbols = Vec::with_capacity(quadbits.len() * 64);
    for quadbit in quadbits {
        symbols.extend_from_slice(&walsh16_symbols(quadbit));
    }
    symbols
}

/// Fast WALE data pipeline: conv encode → interleave → BPSK map → scramble →
/// probe insertion.
fn fast_data_symbols(pdu: &[u8]) -> Vec<u8> {
    let dibits = interleave(&conv_encode(&bits::bytes_to_bits(pdu)));
    let mut data: Vec<u8> = bits::dibits_to_bits(&dibits)
        .iter()
        .map(|&b| if b == 0 { 0u8 } else { 4u8 })
        .collect();

    // Scrambler resets per frame and covers data symbols only
    FastScrambler::new().apply(&mut data);

    let probe = fast_probe();
    let mut symbols = Vec::with_capacity(data.len() + (data.len() / FAST_DATA_CHUNK_LEN + 2) * FAST_PROBE_LEN);
    symbols.extend_from_slice(&probe);
    for chunk in data.chunks(FAST_DATA_CHUNK_LEN) {
        symbols.extend_from_slice(chunk);
        // Zero-pad a short final chunk to the full 96 symbols
        symbols.extend(std::iter::repeat(0u8).take(FAST_DATA_CHUNK_LEN - chunk.len()));
        symbols.extend_from_slice(&probe);
    }
    symbols
}

/// The 32-symbol Fast WALE probe: the 16-element base sequence doubled.
pub fn fast_probe() -> [u8; FAST_PROBE_LEN] {
    let mut probe = [0u8; FAST_PROBE_LEN];
    probe[..16].copy_from_slice(&FAST_PROBE_16);
    probe[16..].copy_from_slice(&FAST_PROBE_16);
    probe
}
