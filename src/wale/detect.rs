//! # WALE Waveform Detection and Data Decoding
//!
//! Given a received symbol slice aligned on a preamble, the detector Walsh-
//! correlates the fixed di-bit windows (after removing the preamble
//! scrambling vector), matches them against the Deep or Fast fixed pattern
//! and decodes the exceptional signalling di-bits. Deep WALE is attempted
//! first; Fast WALE is the fall-through.
//!
//! The data decoder inverts the transmit pipeline: descramble, Walsh-16 or
//! BPSK demap, de-interleave and Viterbi-decode back to bytes.

use crate::constants::{
    CHIPS_PER_DIBIT, DEEP_PREAMBLE_LEN, FAST_DATA_CHUNK_LEN, FAST_PREAMBLE_LEN, FAST_PROBE_LEN,
    SYMBOLS_PER_QUADBIT,
};
use crate::error::ModemError;
use crate::util::bits;
use crate::util::logging::LogThrottle;
use crate::wale::fec::viterbi_decode;
use crate::wale::frame::{Waveform, DEEP_FIXED_DIBITS, FAST_FIXED_DIBITS};
use crate::wale::interleave::deinterleave;
use crate::wale::scramble::{descramble_preamble, DeepScrambler, FastScrambler};
use crate::wale::walsh::{bpsk_correlate, correlate_exceptional, correlate_normal, correlate_walsh16};
use log::{debug, trace};

/// Minimum average per-window correlation for a preamble declaration
pub const CORRELATION_THRESHOLD: i32 = 20;

/// Result of a successful waveform detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Declared waveform
    pub waveform: Waveform,
    /// M bit: more PDUs follow this frame
    pub more_pdus: bool,
    /// Remaining preambles after the one just decoded
    pub countdown: u8,
    /// Average fixed-window correlation score (clean channel: 32)
    pub score: i32,
    /// Offset from the slice start to the first data symbol
    pub data_offset: usize,
}

/// Attempt to detect a WALE preamble at the start of `symbols`.
///
/// Deep WALE is tried first when at least 576 symbols are present, then Fast
/// WALE at 288. The slice must begin on the preamble boundary; capture-probe
/// acquisition (`acquire`) aligns a scanning receiver beforehand.
pub fn detect_waveform(symbols: &[u8]) -> Result<Detection, ModemError> {
    if symbols.len() < FAST_PREAMBLE_LEN {
        return Err(ModemError::FrameTooShort(symbols.len()));
    }

    let mut wrong_id: Option<ModemError> = None;

    if symbols.len() >= DEEP_PREAMBLE_LEN {
        match correlate_preamble(symbols, Waveform::Deep) {
            Ok(detection) => return Ok(detection),
            Err(e @ ModemError::WrongWaveformId(_)) => wrong_id = Some(e),
            Err(_) => {}
        }
    }

    match correlate_preamble(symbols, Waveform::Fast) {
        Ok(detection) => Ok(detection),
        Err(e @ ModemError::WrongWaveformId(_)) => Err(e),
        Err(e) => Err(wrong_id.unwrap_or(e)),
    }
}

/// Correlate one preamble's worth of chips against a waveform's patterns.
fn correlate_preamble(symbols: &[u8], waveform: Waveform) -> Result<Detection, ModemError> {
    let (fixed, preamble_len, expected_id): (&[u8], usize, u8) = match waveform {
        Waveform::Deep => (&DEEP_FIXED_DIBITS, DEEP_PREAMBLE_LEN, 0),
        Waveform::Fast => (&FAST_FIXED_DIBITS, FAST_PREAMBLE_LEN, 1),
    };

    let mut chips = symbols[..preamble_len].to_vec();
    descramble_preamble(&mut chips);

    let mut total_score = 0i32;
    for (i, &expected) in fixed.iter().enumerate() {
        let window = &chips[i * CHIPS_PER_DIBIT..(i + 1) * CHIPS_PER_DIBIT];
        let (dibit, score) = correlate_normal(window);
        trace!("{waveform:?} fixed window {i}: dibit {dibit} score {score}");
        if dibit != expected {
            return Err(ModemError::PatternMismatch);
        }
        total_score += score;
    }

    let average = total_score / fixed.len() as i32;
    if average <= CORRELATION_THRESHOLD {
        return Err(ModemError::PatternMismatch);
    }

    let mut exceptional = [0u8; 4];
    for (i, slot) in exceptional.iter_mut().enumerate() {
        let start = (fixed.len() + i) * CHIPS_PER_DIBIT;
        let (dibit, _) = correlate_exceptional(&chips[start..start + CHIPS_PER_DIBIT]);
        *slot = dibit;
    }

    if exceptional[0] != expected_id {
        return Err(ModemError::WrongWaveformId(exceptional[0]));
    }

    let countdown = (exceptional[2] << 2) | exceptional[3];
    let detection = Detection {
        waveform,
        more_pdus: exceptional[1] != 0,
        countdown,
        score: average,
        data_offset: (countdown as usize + 1) * preamble_len,
    };
    debug!(
        "detected {:?} preamble: score {}, countdown {}, M={}",
        waveform, average, countdown, detection.more_pdus
    );
    Ok(detection)
}

/// BPSK acquisition: slide `reference` over `symbols` within
/// `search_window` offsets and return the offset with the maximum absolute
/// correlation, together with that score.
pub fn acquire(symbols: &[u8], reference: &[u8], search_window: usize) -> Option<(usize, i32)> {
    if symbols.len() < reference.len() {
        return None;
    }
    let last = (symbols.len() - reference.len()).min(search_window);
    (0..=last)
        .map(|offset| {
            let score = bpsk_correlate(&symbols[offset..offset + reference.len()], reference);
            (offset, score)
        })
        .max_by_key(|&(_, score)| score.abs())
}

/// Recover the interleaved di-bit stream from a data region.
///
/// For Deep WALE the symbols are descrambled and Walsh-16 correlated per
/// 64-symbol group; for Fast WALE the inserted probes are stripped, the
/// scrambler flips removed and each BPSK symbol demapped to one bit.
pub fn decode_data(waveform: Waveform, symbols: &[u8]) -> Vec<u8> {
    match waveform {
        Waveform::Deep => {
            let whole = symbols.len() - symbols.len() % SYMBOLS_PER_QUADBIT;
            let mut data = symbols[..whole].to_vec();
            DeepScrambler::new().descramble(&mut data);

            let mut quadbits = Vec::with_capacity(whole / SYMBOLS_PER_QUADBIT);
            for window in data.chunks_exact(SYMBOLS_PER_QUADBIT) {
                let (quadbit, _) = correlate_walsh16(window);
                quadbits.push(quadbit);
            }
            bits::bits_to_dibits(&bits::quadbits_to_bits(&quadbits))
        }
        Waveform::Fast => {
            // Layout: probe, then (96-symbol chunk, probe) repeated
            let mut data = Vec::new();
            let mut i = FAST_PROBE_LEN;
            while i + FAST_DATA_CHUNK_LEN <= symbols.len() {
                data.extend_from_slice(&symbols[i..i + FAST_DATA_CHUNK_LEN]);
                i += FAST_DATA_CHUNK_LEN + FAST_PROBE_LEN;
            }

            FastScrambler::new().apply(&mut data);
            let data_bits: Vec<u8> = data.iter().map(|&s| (s >= 4) as u8).collect();
            bits::bits_to_dibits(&data_bits)
        }
    }
}

/// Decode a data region all the way back to bytes: recover di-bits,
/// de-interleave and Viterbi-decode.
///
/// The returned bytes include the convolutional flush and interleaver
/// padding as trailing zeros; the caller trims to its own framing length.
pub fn decode_pdu(waveform: Waveform, symbols: &[u8]) -> Result<Vec<u8>, ModemError> {
    let dibits = decode_data(waveform, symbols);
    if dibits.is_empty() {
        return Err(ModemError::FrameTooShort(symbols.len()));
    }
    let decoded_bits = viterbi_decode(&deinterleave(&dibits));
    Ok(bits::bits_to_bytes(&decoded_bits))
}

/// Detection statistics, sampled by the modem supervisor.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetectStats {
    pub attempts: u64,
    pub deep_detected: u64,
    pub fast_detected: u64,
    pub too_short: u64,
    pub pattern_rejects: u64,
    pub wrong_id_rejects: u64,
}

/// Stateful detector wrapper that keeps statistics and throttles reject
/// logging on noisy channels.
#[derive(Debug)]
pub struct WaveformDetector {
    stats: DetectStats,
    reject_throttle: LogThrottle,
}

impl WaveformDetector {
    pub fn new() -> Self {
        Self {
            stats: DetectStats::default(),
            reject_throttle: LogThrottle::new(1000, 5),
        }
    }

    /// Run detection and account for the outcome.
    pub fn detect(&mut self, symbols: &[u8]) -> Result<Detection, ModemError> {
        self.stats.attempts += 1;
        match detect_waveform(symbols) {
            Ok(detection) => {
                match detection.waveform {
                    Waveform::Deep => self.stats.deep_detected += 1,
                    Waveform::Fast => self.stats.fast_detected += 1,
                }
                Ok(detection)
            }
            Err(e) => {
                match e {
                    ModemError::FrameTooShort(_) => self.stats.too_short += 1,
                    ModemError::WrongWaveformId(_) => self.stats.wrong_id_rejects += 1,
                    _ => self.stats.pattern_rejects += 1,
                }
                if self.reject_throttle.allow() {
                    debug!("waveform detection rejected: {e}");
                }
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> DetectStats {
        self.stats
    }
}

impl Default for WaveformDetector {
    fn default() -> Self {
        Self::new()
    }
}
