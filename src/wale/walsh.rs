//! # Walsh Orthogonal Modulation
//!
//! WALE carries preamble di-bits and Deep WALE data quad-bits as Walsh
//! sequences over the BPSK symbol pair {0, 4}:
//!
//! - Normal set: four 4-element patterns, each repeated 8 times, 32 chips per
//!   di-bit. Used for the fixed portion of every preamble.
//! - Exceptional set: four 8-element patterns, each repeated 4 times, 32
//!   chips per di-bit. Used for the signalling di-bits (waveform id, M bit,
//!   countdown).
//! - Walsh-16: sixteen 16-element patterns, each repeated 4 times, 64
//!   symbols per quad-bit. The Deep WALE data carrier.
//!
//! Receive correlation maps symbols to ±1 with `sym < 4 → +1, else −1` and
//! picks the pattern with the highest dot product.

use crate::constants::{CHIPS_PER_DIBIT, SYMBOLS_PER_QUADBIT};
use once_cell::sync::Lazy;

/// Normal Walsh set: 4-element patterns over {0, 4}
pub const NORMAL_PATTERNS: [[u8; 4]; 4] = [
    [0, 0, 0, 0],
    [0, 4, 0, 4],
    [0, 0, 4, 4],
    [0, 4, 4, 0],
];

/// Exceptional Walsh set: 8-element patterns over {0, 4}
pub const EXCEPTIONAL_PATTERNS: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 4, 4, 4, 4],
    [0, 4, 0, 4, 4, 0, 4, 0],
    [0, 0, 4, 4, 4, 4, 0, 0],
    [0, 4, 4, 0, 4, 0, 0, 4],
];

/// Walsh-16 data set, derived from the order-16 Hadamard matrix over {0, 4}.
///
/// Row r, column c is 4 when `popcount(r & c)` is odd, else 0.
pub static WALSH16_PATTERNS: Lazy<[[u8; 16]; 16]> = Lazy::new(|| {
    let mut rows = [[0u8; 16]; 16];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, chip) in row.iter_mut().enumerate() {
            *chip = if ((r & c).count_ones() & 1) == 1 { 4 } else { 0 };
        }
    }
    rows
});

/// Expand a di-bit to its 32-chip normal-set sequence (4-element pattern × 8)
pub fn normal_chips(dibit: u8) -> [u8; CHIPS_PER_DIBIT] {
    let pattern = &NORMAL_PATTERNS[(dibit & 0x3) as usize];
    let mut chips = [0u8; CHIPS_PER_DIBIT];
    for (i, chip) in chips.iter_mut().enumerate() {
        *chip = pattern[i % 4];
    }
    chips
}

/// Expand a di-bit to its 32-chip exceptional-set sequence (8-element pattern × 4)
pub fn exceptional_chips(dibit: u8) -> [u8; CHIPS_PER_DIBIT] {
    let pattern = &EXCEPTIONAL_PATTERNS[(dibit & 0x3) as usize];
    let mut chips = [0u8; CHIPS_PER_DIBIT];
    for (i, chip) in chips.iter_mut().enumerate() {
        *chip = pattern[i % 8];
    }
    chips
}

/// Expand a quad-bit to its 64-symbol Walsh-16 sequence (16-element pattern × 4)
pub fn walsh16_symbols(quadbit: u8) -> [u8; SYMBOLS_PER_QUADBIT] {
    let pattern = &WALSH16_PATTERNS[(quadbit & 0xF) as usize];
    let mut symbols = [0u8; SYMBOLS_PER_QUADBIT];
    for (i, sym) in symbols.iter_mut().enumerate() {
        *sym = pattern[i % 16];
    }
    symbols
}

/// BPSK correlation between a received window and a reference sequence.
///
/// Both sides are mapped to ±1 by `sym < 4 → +1, else −1`; the score is the
/// dot product, so a perfect 32-chip match scores 32.
pub fn bpsk_correlate(rx: &[u8], reference: &[u8]) -> i32 {
    rx.iter()
        .zip(reference.iter())
        .map(|(&r, &p)| {
            let rv = if r < 4 { 1 } else { -1 };
            let pv = if p < 4 { 1 } else { -1 };
            rv * pv
        })
        .sum()
}

/// Correlate a 32-chip window against the normal set.
///
/// Returns the best di-bit value and its correlation score.
pub fn correlate_normal(window: &[u8]) -> (u8, i32) {
    best_dibit(window, normal_chips)
}

/// Correlate a 32-chip window against the exceptional set.
pub fn correlate_exceptional(window: &[u8]) -> (u8, i32) {
    best_dibit(window, exceptional_chips)
}

fn best_dibit(window: &[u8], expand: fn(u8) -> [u8; CHIPS_PER_DIBIT]) -> (u8, i32) {
    let mut best = (0u8, i32::MIN);
    for dibit in 0..4u8 {
        let score = bpsk_correlate(window, &expand(dibit));
        if score > best.1 {
            best = (dibit, score);
        }
    }
    best
}

/// Correlate a 64-symbol window against the Walsh-16 set.
///
/// Returns the best quad-bit value and its correlation score.
pub fn correlate_walsh16(window: &[u8]) -> (u8, i32) {
    let mut best = (0u8, i32::MIN);
    for quadbit in 0..16u8 {
        let score = bpsk_correlate(window, &walsh16_symbols(quadbit));
        if score > best.1 {
            best = (quadbit, score);
        }
    }
    best
}
