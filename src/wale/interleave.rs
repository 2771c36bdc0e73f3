//! # Block Interleaver
//!
//! Encoded di-bits are written row-major into a 12 × 16 matrix and read out
//! column-major, spreading burst errors across the convolutional decoder's
//! correction span. Long PDUs use successive 192-di-bit blocks; the final
//! block is zero-padded to capacity.

use crate::constants::{INTERLEAVER_COLS, INTERLEAVER_DIBITS, INTERLEAVER_ROWS};

/// Interleave a di-bit stream in 192-di-bit blocks.
///
/// The output length is the input length rounded up to a multiple of the
/// block capacity.
pub fn interleave(dibits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(dibits.len().div_ceil(INTERLEAVER_DIBITS) * INTERLEAVER_DIBITS);

    for block in dibits.chunks(INTERLEAVER_DIBITS) {
        let mut matrix = [0u8; INTERLEAVER_DIBITS];
        matrix[..block.len()].copy_from_slice(block);

        for col in 0..INTERLEAVER_COLS {
            for row in 0..INTERLEAVER_ROWS {
                out.push(matrix[row * INTERLEAVER_COLS + col]);
            }
        }
    }
    out
}

/// Invert [`interleave`].
///
/// Trailing di-bits short of a whole block cannot have come from the
/// interleaver and are dropped.
pub fn deinterleave(dibits: &[u8]) -> Vec<u8> {
    let whole = dibits.len() - dibits.len() % INTERLEAVER_DIBITS;
    let mut out = Vec::with_capacity(whole);

    for block in dibits[..whole].chunks(INTERLEAVER_DIBITS) {
        let mut matrix = [0u8; INTERLEAVER_DIBITS];
        let mut i = 0;
        for col in 0..INTERLEAVER_COLS {
            for row in 0..INTERLEAVER_ROWS {
                matrix[row * INTERLEAVER_COLS + col] = block[i];
                i += 1;
            }
        }
        out.extend_from_slice(&matrix);
    }
    out
}
