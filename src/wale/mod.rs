//! # WALE Waveform Codec
//!
//! This module implements the WALE waveforms of MIL-STD-188-141D Appendix G:
//! Deep WALE (Walsh-16 data modulation, ~150 bps, §G.5.1.7) and Fast WALE
//! (BPSK data modulation with inserted probes, ~2400 bps, §G.5.1.8).
//!
//! ## Transmit pipeline
//!
//! ```text
//! ┌─────────┐  ┌─────────────┐  ┌────────────┐  ┌────────────┐  ┌───────────┐
//! │ PDU     │─▶│ conv encode │─▶│ interleave │─▶│ Walsh-16 / │─▶│ scramble  │
//! │ (bytes) │  │ r=1/2, K=7  │  │ 12 × 16    │  │ BPSK map   │  │ mod 8     │
//! └─────────┘  └─────────────┘  └────────────┘  └────────────┘  └───────────┘
//! ```
//!
//! prefixed per frame with: TLC block (tuner adjust), capture probes (async
//! calls), and one or more Walsh preambles carrying the waveform id, M bit
//! and preamble countdown.
//!
//! ## Receive pipeline
//!
//! The detector correlates preamble chip windows against the fixed di-bit
//! patterns (after removing the preamble scrambling vector) and declares the
//! waveform; the data decoder inverts the transmit pipeline back to bytes.
//!
//! Symbols are 8-PSK constellation points in `0..=7`; data modulation uses
//! only `{0, 4}` (BPSK carried on 8-PSK).

pub mod detect;
pub mod fec;
pub mod frame;
pub mod interleave;
pub mod scramble;
pub mod walsh;

pub use detect::{decode_data, decode_pdu, detect_waveform, Detection, WaveformDetector};
pub use frame::{assemble_frame, assemble_frame_multi, FrameConfig, Waveform};
