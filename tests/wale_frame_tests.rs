//! WALE frame assembly and detection tests: frame layout for both
//! waveforms, PDU round trips, preamble countdown and stage lengths.

use minutemodem::constants::{
    CAPTURE_PROBE_LEN, CHIPS_PER_DIBIT, DEEP_PREAMBLE_LEN, FAST_PREAMBLE_LEN,
};
use minutemodem::wale::detect::{decode_pdu, detect_waveform};
use minutemodem::wale::frame::{
    assemble_frame, assemble_frame_multi, fast_probe, FrameConfig, Waveform, CAPTURE_PROBE,
    DEEP_FIXED_DIBITS, FAST_FIXED_DIBITS,
};
use minutemodem::wale::scramble::descramble_preamble;
use minutemodem::wale::walsh::{correlate_exceptional, correlate_normal};
use minutemodem::ModemError;
use proptest::prelude::*;

fn deep_async_config() -> FrameConfig {
    FrameConfig {
        waveform: Waveform::Deep,
        async_call: true,
        capture_probe_count: 1,
        preamble_count: 1,
        more_pdus: false,
        tlc_ms: 0,
    }
}

/// Decode one preamble's worth of symbols into (fixed dibits, exceptional
/// dibits) for direct inspection.
fn decode_preamble(symbols: &[u8], fixed_len: usize) -> (Vec<u8>, Vec<u8>) {
    let mut chips = symbols[..(fixed_len + 4) * CHIPS_PER_DIBIT].to_vec();
    descramble_preamble(&mut chips);

    let fixed: Vec<u8> = (0..fixed_len)
        .map(|i| correlate_normal(&chips[i * CHIPS_PER_DIBIT..(i + 1) * CHIPS_PER_DIBIT]).0)
        .collect();
    let exceptional: Vec<u8> = (0..4)
        .map(|i| {
            let start = (fixed_len + i) * CHIPS_PER_DIBIT;
            correlate_exceptional(&chips[start..start + CHIPS_PER_DIBIT]).0
        })
        .collect();
    (fixed, exceptional)
}

/// Async Deep frame layout and preamble contents.
#[test]
fn deep_async_frame_layout() {
    let symbols = assemble_frame(&[0xAB, 0xCD], &deep_async_config()).unwrap();

    // Capture probe first
    assert_eq!(&symbols[..CAPTURE_PROBE_LEN], &CAPTURE_PROBE[..]);

    // Then one Deep preamble
    let preamble = &symbols[CAPTURE_PROBE_LEN..CAPTURE_PROBE_LEN + DEEP_PREAMBLE_LEN];
    let (fixed, exceptional) = decode_preamble(preamble, 14);
    assert_eq!(fixed, DEEP_FIXED_DIBITS.to_vec());
    assert_eq!(exceptional, vec![0, 0, 0, 0]);

    // The detector agrees once aligned past the capture probe
    let detection = detect_waveform(&symbols[CAPTURE_PROBE_LEN..]).unwrap();
    assert_eq!(detection.waveform, Waveform::Deep);
    assert!(!detection.more_pdus);
    assert_eq!(detection.countdown, 0);
}

/// Fast frame preamble and probe-delimited data region.
#[test]
fn fast_frame_layout() {
    let config = FrameConfig {
        waveform: Waveform::Fast,
        ..FrameConfig::default()
    };
    let symbols = assemble_frame(&[0x00, 0xFF], &config).unwrap();

    let (fixed, exceptional) = decode_preamble(&symbols[..FAST_PREAMBLE_LEN], 5);
    assert_eq!(fixed, FAST_FIXED_DIBITS.to_vec());
    assert_eq!(exceptional, vec![1, 0, 0, 0]);

    // Data region: probe, then (96 data, probe) repeating
    let probe = fast_probe();
    let data = &symbols[FAST_PREAMBLE_LEN..];
    assert_eq!(&data[..32], &probe[..]);
    let mut at = 32;
    while at + 96 + 32 <= data.len() {
        assert_eq!(&data[at + 96..at + 96 + 32], &probe[..], "probe at {at}");
        at += 96 + 32;
    }
    assert_eq!(at, data.len());
}

/// Countdown bits decode to k-1, k-2, ..., 0 in order.
#[test]
fn preamble_countdown_sequence() {
    for waveform in [Waveform::Deep, Waveform::Fast] {
        let (fixed_len, preamble_len) = match waveform {
            Waveform::Deep => (14, DEEP_PREAMBLE_LEN),
            Waveform::Fast => (5, FAST_PREAMBLE_LEN),
        };
        let k = 5;
        let config = FrameConfig {
            waveform,
            preamble_count: k,
            ..FrameConfig::default()
        };
        let symbols = assemble_frame(&[0x42], &config).unwrap();

        for i in 0..k {
            let preamble = &symbols[i * preamble_len..(i + 1) * preamble_len];
            let (_, exceptional) = decode_preamble(preamble, fixed_len);
            let countdown = (exceptional[2] << 2) | exceptional[3];
            assert_eq!(countdown as usize, k - 1 - i);
        }

        // The detector reports the remaining count and skips to the data
        let detection = detect_waveform(&symbols).unwrap();
        assert_eq!(detection.countdown as usize, k - 1);
        assert_eq!(detection.data_offset, k * preamble_len);
    }
}

/// Stage lengths are exact.
#[test]
fn stage_symbol_counts() {
    assert_eq!(CAPTURE_PROBE.len(), 96);
    assert_eq!(DEEP_PREAMBLE_LEN, 576);
    assert_eq!(FAST_PREAMBLE_LEN, 288);
    assert_eq!(fast_probe().len(), 32);
}

fn round_trip(pdu: &[u8], waveform: Waveform) {
    let config = FrameConfig {
        waveform,
        ..FrameConfig::default()
    };
    let symbols = assemble_frame(pdu, &config).unwrap();
    let detection = detect_waveform(&symbols).unwrap();
    assert_eq!(detection.waveform, waveform);
    let decoded = decode_pdu(waveform, &symbols[detection.data_offset..]).unwrap();
    assert_eq!(&decoded[..pdu.len()], pdu);
    // Everything past the PDU is flush/padding zeros
    assert!(decoded[pdu.len()..].iter().all(|&b| b == 0));
}

/// Round trip at the payload bound.
#[test]
fn maximum_pdu_round_trips() {
    let pdu: Vec<u8> = (0..4086).map(|i| (i * 31 % 255) as u8).collect();
    round_trip(&pdu, Waveform::Deep);
    round_trip(&pdu, Waveform::Fast);
}

#[test]
fn single_byte_pdu_round_trips() {
    round_trip(&[0x01], Waveform::Deep);
    round_trip(&[0x01], Waveform::Fast);
}

/// A multi-PDU Deep frame spans one scrambler across both PDUs and decodes
/// as one contiguous data region.
#[test]
fn deep_multi_pdu_frame() {
    let a = [0x11u8, 0x22, 0x33];
    let b = [0xEEu8, 0xFF];
    let symbols =
        assemble_frame_multi(&[&a, &b], &FrameConfig::default()).unwrap();

    let detection = detect_waveform(&symbols).unwrap();
    assert!(detection.more_pdus);

    let decoded = decode_pdu(Waveform::Deep, &symbols[detection.data_offset..]).unwrap();
    assert_eq!(&decoded[..a.len()], &a);

    // PDU B starts on the next interleaver-block boundary: 3 bytes encode
    // to 30 di-bits, padded to one 192-di-bit block = 24 bytes
    let b_offset = 24;
    assert_eq!(&decoded[b_offset..b_offset + b.len()], &b);
}

#[test]
fn detection_errors() {
    assert!(matches!(
        detect_waveform(&[0u8; 64]),
        Err(ModemError::FrameTooShort(_))
    ));

    let noise: Vec<u8> = (0..600).map(|i| ((i * 7 + 1) % 8) as u8).collect();
    assert!(matches!(
        detect_waveform(&noise),
        Err(ModemError::PatternMismatch)
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// assemble → detect → decode reproduces the PDU for both waveforms
    /// across arbitrary payloads.
    #[test]
    fn pdu_round_trip_deep(pdu in proptest::collection::vec(any::<u8>(), 1..200)) {
        round_trip(&pdu, Waveform::Deep);
    }

    #[test]
    fn pdu_round_trip_fast(pdu in proptest::collection::vec(any::<u8>(), 1..200)) {
        round_trip(&pdu, Waveform::Fast);
    }
}
