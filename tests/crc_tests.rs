//! CRC-16-CCITT conformance tests against published vectors.

use minutemodem::util::crc::crc16_ccitt;

/// The canonical CCITT-FALSE check value.
#[test]
fn published_check_value() {
    assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
}

#[test]
fn known_vectors() {
    assert_eq!(crc16_ccitt(&[]), 0xFFFF);
    assert_eq!(crc16_ccitt(b"A"), 0xB915);
    assert_eq!(crc16_ccitt(&[0x00]), 0xE1F0);
    assert_eq!(crc16_ccitt(&[0xFF, 0xFF]), 0x0000);
}

#[test]
fn crc_is_order_sensitive() {
    assert_ne!(crc16_ccitt(&[0x01, 0x02]), crc16_ccitt(&[0x02, 0x01]));
}

#[test]
fn every_single_bit_flip_changes_the_crc() {
    let data = [0x49, 0x50, 0x55, 0x04, 0x0F, 0xF6];
    let reference = crc16_ccitt(&data);
    for byte in 0..data.len() {
        for bit in 0..8 {
            let mut corrupted = data;
            corrupted[byte] ^= 1 << bit;
            assert_ne!(
                crc16_ccitt(&corrupted),
                reference,
                "flip at byte {byte} bit {bit} went undetected"
            );
        }
    }
}
