//! Golden wire vectors: exact byte images of DTE packets and exact symbol
//! counts for WALE frames. These pin the on-the-wire format so a refactor
//! that changes framing, CRC placement or stage sizing fails loudly.

use minutemodem::dte::command::DteCommand;
use minutemodem::dte::packet::{build_packet, DtePacket, PacketDecoder, PacketType};
use minutemodem::modem::OrderFlag;
use minutemodem::util::hex::decode_hex;
use minutemodem::wale::frame::{assemble_frame, FrameConfig, Waveform};

fn assert_wire(packet: &DtePacket, golden_hex: &str) {
    let wire = build_packet(packet).unwrap();
    assert_eq!(
        hex::encode(&wire),
        golden_hex,
        "wire image changed for {:?}",
        packet.packet_type
    );

    // And the golden image parses back to the same packet
    let mut decoder = PacketDecoder::new();
    decoder.feed(&decode_hex(golden_hex).unwrap()).unwrap();
    assert_eq!(decoder.next_packet().unwrap(), Some(packet.clone()));
}

#[test]
fn golden_connect() {
    assert_wire(
        &DtePacket::new(PacketType::Connect, vec![12]),
        "495055010001d7bf0c207c",
    );
}

#[test]
fn golden_keepalive() {
    assert_wire(&DtePacket::bare(PacketType::Data), "4950550400002c6e");
}

#[test]
fn golden_connection_probe() {
    assert_wire(
        &DtePacket::bare(PacketType::ConnectionProbe),
        "495055030000a9fe",
    );
}

#[test]
fn golden_arm_command() {
    assert_wire(
        &DtePacket::new(PacketType::Data, DteCommand::Arm.encode()),
        "4950550400013c4f03d193",
    );
}

#[test]
fn golden_tx_data_hello() {
    let command = DteCommand::TxData {
        order: OrderFlag::Last,
        data: b"HELLO".to_vec(),
    };
    // order byte 0x03 is FIRST_AND_LAST; Last is 0x02
    let command_fal = DteCommand::TxData {
        order: OrderFlag::FirstAndLast,
        data: b"HELLO".to_vec(),
    };
    assert_wire(
        &DtePacket::new(PacketType::Data, command_fal.encode()),
        "4950550400075c89010348454c4c4fdf95",
    );
    assert_ne!(command.encode(), command_fal.encode());
}

/// Golden symbol counts per stage: one-byte Deep PDU and two-byte Fast PDU.
#[test]
fn golden_frame_sizes() {
    // Deep: 576 preamble + one interleaver block of Walsh-16 data (96
    // quad-bits x 64 symbols)
    let deep = assemble_frame(&[0xAB], &FrameConfig::default()).unwrap();
    assert_eq!(deep.len(), 576 + 6144);

    // Fast: 288 preamble + initial probe + 4 chunks of (96 data + 32 probe)
    let fast = assemble_frame(
        &[0x00, 0xFF],
        &FrameConfig {
            waveform: Waveform::Fast,
            ..FrameConfig::default()
        },
    )
    .unwrap();
    assert_eq!(fast.len(), 288 + 32 + 4 * (96 + 32));

    // Async adds exactly one 96-symbol capture probe
    let async_deep = assemble_frame(
        &[0xAB],
        &FrameConfig {
            async_call: true,
            ..FrameConfig::default()
        },
    )
    .unwrap();
    assert_eq!(async_deep.len(), 96 + deep.len());
}

/// Symbols only ever take 8-PSK values, and data regions only {0, 4}.
#[test]
fn symbols_stay_in_constellation() {
    let config = FrameConfig {
        waveform: Waveform::Fast,
        tlc_ms: 50,
        ..FrameConfig::default()
    };
    let symbols = assemble_frame(&[0x5A, 0xA5], &config).unwrap();
    assert!(symbols.iter().all(|&s| s < 8));

    // Past TLC and preamble, Fast WALE is pure BPSK
    let tlc_len = 50 * 2400 / 1000;
    let data = &symbols[tlc_len + 288..];
    assert!(data.iter().all(|&s| s == 0 || s == 4));
}
