//! DTE session tests over real TCP: the five-state handshake, command
//! translation, version rejection, keepalive, and the single-session
//! listener rule.

mod mock_support;

use minutemodem::dte::command::{DteCommand, NackReason};
use minutemodem::dte::packet::{DtePacket, PacketType};
use minutemodem::modem::{ModemConfig, OrderFlag, TxState};
use mock_support::{start_server, DteClient};
use std::time::{Duration, Instant};

/// The full handshake lands in operational with the setup burst.
#[tokio::test]
async fn handshake_completes_with_setup_burst() {
    let (_rig, addr) = start_server(ModemConfig::default()).await;
    let mut dte = DteClient::connect(addr).await;

    let t0 = Instant::now();
    let setup = dte.handshake().await;
    assert!(
        t0.elapsed() < Duration::from_secs(6),
        "handshake exceeded the 6 s budget"
    );

    assert!(matches!(setup[0], DteCommand::InitialSetup { version: 12, .. }));
    assert!(matches!(setup[1], DteCommand::TxSetup { .. }));
    match &setup[2] {
        DteCommand::TxStatus(status) => {
            assert_eq!(status.state, TxState::Flushed);
            assert_eq!(status.queued_bytes, 0);
        }
        other => panic!("expected TX_STATUS, got {other:?}"),
    }
    match &setup[3] {
        DteCommand::CarrierDetect {
            detected,
            data_rate,
            blocking_factor,
        } => {
            assert!(!detected);
            assert_eq!((*data_rate, *blocking_factor), (0, 0));
        }
        other => panic!("expected CARRIER_DETECT, got {other:?}"),
    }
}

/// ARM / TX_DATA / START and the loopback RX_DATA round trip.
#[tokio::test]
async fn arm_send_start_round_trip() {
    let (_rig, addr) = start_server(ModemConfig::default()).await;
    let mut dte = DteClient::connect(addr).await;
    dte.handshake().await;

    dte.send_command(DteCommand::Arm).await;
    let t0 = Instant::now();
    match dte.recv_command().await {
        DteCommand::TxStatus(status) => assert_eq!(status.state, TxState::Armed),
        other => panic!("expected TX_STATUS(armed), got {other:?}"),
    }
    assert!(t0.elapsed() < Duration::from_millis(100));

    dte.send_command(DteCommand::TxData {
        order: OrderFlag::FirstAndLast,
        data: b"HELLO".to_vec(),
    })
    .await;
    dte.send_command(DteCommand::Start).await;

    match dte.recv_command().await {
        DteCommand::TxStatus(status) => assert_eq!(status.state, TxState::Started),
        other => panic!("expected TX_STATUS(started), got {other:?}"),
    }

    // The loopback peer raises carrier and delivers the payload
    let mut saw_carrier = false;
    loop {
        match dte.recv_command().await {
            DteCommand::CarrierDetect { detected: true, .. } => saw_carrier = true,
            DteCommand::RxData { order, data } => {
                assert_eq!(data, b"HELLO");
                assert_eq!(order, OrderFlag::FirstAndLast);
                break;
            }
            DteCommand::TxStatus(_) | DteCommand::CarrierDetect { .. } => continue,
            other => panic!("unexpected command: {other:?}"),
        }
    }
    assert!(saw_carrier, "no carrier detect before RX data");
}

/// A mismatching CONNECT version terminates the session.
#[tokio::test]
async fn version_mismatch_terminates() {
    let (_rig, addr) = start_server(ModemConfig::default()).await;
    let mut dte = DteClient::connect(addr).await;

    dte.send_packet(&DtePacket::new(PacketType::Connect, vec![11]))
        .await;
    // The modem's own CONNECT drains ahead of the close
    assert!(dte.closed().await);
}

/// Only one DTE at a time; the second connection is closed immediately.
#[tokio::test]
async fn second_session_is_refused() {
    let (_rig, addr) = start_server(ModemConfig::default()).await;
    let mut first = DteClient::connect(addr).await;
    first.handshake().await;

    let mut second = DteClient::connect(addr).await;
    assert!(second.closed().await, "second session was not refused");

    // The first session is still healthy
    first.send_command(DteCommand::RequestTxStatus).await;
    assert!(matches!(
        first.recv_command().await,
        DteCommand::TxStatus(_)
    ));
}

/// An idle operational link emits keepalives every 2 s.
#[tokio::test]
async fn keepalive_on_idle_link() {
    let (_rig, addr) = start_server(ModemConfig::default()).await;
    let mut dte = DteClient::connect(addr).await;
    dte.handshake().await;

    let t0 = Instant::now();
    let packet = dte.recv_packet().await;
    assert_eq!(packet.packet_type, PacketType::Data);
    assert!(packet.payload.is_empty(), "expected an empty keepalive");
    let elapsed = t0.elapsed();
    assert!(
        elapsed >= Duration::from_millis(1500) && elapsed <= Duration::from_millis(4000),
        "keepalive at {elapsed:?}, expected around 2 s"
    );
}

/// START without ARM is NACKed as not_armed.
#[tokio::test]
async fn start_without_arm_nacks() {
    let (_rig, addr) = start_server(ModemConfig::default()).await;
    let mut dte = DteClient::connect(addr).await;
    dte.handshake().await;

    dte.send_command(DteCommand::Start).await;
    match dte.recv_command().await {
        DteCommand::TxNack { reason } => assert_eq!(reason, NackReason::NotArmed),
        other => panic!("expected TX_NACK, got {other:?}"),
    }
}

/// REQUEST_TX_STATUS samples the current state.
#[tokio::test]
async fn request_tx_status() {
    let (_rig, addr) = start_server(ModemConfig::default()).await;
    let mut dte = DteClient::connect(addr).await;
    dte.handshake().await;

    dte.send_command(DteCommand::RequestTxStatus).await;
    match dte.recv_command().await {
        DteCommand::TxStatus(status) => {
            assert_eq!(status.state, TxState::Flushed);
            assert!(status.fifo_space > 0);
        }
        other => panic!("expected TX_STATUS, got {other:?}"),
    }
}
