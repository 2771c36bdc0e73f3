//! Shared test support: a scripted DTE client and server bootstrap helpers
//! used by the session and end-to-end scenario tests.

use minutemodem::dte::command::DteCommand;
use minutemodem::dte::packet::{build_packet, DtePacket, PacketDecoder, PacketType};
use minutemodem::dte::server::{DteServer, DteServerConfig};
use minutemodem::modem::{ModemConfig, RigHandle};
use minutemodem::{start_modem, DTE_PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind a server on an ephemeral port with the given modem config and run
/// it in the background. Returns the rig handle and the bound address.
pub async fn start_server(modem: ModemConfig) -> (RigHandle, SocketAddr) {
    let rig = start_modem(modem);
    let config = DteServerConfig {
        port: 0,
        ..DteServerConfig::default()
    };
    let server = DteServer::bind(config, rig.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (rig, addr)
}

/// A scripted DTE peer driving the modem's socket protocol.
pub struct DteClient {
    stream: TcpStream,
    decoder: PacketDecoder,
}

impl DteClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            decoder: PacketDecoder::new(),
        }
    }

    pub async fn send_packet(&mut self, packet: &DtePacket) {
        let wire = build_packet(packet).unwrap();
        self.stream.write_all(&wire).await.unwrap();
    }

    pub async fn send_command(&mut self, command: DteCommand) {
        self.send_packet(&DtePacket::new(PacketType::Data, command.encode()))
            .await;
    }

    /// Receive the next packet, failing the test after [`RECV_TIMEOUT`].
    pub async fn recv_packet(&mut self) -> DtePacket {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(packet) = self.decoder.next_packet().unwrap() {
                return packet;
            }
            let n = timeout(RECV_TIMEOUT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for packet")
                .unwrap();
            assert!(n > 0, "peer closed while awaiting packet");
            self.decoder.feed(&buf[..n]).unwrap();
        }
    }

    /// Receive the next DATA command, skipping keepalives.
    pub async fn recv_command(&mut self) -> DteCommand {
        loop {
            let packet = self.recv_packet().await;
            assert_eq!(packet.packet_type, PacketType::Data);
            match DteCommand::decode(&packet.payload).unwrap() {
                DteCommand::Keepalive => continue,
                command => return command,
            }
        }
    }

    /// True when the server has closed the connection, draining anything it
    /// sent first.
    pub async fn closed(&mut self) -> bool {
        let mut buf = [0u8; 256];
        loop {
            match timeout(RECV_TIMEOUT, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => return true,
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => return true,
                Err(_) => return false,
            }
        }
    }

    /// Run the DTE side of the five-state handshake with the given version
    /// and consume the setup burst. Returns the setup commands in order.
    pub async fn handshake(&mut self) -> Vec<DteCommand> {
        self.handshake_with_version(DTE_PROTOCOL_VERSION).await
    }

    pub async fn handshake_with_version(&mut self, version: u8) -> Vec<DteCommand> {
        // Both sides announce themselves
        self.send_packet(&DtePacket::new(PacketType::Connect, vec![version]))
            .await;
        let connect = self.recv_packet().await;
        assert_eq!(connect.packet_type, PacketType::Connect);
        assert_eq!(connect.payload, vec![DTE_PROTOCOL_VERSION]);

        let ack = self.recv_packet().await;
        assert_eq!(ack.packet_type, PacketType::ConnectAck);
        self.send_packet(&DtePacket::new(PacketType::ConnectAck, vec![version]))
            .await;

        // Echo the probe
        let probe = self.recv_packet().await;
        assert_eq!(probe.packet_type, PacketType::ConnectionProbe);
        self.send_packet(&DtePacket::bare(PacketType::ConnectionProbe))
            .await;

        // Setup burst: INITIAL_SETUP, TX_SETUP, TX_STATUS, CARRIER_DETECT
        let mut setup = Vec::new();
        for _ in 0..4 {
            setup.push(self.recv_command().await);
        }
        setup
    }
}
