//! # DTE Session State Machine
//!
//! One session per accepted TCP connection, owning the socket for its whole
//! life. The handshake walks five states before the link is usable:
//!
//! | State         | Awaits               | Timeout |
//! |---------------|----------------------|---------|
//! | tcp_connected | socket ready         | —       |
//! | connect_sent  | peer CONNECT         | 3 s     |
//! | ack_sent      | peer CONNECT_ACK     | 3 s     |
//! | probing       | peer PROBE (RTT)     | 6 s     |
//! | sending_setup | — (immediate burst)  | —       |
//!
//! then `operational` translates DTE commands to modem operations and modem
//! events to packets, holding the link with a 2 s keepalive and a 30 s
//! watchdog.
//!
//! Peers are allowed to coalesce packets, so every wait drains the receive
//! buffer before touching the socket: a CONNECT may ride with the ACK and a
//! PROBE with either.

use crate::constants::{
    DTE_ACK_TIMEOUT, DTE_CONNECT_TIMEOUT, DTE_KEEPALIVE_INTERVAL, DTE_PROBE_TIMEOUT,
    DTE_WATCHDOG_TIMEOUT,
};
use crate::dte::command::{DteCommand, NackReason};
use crate::dte::packet::{build_packet, DtePacket, PacketDecoder, PacketType};
use crate::dte::server::DteServerConfig;
use crate::error::ModemError;
use crate::modem::{ModemEvent, RigHandle, TxState, TxStatusSnapshot};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{sleep_until, timeout_at, Instant};

/// Protocol states of a DTE session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    TcpConnected,
    ConnectSent,
    AckSent,
    Probing,
    SendingSetup,
    Operational,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed the TCP connection
    PeerClosed,
    /// No packet received within the watchdog window
    Watchdog,
    /// A handshake state timed out
    HandshakeTimeout(&'static str),
    /// Peer announced an incompatible protocol version
    VersionMismatch,
    /// CONNECTION_PROBE round trip exceeded the latency bound
    LatencyExceeded,
    /// CRC failure, framing violation or out-of-place packet
    ProtocolError(String),
    /// Socket read or write failure
    SocketError(String),
    /// The modem task went away
    ModemLost,
}

/// Per-session traffic counters, logged at session end.
#[derive(Debug, Default, Clone, Copy)]
struct SessionCounters {
    packets_in: u64,
    packets_out: u64,
    keepalives_sent: u64,
}

/// A single DTE session over an accepted socket.
pub struct Session {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: PacketDecoder,
    rig: RigHandle,
    config: DteServerConfig,
    state: SessionState,
    last_rx: Instant,
    last_tx: Instant,
    rtt: Option<Duration>,
    counters: SessionCounters,
}

impl Session {
    pub fn new(stream: TcpStream, rig: RigHandle, config: DteServerConfig) -> Self {
        let (reader, writer) = stream.into_split();
        let now = Instant::now();
        Self {
            reader,
            writer,
            decoder: PacketDecoder::new(),
            rig,
            config,
            state: SessionState::TcpConnected,
            last_rx: now,
            last_tx: now,
            rtt: None,
            counters: SessionCounters::default(),
        }
    }

    /// Round trip measured during the probing state.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Drive the session to completion. The socket is dropped on return.
    pub async fn run(mut self) -> SessionEnd {
        let end = match self.run_protocol().await {
            Ok(end) => end,
            Err(end) => end,
        };
        if matches!(end, SessionEnd::ProtocolError(_)) {
            // Best-effort courtesy to a corrupted peer before the close
            if let Ok(wire) = build_packet(&DtePacket::bare(PacketType::Error)) {
                let _ = self.writer.write_all(&wire).await;
            }
        }
        info!(
            "session ended in {:?}: {:?} (in {}, out {}, keepalives {}, crc errors {})",
            self.state, end, self.counters.packets_in, self.counters.packets_out,
            self.counters.keepalives_sent, self.decoder.crc_errors,
        );
        end
    }

    async fn run_protocol(&mut self) -> Result<SessionEnd, SessionEnd> {
        // tcp_connected: the socket became ready when accept() returned
        self.enter(SessionState::ConnectSent);
        self.send(DtePacket::new(
            PacketType::Connect,
            vec![self.config.protocol_version],
        ))
        .await?;

        // connect_sent: await peer CONNECT
        let deadline = Instant::now() + DTE_CONNECT_TIMEOUT;
        loop {
            let packet = self.await_packet(deadline, "connect_sent").await?;
            match packet.packet_type {
                PacketType::Connect => {
                    self.check_version(&packet)?;
                    break;
                }
                other => return Err(self.unexpected(other)),
            }
        }
        self.send(DtePacket::new(
            PacketType::ConnectAck,
            vec![self.config.protocol_version],
        ))
        .await?;

        // ack_sent: await peer CONNECT_ACK; a coalesced early PROBE counts
        self.enter(SessionState::AckSent);
        let deadline = Instant::now() + DTE_ACK_TIMEOUT;
        let mut early_probe = false;
        loop {
            let packet = self.await_packet(deadline, "ack_sent").await?;
            match packet.packet_type {
                PacketType::ConnectAck => {
                    self.check_version(&packet)?;
                    break;
                }
                PacketType::ConnectionProbe => {
                    early_probe = true;
                    break;
                }
                // Duplicate CONNECT from a retrying peer
                PacketType::Connect => continue,
                other => return Err(self.unexpected(other)),
            }
        }

        // probing: measure the socket round trip
        self.enter(SessionState::Probing);
        let t0 = Instant::now();
        self.send(DtePacket::bare(PacketType::ConnectionProbe))
            .await?;
        let rtt = if early_probe {
            t0.elapsed()
        } else {
            let deadline = Instant::now() + DTE_PROBE_TIMEOUT;
            loop {
                let packet = self.await_packet(deadline, "probing").await?;
                match packet.packet_type {
                    PacketType::ConnectionProbe => break t0.elapsed(),
                    // Stray ACK duplicates are harmless here
                    PacketType::ConnectAck => continue,
                    other => return Err(self.unexpected(other)),
                }
            }
        };
        if rtt > self.config.max_socket_latency {
            warn!(
                "probe RTT {} ms over limit {} ms",
                rtt.as_millis(),
                self.config.max_socket_latency.as_millis()
            );
            return Err(SessionEnd::LatencyExceeded);
        }
        self.rtt = Some(rtt);
        debug!("probe RTT {} us", rtt.as_micros());

        // sending_setup: the immediate configuration burst
        self.enter(SessionState::SendingSetup);
        self.send_setup_burst().await?;

        self.enter(SessionState::Operational);
        self.operational().await
    }

    /// INITIAL_SETUP, TX_SETUP, TX_STATUS(flushed), CARRIER_DETECT.
    async fn send_setup_burst(&mut self) -> Result<(), SessionEnd> {
        let (waveform, data_rate) = self.rig.tx_setup().await.map_err(|_| SessionEnd::ModemLost)?;
        let status = self.rig.tx_status().await.map_err(|_| SessionEnd::ModemLost)?;
        let rx = self.rig.rx_status().await.map_err(|_| SessionEnd::ModemLost)?;

        self.send_command(DteCommand::InitialSetup {
            version: self.config.protocol_version,
            tlc_ms: self.config.tlc_ms,
        })
        .await?;
        self.send_command(DteCommand::TxSetup {
            waveform,
            data_rate,
        })
        .await?;
        self.send_command(DteCommand::TxStatus(status)).await?;
        self.send_command(DteCommand::CarrierDetect {
            detected: rx.carrier,
            data_rate: if rx.carrier { rx.data_rate } else { 0 },
            blocking_factor: if rx.carrier { rx.blocking_factor } else { 0 },
        })
        .await?;
        Ok(())
    }

    /// Operational state: full-duplex translation plus keepalive/watchdog.
    async fn operational(&mut self) -> Result<SessionEnd, SessionEnd> {
        let mut events = self.rig.subscribe();
        let mut buf = [0u8; 4096];

        loop {
            // Buffered-arrival rule: drain complete packets before waiting
            while let Some(packet) = self.next_packet()? {
                if let Some(end) = self.handle_packet(packet).await? {
                    return Ok(end);
                }
            }

            let keepalive_at = self.last_tx + DTE_KEEPALIVE_INTERVAL;
            let watchdog_at = self.last_rx + DTE_WATCHDOG_TIMEOUT;

            enum Wake {
                Read(std::io::Result<usize>),
                Event(Result<ModemEvent, broadcast::error::RecvError>),
                Keepalive,
                Watchdog,
            }

            let wake = tokio::select! {
                result = self.reader.read(&mut buf) => Wake::Read(result),
                event = events.recv() => Wake::Event(event),
                _ = sleep_until(keepalive_at) => Wake::Keepalive,
                _ = sleep_until(watchdog_at) => Wake::Watchdog,
            };

            match wake {
                Wake::Read(Ok(0)) => return Ok(SessionEnd::PeerClosed),
                Wake::Read(Ok(n)) => {
                    self.decoder
                        .feed(&buf[..n])
                        .map_err(|e| SessionEnd::ProtocolError(e.to_string()))?;
                }
                Wake::Read(Err(e)) => return Err(SessionEnd::SocketError(e.to_string())),
                Wake::Event(Ok(event)) => self.handle_event(event).await?,
                Wake::Event(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!("event stream lagged, {missed} events dropped");
                }
                Wake::Event(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(SessionEnd::ModemLost)
                }
                Wake::Keepalive => {
                    self.send(DtePacket::bare(PacketType::Data)).await?;
                    self.counters.keepalives_sent += 1;
                }
                Wake::Watchdog => return Ok(SessionEnd::Watchdog),
            }
        }
    }

    /// Translate one peer packet. Returns `Some(end)` to terminate.
    async fn handle_packet(&mut self, packet: DtePacket) -> Result<Option<SessionEnd>, SessionEnd> {
        match packet.packet_type {
            PacketType::Data => {
                let command = DteCommand::decode(&packet.payload)
                    .map_err(|e| SessionEnd::ProtocolError(e.to_string()))?;
                self.handle_command(command).await?;
                Ok(None)
            }
            // A probing peer gets its echo at any time
            PacketType::ConnectionProbe => {
                self.send(DtePacket::bare(PacketType::ConnectionProbe))
                    .await?;
                Ok(None)
            }
            PacketType::Error => {
                warn!("peer reported a protocol error, terminating");
                Ok(Some(SessionEnd::ProtocolError("peer ERROR packet".into())))
            }
            // Late handshake duplicates carry no information here
            PacketType::Connect | PacketType::ConnectAck => {
                debug!("ignoring late {:?}", packet.packet_type);
                Ok(None)
            }
        }
    }

    async fn handle_command(&mut self, command: DteCommand) -> Result<(), SessionEnd> {
        match command {
            DteCommand::Arm => {
                let state = self.rig.arm_tx().await.map_err(|_| SessionEnd::ModemLost)?;
                let mut status = self.sample_status().await?;
                status.state = state;
                self.send_command(DteCommand::TxStatus(status)).await?;
            }
            DteCommand::Start => match self.rig.start_tx().await {
                Ok((_, status)) => {
                    self.send_command(DteCommand::TxStatus(status)).await?;
                }
                Err(ModemError::NotArmed) => {
                    self.send_command(DteCommand::TxNack {
                        reason: NackReason::NotArmed,
                    })
                    .await?;
                }
                Err(_) => return Err(SessionEnd::ModemLost),
            },
            DteCommand::TxData { order, data } => match self.rig.tx_data(data, order).await {
                Ok(()) => {}
                // Backpressure is absorbed: no reply, the peer's TCP
                // window stalls instead
                Err(ModemError::QueueFull) => {}
                Err(ModemError::NotArmed) => {
                    self.send_command(DteCommand::TxNack {
                        reason: NackReason::NotArmed,
                    })
                    .await?;
                }
                Err(ModemError::InvalidPduLength(_)) => {
                    self.send_command(DteCommand::TxNack {
                        reason: NackReason::QueueFull,
                    })
                    .await?;
                }
                Err(_) => return Err(SessionEnd::ModemLost),
            },
            DteCommand::AbortTx => {
                self.rig.abort_tx().await.map_err(|_| SessionEnd::ModemLost)?;
            }
            DteCommand::AbortRx => {
                self.rig.abort_rx().await.map_err(|_| SessionEnd::ModemLost)?;
            }
            DteCommand::RequestTxStatus => {
                let status = self.sample_status().await?;
                self.send_command(DteCommand::TxStatus(status)).await?;
            }
            DteCommand::TxSetup { waveform, .. } => {
                self.rig
                    .configure_tx(waveform)
                    .await
                    .map_err(|_| SessionEnd::ModemLost)?;
            }
            DteCommand::InitialSetup { version, tlc_ms } => {
                debug!("peer initial setup: version {version}, tlc {tlc_ms} ms");
            }
            DteCommand::Keepalive => {}
            // Modem-to-DTE commands have no meaning inbound
            DteCommand::RxData { .. }
            | DteCommand::TxStatus(_)
            | DteCommand::TxNack { .. }
            | DteCommand::CarrierDetect { .. } => {
                warn!("ignoring modem-direction command from peer");
            }
        }
        Ok(())
    }

    /// Translate one modem event into its packet.
    async fn handle_event(&mut self, event: ModemEvent) -> Result<(), SessionEnd> {
        let command = match event {
            ModemEvent::TxStatus(status) => DteCommand::TxStatus(status),
            ModemEvent::TxUnderrun => DteCommand::TxNack {
                reason: NackReason::Underrun,
            },
            ModemEvent::RxCarrier {
                detected,
                data_rate,
                blocking_factor,
            } => DteCommand::CarrierDetect {
                detected,
                data_rate,
                blocking_factor,
            },
            ModemEvent::RxData { payload, order } => DteCommand::RxData {
                order,
                data: payload,
            },
        };
        self.send_command(command).await
    }

    async fn sample_status(&mut self) -> Result<TxStatusSnapshot, SessionEnd> {
        self.rig.tx_status().await.map_err(|_| SessionEnd::ModemLost)
    }

    /// Pull the next complete packet out of the decode buffer.
    fn next_packet(&mut self) -> Result<Option<DtePacket>, SessionEnd> {
        match self.decoder.next_packet() {
            Ok(Some(packet)) => {
                self.counters.packets_in += 1;
                self.last_rx = Instant::now();
                Ok(Some(packet))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(SessionEnd::ProtocolError(e.to_string())),
        }
    }

    /// Wait for a packet during the handshake, draining buffered arrivals
    /// first and failing at `deadline`.
    async fn await_packet(
        &mut self,
        deadline: Instant,
        state_name: &'static str,
    ) -> Result<DtePacket, SessionEnd> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(packet) = self.next_packet()? {
                return Ok(packet);
            }
            match timeout_at(deadline, self.reader.read(&mut buf)).await {
                Ok(Ok(0)) => return Err(SessionEnd::PeerClosed),
                Ok(Ok(n)) => {
                    self.decoder
                        .feed(&buf[..n])
                        .map_err(|e| SessionEnd::ProtocolError(e.to_string()))?;
                }
                Ok(Err(e)) => return Err(SessionEnd::SocketError(e.to_string())),
                Err(_) => return Err(SessionEnd::HandshakeTimeout(state_name)),
            }
        }
    }

    async fn send_command(&mut self, command: DteCommand) -> Result<(), SessionEnd> {
        self.send(DtePacket::new(PacketType::Data, command.encode()))
            .await
    }

    async fn send(&mut self, packet: DtePacket) -> Result<(), SessionEnd> {
        let wire =
            build_packet(&packet).map_err(|e| SessionEnd::ProtocolError(e.to_string()))?;
        self.writer
            .write_all(&wire)
            .await
            .map_err(|e| SessionEnd::SocketError(e.to_string()))?;
        self.last_tx = Instant::now();
        self.counters.packets_out += 1;
        Ok(())
    }

    fn check_version(&self, packet: &DtePacket) -> Result<(), SessionEnd> {
        let peer = packet.payload.first().copied().unwrap_or(0);
        if peer != self.config.protocol_version {
            warn!(
                "version mismatch: peer {peer}, local {}",
                self.config.protocol_version
            );
            return Err(SessionEnd::VersionMismatch);
        }
        Ok(())
    }

    fn unexpected(&self, packet_type: PacketType) -> SessionEnd {
        SessionEnd::ProtocolError(format!(
            "unexpected {:?} in {:?}",
            packet_type, self.state
        ))
    }

    fn enter(&mut self, state: SessionState) {
        debug!("session {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}
