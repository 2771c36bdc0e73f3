//! # DTE Interface (MIL-STD-188-110D Appendix A)
//!
//! A single-client TCP control channel between the modem and its Data
//! Terminal Equipment. Packets are CRC-16-CCITT protected, the session
//! negotiates a versioned five-state handshake (CONNECT → CONNECT_ACK →
//! PROBE → setup → operational), and the operational state translates DTE
//! commands into modem operations and modem events into framed packets.

pub mod command;
pub mod packet;
pub mod server;
pub mod session;

pub use command::{DteCommand, NackReason};
pub use packet::{DtePacket, PacketDecoder, PacketError, PacketType};
pub use server::{DteServer, DteServerConfig};
pub use session::{Session, SessionEnd};
