//! # minutemodem - HF Radio Waveform and DTE Interface Core
//!
//! The minutemodem crate implements the waveform and control core of an HF
//! data modem: the WALE waveforms of MIL-STD-188-141D Appendix G (Deep and
//! Fast variants) and the DTE socket protocol of MIL-STD-188-110D Appendix A,
//! together with an EPaxos-style replication engine (eParl) used as the
//! distributed backbone of the surrounding simulation fabric.
//!
//! ## Features
//!
//! - Assemble Deep WALE (Walsh-16, ~150 bps) and Fast WALE (BPSK, ~2400 bps)
//!   frames: TLC tuner-adjust blocks, capture probes, Walsh preambles,
//!   convolutional coding, interleaving and data scrambling
//! - Detect and decode received symbol streams back to payload bytes
//! - Serve a single DTE over TCP with the five-state Appendix A handshake,
//!   CRC-16-CCITT packet framing, keepalive and watchdog supervision
//! - Translate DTE commands into modem operations and modem events back into
//!   framed packets
//! - Order and execute replicated commands with fast/slow quorum paths and
//!   explicit instance recovery
//!
//! ## Usage
//!
//! ```rust,no_run
//! use minutemodem::{init_logger, start_modem, serve_dte, DteServerConfig, ModemConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), minutemodem::ModemError> {
//!     init_logger();
//!     let rig = start_modem(ModemConfig::default());
//!     serve_dte(DteServerConfig::default(), rig).await
//! }
//! ```

pub mod constants;
pub mod dte;
pub mod eparl;
pub mod error;
pub mod logging;
pub mod modem;
pub mod util;
pub mod wale;

pub use crate::constants::DTE_PROTOCOL_VERSION;
pub use crate::error::ModemError;
pub use crate::logging::{init_logger, log_info};

// Waveform codec
pub use wale::detect::{decode_data, decode_pdu, detect_waveform, Detection};
pub use wale::frame::{assemble_frame, FrameConfig, Waveform};

// DTE interface
pub use dte::packet::{DtePacket, PacketType};
pub use dte::server::{DteServer, DteServerConfig};

// Modem core
pub use modem::{
    ModemConfig, ModemEvent, OrderFlag, Rig, RigHandle, RxStatusSnapshot, TxState,
    TxStatusSnapshot,
};

// Consensus engine
pub use eparl::{EparlConfig, KvCommand, KvState, ReplicaId};

/// Start the modem core task and return a handle to it.
///
/// The handle is cheap to clone; every DTE session and test harness talks to
/// the same rig through it.
pub fn start_modem(config: ModemConfig) -> RigHandle {
    Rig::spawn(config)
}

/// Bind the DTE listener and serve sessions until the listener fails.
///
/// Exactly one DTE session is active at a time; additional connections are
/// closed immediately as required by MIL-STD-188-110D Appendix A.
pub async fn serve_dte(config: DteServerConfig, rig: RigHandle) -> Result<(), ModemError> {
    DteServer::bind(config, rig).await?.run().await
}
