//! # DTE Listener
//!
//! Binds the configured TCP port and accepts exactly one concurrent DTE
//! session, as MIL-STD-188-110D Appendix A permits only one DTE at a time.
//! While a session is active, further connections are accepted and closed
//! immediately; when the session ends the slot reopens.

use crate::constants::{DTE_DEFAULT_PORT, DTE_MAX_SOCKET_LATENCY, DTE_PROTOCOL_VERSION};
use crate::dte::session::Session;
use crate::error::ModemError;
use crate::modem::RigHandle;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// DTE listener configuration.
#[derive(Debug, Clone)]
pub struct DteServerConfig {
    /// TCP port to listen on
    pub port: u16,
    /// Bind address
    pub bind_addr: std::net::IpAddr,
    /// Protocol version announced in CONNECT
    pub protocol_version: u8,
    /// Upper bound on the CONNECTION_PROBE round trip
    pub max_socket_latency: Duration,
    /// Tuner-adjust window advertised in INITIAL_SETUP (ms)
    pub tlc_ms: u16,
}

impl Default for DteServerConfig {
    fn default() -> Self {
        Self {
            port: DTE_DEFAULT_PORT,
            bind_addr: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            protocol_version: DTE_PROTOCOL_VERSION,
            max_socket_latency: DTE_MAX_SOCKET_LATENCY,
            tlc_ms: 0,
        }
    }
}

/// The single-slot DTE TCP listener.
pub struct DteServer {
    listener: TcpListener,
    config: DteServerConfig,
    rig: RigHandle,
}

impl DteServer {
    /// Bind the configured port.
    pub async fn bind(config: DteServerConfig, rig: RigHandle) -> Result<Self, ModemError> {
        let addr = SocketAddr::new(config.bind_addr, config.port);
        let listener = TcpListener::bind(addr).await?;
        info!("DTE listener bound on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config,
            rig,
        })
    }

    /// The actual bound address (useful when port 0 was requested).
    pub fn local_addr(&self) -> Result<SocketAddr, ModemError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept sessions forever. One session runs at a time; extra
    /// connections are closed on arrival.
    pub async fn run(self) -> Result<(), ModemError> {
        let mut active: Option<JoinHandle<()>> = None;

        loop {
            // Reap a finished session so its slot reopens
            if let Some(handle) = &mut active {
                if handle.is_finished() {
                    active = None;
                }
            }

            match &mut active {
                None => {
                    let (stream, peer) = self.listener.accept().await?;
                    info!("DTE connected from {peer}");
                    active = Some(self.spawn_session(stream));
                }
                Some(handle) => {
                    let released = tokio::select! {
                        accepted = self.listener.accept() => {
                            let (stream, peer) = accepted?;
                            warn!("refusing second DTE from {peer}: session active");
                            drop(stream);
                            false
                        }
                        _ = handle => true,
                    };
                    if released {
                        debug!("session slot released");
                        active = None;
                    }
                }
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream) -> JoinHandle<()> {
        let session = Session::new(stream, self.rig.clone(), self.config.clone());
        tokio::spawn(async move {
            let end = session.run().await;
            debug!("session finished: {end:?}");
        })
    }
}
