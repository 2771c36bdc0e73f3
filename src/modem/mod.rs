//! # Modem Core
//!
//! The rig: the modem's transmit/receive state, the bounded TX queue, and
//! the event stream consumed by DTE sessions. The rig is an owned state
//! object driven by a single task; everything else talks to it through a
//! cloneable [`RigHandle`] carrying typed commands over a channel.
//!
//! The in-crate transport is the loopback channel, which runs every queued
//! PDU through the full WALE pipeline (assemble → detect → decode) and
//! redelivers it as receive events; a production deployment replaces it with
//! the external DSP front-end.

pub mod loopback;

use crate::constants::{TX_QUEUE_MAX_BYTES, TX_QUEUE_MAX_PDUS};
use crate::error::ModemError;
use crate::wale::Waveform;
use loopback::LoopbackChannel;
use log::{debug, info, warn};
use std::collections::VecDeque;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Transmit path state, as carried in TX_STATUS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxState {
    Flushed = 0,
    ArmedPortNotReady = 1,
    Armed = 2,
    Started = 3,
    DrainingOk = 4,
    DrainingForced = 5,
}

impl TryFrom<u8> for TxState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(TxState::Flushed),
            1 => Ok(TxState::ArmedPortNotReady),
            2 => Ok(TxState::Armed),
            3 => Ok(TxState::Started),
            4 => Ok(TxState::DrainingOk),
            5 => Ok(TxState::DrainingForced),
            other => Err(other),
        }
    }
}

/// Record ordering flag carried with TX_DATA / RX_DATA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderFlag {
    First = 0,
    Continuation = 1,
    Last = 2,
    FirstAndLast = 3,
}

impl TryFrom<u8> for OrderFlag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(OrderFlag::First),
            1 => Ok(OrderFlag::Continuation),
            2 => Ok(OrderFlag::Last),
            3 => Ok(OrderFlag::FirstAndLast),
            other => Err(other),
        }
    }
}

/// TX state with queue counters, as reported in TX_STATUS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatusSnapshot {
    pub state: TxState,
    pub queued_bytes: u32,
    pub free_bytes: u32,
    pub fifo_space: u32,
}

/// RX state sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxStatusSnapshot {
    pub carrier: bool,
    pub data_rate: u32,
    pub blocking_factor: u16,
}

/// Events emitted by the rig and fanned out to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    TxStatus(TxStatusSnapshot),
    TxUnderrun,
    RxCarrier {
        detected: bool,
        data_rate: u32,
        blocking_factor: u16,
    },
    RxData {
        payload: Vec<u8>,
        order: OrderFlag,
    },
}

/// Outcome of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Transmission began immediately
    Started,
    /// Transmission will begin asynchronously; watch the event stream
    Starting,
}

/// Modem configuration
#[derive(Debug, Clone)]
pub struct ModemConfig {
    /// Waveform used for transmit framing
    pub waveform: Waveform,
    /// Tuner-adjust window radiated ahead of each frame (ms)
    pub tlc_ms: u16,
    /// TX queue PDU bound
    pub queue_max_pdus: usize,
    /// TX queue byte bound
    pub queue_max_bytes: usize,
    /// Run transmissions through the WALE loopback channel
    pub loopback: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            waveform: Waveform::Deep,
            tlc_ms: 0,
            queue_max_pdus: TX_QUEUE_MAX_PDUS,
            queue_max_bytes: TX_QUEUE_MAX_BYTES,
            loopback: true,
        }
    }
}

impl ModemConfig {
    /// Nominal user data rate of the configured waveform (bps)
    pub fn data_rate(&self) -> u32 {
        match self.waveform {
            Waveform::Deep => 150,
            Waveform::Fast => 2400,
        }
    }
}

enum RigCommand {
    ArmTx(oneshot::Sender<Result<TxState, ModemError>>),
    StartTx(oneshot::Sender<Result<(StartOutcome, TxStatusSnapshot), ModemError>>),
    TxData(Vec<u8>, OrderFlag, oneshot::Sender<Result<(), ModemError>>),
    AbortTx(oneshot::Sender<()>),
    AbortRx(oneshot::Sender<()>),
    TxStatus(oneshot::Sender<TxStatusSnapshot>),
    RxStatus(oneshot::Sender<RxStatusSnapshot>),
    ConfigureTx(Waveform, oneshot::Sender<()>),
    TxSetup(oneshot::Sender<(Waveform, u32)>),
}

/// Cloneable handle to the rig task.
#[derive(Clone)]
pub struct RigHandle {
    commands: mpsc::Sender<RigCommand>,
    events: broadcast::Sender<ModemEvent>,
}

impl RigHandle {
    /// Arm the transmit path; returns the resulting TX state.
    pub async fn arm_tx(&self) -> Result<TxState, ModemError> {
        self.request(RigCommand::ArmTx).await?
    }

    /// Start transmitting the queued PDUs.
    ///
    /// Returns the outcome together with the TX status sampled at start
    /// time, before any draining progresses.
    pub async fn start_tx(&self) -> Result<(StartOutcome, TxStatusSnapshot), ModemError> {
        self.request(RigCommand::StartTx).await?
    }

    /// Queue a payload for transmission.
    pub async fn tx_data(&self, data: Vec<u8>, order: OrderFlag) -> Result<(), ModemError> {
        let (tx, rx) = oneshot::channel();
        self.send(RigCommand::TxData(data, order, tx)).await?;
        rx.await.map_err(|_| ModemError::ModemUnavailable)?
    }

    /// Abort the transmit path, discarding queued data.
    pub async fn abort_tx(&self) -> Result<(), ModemError> {
        self.request(RigCommand::AbortTx).await
    }

    /// Abort the receive path.
    pub async fn abort_rx(&self) -> Result<(), ModemError> {
        self.request(RigCommand::AbortRx).await
    }

    /// Sample the TX state and queue counters.
    pub async fn tx_status(&self) -> Result<TxStatusSnapshot, ModemError> {
        self.request(RigCommand::TxStatus).await
    }

    /// Sample the RX state.
    pub async fn rx_status(&self) -> Result<RxStatusSnapshot, ModemError> {
        self.request(RigCommand::RxStatus).await
    }

    /// Reconfigure the transmit waveform.
    pub async fn configure_tx(&self, waveform: Waveform) -> Result<(), ModemError> {
        let (tx, rx) = oneshot::channel();
        self.send(RigCommand::ConfigureTx(waveform, tx)).await?;
        rx.await.map_err(|_| ModemError::ModemUnavailable)
    }

    /// Current transmit waveform and nominal data rate.
    pub async fn tx_setup(&self) -> Result<(Waveform, u32), ModemError> {
        self.request(RigCommand::TxSetup).await
    }

    /// Subscribe to the modem event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: RigCommand) -> Result<(), ModemError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ModemError::ModemUnavailable)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RigCommand,
    ) -> Result<T, ModemError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| ModemError::ModemUnavailable)
    }
}

/// The modem state machine task.
pub struct Rig {
    config: ModemConfig,
    state: TxState,
    queue: VecDeque<(Vec<u8>, OrderFlag)>,
    queued_bytes: usize,
    events: broadcast::Sender<ModemEvent>,
    loopback: LoopbackChannel,
}

impl Rig {
    /// Spawn the rig task and return its handle.
    pub fn spawn(config: ModemConfig) -> RigHandle {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(64);
        let (event_tx, _) = broadcast::channel(256);

        let handle = RigHandle {
            commands: cmd_tx,
            events: event_tx.clone(),
        };

        let mut rig = Rig {
            loopback: LoopbackChannel::new(&config),
            config,
            state: TxState::Flushed,
            queue: VecDeque::new(),
            queued_bytes: 0,
            events: event_tx,
        };

        tokio::spawn(async move {
            info!("rig task started ({:?})", rig.config.waveform);
            while let Some(command) = cmd_rx.recv().await {
                rig.handle(command);
            }
            debug!("rig task stopped");
        });

        handle
    }

    fn handle(&mut self, command: RigCommand) {
        match command {
            RigCommand::ArmTx(reply) => {
                if self.state == TxState::Flushed {
                    self.state = TxState::Armed;
                    debug!("TX armed");
                }
                let _ = reply.send(Ok(self.state));
            }
            RigCommand::StartTx(reply) => match self.begin_tx() {
                Ok(snapshot) => {
                    let _ = reply.send(Ok((StartOutcome::Started, snapshot)));
                    if snapshot.queued_bytes > 0 {
                        self.drain();
                    }
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            RigCommand::TxData(data, order, reply) => {
                let _ = reply.send(self.enqueue(data, order));
            }
            RigCommand::AbortTx(reply) => {
                self.queue.clear();
                self.queued_bytes = 0;
                self.state = TxState::Flushed;
                debug!("TX aborted");
                let _ = reply.send(());
            }
            RigCommand::AbortRx(reply) => {
                debug!("RX aborted");
                let _ = reply.send(());
            }
            RigCommand::TxStatus(reply) => {
                let _ = reply.send(self.snapshot());
            }
            RigCommand::RxStatus(reply) => {
                let _ = reply.send(RxStatusSnapshot {
                    carrier: false,
                    data_rate: self.config.data_rate(),
                    blocking_factor: 0,
                });
            }
            RigCommand::TxSetup(reply) => {
                let _ = reply.send((self.config.waveform, self.config.data_rate()));
            }
            RigCommand::ConfigureTx(waveform, reply) => {
                self.config.waveform = waveform;
                self.loopback = LoopbackChannel::new(&self.config);
                debug!("TX reconfigured to {waveform:?}");
                let _ = reply.send(());
            }
        }
    }

    fn enqueue(&mut self, data: Vec<u8>, order: OrderFlag) -> Result<(), ModemError> {
        if self.state == TxState::Flushed {
            return Err(ModemError::NotArmed);
        }
        if data.len() > loopback::MAX_TX_PAYLOAD {
            return Err(ModemError::InvalidPduLength(data.len()));
        }
        if self.queue.len() >= self.config.queue_max_pdus
            || self.queued_bytes + data.len() > self.config.queue_max_bytes
        {
            return Err(ModemError::QueueFull);
        }
        self.queued_bytes += data.len();
        self.queue.push_back((data, order));
        Ok(())
    }

    fn begin_tx(&mut self) -> Result<TxStatusSnapshot, ModemError> {
        if self.state != TxState::Armed {
            return Err(ModemError::NotArmed);
        }

        self.state = TxState::Started;
        let snapshot = self.snapshot();

        if self.queue.is_empty() {
            warn!("TX started with an empty queue");
            self.emit(ModemEvent::TxUnderrun);
            self.state = TxState::Flushed;
        }
        Ok(snapshot)
    }

    /// Transmit every queued PDU through the configured transport.
    fn drain(&mut self) {
        self.state = TxState::DrainingOk;

        if self.config.loopback {
            self.emit(ModemEvent::RxCarrier {
                detected: true,
                data_rate: self.config.data_rate(),
                blocking_factor: 1,
            });
        }

        while let Some((payload, order)) = self.queue.pop_front() {
            self.queued_bytes -= payload.len();
            if !self.config.loopback {
                continue;
            }
            match self.loopback.transmit(&payload, order) {
                Ok((rx_payload, rx_order)) => {
                    self.emit(ModemEvent::RxData {
                        payload: rx_payload,
                        order: rx_order,
                    });
                }
                Err(e) => {
                    warn!("loopback transmission failed: {e}");
                }
            }
        }

        if self.config.loopback {
            self.emit(ModemEvent::RxCarrier {
                detected: false,
                data_rate: 0,
                blocking_factor: 0,
            });
        }

        self.state = TxState::Flushed;
        let snapshot = self.snapshot();
        self.emit(ModemEvent::TxStatus(snapshot));
        debug!("drain complete, detector stats: {:?}", self.loopback.stats());
    }

    fn snapshot(&self) -> TxStatusSnapshot {
        TxStatusSnapshot {
            state: self.state,
            queued_bytes: self.queued_bytes as u32,
            free_bytes: (self.config.queue_max_bytes - self.queued_bytes) as u32,
            fifo_space: (self.config.queue_max_pdus - self.queue.len()) as u32,
        }
    }

    fn emit(&self, event: ModemEvent) {
        // Send fails only when no subscriber is listening, which is fine
        let _ = self.events.send(event);
    }
}
