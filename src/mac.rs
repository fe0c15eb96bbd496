//! MAC layer: a single-task state machine that builds and parses frames,
//! runs the retry/ACK logic, scanning, authentication, association and
//! RTS/CTS gating, driven by PHY primitives and chip commands.
//!
//! All MAC state lives inside the actor task; the outside world sees it only
//! through [`LinkStatus`] snapshots on a watch channel and steers it through
//! [`MacCommand`]s. The MAC and the PHY never hold references to each other.

pub mod frame;
pub mod wep;

use std::collections::HashMap;

use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::error::LinkError;
use crate::message::{self, Primitive, TxVector};
use crate::parameters::{Parameters, WEP_KEYS};
use crate::{MacAddr, PhyRate, Role};

use frame::{Direction, FrameControl, FrameKind, FrameType};

/// Pre-RSN authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAlgorithm {
    OpenSystem,
    SharedKey,
}

impl AuthAlgorithm {
    const fn wire_bytes(&self) -> [u8; 2] {
        match *self {
            AuthAlgorithm::OpenSystem => [0x00, 0x00],
            AuthAlgorithm::SharedKey => [0x00, 0x01],
        }
    }
}

/// Acknowledgement state of the frame most recently sent with the
/// wait-for-ACK flag. Transitions only Waiting → Acked on a received ACK,
/// or Waiting → NoAckRequired when the retry limit gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckState {
    NoAckRequired,
    Waiting,
    Acked,
}

/// Snapshot of the externally observable MAC state.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub address: MacAddr,
    pub role: Role,
    pub phy_rate: PhyRate,
    /// STA side: the AP currently being courted.
    pub probed_ap: Option<MacAddr>,
    pub probed_ap_blacklist: Vec<MacAddr>,
    pub authenticated_ap: Option<MacAddr>,
    pub associated_ap: Option<MacAddr>,
    /// AP side.
    pub authenticated_sta: Vec<MacAddr>,
    pub associated_sta: Vec<MacAddr>,
    /// Which algorithm authenticated each peer.
    pub encryption_type: HashMap<MacAddr, AuthAlgorithm>,
    /// Payload of the last accepted data frame.
    pub last_data: Option<Vec<u8>>,
    /// An RTS went out and its CTS has not yet released the data frame.
    pub rts_cts_active: bool,
}

impl LinkStatus {
    fn new(address: MacAddr, role: Role, phy_rate: PhyRate) -> Self {
        LinkStatus {
            address,
            role,
            phy_rate,
            probed_ap: None,
            probed_ap_blacklist: Vec::new(),
            authenticated_ap: None,
            associated_ap: None,
            authenticated_sta: Vec::new(),
            associated_sta: Vec::new(),
            encryption_type: HashMap::new(),
            last_data: None,
            rts_cts_active: false,
        }
    }
}

/// Construction-time MAC configuration.
#[derive(Debug, Clone)]
pub struct MacConfig {
    pub role: Role,
    pub identifier: String,
    pub parameters: Parameters,
    pub authentication_algorithm: AuthAlgorithm,
    pub wep_keys: [[u8; wep::KEY_LEN]; 4],
    pub phy_rate: PhyRate,
    /// Freeze `phy_rate`; rate selection is skipped entirely.
    pub fixed_rate: bool,
    /// Use RTS/CTS for every data frame, not only above the threshold.
    pub always_rts_cts: bool,
}

impl MacConfig {
    pub fn new(role: Role, identifier: impl Into<String>) -> Self {
        MacConfig {
            role,
            identifier: identifier.into(),
            parameters: Parameters::default(),
            authentication_algorithm: AuthAlgorithm::OpenSystem,
            wep_keys: WEP_KEYS,
            phy_rate: PhyRate::R6,
            fixed_rate: false,
            always_rts_cts: false,
        }
    }
}

/// Requests the chip (or a test) can make of a running MAC.
#[derive(Debug)]
pub enum MacCommand {
    /// Queue a data frame toward the associated peer.
    SendData { payload: Vec<u8> },
    /// Queue a data frame toward an explicit destination.
    SendDataTo {
        destination: MacAddr,
        payload: Vec<u8>,
    },
    /// Start the role-specific advertisement task (beaconing or scanning).
    Activate,
    /// Pre-seed a mutual authentication/association with `peer`, bypassing
    /// the over-the-air exchange.
    InstallAssociation {
        peer: MacAddr,
        algorithm: AuthAlgorithm,
    },
    /// Flush the TX queue and stop.
    Shutdown,
}

enum Input {
    Primitive(Primitive),
    Command(MacCommand),
    PumpTick,
    AckPoll { token: u64 },
    BeaconDue,
    ProbeDue,
    LinkClosed,
}

/// One queued transmission request; payload kept separate.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameRequest {
    kind: FrameKind,
    destination: MacAddr,
    wait_for_ack: bool,
    direction: Option<Direction>,
    retry: bool,
}

type QueueEntry = (FrameRequest, Vec<u8>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cast {
    Broadcast,
    Unicast,
}

/// Handle to a running MAC task.
pub struct Mac {
    address: MacAddr,
    input_tx: mpsc::UnboundedSender<Input>,
    status_rx: watch::Receiver<LinkStatus>,
    task: JoinHandle<()>,
}

impl Mac {
    /// Connect to the chip's MPIF, identify as the MAC endpoint, generate
    /// an address and start the state machine.
    pub async fn spawn(config: MacConfig, mpif_addr: std::net::SocketAddr) -> Result<Mac, LinkError> {
        let mut wire = message::wire(TcpStream::connect(mpif_addr).await?);
        message::send(&mut wire, &Primitive::MacIdentify).await?;
        let (sink, stream) = wire.split();

        let address = MacAddr::generate();
        info!(identifier = %config.identifier, %address, role = ?config.role, "MAC up");

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::new(
            address,
            config.role,
            config.phy_rate,
        ));

        spawn_reader(stream, input_tx.clone());
        spawn_pump(config.parameters.tx_pump_poll, input_tx.clone());

        let task = tokio::spawn(
            MacTask::new(config, address, sink, input_tx.clone(), status_tx).run(input_rx),
        );

        Ok(Mac {
            address,
            input_tx,
            status_rx,
            task,
        })
    }

    pub fn address(&self) -> MacAddr {
        self.address
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    pub fn command(&self, command: MacCommand) {
        let _ = self.input_tx.send(Input::Command(command));
    }
}

impl Drop for Mac {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn spawn_reader(
    mut stream: SplitStream<message::WireStream>,
    input_tx: mpsc::UnboundedSender<Input>,
) {
    tokio::spawn(async move {
        loop {
            match message::recv(&mut stream).await {
                Ok(Some(primitive)) => {
                    if input_tx.send(Input::Primitive(primitive)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = input_tx.send(Input::LinkClosed);
                    break;
                }
                Err(error) => {
                    warn!(%error, "MAC link receive failed");
                    let _ = input_tx.send(Input::LinkClosed);
                    break;
                }
            }
        }
    });
}

fn spawn_pump(period: std::time::Duration, input_tx: mpsc::UnboundedSender<Input>) {
    tokio::spawn(async move {
        loop {
            sleep(period).await;
            if input_tx.send(Input::PumpTick).is_err() {
                break;
            }
        }
    });
}

struct AckWait {
    request: FrameRequest,
    payload: Vec<u8>,
    attempts: u32,
}

struct MacTask {
    config: MacConfig,
    address: MacAddr,
    sink: SplitSink<message::WireStream, bytes::Bytes>,
    input_tx: mpsc::UnboundedSender<Input>,
    status_tx: watch::Sender<LinkStatus>,

    phy_rate: PhyRate,
    last_phy_rate: PhyRate,

    tx_queue: Vec<QueueEntry>,
    /// PSDU bits of the transmission currently being clocked into the PHY.
    tx_bits: Option<Vec<u8>>,
    tx_pos: usize,
    contention_deadline: Option<Instant>,

    ack_state: AckState,
    ack_wait: Option<AckWait>,
    ack_token: u64,

    rx_bits: Vec<u8>,

    probed_ap: Option<MacAddr>,
    probed_ap_blacklist: Vec<MacAddr>,
    authenticated_ap: Option<MacAddr>,
    associated_ap: Option<MacAddr>,
    authentication_attempts: u32,

    authenticated_sta: Vec<MacAddr>,
    associated_sta: Vec<MacAddr>,
    challenge_text: HashMap<MacAddr, Vec<u8>>,

    encryption_type: HashMap<MacAddr, AuthAlgorithm>,

    /// Data frame held back until the peer answers our RTS with a CTS.
    pending_rts_data: Option<QueueEntry>,
    rts_cts_active: bool,

    last_data: Option<Vec<u8>>,
    activated: bool,
    is_shutdown: bool,
    role_tasks: Vec<JoinHandle<()>>,
}

impl MacTask {
    fn new(
        config: MacConfig,
        address: MacAddr,
        sink: SplitSink<message::WireStream, bytes::Bytes>,
        input_tx: mpsc::UnboundedSender<Input>,
        status_tx: watch::Sender<LinkStatus>,
    ) -> MacTask {
        MacTask {
            phy_rate: config.phy_rate,
            last_phy_rate: config.phy_rate,
            config,
            address,
            sink,
            input_tx,
            status_tx,
            tx_queue: Vec::new(),
            tx_bits: None,
            tx_pos: 0,
            contention_deadline: None,
            ack_state: AckState::NoAckRequired,
            ack_wait: None,
            ack_token: 0,
            rx_bits: Vec::new(),
            probed_ap: None,
            probed_ap_blacklist: Vec::new(),
            authenticated_ap: None,
            associated_ap: None,
            authentication_attempts: 0,
            authenticated_sta: Vec::new(),
            associated_sta: Vec::new(),
            challenge_text: HashMap::new(),
            encryption_type: HashMap::new(),
            pending_rts_data: None,
            rts_cts_active: false,
            last_data: None,
            activated: false,
            is_shutdown: false,
            role_tasks: Vec::new(),
        }
    }

    async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = input_rx.recv().await {
            let keep_going = self.handle(input).await;
            self.publish();
            if !keep_going {
                break;
            }
        }
        for task in &self.role_tasks {
            task.abort();
        }
        debug!(identifier = %self.config.identifier, "MAC stopped");
    }

    fn publish(&self) {
        self.status_tx.send_replace(LinkStatus {
            address: self.address,
            role: self.config.role,
            phy_rate: self.phy_rate,
            probed_ap: self.probed_ap,
            probed_ap_blacklist: self.probed_ap_blacklist.clone(),
            authenticated_ap: self.authenticated_ap,
            associated_ap: self.associated_ap,
            authenticated_sta: self.authenticated_sta.clone(),
            associated_sta: self.associated_sta.clone(),
            encryption_type: self.encryption_type.clone(),
            last_data: self.last_data.clone(),
            rts_cts_active: self.rts_cts_active,
        });
    }

    async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Primitive(primitive) => self.on_primitive(primitive).await,
            Input::Command(command) => return self.on_command(command).await,
            Input::PumpTick => self.on_pump_tick().await,
            Input::AckPoll { token } => self.on_ack_poll(token).await,
            Input::BeaconDue => {
                if !self.is_shutdown {
                    self.enqueue(FrameKind::Beacon, MacAddr::BROADCAST, false, None, Vec::new());
                }
            }
            Input::ProbeDue => {
                if !self.is_shutdown && self.probed_ap.is_none() {
                    self.enqueue(
                        FrameKind::ProbeRequest,
                        MacAddr::BROADCAST,
                        false,
                        None,
                        Vec::new(),
                    );
                }
            }
            Input::LinkClosed => {
                if !self.is_shutdown {
                    warn!(identifier = %self.config.identifier, "MPIF link closed");
                }
                return false;
            }
        }
        true
    }

    async fn on_command(&mut self, command: MacCommand) -> bool {
        match command {
            MacCommand::SendData { payload } => {
                let destination = match self.config.role {
                    Role::Sta => self.associated_ap,
                    Role::Ap => self.associated_sta.first().copied(),
                };
                match destination {
                    Some(destination) => self.queue_data_frame(destination, payload),
                    None => error!(
                        identifier = %self.config.identifier,
                        "data frame requested with no associated peer"
                    ),
                }
            }
            MacCommand::SendDataTo {
                destination,
                payload,
            } => self.queue_data_frame(destination, payload),
            MacCommand::Activate => self.activate(),
            MacCommand::InstallAssociation { peer, algorithm } => {
                match self.config.role {
                    Role::Ap => {
                        self.authenticated_sta.push(peer);
                        self.associated_sta.push(peer);
                    }
                    Role::Sta => {
                        self.probed_ap = Some(peer);
                        self.authenticated_ap = Some(peer);
                        self.associated_ap = Some(peer);
                    }
                }
                self.encryption_type.insert(peer, algorithm);
            }
            MacCommand::Shutdown => {
                info!(identifier = %self.config.identifier, "MAC shutdown, flushing TX queue");
                self.is_shutdown = true;
                self.tx_queue.clear();
                return false;
            }
        }
        true
    }

    /// Start beaconing (AP) or scanning (STA).
    fn activate(&mut self) {
        if self.activated {
            return;
        }
        self.activated = true;
        let input_tx = self.input_tx.clone();
        let parameters = self.config.parameters;
        let task = match self.config.role {
            Role::Ap => tokio::spawn(async move {
                loop {
                    if input_tx.send(Input::BeaconDue).is_err() {
                        break;
                    }
                    sleep(parameters.beacon_broadcast_interval).await;
                }
            }),
            Role::Sta => tokio::spawn(async move {
                // Passive phase: just listen for beacons.
                sleep(parameters.passive_scanning_time).await;
                // Active phase: probe whenever no AP has answered yet.
                loop {
                    if input_tx.send(Input::ProbeDue).is_err() {
                        break;
                    }
                    sleep(parameters.probe_request_broadcast_interval).await;
                }
            }),
        };
        self.role_tasks.push(task);
    }

    fn queue_data_frame(&mut self, destination: MacAddr, payload: Vec<u8>) {
        let direction = match self.config.role {
            Role::Sta => Direction::Uplink,
            Role::Ap => Direction::Downlink,
        };
        let request = FrameRequest {
            kind: FrameKind::Data,
            destination,
            wait_for_ack: true,
            direction: Some(direction),
            retry: false,
        };
        let gate = self.config.always_rts_cts
            || payload.len() >= self.config.parameters.rts_cts_threshold;
        if gate {
            debug!(identifier = %self.config.identifier, "gating data frame behind RTS/CTS");
            self.pending_rts_data = Some((request, payload));
            self.rts_cts_active = true;
            self.enqueue(FrameKind::Rts, destination, false, None, Vec::new());
        } else {
            self.tx_queue.push((request, payload));
        }
    }

    fn enqueue(
        &mut self,
        kind: FrameKind,
        destination: MacAddr,
        wait_for_ack: bool,
        direction: Option<Direction>,
        payload: Vec<u8>,
    ) {
        self.tx_queue.push((
            FrameRequest {
                kind,
                destination,
                wait_for_ack,
                direction,
                retry: false,
            },
            payload,
        ));
    }

    fn send_acknowledgement(&mut self, destination: MacAddr) {
        self.enqueue(FrameKind::Ack, destination, false, None, Vec::new());
    }

    // TX queue pump: pops the head frame once the medium gate allows it.
    async fn on_pump_tick(&mut self) {
        if self.is_shutdown {
            self.tx_queue.clear();
            return;
        }
        if self.tx_bits.is_some() || self.ack_state != AckState::NoAckRequired {
            return;
        }
        let Some((head, _)) = self.tx_queue.first() else {
            self.contention_deadline = None;
            return;
        };

        // Response control frames go out immediately; everything else waits
        // a fixed contention interval first.
        let immediate = matches!(head.kind, FrameKind::Ack | FrameKind::Cts);
        if !immediate {
            match self.contention_deadline {
                None => {
                    self.contention_deadline =
                        Some(Instant::now() + self.config.parameters.contention_wait);
                    return;
                }
                Some(deadline) if Instant::now() < deadline => return,
                Some(_) => self.contention_deadline = None,
            }
        }

        let (request, payload) = self.tx_queue.remove(0);
        self.start_transmission(request, payload, true).await;
    }

    /// Build the PSDU and start clocking it into the PHY. `fresh` is false
    /// for retransmissions restarted by the ACK waiter.
    async fn start_transmission(&mut self, request: FrameRequest, payload: Vec<u8>, fresh: bool) {
        if !self.config.fixed_rate {
            self.rate_selection(&request);
        }
        debug!(
            identifier = %self.config.identifier,
            kind = ?request.kind,
            destination = %request.destination,
            rate = ?self.phy_rate,
            retry = request.retry,
            octets = payload.len(),
            "transmission chain start"
        );

        let control = FrameControl {
            kind: request.kind,
            direction: request.direction,
            retry: request.retry,
        };
        let header = frame::build_header(control, request.destination, self.address);
        let bits = frame::build_psdu_bits(&header, &payload);
        let length = bits.len() / 8;

        self.tx_pos = 0;
        self.tx_bits = Some(bits);
        self.send_primitive(&Primitive::TxStartRequest(TxVector {
            rate: self.phy_rate,
            length,
        }))
        .await;

        if fresh && request.wait_for_ack {
            self.ack_state = AckState::Waiting;
            self.ack_token += 1;
            self.ack_wait = Some(AckWait {
                request,
                payload,
                attempts: 0,
            });
            self.schedule_ack_poll();
        }
    }

    /// Advertisement and response control frames pin the most robust rate;
    /// data/management frames walk the ladder, down on a retry and up on a
    /// fresh frame.
    fn rate_selection(&mut self, request: &FrameRequest) {
        match request.kind {
            FrameKind::Beacon
            | FrameKind::ProbeRequest
            | FrameKind::Ack
            | FrameKind::Rts
            | FrameKind::Cts => {
                self.phy_rate = PhyRate::R6;
                return;
            }
            _ => {}
        }
        let selected = if request.retry {
            self.last_phy_rate.step_down()
        } else {
            self.last_phy_rate.step_up()
        };
        self.phy_rate = selected;
        self.last_phy_rate = selected;
    }

    fn schedule_ack_poll(&self) {
        let input_tx = self.input_tx.clone();
        let token = self.ack_token;
        let wait = self.config.parameters.ack_response_wait;
        tokio::spawn(async move {
            sleep(wait).await;
            let _ = input_tx.send(Input::AckPoll { token });
        });
    }

    async fn on_ack_poll(&mut self, token: u64) {
        if token != self.ack_token {
            return;
        }
        let Some(mut wait) = self.ack_wait.take() else {
            return;
        };

        if self.ack_state == AckState::Acked {
            self.ack_state = AckState::NoAckRequired;
            return;
        }

        wait.attempts += 1;
        if wait.attempts >= self.config.parameters.short_retry_limit {
            error!(
                identifier = %self.config.identifier,
                kind = ?wait.request.kind,
                "no ACK after {} attempts, dropping frame",
                wait.attempts
            );
            self.ack_state = AckState::NoAckRequired;
            return;
        }

        warn!(
            identifier = %self.config.identifier,
            kind = ?wait.request.kind,
            attempt = wait.attempts,
            "no ACK, retransmitting"
        );
        let mut request = wait.request.clone();
        request.retry = true;
        request.wait_for_ack = false;
        let payload = wait.payload.clone();
        self.ack_wait = Some(wait);
        if self.tx_bits.is_none() {
            self.start_transmission(request, payload, false).await;
        }
        self.schedule_ack_poll();
    }

    async fn on_primitive(&mut self, primitive: Primitive) {
        match primitive {
            Primitive::TxStartConfirm | Primitive::DataConfirm => self.clock_out_octet().await,
            Primitive::TxEndConfirm => {
                debug!(identifier = %self.config.identifier, "transmission complete");
            }
            Primitive::CcaBusy => self.rx_bits.clear(),
            Primitive::DataIndication(bits) => self.rx_bits.extend_from_slice(&bits),
            Primitive::RxEndNoError => self.on_rx_complete().await,
            Primitive::RxEndFormatViolation | Primitive::RxEndScrambleSeedNotFound => {
                debug!(identifier = %self.config.identifier, "undecodable frame discarded");
            }
            Primitive::CcaIdle => {}
            other => debug!(name = other.name(), "ignored primitive"),
        }
    }

    /// Push the next PSDU octet to the PHY, or end the exchange.
    async fn clock_out_octet(&mut self) {
        let Some(bits) = self.tx_bits.as_ref() else {
            return;
        };
        if self.tx_pos >= bits.len() {
            self.tx_bits = None;
            self.send_primitive(&Primitive::TxEndRequest).await;
            return;
        }
        let octet = bits[self.tx_pos..self.tx_pos + 8].to_vec();
        self.tx_pos += 8;
        self.send_primitive(&Primitive::DataRequest(octet)).await;
    }

    async fn on_rx_complete(&mut self) {
        let octets = frame::octets_from_bits(&self.rx_bits);
        if octets.len() < frame::HEADER_LEN + frame::FCS_LEN {
            debug!(identifier = %self.config.identifier, "runt frame discarded");
            return;
        }
        if !frame::verify_fcs(&octets) {
            warn!(identifier = %self.config.identifier, "FCS mismatch, frame discarded");
            return;
        }

        let Some(header) = frame::parse_header(&octets) else {
            debug!(identifier = %self.config.identifier, "unknown frame control, discarded");
            return;
        };
        let cast = if header.destination.is_broadcast() {
            Cast::Broadcast
        } else if header.destination == self.address {
            Cast::Unicast
        } else {
            return;
        };
        let body = octets[frame::HEADER_LEN..octets.len() - frame::FCS_LEN].to_vec();
        let is_retry = header.control.retry;

        debug!(
            identifier = %self.config.identifier,
            kind = ?header.control.kind,
            source = %header.source,
            ?cast,
            is_retry,
            "frame accepted"
        );

        match header.control.kind.frame_type() {
            FrameType::Management => self.on_management(header.control.kind, header.source, cast, &body),
            FrameType::Control => self.on_control(header.control.kind, header.source, cast),
            FrameType::Data => self.on_data(header.source, cast, body),
            FrameType::Extension => {}
        }

        if is_retry {
            // The peer retransmitted a solicitation we may have already
            // answered: keep only the newest copy of identical replies.
            self.dedup_tx_queue();
        }
    }

    fn on_management(&mut self, kind: FrameKind, source: MacAddr, cast: Cast, body: &[u8]) {
        match kind {
            FrameKind::AssociationRequest => {
                if self.config.role == Role::Ap && cast == Cast::Unicast {
                    self.send_acknowledgement(source);
                    if self.authenticated_sta.contains(&source) {
                        if !self.associated_sta.contains(&source) {
                            self.associated_sta.push(source);
                        }
                        info!(identifier = %self.config.identifier, sta = %source, "STA associated");
                        self.enqueue(
                            FrameKind::AssociationResponse,
                            source,
                            true,
                            None,
                            vec![0x00, 0x00],
                        );
                    }
                }
            }
            FrameKind::AssociationResponse => {
                if self.config.role == Role::Sta && cast == Cast::Unicast {
                    self.send_acknowledgement(source);
                    if self.authenticated_ap == Some(source) {
                        self.associated_ap = Some(source);
                        info!(identifier = %self.config.identifier, ap = %source, "association successful");
                    }
                }
            }
            FrameKind::ProbeRequest => {
                if self.config.role == Role::Ap && cast == Cast::Broadcast {
                    self.enqueue(FrameKind::ProbeResponse, source, true, None, Vec::new());
                }
            }
            FrameKind::ProbeResponse => {
                if self.config.role == Role::Sta && cast == Cast::Unicast {
                    self.send_acknowledgement(source);
                    if !self.probed_ap_blacklist.contains(&source) {
                        self.probed_ap = Some(source);
                        self.queue_authentication_request();
                    } else {
                        debug!(identifier = %self.config.identifier, ap = %source, "probe response from blacklisted AP");
                    }
                }
            }
            FrameKind::Beacon => {
                if self.config.role == Role::Sta
                    && self.probed_ap.is_none()
                    && cast == Cast::Broadcast
                {
                    if !self.probed_ap_blacklist.contains(&source) {
                        info!(identifier = %self.config.identifier, ap = %source, "beacon heard, probing AP");
                        self.probed_ap = Some(source);
                        self.queue_authentication_request();
                    } else {
                        debug!(identifier = %self.config.identifier, ap = %source, "beacon from blacklisted AP");
                    }
                }
            }
            FrameKind::Authentication => self.on_authentication(source, cast, body),
            _ => {}
        }
    }

    /// First authentication frame of the handshake, using the configured
    /// algorithm, toward the probed AP.
    fn queue_authentication_request(&mut self) {
        let Some(ap) = self.probed_ap else { return };
        let mut payload = self.config.authentication_algorithm.wire_bytes().to_vec();
        payload.extend_from_slice(&[0x00, 0x01]); // transaction sequence 1
        self.enqueue(FrameKind::Authentication, ap, true, None, payload);
    }

    fn on_authentication(&mut self, source: MacAddr, cast: Cast, body: &[u8]) {
        if cast != Cast::Unicast || body.len() < 4 {
            return;
        }
        let algorithm = [body[0], body[1]];
        let sequence = [body[2], body[3]];

        match algorithm {
            [0x00, 0x00] => match sequence {
                // Open system: request and immediate success response.
                [0x00, 0x01] => {
                    if self.config.role == Role::Ap {
                        info!(identifier = %self.config.identifier, sta = %source, "open-system authentication request");
                        self.send_acknowledgement(source);
                        if !self.authenticated_sta.contains(&source) {
                            self.authenticated_sta.push(source);
                        }
                        self.encryption_type.insert(source, AuthAlgorithm::OpenSystem);
                        let mut payload = vec![0x00, 0x00, 0x00, 0x02];
                        payload.extend_from_slice(&[0x00, 0x00]); // status: success
                        self.enqueue(FrameKind::Authentication, source, true, None, payload);
                    }
                }
                [0x00, 0x02] => {
                    if self.config.role == Role::Sta && self.probed_ap == Some(source) {
                        self.on_authentication_response(body, AuthAlgorithm::OpenSystem);
                    }
                }
                _ => {}
            },
            [0x00, 0x01] => match sequence {
                // Shared key: challenge, encrypted challenge, verdict.
                [0x00, 0x01] => {
                    if self.config.role == Role::Ap {
                        info!(identifier = %self.config.identifier, sta = %source, "shared-key authentication request");
                        self.send_acknowledgement(source);
                        let challenge: Vec<u8> =
                            (0..128).map(|_| rand::thread_rng().gen::<u8>()).collect();
                        self.challenge_text.insert(source, challenge.clone());
                        let mut payload = vec![0x00, 0x01, 0x00, 0x02];
                        payload.extend_from_slice(&challenge);
                        self.enqueue(FrameKind::Authentication, source, true, None, payload);
                    }
                }
                [0x00, 0x02] => {
                    if self.config.role == Role::Sta && self.probed_ap == Some(source) {
                        self.send_acknowledgement(source);
                        let challenge = &body[4..];
                        let mut rng = rand::thread_rng();
                        let iv: [u8; wep::IV_LEN] = rng.gen();
                        let key_index = rng.gen_range(0..self.config.wep_keys.len());
                        let encrypted =
                            wep::apply(&iv, &self.config.wep_keys[key_index], challenge);
                        let mut payload = vec![0x00, 0x01, 0x00, 0x03];
                        payload.extend_from_slice(&iv);
                        payload.push(key_index as u8);
                        payload.extend_from_slice(&encrypted);
                        self.enqueue(FrameKind::Authentication, source, true, None, payload);
                    }
                }
                [0x00, 0x03] => {
                    if self.config.role == Role::Ap {
                        self.send_acknowledgement(source);
                        let status = self.verify_shared_key_response(source, &body[4..]);
                        if status == [0x00, 0x00] {
                            if !self.authenticated_sta.contains(&source) {
                                self.authenticated_sta.push(source);
                            }
                            self.encryption_type.insert(source, AuthAlgorithm::SharedKey);
                            info!(identifier = %self.config.identifier, sta = %source, "shared-key challenge verified");
                        } else {
                            warn!(identifier = %self.config.identifier, sta = %source, "shared-key challenge mismatch");
                        }
                        let mut payload = vec![0x00, 0x01, 0x00, 0x04];
                        payload.extend_from_slice(&status);
                        self.enqueue(FrameKind::Authentication, source, true, None, payload);
                    }
                }
                [0x00, 0x04] => {
                    if self.config.role == Role::Sta && self.probed_ap == Some(source) {
                        self.on_authentication_response(body, AuthAlgorithm::SharedKey);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    /// Decrypt the STA's sequence-3 payload and compare it with the stored
    /// challenge. The stored challenge is consumed either way.
    fn verify_shared_key_response(&mut self, source: MacAddr, body: &[u8]) -> [u8; 2] {
        const FAILURE: [u8; 2] = [0x00, 0x01];
        let Some(challenge) = self.challenge_text.remove(&source) else {
            return FAILURE;
        };
        if body.len() < wep::IV_LEN + 1 {
            return FAILURE;
        }
        let iv: [u8; wep::IV_LEN] = body[..wep::IV_LEN].try_into().expect("three octets");
        let key_index = body[wep::IV_LEN] as usize;
        let Some(key) = self.config.wep_keys.get(key_index) else {
            return FAILURE;
        };
        let decrypted = wep::apply(&iv, key, &body[wep::IV_LEN + 1..]);
        if decrypted == challenge {
            [0x00, 0x00]
        } else {
            FAILURE
        }
    }

    /// STA handling of the AP's verdict (open-system sequence 2 or
    /// shared-key sequence 4).
    fn on_authentication_response(&mut self, body: &[u8], algorithm: AuthAlgorithm) {
        let Some(ap) = self.probed_ap else { return };
        self.send_acknowledgement(ap);

        if body.len() >= 6 && body[4..6] == [0x00, 0x00] {
            self.authenticated_ap = Some(ap);
            self.encryption_type.insert(ap, algorithm);
            self.authentication_attempts = 0;
            info!(identifier = %self.config.identifier, %ap, "authentication successful");
            self.enqueue(FrameKind::AssociationRequest, ap, true, None, Vec::new());
        } else {
            self.authentication_attempts += 1;
            warn!(
                identifier = %self.config.identifier,
                %ap,
                attempt = self.authentication_attempts,
                "authentication refused"
            );
            if self.authentication_attempts >= self.config.parameters.authentication_attempts {
                warn!(identifier = %self.config.identifier, %ap, "blacklisting AP, resuming scan");
                self.authentication_attempts = 0;
                self.probed_ap_blacklist.push(ap);
                self.probed_ap = None;
            } else {
                // Start the handshake over with the same AP.
                self.queue_authentication_request();
            }
        }
    }

    fn on_control(&mut self, kind: FrameKind, source: MacAddr, cast: Cast) {
        match kind {
            FrameKind::Ack => {
                if self.ack_state == AckState::Waiting {
                    info!(identifier = %self.config.identifier, "frame acknowledged");
                    self.ack_state = AckState::Acked;
                }
            }
            FrameKind::Rts => {
                if cast == Cast::Unicast {
                    self.enqueue(FrameKind::Cts, source, false, None, Vec::new());
                }
            }
            FrameKind::Cts => {
                if cast == Cast::Unicast {
                    if let Some(pending) = self.pending_rts_data.take() {
                        debug!(identifier = %self.config.identifier, "CTS received, releasing data frame");
                        self.rts_cts_active = false;
                        self.tx_queue.push(pending);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_data(&mut self, source: MacAddr, cast: Cast, body: Vec<u8>) {
        let from_peer = match self.config.role {
            Role::Sta => self.associated_ap == Some(source),
            Role::Ap => self.associated_sta.contains(&source),
        };
        if !(from_peer && cast == Cast::Unicast) {
            debug!(identifier = %self.config.identifier, %source, "data frame from unassociated peer dropped");
            return;
        }
        self.send_acknowledgement(source);
        info!(
            identifier = %self.config.identifier,
            %source,
            octets = body.len(),
            "data frame delivered"
        );
        self.last_data = Some(body);
    }

    /// Drop duplicate queued entries, keeping the most recent copy of each.
    fn dedup_tx_queue(&mut self) {
        let queue = std::mem::take(&mut self.tx_queue);
        self.tx_queue = dedup_keep_last(queue);
    }

    async fn send_primitive(&mut self, primitive: &Primitive) {
        if let Err(error) = message::send(&mut self.sink, primitive).await {
            warn!(
                identifier = %self.config.identifier,
                %error,
                "send toward PHY failed"
            );
        }
    }
}

/// Remove queued duplicates, keeping the last copy of each identical
/// (request, payload) pair. Run after handling a retransmitted frame so a
/// repeated solicitation does not make this side answer twice.
fn dedup_keep_last(queue: Vec<QueueEntry>) -> Vec<QueueEntry> {
    let mut kept: Vec<QueueEntry> = Vec::with_capacity(queue.len());
    for entry in queue.into_iter().rev() {
        if !kept.contains(&entry) {
            kept.push(entry);
        }
    }
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: FrameKind, payload: &[u8]) -> QueueEntry {
        (
            FrameRequest {
                kind,
                destination: MacAddr([0x02, 0, 0, 0, 0, 9]),
                wait_for_ack: true,
                direction: None,
                retry: false,
            },
            payload.to_vec(),
        )
    }

    #[test]
    fn dedup_keeps_the_last_copy_of_identical_replies() {
        let queue = vec![
            entry(FrameKind::Authentication, &[0, 0, 0, 2, 0, 0]),
            entry(FrameKind::Ack, &[]),
            entry(FrameKind::Authentication, &[0, 0, 0, 2, 0, 0]),
        ];
        let deduped = dedup_keep_last(queue);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].0.kind, FrameKind::Ack);
        assert_eq!(deduped[1].0.kind, FrameKind::Authentication);
    }

    #[test]
    fn dedup_preserves_distinct_payloads() {
        let queue = vec![
            entry(FrameKind::Authentication, &[0, 1, 0, 3, 7]),
            entry(FrameKind::Authentication, &[0, 1, 0, 3, 8]),
        ];
        assert_eq!(dedup_keep_last(queue).len(), 2);
    }
}
