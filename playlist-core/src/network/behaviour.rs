//! libp2p Network Behaviour
//!
//! Implements the transport session and discovery on libp2p:
//! - mDNS for local network discovery
//! - TCP + QUIC transports (noise encryption, yamux multiplexing)
//! - request-response carrying session frames
//! - identify for protocol namespace checks

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use futures::StreamExt;
use libp2p::{
    identify, identity, mdns,
    multiaddr::Protocol,
    noise, ping,
    request_response::{self, OutboundRequestId, ProtocolSupport},
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::discovery::{
    Advertise, Announcement, Browse, DiscoveryEvent, DiscoveryInfo, PlaylistHost, SERVICE_TYPE,
};
use super::frame::{FrameCodec, SessionFrame, SessionReply, SESSION_PROTOCOL};
use super::policy::SessionPolicy;
use super::transport::{PeerState, Transport, TransportEvent};

/// Identify protocol version; peers announcing anything else are not probed
pub const IDENTIFY_PROTOCOL: &str = "/shared-playlist/1.0.0";

/// Network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Discovery namespace; hosts from other namespaces are ignored
    pub service_type: String,
    /// Device name shown to browsing guests
    pub display_name: String,
    /// Whether to enable mDNS for local network discovery
    pub enable_mdns: bool,
    /// Multiaddrs to listen on
    pub listen_addresses: Vec<String>,
    /// How often discovered peers are re-probed while browsing
    pub probe_interval: Duration,
    /// How long an unused connection stays open
    pub idle_timeout: Duration,
    /// How often session peers are sent a heartbeat; keep it below `idle_timeout`
    pub keep_alive_interval: Duration,
    /// Upper bound for a single frame exchange
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            display_name: "Playlist peer".to_string(),
            enable_mdns: true,
            listen_addresses: vec![
                "/ip4/0.0.0.0/tcp/0".to_string(),
                "/ip4/0.0.0.0/udp/0/quic-v1".to_string(),
            ],
            probe_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl NetworkConfig {
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    pub fn with_listen_addresses(mut self, addresses: Vec<String>) -> Self {
        self.listen_addresses = addresses;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn without_mdns(mut self) -> Self {
        self.enable_mdns = false;
        self
    }
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to create transport: {0}")]
    Transport(String),

    #[error("Invalid address {0}: {1}")]
    InvalidAddress(String, String),

    #[error("Failed to listen: {0}")]
    Listen(String),

    #[error("Network task closed")]
    Closed,
}

/// Combined network behaviour for local playlist sessions
#[derive(NetworkBehaviour)]
pub struct PlaylistBehaviour {
    /// Ping for connection keep-alive
    ping: ping::Behaviour,
    /// mDNS for local network discovery (optional)
    mdns: Toggle<mdns::tokio::Behaviour>,
    /// Peer identification
    identify: identify::Behaviour,
    /// Session frames
    session: request_response::Behaviour<FrameCodec>,
}

/// Commands sent to the network task
#[derive(Debug)]
pub enum NetworkCommand {
    SetPolicy(SessionPolicy),
    Connect { peer_id: String, timeout: Duration },
    Send { payload: Vec<u8>, to: Vec<String> },
    Disconnect,
    StartAdvertising(DiscoveryInfo),
    StopAdvertising,
    StartBrowsing,
    StopBrowsing,
    /// Dial a peer directly by multiaddr (no mDNS needed)
    DialPeer { multiaddr: String },
    Shutdown,
}

/// Handle to communicate with the running network.
///
/// The network task stops once every handle is dropped.
#[derive(Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
    pub local_peer_id: String,
}

impl NetworkHandle {
    fn command(&self, command: NetworkCommand) {
        if self.command_tx.send(command).is_err() {
            debug!("Network task closed, command dropped");
        }
    }

    pub fn dial_peer(&self, multiaddr: &str) -> Result<(), NetworkError> {
        self.command_tx
            .send(NetworkCommand::DialPeer {
                multiaddr: multiaddr.to_string(),
            })
            .map_err(|_| NetworkError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }
}

impl Transport for NetworkHandle {
    fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    fn set_policy(&self, policy: SessionPolicy) {
        self.command(NetworkCommand::SetPolicy(policy));
    }

    fn connect(&self, peer_id: &str, timeout: Duration) {
        self.command(NetworkCommand::Connect {
            peer_id: peer_id.to_string(),
            timeout,
        });
    }

    fn send(&self, payload: Vec<u8>, to: &[String]) {
        self.command(NetworkCommand::Send {
            payload,
            to: to.to_vec(),
        });
    }

    fn disconnect(&self) {
        self.command(NetworkCommand::Disconnect);
    }
}

impl Advertise for NetworkHandle {
    fn start_advertising(&self, info: DiscoveryInfo) {
        self.command(NetworkCommand::StartAdvertising(info));
    }

    fn stop_advertising(&self) {
        self.command(NetworkCommand::StopAdvertising);
    }
}

impl Browse for NetworkHandle {
    fn start_browsing(&self) {
        self.command(NetworkCommand::StartBrowsing);
    }

    fn stop_browsing(&self) {
        self.command(NetworkCommand::StopBrowsing);
    }
}

/// Manages P2P networking - runs in a background task
pub struct NetworkManager {
    local_peer_id: PeerId,
    keypair: identity::Keypair,
    config: NetworkConfig,
}

impl NetworkManager {
    /// Create a new network manager with default config
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    /// Create a new network manager with custom config
    pub fn with_config(config: NetworkConfig) -> Self {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());
        info!("Local peer ID: {}", local_peer_id);
        Self {
            local_peer_id,
            keypair,
            config,
        }
    }

    /// Get our local peer ID as string
    pub fn local_peer_id_string(&self) -> String {
        self.local_peer_id.to_string()
    }

    /// Build the swarm, start listening and spawn the network task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        self,
    ) -> Result<
        (
            NetworkHandle,
            mpsc::UnboundedReceiver<TransportEvent>,
            mpsc::UnboundedReceiver<DiscoveryEvent>,
        ),
        NetworkError,
    > {
        let mut swarm = self.create_swarm()?;
        for addr in &self.config.listen_addresses {
            let multiaddr: Multiaddr = addr
                .parse()
                .map_err(|e: libp2p::multiaddr::Error| {
                    NetworkError::InvalidAddress(addr.clone(), e.to_string())
                })?;
            match swarm.listen_on(multiaddr) {
                Ok(id) => info!("Listener started on {}: {:?}", addr, id),
                Err(e) => return Err(NetworkError::Listen(e.to_string())),
            }
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (discovery_tx, discovery_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = NetworkHandle {
            command_tx,
            local_peer_id: self.local_peer_id.to_string(),
        };

        let task = NetworkTask {
            local_peer_id: self.local_peer_id,
            config: self.config,
            swarm,
            events: event_tx,
            discovery: discovery_tx,
            policy: None,
            session: HashSet::new(),
            pending_invites: HashMap::new(),
            heartbeats: HashSet::new(),
            outbox: HashMap::new(),
            inflight: HashMap::new(),
            advertising: None,
            browsing: false,
            discovered: HashSet::new(),
            probing: HashSet::new(),
            found_hosts: HashSet::new(),
            foreign: HashSet::new(),
        };
        tokio::spawn(task.run(command_rx));

        Ok((handle, event_rx, discovery_rx))
    }

    fn create_swarm(&self) -> Result<Swarm<PlaylistBehaviour>, NetworkError> {
        let enable_mdns = self.config.enable_mdns;
        let request_timeout = self.config.request_timeout;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_quic()
            .with_behaviour(|keypair| {
                let ping = ping::Behaviour::new(
                    ping::Config::new()
                        .with_interval(Duration::from_secs(15))
                        .with_timeout(Duration::from_secs(20)),
                );

                let mdns = if enable_mdns {
                    Some(
                        mdns::tokio::Behaviour::new(
                            mdns::Config::default(),
                            keypair.public().to_peer_id(),
                        )
                        .map_err(|e| e.to_string())?,
                    )
                } else {
                    None
                };

                let identify = identify::Behaviour::new(identify::Config::new(
                    IDENTIFY_PROTOCOL.into(),
                    keypair.public(),
                ));

                let session = request_response::Behaviour::with_codec(
                    FrameCodec,
                    [(SESSION_PROTOCOL, ProtocolSupport::Full)],
                    request_response::Config::default().with_request_timeout(request_timeout),
                );

                Ok(PlaylistBehaviour {
                    ping,
                    mdns: Toggle::from(mdns),
                    identify,
                    session,
                })
            })
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(self.config.idle_timeout))
            .build();

        Ok(swarm)
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new()
    }
}

/// What an outbound request was for
#[derive(Debug, Clone, Copy)]
enum Outbound {
    Probe,
    Invite,
    Data,
    Leave,
    KeepAlive,
}

/// Per-peer queue of payloads; one request in flight keeps them in order
#[derive(Default)]
struct Outbox {
    queue: VecDeque<Vec<u8>>,
    in_flight: bool,
}

struct NetworkTask {
    local_peer_id: PeerId,
    config: NetworkConfig,
    swarm: Swarm<PlaylistBehaviour>,
    events: mpsc::UnboundedSender<TransportEvent>,
    discovery: mpsc::UnboundedSender<DiscoveryEvent>,
    /// None until a role installs one; every invitation is refused meanwhile
    policy: Option<SessionPolicy>,
    /// Remote peers in our session
    session: HashSet<PeerId>,
    /// Outbound invitations and their deadlines
    pending_invites: HashMap<PeerId, Instant>,
    /// Session peers with a heartbeat in flight
    heartbeats: HashSet<PeerId>,
    outbox: HashMap<PeerId, Outbox>,
    inflight: HashMap<OutboundRequestId, Outbound>,
    advertising: Option<DiscoveryInfo>,
    browsing: bool,
    /// Peers seen via mDNS or reached by a direct dial
    discovered: HashSet<PeerId>,
    /// Peers with a probe in flight
    probing: HashSet<PeerId>,
    /// Hosts reported to the browser
    found_hosts: HashSet<PeerId>,
    /// Peers running another protocol
    foreign: HashSet<PeerId>,
}

impl NetworkTask {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>) {
        let mut ticker = tokio::time::interval(self.config.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval(self.config.keep_alive_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
                command = command_rx.recv() => {
                    match command {
                        Some(NetworkCommand::Shutdown) => {
                            info!("Network shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            info!("All network handles dropped, shutting down");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.on_tick();
                }
                _ = heartbeat.tick() => {
                    self.keep_alive();
                }
            }
        }

        self.leave_session();
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn emit_state(&self, peer: &PeerId, state: PeerState) {
        debug!("Peer {} is {}", peer, state);
        self.emit(TransportEvent::PeerStateChanged {
            peer_id: peer.to_string(),
            state,
        });
    }

    fn admits(&self, peer: &PeerId) -> bool {
        self.policy
            .as_ref()
            .map(|p| p.admits(&peer.to_string(), self.session.len()))
            .unwrap_or(false)
    }

    fn handle_command(&mut self, command: NetworkCommand) {
        match command {
            NetworkCommand::SetPolicy(policy) => {
                debug!("Session policy: {:?}", policy);
                self.policy = Some(policy);
            }
            NetworkCommand::Connect { peer_id, timeout } => self.connect(&peer_id, timeout),
            NetworkCommand::Send { payload, to } => {
                for peer_id in to {
                    match peer_id.parse::<PeerId>() {
                        Ok(peer) if self.session.contains(&peer) => {
                            self.outbox
                                .entry(peer)
                                .or_default()
                                .queue
                                .push_back(payload.clone());
                            self.flush(peer);
                        }
                        _ => warn!("Not sending to {}: not in session", peer_id),
                    }
                }
            }
            NetworkCommand::Disconnect => self.leave_session(),
            NetworkCommand::StartAdvertising(info) => {
                info!("Advertising {:?}", info);
                self.advertising = Some(info);
            }
            NetworkCommand::StopAdvertising => {
                if self.advertising.take().is_some() {
                    info!("Stopped advertising");
                }
            }
            NetworkCommand::StartBrowsing => {
                if !self.browsing {
                    info!("Browsing for hosts");
                    self.browsing = true;
                    self.probe_discovered();
                }
            }
            NetworkCommand::StopBrowsing => {
                self.browsing = false;
                self.found_hosts.clear();
            }
            NetworkCommand::DialPeer { multiaddr } => match multiaddr.parse::<Multiaddr>() {
                Ok(addr) => {
                    info!("Dialing peer at {}", addr);
                    // Remember the address so later requests can redial it
                    if let Some(Protocol::P2p(peer)) = addr.iter().last() {
                        if peer != self.local_peer_id {
                            self.swarm.add_peer_address(peer, addr.clone());
                        }
                    }
                    if let Err(e) = self.swarm.dial(addr) {
                        warn!("Failed to dial peer: {}", e);
                    }
                }
                Err(e) => warn!("Invalid multiaddr {}: {}", multiaddr, e),
            },
            // Handled by the run loop
            NetworkCommand::Shutdown => {}
        }
    }

    fn connect(&mut self, peer_id: &str, timeout: Duration) {
        let peer = match peer_id.parse::<PeerId>() {
            Ok(peer) => peer,
            Err(e) => {
                warn!("Cannot connect to {}: {}", peer_id, e);
                self.emit(TransportEvent::PeerStateChanged {
                    peer_id: peer_id.to_string(),
                    state: PeerState::Connecting,
                });
                self.emit(TransportEvent::PeerStateChanged {
                    peer_id: peer_id.to_string(),
                    state: PeerState::NotConnected,
                });
                return;
            }
        };

        self.emit_state(&peer, PeerState::Connecting);
        self.pending_invites.insert(peer, Instant::now() + timeout);
        let request_id = self
            .swarm
            .behaviour_mut()
            .session
            .send_request(&peer, SessionFrame::Invite);
        self.inflight.insert(request_id, Outbound::Invite);
    }

    /// Send the next queued payload for a peer, if none is in flight
    fn flush(&mut self, peer: PeerId) {
        let Some(outbox) = self.outbox.get_mut(&peer) else {
            return;
        };
        if outbox.in_flight {
            return;
        }
        if let Some(payload) = outbox.queue.pop_front() {
            outbox.in_flight = true;
            let request_id = self
                .swarm
                .behaviour_mut()
                .session
                .send_request(&peer, SessionFrame::Data(payload));
            self.inflight.insert(request_id, Outbound::Data);
        }
    }

    /// Tell every session peer we are leaving and forget them
    fn leave_session(&mut self) {
        self.pending_invites.clear();
        self.heartbeats.clear();
        self.outbox.clear();
        let peers: Vec<PeerId> = self.session.drain().collect();
        for peer in peers {
            debug!("Leaving session with {}", peer);
            let request_id = self
                .swarm
                .behaviour_mut()
                .session
                .send_request(&peer, SessionFrame::Leave);
            self.inflight.insert(request_id, Outbound::Leave);
        }
    }

    fn probe(&mut self, peer: PeerId) {
        if self.foreign.contains(&peer) || !self.probing.insert(peer) {
            return;
        }
        let request_id = self
            .swarm
            .behaviour_mut()
            .session
            .send_request(&peer, SessionFrame::Probe);
        self.inflight.insert(request_id, Outbound::Probe);
    }

    /// Track a peer as a discovery candidate, checking it at once while browsing.
    ///
    /// Returns false if the peer was already known.
    fn discover(&mut self, peer: PeerId) -> bool {
        if !self.discovered.insert(peer) {
            return false;
        }
        if self.browsing {
            self.probe(peer);
        }
        true
    }

    fn probe_discovered(&mut self) {
        let peers: Vec<PeerId> = self.discovered.iter().copied().collect();
        for peer in peers {
            self.probe(peer);
        }
    }

    fn lose_host(&mut self, peer: &PeerId) {
        if self.found_hosts.remove(peer) {
            info!("Host lost: {}", peer);
            let _ = self.discovery.send(DiscoveryEvent::HostLost(peer.to_string()));
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        let expired: Vec<PeerId> = self
            .pending_invites
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in expired {
            self.pending_invites.remove(&peer);
            warn!("Invitation to {} timed out", peer);
            self.emit_state(&peer, PeerState::NotConnected);
        }

        if self.browsing {
            self.probe_discovered();
        }
    }

    /// Ping every session peer so idle sessions keep their connection
    fn keep_alive(&mut self) {
        let peers: Vec<PeerId> = self.session.iter().copied().collect();
        for peer in peers {
            if !self.heartbeats.insert(peer) {
                continue;
            }
            let request_id = self
                .swarm
                .behaviour_mut()
                .session
                .send_request(&peer, SessionFrame::KeepAlive);
            self.inflight.insert(request_id, Outbound::KeepAlive);
        }
    }

    /// Forget a session peer and report it gone
    fn drop_peer(&mut self, peer: &PeerId) {
        self.heartbeats.remove(peer);
        if self.session.remove(peer) {
            self.outbox.remove(peer);
            self.emit_state(peer, PeerState::NotConnected);
        }
    }

    fn on_request(&mut self, peer: PeerId, frame: SessionFrame) -> SessionReply {
        match frame {
            SessionFrame::Probe => match &self.advertising {
                Some(info) => SessionReply::Announce(Announcement {
                    service_type: self.config.service_type.clone(),
                    display_name: self.config.display_name.clone(),
                    info: info.clone(),
                }),
                None => SessionReply::Hidden,
            },
            SessionFrame::Invite => {
                if self.session.contains(&peer) {
                    return SessionReply::Accepted;
                }
                if self.advertising.is_some() && self.admits(&peer) {
                    info!("Accepted invitation from {}", peer);
                    self.session.insert(peer);
                    self.emit_state(&peer, PeerState::Connected);
                    SessionReply::Accepted
                } else {
                    info!("Rejected invitation from {}", peer);
                    SessionReply::Rejected
                }
            }
            SessionFrame::Data(payload) => {
                if self.session.contains(&peer) {
                    self.emit(TransportEvent::Data {
                        from: peer.to_string(),
                        payload,
                    });
                } else {
                    debug!("Dropping data from {} (not in session)", peer);
                }
                SessionReply::Ack
            }
            SessionFrame::Leave => {
                self.drop_peer(&peer);
                SessionReply::Ack
            }
            // Our invitation may still be waiting for its answer to arrive
            SessionFrame::KeepAlive
                if self.session.contains(&peer) || self.pending_invites.contains_key(&peer) =>
            {
                SessionReply::Ack
            }
            // Tells a peer holding a stale session that we are gone
            SessionFrame::KeepAlive => SessionReply::Rejected,
        }
    }

    fn on_response(&mut self, peer: PeerId, request_id: OutboundRequestId, reply: SessionReply) {
        let Some(outbound) = self.inflight.remove(&request_id) else {
            return;
        };
        match outbound {
            Outbound::Probe => {
                self.probing.remove(&peer);
                match reply {
                    SessionReply::Announce(announcement)
                        if announcement.service_type == self.config.service_type =>
                    {
                        if self.browsing && self.found_hosts.insert(peer) {
                            let host = PlaylistHost::from_announcement(peer.to_string(), &announcement);
                            info!("Host found: {} ({:?})", host.name, host.playlist_name);
                            let _ = self.discovery.send(DiscoveryEvent::HostFound(host));
                        }
                    }
                    SessionReply::Announce(announcement) => {
                        debug!(
                            "Ignoring {} from foreign service type {}",
                            peer, announcement.service_type
                        );
                        self.lose_host(&peer);
                    }
                    _ => self.lose_host(&peer),
                }
            }
            Outbound::Invite => {
                let expected = self.pending_invites.remove(&peer).is_some();
                match reply {
                    SessionReply::Accepted if expected && self.admits(&peer) => {
                        info!("Joined session with {}", peer);
                        self.session.insert(peer);
                        self.emit_state(&peer, PeerState::Connected);
                    }
                    SessionReply::Accepted => {
                        // Late or unwanted acceptance; undo it on the remote side
                        debug!("Leaving unexpected session with {}", peer);
                        if expected {
                            self.emit_state(&peer, PeerState::NotConnected);
                        }
                        let request_id = self
                            .swarm
                            .behaviour_mut()
                            .session
                            .send_request(&peer, SessionFrame::Leave);
                        self.inflight.insert(request_id, Outbound::Leave);
                    }
                    _ => {
                        if expected {
                            info!("Invitation to {} was declined", peer);
                            self.emit_state(&peer, PeerState::NotConnected);
                        }
                    }
                }
            }
            Outbound::Data => {
                if let Some(outbox) = self.outbox.get_mut(&peer) {
                    outbox.in_flight = false;
                }
                self.flush(peer);
            }
            Outbound::Leave => {}
            Outbound::KeepAlive => {
                self.heartbeats.remove(&peer);
                if reply != SessionReply::Ack && self.session.contains(&peer) {
                    info!("{} no longer has us in its session", peer);
                    self.drop_peer(&peer);
                }
            }
        }
    }

    fn on_outbound_failure(
        &mut self,
        peer: PeerId,
        request_id: OutboundRequestId,
        error: request_response::OutboundFailure,
    ) {
        let Some(outbound) = self.inflight.remove(&request_id) else {
            return;
        };
        match outbound {
            Outbound::Probe => {
                debug!("Probe to {} failed: {}", peer, error);
                self.probing.remove(&peer);
                self.lose_host(&peer);
            }
            Outbound::Invite => {
                if self.pending_invites.remove(&peer).is_some() {
                    warn!("Invitation to {} failed: {}", peer, error);
                    self.emit_state(&peer, PeerState::NotConnected);
                }
            }
            Outbound::Data => {
                warn!("Send to {} failed: {}", peer, error);
                if let Some(outbox) = self.outbox.get_mut(&peer) {
                    outbox.in_flight = false;
                }
                self.flush(peer);
            }
            Outbound::Leave => debug!("Leave to {} not delivered: {}", peer, error),
            Outbound::KeepAlive => {
                if self.session.contains(&peer) {
                    warn!("Lost session peer {}: {}", peer, error);
                }
                self.drop_peer(&peer);
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<PlaylistBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}/p2p/{}", address, self.local_peer_id);
            }

            SwarmEvent::Behaviour(PlaylistBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer, addr) in peers {
                    if peer == self.local_peer_id {
                        continue;
                    }
                    self.swarm.add_peer_address(peer, addr.clone());
                    if self.discover(peer) {
                        debug!("mDNS discovered peer: {} at {}", peer, addr);
                    }
                }
            }

            SwarmEvent::Behaviour(PlaylistBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer, _) in peers {
                    if self.discovered.remove(&peer) {
                        debug!("mDNS peer expired: {}", peer);
                    }
                    self.lose_host(&peer);
                }
            }

            SwarmEvent::Behaviour(PlaylistBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                if info.protocol_version != IDENTIFY_PROTOCOL {
                    debug!(
                        "Peer {} speaks {}, ignoring it for discovery",
                        peer_id, info.protocol_version
                    );
                    self.foreign.insert(peer_id);
                    self.lose_host(&peer_id);
                }
            }

            SwarmEvent::Behaviour(PlaylistBehaviourEvent::Session(event)) => match event {
                request_response::Event::Message { peer, message, .. } => match message {
                    request_response::Message::Request {
                        request, channel, ..
                    } => {
                        let reply = self.on_request(peer, request);
                        if self
                            .swarm
                            .behaviour_mut()
                            .session
                            .send_response(channel, reply)
                            .is_err()
                        {
                            debug!("Reply to {} dropped (stream closed)", peer);
                        }
                    }
                    request_response::Message::Response {
                        request_id,
                        response,
                    } => self.on_response(peer, request_id, response),
                },
                request_response::Event::OutboundFailure {
                    peer,
                    request_id,
                    error,
                    ..
                } => self.on_outbound_failure(peer, request_id, error),
                request_response::Event::InboundFailure { peer, error, .. } => {
                    debug!("Inbound frame from {} failed: {}", peer, error);
                }
                request_response::Event::ResponseSent { .. } => {}
            },

            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                debug!(
                    "Connected to {} via {}",
                    peer_id,
                    endpoint.get_remote_address()
                );
                if endpoint.is_dialer() {
                    self.swarm
                        .add_peer_address(peer_id, endpoint.get_remote_address().clone());
                }
                // Direct dials have no mDNS record; the connection itself is the sighting
                if self.discover(peer_id) {
                    debug!("Discovered peer {} by connection", peer_id);
                }
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                if num_established > 0 {
                    return;
                }
                debug!("All connections to {} closed", peer_id);
                self.foreign.remove(&peer_id);
                self.drop_peer(&peer_id);
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!("Outgoing connection to {:?} failed: {}", peer_id, error);
            }

            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::discovery::discovery_info;
    use crate::network::policy::MAX_SESSION_PEERS;

    fn loopback_config() -> NetworkConfig {
        NetworkConfig::default()
            .without_mdns()
            .with_listen_addresses(vec!["/ip4/127.0.0.1/tcp/0".to_string()])
    }

    struct Node {
        handle: NetworkHandle,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        discovery: mpsc::UnboundedReceiver<DiscoveryEvent>,
        /// Dialable address including our peer id
        address: String,
    }

    impl Node {
        fn id(&self) -> String {
            self.handle.local_peer_id.clone()
        }
    }

    fn spawn_node(port: u16, config: NetworkConfig) -> Node {
        let listen = format!("/ip4/127.0.0.1/tcp/{}", port);
        let (handle, events, discovery) =
            NetworkManager::with_config(config.with_listen_addresses(vec![listen.clone()]))
                .start()
                .unwrap();
        let address = format!("{}/p2p/{}", listen, handle.local_peer_id);
        Node {
            handle,
            events,
            discovery,
            address,
        }
    }

    fn spawn_host(port: u16, max_peers: usize, config: NetworkConfig) -> Node {
        let host = spawn_node(port, config);
        host.handle.set_policy(SessionPolicy::Capped { max_peers });
        host.handle.start_advertising(discovery_info("Party"));
        host
    }

    fn join(guest: &Node, host: &Node) {
        guest.handle.set_policy(SessionPolicy::guest(host.id()));
        guest.handle.dial_peer(&host.address).unwrap();
        guest.handle.connect(&host.id(), Duration::from_secs(5));
    }

    async fn next_state(
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (String, PeerState) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match events.recv().await {
                    Some(TransportEvent::PeerStateChanged { peer_id, state }) => {
                        return (peer_id, state)
                    }
                    Some(TransportEvent::Data { .. }) => continue,
                    None => panic!("network task closed"),
                }
            }
        })
        .await
        .expect("no peer state change")
    }

    async fn next_payload(
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (String, Vec<u8>) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match events.recv().await {
                    Some(TransportEvent::Data { from, payload }) => return (from, payload),
                    Some(other) => panic!("unexpected {:?}", other),
                    None => panic!("network task closed"),
                }
            }
        })
        .await
        .expect("no data")
    }

    async fn next_discovery(
        discovery: &mut mpsc::UnboundedReceiver<DiscoveryEvent>,
    ) -> DiscoveryEvent {
        tokio::time::timeout(Duration::from_secs(10), discovery.recv())
            .await
            .expect("no discovery event")
            .expect("network task closed")
    }

    /// Join `guest` to `host` and wait until both sides report the session
    async fn connected(guest: &mut Node, host: &mut Node) {
        join(guest, host);
        assert_eq!(
            next_state(&mut guest.events).await,
            (host.id(), PeerState::Connecting)
        );
        assert_eq!(
            next_state(&mut guest.events).await,
            (host.id(), PeerState::Connected)
        );
        assert_eq!(
            next_state(&mut host.events).await,
            (guest.id(), PeerState::Connected)
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.service_type, SERVICE_TYPE);
        assert!(config.enable_mdns);
        assert_eq!(config.probe_interval, Duration::from_secs(5));
        assert!(config.keep_alive_interval < config.idle_timeout);

        let config = config
            .with_display_name("Kitchen")
            .with_service_type("other-app")
            .with_idle_timeout(Duration::from_secs(2))
            .with_keep_alive_interval(Duration::from_millis(500))
            .without_mdns();
        assert_eq!(config.display_name, "Kitchen");
        assert_eq!(config.service_type, "other-app");
        assert_eq!(config.idle_timeout, Duration::from_secs(2));
        assert_eq!(config.keep_alive_interval, Duration::from_millis(500));
        assert!(!config.enable_mdns);
    }

    #[tokio::test]
    async fn test_invalid_listen_address() {
        let manager = NetworkManager::with_config(
            loopback_config().with_listen_addresses(vec!["not an address".to_string()]),
        );
        assert!(matches!(
            manager.start(),
            Err(NetworkError::InvalidAddress(..))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_unknown_peer_fails() {
        let (handle, mut events, _discovery) =
            NetworkManager::with_config(loopback_config()).start().unwrap();
        handle.set_policy(SessionPolicy::guest("nobody"));

        handle.connect("not-a-peer-id", Duration::from_secs(5));
        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            TransportEvent::PeerStateChanged {
                state: PeerState::Connecting,
                ..
            }
        ));
        let second = events.recv().await.unwrap();
        assert!(matches!(
            second,
            TransportEvent::PeerStateChanged {
                state: PeerState::NotConnected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_connect_without_address_reports_not_connected() {
        let (handle, mut events, _discovery) =
            NetworkManager::with_config(loopback_config()).start().unwrap();
        let target = PeerId::random().to_string();
        handle.set_policy(SessionPolicy::guest(target.clone()));
        handle.connect(&target, Duration::from_secs(5));

        let outcome = tokio::time::timeout(Duration::from_secs(10), async {
            let mut states = Vec::new();
            while let Some(TransportEvent::PeerStateChanged { state, .. }) = events.recv().await {
                states.push(state);
                if state == PeerState::NotConnected {
                    break;
                }
            }
            states
        })
        .await
        .unwrap();
        assert_eq!(outcome, vec![PeerState::Connecting, PeerState::NotConnected]);
    }

    #[tokio::test]
    async fn test_session_delivers_data_in_order() {
        let mut host = spawn_host(47411, MAX_SESSION_PEERS, loopback_config());
        let mut guest = spawn_node(47412, loopback_config());
        connected(&mut guest, &mut host).await;

        for i in 0..5u8 {
            guest.handle.send(vec![i], &[host.id()]);
        }
        for i in 0..5u8 {
            assert_eq!(next_payload(&mut host.events).await, (guest.id(), vec![i]));
        }

        host.handle.send(b"snapshot".to_vec(), &[guest.id()]);
        assert_eq!(
            next_payload(&mut guest.events).await,
            (host.id(), b"snapshot".to_vec())
        );
    }

    #[tokio::test]
    async fn test_host_refuses_guest_over_cap() {
        // Room for the host and one guest
        let mut host = spawn_host(47421, 2, loopback_config());
        let mut first = spawn_node(47422, loopback_config());
        let mut second = spawn_node(47423, loopback_config());

        connected(&mut first, &mut host).await;

        join(&second, &host);
        assert_eq!(
            next_state(&mut second.events).await,
            (host.id(), PeerState::Connecting)
        );
        assert_eq!(
            next_state(&mut second.events).await,
            (host.id(), PeerState::NotConnected)
        );
        assert!(host.events.try_recv().is_err());

        // The refused guest cannot reach the session either
        second.handle.send(b"sneaky".to_vec(), &[host.id()]);
        first.handle.send(b"hello".to_vec(), &[host.id()]);
        assert_eq!(
            next_payload(&mut host.events).await,
            (first.id(), b"hello".to_vec())
        );
    }

    #[tokio::test]
    async fn test_host_only_accepts_while_advertising() {
        let host = spawn_node(47431, loopback_config());
        host.handle.set_policy(SessionPolicy::host());
        let mut guest = spawn_node(47432, loopback_config());

        join(&guest, &host);
        assert_eq!(
            next_state(&mut guest.events).await,
            (host.id(), PeerState::Connecting)
        );
        assert_eq!(
            next_state(&mut guest.events).await,
            (host.id(), PeerState::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_leave_reaches_remote_side() {
        let mut host = spawn_host(47436, MAX_SESSION_PEERS, loopback_config());
        let mut guest = spawn_node(47437, loopback_config());
        connected(&mut guest, &mut host).await;

        guest.handle.disconnect();
        assert_eq!(
            next_state(&mut host.events).await,
            (guest.id(), PeerState::NotConnected)
        );
        // Disconnect reports to remote peers only
        assert!(guest.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dialed_host_is_found_and_lost() {
        let host = spawn_host(
            47441,
            MAX_SESSION_PEERS,
            loopback_config().with_display_name("Kitchen"),
        );
        let mut guest = spawn_node(
            47442,
            loopback_config().with_probe_interval(Duration::from_millis(300)),
        );

        guest.handle.start_browsing();
        guest.handle.dial_peer(&host.address).unwrap();

        match next_discovery(&mut guest.discovery).await {
            DiscoveryEvent::HostFound(found) => {
                assert_eq!(found.id, host.id());
                assert_eq!(found.name, "Kitchen");
                assert_eq!(found.playlist_name.as_deref(), Some("Party"));
            }
            other => panic!("expected HostFound, got {:?}", other),
        }

        host.handle.stop_advertising();
        assert_eq!(
            next_discovery(&mut guest.discovery).await,
            DiscoveryEvent::HostLost(host.id())
        );
    }

    #[tokio::test]
    async fn test_other_service_type_is_not_found() {
        let host = spawn_host(
            47446,
            MAX_SESSION_PEERS,
            loopback_config().with_service_type("other-app"),
        );
        let mut guest = spawn_node(
            47447,
            loopback_config().with_probe_interval(Duration::from_millis(300)),
        );

        guest.handle.start_browsing();
        guest.handle.dial_peer(&host.address).unwrap();

        let found = tokio::time::timeout(Duration::from_secs(2), guest.discovery.recv()).await;
        assert!(found.is_err(), "unexpected {:?}", found);
    }

    #[tokio::test]
    async fn test_idle_session_outlives_idle_timeout() {
        let config = || {
            loopback_config()
                .with_idle_timeout(Duration::from_secs(2))
                .with_keep_alive_interval(Duration::from_millis(500))
        };
        let mut host = spawn_host(47451, MAX_SESSION_PEERS, config());
        let mut guest = spawn_node(47452, config());
        connected(&mut guest, &mut host).await;

        // Well past two idle timeouts without any application traffic
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(guest.events.try_recv().is_err());
        assert!(host.events.try_recv().is_err());

        guest.handle.send(b"still here".to_vec(), &[host.id()]);
        assert_eq!(
            next_payload(&mut host.events).await,
            (guest.id(), b"still here".to_vec())
        );
    }
}
