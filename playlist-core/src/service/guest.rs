//! Guest Sync Service
//!
//! Holds a read-only replica of one host's playlist. Proposals are sent to the
//! host and confirmed only by a later snapshot that contains the song.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::pending::{Expired, PendingProposals};
use super::{PlaylistDelegate, Role, SessionEnd, SyncConfig, SyncError};
use crate::network::{PeerState, SessionPolicy, Transport, TransportEvent};
use crate::sync::{GuestPhase, GuestState, Playlist, RequestType, Song, SyncMessage};

enum GuestCommand {
    AddSong {
        song: Song,
        completion: oneshot::Sender<bool>,
    },
    Dismiss {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running guest session
#[derive(Clone)]
pub struct GuestHandle {
    commands: mpsc::UnboundedSender<GuestCommand>,
    state: watch::Receiver<GuestState>,
}

impl GuestHandle {
    /// Propose a song to the host.
    ///
    /// Resolves once a snapshot containing the song arrives, or fails with
    /// [`SyncError::ProposalTimeout`]. A second proposal of the same song, or
    /// the end of the session, drops this one ([`SyncError::ProposalDropped`]).
    pub async fn add_new_song(&self, song: Song) -> Result<(), SyncError> {
        let (completion, confirmed) = oneshot::channel();
        self.commands
            .send(GuestCommand::AddSong { song, completion })
            .map_err(|_| SyncError::SessionEnded)?;
        match confirmed.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(SyncError::ProposalTimeout),
            Err(_) => Err(SyncError::ProposalDropped),
        }
    }

    /// Guests cannot mutate the host's playlist
    pub fn remove_song(&self, song: &Song) {
        debug!("Ignoring removal of {} (guests cannot remove songs)", song.track_name);
    }

    /// Nothing to save on a guest
    pub fn save_playlist(&self) {
        warn!("Guests cannot save the shared playlist");
    }

    /// Leave the session without telling the host
    pub async fn dismiss_playlist(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(GuestCommand::Dismiss { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Last snapshot from the host, None before the first one
    pub fn playlist(&self) -> Option<Arc<Playlist>> {
        self.state.borrow().playlist.clone()
    }

    pub fn phase(&self) -> GuestPhase {
        self.state.borrow().phase
    }

    pub fn is_song_already_added(&self, song: &Song) -> bool {
        self.state.borrow().is_song_already_added(song)
    }

    pub fn host_peer_id(&self) -> String {
        self.state.borrow().host_peer_id.clone()
    }

    pub fn role(&self) -> Role {
        Role::Guest
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<GuestState> {
        self.state.clone()
    }
}

/// Guest side of a playlist session
pub struct GuestService<T: Transport> {
    transport: T,
    state: GuestState,
    published: watch::Sender<GuestState>,
    pending: PendingProposals,
    delegate: Arc<dyn PlaylistDelegate>,
    config: SyncConfig,
}

impl<T: Transport> GuestService<T> {
    /// Connect to `host_peer_id` and spawn the service task
    pub fn start(
        host_peer_id: &str,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        delegate: Arc<dyn PlaylistDelegate>,
        config: SyncConfig,
    ) -> GuestHandle {
        info!("Joining host {}", host_peer_id);
        transport.set_policy(SessionPolicy::guest(host_peer_id));

        let mut state = GuestState::new(host_peer_id);
        state.phase = GuestPhase::Connecting;
        let (published, state_rx) = watch::channel(state.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();

        transport.connect(host_peer_id, config.connect_timeout);

        let service = GuestService {
            transport,
            state,
            published,
            pending: PendingProposals::new(expired_tx),
            delegate,
            config,
        };
        tokio::spawn(service.run(commands_rx, events, expired_rx));

        GuestHandle {
            commands: commands_tx,
            state: state_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<GuestCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut expired: mpsc::UnboundedReceiver<Expired>,
    ) {
        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event) {
                            break;
                        }
                    }
                    None => {
                        warn!("Transport event stream closed");
                        self.end(SessionEnd::Disconnected);
                        break;
                    }
                },
                Some(timer) = expired.recv() => {
                    if self.pending.expire(timer) {
                        warn!("Host did not confirm track {} in time", timer.track_id);
                    }
                }
                command = commands.recv() => match command {
                    Some(GuestCommand::AddSong { song, completion }) => {
                        self.propose(song, completion);
                    }
                    Some(GuestCommand::Dismiss { reply }) => {
                        self.end(SessionEnd::Dismissed);
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        debug!("All guest handles dropped, leaving");
                        self.end(SessionEnd::Dismissed);
                        break;
                    }
                },
            }
        }
    }

    /// Returns true once the session is over
    fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::PeerStateChanged { peer_id, state } => {
                if !self.state.is_from_host(&peer_id) {
                    debug!("Ignoring state of {}", peer_id);
                    return false;
                }
                match state {
                    PeerState::Connecting => {
                        self.set_phase(GuestPhase::Connecting);
                        false
                    }
                    PeerState::Connected => {
                        info!("Connected to host {}", peer_id);
                        self.set_phase(GuestPhase::Connected);
                        self.send(&SyncMessage::Request(RequestType::InitialPlaylist));
                        false
                    }
                    PeerState::NotConnected => {
                        info!("Lost connection to host {}", peer_id);
                        self.end(SessionEnd::Disconnected);
                        true
                    }
                }
            }
            TransportEvent::Data { from, payload } => {
                if !self.state.is_from_host(&from) {
                    debug!("Ignoring data from {}", from);
                    return false;
                }
                match SyncMessage::decode(&payload) {
                    Ok(SyncMessage::Playlist(playlist)) => self.apply(playlist),
                    Ok(other) => debug!("Ignoring {:?} from host", other),
                    Err(e) => warn!("Dropping message from host: {}", e),
                }
                false
            }
        }
    }

    fn apply(&mut self, playlist: Playlist) {
        let playlist = self.state.apply_snapshot(playlist);
        self.publish();
        self.delegate.on_playlist_changed(&playlist);
        let resolved = self.pending.resolve_present(&playlist);
        debug!(
            "Snapshot with {} songs applied ({} proposals confirmed, {} pending)",
            playlist.len(),
            resolved,
            self.pending.len()
        );
    }

    fn propose(&mut self, song: Song, completion: oneshot::Sender<bool>) {
        if self.pending.contains(song.track_id) {
            debug!("Replacing pending proposal for {}", song.track_id);
        }
        self.pending
            .insert(song.track_id, completion, self.config.proposal_timeout);
        // The host appends; the index is only advisory
        self.send(&SyncMessage::AddSongAtIndex { song, index: 0 });
    }

    fn send(&self, message: &SyncMessage) {
        match message.encode() {
            Ok(bytes) => self
                .transport
                .send(bytes, &[self.state.host_peer_id.clone()]),
            Err(e) => warn!("Failed to encode message: {}", e),
        }
    }

    fn set_phase(&mut self, phase: GuestPhase) {
        if self.state.phase != phase {
            self.state.phase = phase;
            self.publish();
        }
    }

    fn publish(&self) {
        self.published.send_replace(self.state.clone());
    }

    fn end(&mut self, reason: SessionEnd) {
        self.pending.clear();
        self.transport.disconnect();
        self.state.phase = GuestPhase::Disconnected;
        self.delegate.on_session_ended(reason);
        self.publish();
    }
}
