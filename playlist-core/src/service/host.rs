//! Host Sync Service
//!
//! Owns the authoritative playlist. Every mutation is persisted first and
//! then broadcast to all connected peers as a full snapshot.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{PlaylistDelegate, Role, SessionEnd, SyncConfig, SyncError};
use crate::network::{
    discovery_info, Advertise, Advertiser, PeerState, SessionPolicy, Transport, TransportEvent,
};
use crate::store::{PlaylistStore, PositionedSong};
use crate::sync::{HostPhase, HostState, Playlist, Song, SyncMessage, TrackId};

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

enum HostCommand {
    AddSong { song: Song, reply: Reply<()> },
    RemoveSong { track_id: TrackId, reply: Reply<()> },
    ListSongs { reply: Reply<Vec<PositionedSong>> },
    Save { reply: Reply<()> },
    Dismiss { reply: oneshot::Sender<()> },
}

/// Handle to a running host session
#[derive(Clone)]
pub struct HostHandle {
    commands: mpsc::UnboundedSender<HostCommand>,
    state: watch::Receiver<HostState>,
    local_peer_id: String,
}

impl HostHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> HostCommand,
    ) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SyncError::SessionEnded)?;
        response.await.map_err(|_| SyncError::SessionEnded)?
    }

    /// Add a song locally. Refused if its track is already in the playlist.
    pub async fn add_song(&self, song: Song) -> Result<(), SyncError> {
        self.request(|reply| HostCommand::AddSong { song, reply })
            .await
    }

    /// Remove a song; remaining positions stay contiguous
    pub async fn remove_song(&self, track_id: TrackId) -> Result<(), SyncError> {
        self.request(|reply| HostCommand::RemoveSong { track_id, reply })
            .await
    }

    /// Songs with their stored positions
    pub async fn list_songs_ordered(&self) -> Result<Vec<PositionedSong>, SyncError> {
        self.request(|reply| HostCommand::ListSongs { reply }).await
    }

    /// Commit the playlist and end the session
    pub async fn save_playlist(&self) -> Result<(), SyncError> {
        self.request(|reply| HostCommand::Save { reply }).await
    }

    /// Discard the draft and end the session
    pub async fn dismiss_playlist(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(HostCommand::Dismiss { reply }).is_ok() {
            let _ = done.await;
        }
    }

    pub fn playlist(&self) -> Playlist {
        self.state.borrow().playlist.clone()
    }

    pub fn connected_peers(&self) -> Vec<String> {
        self.state.borrow().peer_list()
    }

    pub fn phase(&self) -> HostPhase {
        self.state.borrow().phase
    }

    pub fn is_song_already_added(&self, song: &Song) -> bool {
        self.state.borrow().is_song_already_added(song)
    }

    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    pub fn role(&self) -> Role {
        Role::Host
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<HostState> {
        self.state.clone()
    }
}

/// Host side of a playlist session
pub struct HostService<S, T>
where
    S: PlaylistStore,
    T: Transport + Advertise + Clone,
{
    store: S,
    transport: T,
    advertiser: Advertiser<T>,
    state: HostState,
    published: watch::Sender<HostState>,
    delegate: Arc<dyn PlaylistDelegate>,
}

impl<S, T> HostService<S, T>
where
    S: PlaylistStore,
    T: Transport + Advertise + Clone,
{
    /// Create the draft playlist, start advertising it and spawn the service task
    pub fn start(
        playlist_name: &str,
        mut store: S,
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        delegate: Arc<dyn PlaylistDelegate>,
        config: SyncConfig,
    ) -> Result<HostHandle, SyncError> {
        let playlist = store.create_playlist(playlist_name)?;
        info!("Hosting playlist {} ({})", playlist.name, playlist.id);

        transport.set_policy(SessionPolicy::Capped {
            max_peers: config.max_peers,
        });
        let mut advertiser = Advertiser::new(transport.clone(), discovery_info(&playlist.name));
        advertiser.start();

        let mut state = HostState::new(playlist);
        state.phase = HostPhase::Advertising;
        let (published, state_rx) = watch::channel(state.clone());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let handle = HostHandle {
            commands: commands_tx,
            state: state_rx,
            local_peer_id: transport.local_peer_id().to_string(),
        };

        let service = HostService {
            store,
            transport,
            advertiser,
            state,
            published,
            delegate,
        };
        tokio::spawn(service.run(commands_rx, events));

        Ok(handle)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<HostCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut events_open = true;
        loop {
            tokio::select! {
                // Network input first, so local calls see everything received before them
                biased;

                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Transport event stream closed");
                        events_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All host handles dropped, discarding draft");
                        self.dismiss();
                        break;
                    }
                },
            }
        }
    }

    /// Returns true once the session is over
    fn handle_command(&mut self, command: HostCommand) -> bool {
        match command {
            HostCommand::AddSong { song, reply } => {
                let result = if self.state.is_song_already_added(&song) {
                    Err(SyncError::AlreadyInPlaylist)
                } else {
                    self.append(&song)
                };
                let _ = reply.send(result);
                false
            }
            HostCommand::RemoveSong { track_id, reply } => {
                let _ = reply.send(self.remove(track_id));
                false
            }
            HostCommand::ListSongs { reply } => {
                let songs = self
                    .store
                    .list_songs_ordered(self.state.playlist.id)
                    .map_err(SyncError::from);
                let _ = reply.send(songs);
                false
            }
            HostCommand::Save { reply } => match self.store.save() {
                Ok(()) => {
                    info!("Saved playlist {}", self.state.playlist.name);
                    self.end(SessionEnd::Saved);
                    let _ = reply.send(Ok(()));
                    true
                }
                Err(e) => {
                    warn!("Failed to save playlist: {}", e);
                    let _ = reply.send(Err(e.into()));
                    false
                }
            },
            HostCommand::Dismiss { reply } => {
                self.dismiss();
                let _ = reply.send(());
                true
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerStateChanged { peer_id, state } => match state {
                PeerState::Connected => {
                    if self.state.add_peer(&peer_id) {
                        info!("Peer joined: {} ({} connected)", peer_id, self.state.peers.len());
                        self.publish();
                    }
                }
                PeerState::NotConnected => {
                    if self.state.remove_peer(&peer_id) {
                        info!("Peer left: {} ({} connected)", peer_id, self.state.peers.len());
                        self.publish();
                    }
                }
                PeerState::Connecting => debug!("Peer connecting: {}", peer_id),
            },
            TransportEvent::Data { from, payload } => match SyncMessage::decode(&payload) {
                Ok(message) => self.handle_message(&from, message),
                Err(e) => warn!("Dropping message from {}: {}", from, e),
            },
        }
    }

    fn handle_message(&mut self, from: &str, message: SyncMessage) {
        match message {
            SyncMessage::Request(kind) => {
                debug!("{} requested {}", from, kind.as_str());
                self.send_snapshot(&[from.to_string()]);
            }
            SyncMessage::AddSongAtIndex { song, index } => {
                debug!(
                    "{} proposed {} (index {} ignored)",
                    from, song.track_name, index
                );
                if self.state.is_song_already_added(&song) {
                    // Let the proposer confirm against the current state
                    self.send_snapshot(&[from.to_string()]);
                    return;
                }
                if let Err(e) = self.append(&song) {
                    warn!("Proposal from {} not applied: {}", from, e);
                }
            }
            SyncMessage::Playlist(_) | SyncMessage::Noop => {
                debug!("Ignoring message from {}", from);
            }
        }
    }

    /// Persist a song at the end of the playlist and broadcast the result
    fn append(&mut self, song: &Song) -> Result<(), SyncError> {
        let id = self.state.playlist.id;
        let position = self.state.playlist.len();
        self.store.add_song(id, song, position)?;
        self.reload()?;
        info!("Added {} at position {}", song.track_name, position);
        self.broadcast();
        Ok(())
    }

    fn remove(&mut self, track_id: TrackId) -> Result<(), SyncError> {
        if !self.state.playlist.contains_track(track_id) {
            return Err(SyncError::SongNotFound);
        }
        self.store.remove_song(self.state.playlist.id, track_id)?;
        self.reload()?;
        info!("Removed track {}", track_id);
        self.broadcast();
        Ok(())
    }

    /// Read the playlist back from the store and publish it
    fn reload(&mut self) -> Result<(), SyncError> {
        self.state.playlist = self.store.playlist(self.state.playlist.id)?;
        self.publish();
        self.delegate.on_playlist_changed(&self.state.playlist);
        Ok(())
    }

    fn publish(&self) {
        self.published.send_replace(self.state.clone());
    }

    fn broadcast(&self) {
        let peers = self.state.peer_list();
        if !peers.is_empty() {
            self.send_snapshot(&peers);
        }
    }

    fn send_snapshot(&self, to: &[String]) {
        match SyncMessage::Playlist(self.state.playlist.clone()).encode() {
            Ok(bytes) => self.transport.send(bytes, to),
            Err(e) => warn!("Failed to encode snapshot: {}", e),
        }
    }

    fn dismiss(&mut self) {
        info!("Discarding playlist {}", self.state.playlist.name);
        self.store.rollback();
        self.end(SessionEnd::Dismissed);
    }

    fn end(&mut self, reason: SessionEnd) {
        self.advertiser.stop();
        self.transport.disconnect();
        self.state.peers.clear();
        self.state.phase = HostPhase::Ended;
        self.delegate.on_session_ended(reason);
        self.publish();
    }
}
