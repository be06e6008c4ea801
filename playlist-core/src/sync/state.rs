//! Session State Management

use std::collections::BTreeSet;
use std::sync::Arc;

use super::protocol::{Playlist, Song};

/// Lifecycle of a host session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// Draft not persisted, nothing advertised
    Idle,
    /// Advertising and accepting guests
    Advertising,
    /// Saved or discarded
    Ended,
}

/// Lifecycle of a guest session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestPhase {
    Idle,
    /// Invitation sent to the host
    Connecting,
    /// Session open, waiting for the first snapshot
    Connected,
    /// At least one snapshot applied
    Synced,
    Disconnected,
}

impl GuestPhase {
    /// Whether the session is over
    pub fn is_ended(&self) -> bool {
        matches!(self, GuestPhase::Disconnected)
    }
}

/// Authoritative state owned by the host
#[derive(Debug, Clone)]
pub struct HostState {
    /// The playlist as last read back from the store
    pub playlist: Playlist,
    /// Remote peers currently in the session
    pub peers: BTreeSet<String>,
    pub phase: HostPhase,
}

impl HostState {
    pub fn new(playlist: Playlist) -> Self {
        Self {
            playlist,
            peers: BTreeSet::new(),
            phase: HostPhase::Idle,
        }
    }

    /// Add a connected peer. Returns false if it was already known.
    pub fn add_peer(&mut self, peer_id: &str) -> bool {
        self.peers.insert(peer_id.to_string())
    }

    /// Remove a peer. Returns false if it was not connected.
    pub fn remove_peer(&mut self, peer_id: &str) -> bool {
        self.peers.remove(peer_id)
    }

    /// Connected peers, sorted
    pub fn peer_list(&self) -> Vec<String> {
        self.peers.iter().cloned().collect()
    }

    pub fn is_song_already_added(&self, song: &Song) -> bool {
        self.playlist.contains(song)
    }
}

/// Read-only replica held by a guest
#[derive(Debug, Clone)]
pub struct GuestState {
    /// The host this guest targeted
    pub host_peer_id: String,
    pub phase: GuestPhase,
    /// Last snapshot received, swapped whole on every update
    pub playlist: Option<Arc<Playlist>>,
}

impl GuestState {
    pub fn new(host_peer_id: impl Into<String>) -> Self {
        Self {
            host_peer_id: host_peer_id.into(),
            phase: GuestPhase::Idle,
            playlist: None,
        }
    }

    /// Check if a message sender is the targeted host
    pub fn is_from_host(&self, peer_id: &str) -> bool {
        self.host_peer_id == peer_id
    }

    /// Replace the local view with a snapshot (no merge)
    pub fn apply_snapshot(&mut self, playlist: Playlist) -> Arc<Playlist> {
        let playlist = Arc::new(playlist);
        self.playlist = Some(Arc::clone(&playlist));
        if !self.phase.is_ended() {
            self.phase = GuestPhase::Synced;
        }
        playlist
    }

    /// Membership check against the last snapshot; false before any snapshot
    pub fn is_song_already_added(&self, song: &Song) -> bool {
        self.playlist
            .as_ref()
            .map(|p| p.contains(song))
            .unwrap_or(false)
    }
}
