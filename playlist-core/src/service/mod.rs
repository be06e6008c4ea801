//! Host and guest sync services
//!
//! Each role runs as one tokio task that owns all of its session state.
//! Transport events and local calls are queued into that task, never handled
//! on the caller's context.

mod guest;
mod host;
mod pending;

use std::time::Duration;

use thiserror::Error;

use crate::network::MAX_SESSION_PEERS;
use crate::store::StoreError;
use crate::sync::{CodecError, Playlist};

pub use guest::{GuestHandle, GuestService};
pub use host::{HostHandle, HostService};

/// Design constants for a sync session
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a guest waits for a snapshot confirming its proposal
    pub proposal_timeout: Duration,
    /// How long a guest waits for the host to accept its invitation
    pub connect_timeout: Duration,
    /// Session size cap, host included
    pub max_peers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            proposal_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            max_peers: MAX_SESSION_PEERS,
        }
    }
}

/// Sync service errors
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Song is already in the playlist")]
    AlreadyInPlaylist,

    #[error("Song is not in the playlist")]
    SongNotFound,

    #[error("Host did not confirm the song in time")]
    ProposalTimeout,

    #[error("Proposal was dropped before the host confirmed it")]
    ProposalDropped,

    #[error("Session has ended")]
    SessionEnded,

    #[error("Failed to encode message: {0}")]
    Codec(#[from] CodecError),
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Host committed the playlist
    Saved,
    /// Discarded by the host or left by the guest
    Dismissed,
    /// Transport lost the other side
    Disconnected,
}

/// Callbacks from a running service to whoever presents it.
///
/// Called from the service task; implementations should hand off quickly.
pub trait PlaylistDelegate: Send + Sync + 'static {
    /// The visible playlist changed
    fn on_playlist_changed(&self, playlist: &Playlist);

    /// Called once when the session is over
    fn on_session_ended(&self, reason: SessionEnd);
}

/// Role of the local device in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// Only the host owns a playlist it can keep
    pub fn can_save_playlist(&self) -> bool {
        matches!(self, Role::Host)
    }

    /// Label for the action that ends the session without saving
    pub fn dismiss_label(&self) -> &'static str {
        match self {
            Role::Host => "Discard",
            Role::Guest => "Leave",
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_labels() {
        assert!(Role::Host.can_save_playlist());
        assert!(!Role::Guest.can_save_playlist());
        assert_eq!(Role::Host.dismiss_label(), "Discard");
        assert_eq!(Role::Guest.dismiss_label(), "Leave");
    }

    #[test]
    fn test_default_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.proposal_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.max_peers, 7);
    }
}
