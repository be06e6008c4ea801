//! Playlist persistence
//!
//! The host writes every mutation through a [`PlaylistStore`] before it is
//! broadcast. Stores keep a working copy (the draft) on top of the committed
//! state: `save` commits it, `rollback` throws it away.

mod file;
mod memory;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::sync::{Playlist, Song, TrackId};

pub use file::{FileStore, STORE_FILE_NAME};
pub use memory::MemoryStore;

/// Errors raised by a playlist store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Playlist not found: {0}")]
    PlaylistNotFound(Uuid),

    #[error("Song {0} is already in the playlist")]
    DuplicateSong(TrackId),

    #[error("Song {0} is not in the playlist")]
    SongNotFound(TrackId),

    #[error("Position {position} is out of range (playlist has {len} songs)")]
    InvalidPosition { position: usize, len: usize },

    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A song and its display position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionedSong {
    pub position: usize,
    pub song: Song,
}

/// A playlist as kept by a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPlaylist {
    pub id: Uuid,
    pub name: String,
    /// Always sorted by position, positions are `0..n-1`
    pub songs: Vec<PositionedSong>,
}

impl StoredPlaylist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            songs: Vec::new(),
        }
    }

    pub fn to_playlist(&self) -> Playlist {
        Playlist {
            id: self.id,
            name: self.name.clone(),
            songs: self.songs.iter().map(|s| s.song.clone()).collect(),
        }
    }

    fn reindex(&mut self) {
        for (position, entry) in self.songs.iter_mut().enumerate() {
            entry.position = position;
        }
    }

    fn insert(&mut self, song: &Song, position: usize) -> Result<(), StoreError> {
        if self.songs.iter().any(|s| s.song.track_id == song.track_id) {
            return Err(StoreError::DuplicateSong(song.track_id));
        }
        if position > self.songs.len() {
            return Err(StoreError::InvalidPosition {
                position,
                len: self.songs.len(),
            });
        }
        self.songs.insert(
            position,
            PositionedSong {
                position,
                song: song.clone(),
            },
        );
        self.reindex();
        Ok(())
    }

    fn remove(&mut self, track_id: TrackId) -> Result<(), StoreError> {
        let index = self
            .songs
            .iter()
            .position(|s| s.song.track_id == track_id)
            .ok_or(StoreError::SongNotFound(track_id))?;
        self.songs.remove(index);
        self.reindex();
        Ok(())
    }
}

/// Persistence collaborator used by the host
pub trait PlaylistStore: Send + 'static {
    /// Create an empty draft playlist
    fn create_playlist(&mut self, name: &str) -> Result<Playlist, StoreError>;

    /// Insert a song at `position`, shifting later songs down
    fn add_song(&mut self, playlist_id: Uuid, song: &Song, position: usize)
        -> Result<(), StoreError>;

    /// Remove a song; remaining positions are renumbered `0..n-1`
    fn remove_song(&mut self, playlist_id: Uuid, track_id: TrackId) -> Result<(), StoreError>;

    fn list_songs_ordered(&self, playlist_id: Uuid) -> Result<Vec<PositionedSong>, StoreError>;

    /// Read a playlist back from the working copy
    fn playlist(&self, playlist_id: Uuid) -> Result<Playlist, StoreError>;

    /// Commit the working copy
    fn save(&mut self) -> Result<(), StoreError>;

    /// Discard uncommitted changes
    fn rollback(&mut self);

    /// Committed playlists
    fn saved_playlists(&self) -> Vec<Playlist>;
}

impl<S: PlaylistStore + ?Sized> PlaylistStore for Box<S> {
    fn create_playlist(&mut self, name: &str) -> Result<Playlist, StoreError> {
        (**self).create_playlist(name)
    }

    fn add_song(
        &mut self,
        playlist_id: Uuid,
        song: &Song,
        position: usize,
    ) -> Result<(), StoreError> {
        (**self).add_song(playlist_id, song, position)
    }

    fn remove_song(&mut self, playlist_id: Uuid, track_id: TrackId) -> Result<(), StoreError> {
        (**self).remove_song(playlist_id, track_id)
    }

    fn list_songs_ordered(&self, playlist_id: Uuid) -> Result<Vec<PositionedSong>, StoreError> {
        (**self).list_songs_ordered(playlist_id)
    }

    fn playlist(&self, playlist_id: Uuid) -> Result<Playlist, StoreError> {
        (**self).playlist(playlist_id)
    }

    fn save(&mut self) -> Result<(), StoreError> {
        (**self).save()
    }

    fn rollback(&mut self) {
        (**self).rollback()
    }

    fn saved_playlists(&self) -> Vec<Playlist> {
        (**self).saved_playlists()
    }
}
