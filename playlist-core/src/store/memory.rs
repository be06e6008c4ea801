//! In-memory store

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use super::{PlaylistStore, PositionedSong, StoreError, StoredPlaylist};
use crate::sync::{Playlist, Song, TrackId};

/// Keeps committed playlists and a working copy in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    committed: BTreeMap<Uuid, StoredPlaylist>,
    working: BTreeMap<Uuid, StoredPlaylist>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from already committed playlists
    pub fn with_committed(playlists: Vec<StoredPlaylist>) -> Self {
        let committed: BTreeMap<Uuid, StoredPlaylist> =
            playlists.into_iter().map(|p| (p.id, p)).collect();
        Self {
            working: committed.clone(),
            committed,
        }
    }

    /// Working copy in its stored form, as `save` would commit it
    pub fn drafts(&self) -> impl Iterator<Item = &StoredPlaylist> {
        self.working.values()
    }

    /// Whether the working copy differs from the committed state
    pub fn has_changes(&self) -> bool {
        self.committed != self.working
    }

    fn working_mut(&mut self, playlist_id: Uuid) -> Result<&mut StoredPlaylist, StoreError> {
        self.working
            .get_mut(&playlist_id)
            .ok_or(StoreError::PlaylistNotFound(playlist_id))
    }

    fn working(&self, playlist_id: Uuid) -> Result<&StoredPlaylist, StoreError> {
        self.working
            .get(&playlist_id)
            .ok_or(StoreError::PlaylistNotFound(playlist_id))
    }
}

impl PlaylistStore for MemoryStore {
    fn create_playlist(&mut self, name: &str) -> Result<Playlist, StoreError> {
        let stored = StoredPlaylist::new(name);
        let playlist = stored.to_playlist();
        debug!("Store: created draft {} ({})", stored.name, stored.id);
        self.working.insert(stored.id, stored);
        Ok(playlist)
    }

    fn add_song(
        &mut self,
        playlist_id: Uuid,
        song: &Song,
        position: usize,
    ) -> Result<(), StoreError> {
        self.working_mut(playlist_id)?.insert(song, position)
    }

    fn remove_song(&mut self, playlist_id: Uuid, track_id: TrackId) -> Result<(), StoreError> {
        self.working_mut(playlist_id)?.remove(track_id)
    }

    fn list_songs_ordered(&self, playlist_id: Uuid) -> Result<Vec<PositionedSong>, StoreError> {
        let mut songs = self.working(playlist_id)?.songs.clone();
        songs.sort_by_key(|s| s.position);
        Ok(songs)
    }

    fn playlist(&self, playlist_id: Uuid) -> Result<Playlist, StoreError> {
        let stored = self.working(playlist_id)?;
        Ok(Playlist {
            id: stored.id,
            name: stored.name.clone(),
            songs: self
                .list_songs_ordered(playlist_id)?
                .into_iter()
                .map(|s| s.song)
                .collect(),
        })
    }

    fn save(&mut self) -> Result<(), StoreError> {
        self.committed = self.working.clone();
        Ok(())
    }

    fn rollback(&mut self) {
        self.working = self.committed.clone();
    }

    fn saved_playlists(&self) -> Vec<Playlist> {
        self.committed.values().map(|p| p.to_playlist()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(track_id: i64, name: &str) -> Song {
        Song {
            artist_id: 7,
            artist_name: "Band".to_string(),
            artwork_url: format!("https://example.com/{}.jpg", track_id),
            track_id,
            track_name: name.to_string(),
        }
    }

    fn positions(store: &MemoryStore, id: Uuid) -> Vec<(usize, i64)> {
        store
            .list_songs_ordered(id)
            .unwrap()
            .into_iter()
            .map(|s| (s.position, s.song.track_id))
            .collect()
    }

    #[test]
    fn test_add_assigns_positions() {
        let mut store = MemoryStore::new();
        let playlist = store.create_playlist("Party").unwrap();
        store.add_song(playlist.id, &song(1, "A"), 0).unwrap();
        store.add_song(playlist.id, &song(2, "B"), 1).unwrap();
        store.add_song(playlist.id, &song(3, "C"), 0).unwrap();
        assert_eq!(positions(&store, playlist.id), vec![(0, 3), (1, 1), (2, 2)]);

        assert!(matches!(
            store.add_song(playlist.id, &song(9, "X"), 9),
            Err(StoreError::InvalidPosition { position: 9, len: 3 })
        ));
    }

    #[test]
    fn test_duplicate_track_refused() {
        let mut store = MemoryStore::new();
        let playlist = store.create_playlist("Party").unwrap();
        store.add_song(playlist.id, &song(1, "A"), 0).unwrap();
        // Same track id, different metadata
        assert!(matches!(
            store.add_song(playlist.id, &song(1, "A (remaster)"), 1),
            Err(StoreError::DuplicateSong(1))
        ));
    }

    #[test]
    fn test_remove_reindexes() {
        let mut store = MemoryStore::new();
        let playlist = store.create_playlist("Party").unwrap();
        for (i, name) in ["A", "B", "C", "D"].iter().enumerate() {
            store
                .add_song(playlist.id, &song(i as i64 + 1, name), i)
                .unwrap();
        }

        store.remove_song(playlist.id, 2).unwrap();
        assert_eq!(positions(&store, playlist.id), vec![(0, 1), (1, 3), (2, 4)]);

        store.remove_song(playlist.id, 1).unwrap();
        assert_eq!(positions(&store, playlist.id), vec![(0, 3), (1, 4)]);

        assert!(matches!(
            store.remove_song(playlist.id, 99),
            Err(StoreError::SongNotFound(99))
        ));
    }

    #[test]
    fn test_save_and_rollback() {
        let mut store = MemoryStore::new();
        let draft = store.create_playlist("Party").unwrap();
        store.add_song(draft.id, &song(1, "A"), 0).unwrap();
        assert!(store.saved_playlists().is_empty());
        assert!(store.has_changes());

        store.save().unwrap();
        assert_eq!(store.saved_playlists().len(), 1);
        assert!(!store.has_changes());

        store.add_song(draft.id, &song(2, "B"), 1).unwrap();
        let discarded = store.create_playlist("Scratch").unwrap();
        store.rollback();

        assert_eq!(store.playlist(draft.id).unwrap().songs, vec![song(1, "A")]);
        assert!(matches!(
            store.playlist(discarded.id),
            Err(StoreError::PlaylistNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_playlist() {
        let mut store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.add_song(id, &song(1, "A"), 0),
            Err(StoreError::PlaylistNotFound(_))
        ));
    }
}
