//! JSON file store

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use super::{MemoryStore, PlaylistStore, PositionedSong, StoreError, StoredPlaylist};
use crate::sync::{Playlist, Song, TrackId};

/// Name of the file holding committed playlists
pub const STORE_FILE_NAME: &str = "playlists.json";

/// A [`MemoryStore`] whose committed state lives in `<dir>/playlists.json`
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Open (or create) the store in `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILE_NAME);

        let playlists: Vec<StoredPlaylist> = if path.exists() {
            let raw = fs::read(&path)?;
            serde_json::from_slice(&raw)?
        } else {
            Vec::new()
        };
        info!(
            "Opened playlist store at {} ({} saved playlists)",
            path.display(),
            playlists.len()
        );

        Ok(Self {
            path,
            inner: MemoryStore::with_committed(playlists),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the working copy; nothing is committed in memory until this succeeds
    fn write_drafts(&self) -> Result<(), StoreError> {
        let playlists: Vec<&StoredPlaylist> = self.inner.drafts().collect();
        let json = serde_json::to_vec_pretty(&playlists)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Wrote {} playlists to {}", playlists.len(), self.path.display());
        Ok(())
    }
}

impl PlaylistStore for FileStore {
    fn create_playlist(&mut self, name: &str) -> Result<Playlist, StoreError> {
        self.inner.create_playlist(name)
    }

    fn add_song(
        &mut self,
        playlist_id: Uuid,
        song: &Song,
        position: usize,
    ) -> Result<(), StoreError> {
        self.inner.add_song(playlist_id, song, position)
    }

    fn remove_song(&mut self, playlist_id: Uuid, track_id: TrackId) -> Result<(), StoreError> {
        self.inner.remove_song(playlist_id, track_id)
    }

    fn list_songs_ordered(&self, playlist_id: Uuid) -> Result<Vec<PositionedSong>, StoreError> {
        self.inner.list_songs_ordered(playlist_id)
    }

    fn playlist(&self, playlist_id: Uuid) -> Result<Playlist, StoreError> {
        self.inner.playlist(playlist_id)
    }

    fn save(&mut self) -> Result<(), StoreError> {
        self.write_drafts()?;
        self.inner.save()
    }

    fn rollback(&mut self) {
        self.inner.rollback()
    }

    fn saved_playlists(&self) -> Vec<Playlist> {
        self.inner.saved_playlists()
    }
}
