//! Sync Protocol Messages
//!
//! JSON messages exchanged over a session. Every message carries a `case`
//! discriminator; each case only carries the fields it needs:
//!
//! - `{"case":"request","requestType":"initialPlaylist"}`
//! - `{"case":"playlist","playlist":{"id":..,"name":..,"songs":[..]}}`
//! - `{"case":"addSongAtIndex","song":{..},"index":0}`
//!
//! Unknown discriminators (or unknown request types) decode to
//! [`SyncMessage::Noop`] so that newer peers can talk to older ones.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Catalog identity of a song
pub type TrackId = i64;

/// A song from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub artist_id: i64,
    pub artist_name: String,
    #[serde(rename = "artworkURL")]
    pub artwork_url: String,
    /// Stable identity within the catalog, used for membership checks
    pub track_id: TrackId,
    pub track_name: String,
}

/// A playlist snapshot. Guests only ever see whole snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: Uuid,
    pub name: String,
    /// Songs in display order
    pub songs: Vec<Song>,
}

impl Playlist {
    /// Create an empty playlist
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            songs: Vec::new(),
        }
    }

    /// Membership by track id (not by full field equality)
    pub fn contains(&self, song: &Song) -> bool {
        self.contains_track(song.track_id)
    }

    pub fn contains_track(&self, track_id: TrackId) -> bool {
        self.songs.iter().any(|s| s.track_id == track_id)
    }

    /// Display position of a track
    pub fn position_of(&self, track_id: TrackId) -> Option<usize> {
        self.songs.iter().position(|s| s.track_id == track_id)
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

/// What a guest can ask the host for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    InitialPlaylist,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::InitialPlaylist => "initialPlaylist",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "initialPlaylist" => Some(RequestType::InitialPlaylist),
            _ => None,
        }
    }
}

/// Messages exchanged between host and guests
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Guest asks the host for something (currently only the initial playlist)
    Request(RequestType),
    /// Full playlist snapshot (host -> guests)
    Playlist(Playlist),
    /// Guest proposes a song. The index is advisory; the host appends.
    AddSongAtIndex { song: Song, index: i64 },
    /// Decoded from an unrecognized case. Consumers ignore it.
    Noop,
}

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("No-op messages are never sent")]
    NoopMessage,
}

/// On-the-wire shape of a message
#[derive(Serialize, Deserialize)]
#[serde(tag = "case")]
enum WireMessage {
    #[serde(rename = "request")]
    Request {
        #[serde(rename = "requestType")]
        request_type: String,
    },

    #[serde(rename = "playlist")]
    Playlist { playlist: Playlist },

    #[serde(rename = "addSongAtIndex")]
    AddSongAtIndex { song: Song, index: i64 },

    #[serde(other)]
    Unknown,
}

impl SyncMessage {
    /// Serialize to UTF-8 JSON bytes
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let wire = match self {
            SyncMessage::Request(kind) => WireMessage::Request {
                request_type: kind.as_str().to_string(),
            },
            SyncMessage::Playlist(playlist) => WireMessage::Playlist {
                playlist: playlist.clone(),
            },
            SyncMessage::AddSongAtIndex { song, index } => WireMessage::AddSongAtIndex {
                song: song.clone(),
                index: *index,
            },
            SyncMessage::Noop => return Err(CodecError::NoopMessage),
        };

        serde_json::to_vec(&wire).map_err(CodecError::Encode)
    }

    /// Parse bytes received from a peer.
    ///
    /// Structurally invalid input is an error; an unrecognized `case` or
    /// request type is not, it becomes [`SyncMessage::Noop`].
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let wire: WireMessage = serde_json::from_slice(bytes).map_err(CodecError::Malformed)?;

        Ok(match wire {
            WireMessage::Request { request_type } => match RequestType::parse(&request_type) {
                Some(kind) => SyncMessage::Request(kind),
                None => SyncMessage::Noop,
            },
            WireMessage::Playlist { playlist } => SyncMessage::Playlist(playlist),
            WireMessage::AddSongAtIndex { song, index } => {
                SyncMessage::AddSongAtIndex { song, index }
            }
            WireMessage::Unknown => SyncMessage::Noop,
        })
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, SyncMessage::Noop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(track_id: TrackId) -> Song {
        Song {
            artist_id: 909253,
            artist_name: "Jack Johnson".to_string(),
            artwork_url: format!("https://is1-ssl.mzstatic.com/image/{}/100x100bb.jpg", track_id),
            track_id,
            track_name: format!("Track {}", track_id),
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let bytes = SyncMessage::Request(RequestType::InitialPlaylist)
            .encode()
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["case"], "request");
        assert_eq!(value["requestType"], "initialPlaylist");
    }

    #[test]
    fn test_add_song_wire_shape() {
        let msg = SyncMessage::AddSongAtIndex {
            song: song(42),
            index: 0,
        };
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();

        assert_eq!(value["case"], "addSongAtIndex");
        assert_eq!(value["index"], 0);
        assert_eq!(value["song"]["trackId"], 42);
        assert!(value["song"]["artworkURL"].is_string());
        assert!(value.get("playlist").is_none());
    }

    #[test]
    fn test_round_trip() {
        let empty = Playlist::new(Uuid::new_v4(), "Party");
        let mut full = Playlist::new(Uuid::new_v4(), "Road trip");
        full.songs = vec![song(1), song(2), song(3)];

        let messages = vec![
            SyncMessage::Request(RequestType::InitialPlaylist),
            SyncMessage::Playlist(empty),
            SyncMessage::Playlist(full),
            SyncMessage::AddSongAtIndex {
                song: song(42),
                index: 7,
            },
        ];

        for msg in messages {
            let decoded = SyncMessage::decode(&msg.encode().unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_unknown_case_is_noop() {
        let decoded = SyncMessage::decode(br#"{"case":"shuffle","seed":4}"#).unwrap();
        assert!(decoded.is_noop());
    }

    #[test]
    fn test_unknown_request_type_is_noop() {
        let decoded =
            SyncMessage::decode(br#"{"case":"request","requestType":"lyrics"}"#).unwrap();
        assert_eq!(decoded, SyncMessage::Noop);
    }

    #[test]
    fn test_malformed_bytes() {
        assert!(matches!(
            SyncMessage::decode(b"\x00\xffnot json"),
            Err(CodecError::Malformed(_))
        ));
        // Known case with its payload missing
        assert!(matches!(
            SyncMessage::decode(br#"{"case":"playlist"}"#),
            Err(CodecError::Malformed(_))
        ));
        // No discriminator at all
        assert!(matches!(
            SyncMessage::decode(br#"{"requestType":"initialPlaylist"}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decodes_uppercase_uuid() {
        let raw = r#"{"case":"playlist","playlist":{"id":"E621E1F8-C36C-495A-93FC-0C247A3E6E5F","name":"Party","songs":[]}}"#;
        match SyncMessage::decode(raw.as_bytes()).unwrap() {
            SyncMessage::Playlist(p) => {
                assert_eq!(p.name, "Party");
                assert!(p.is_empty());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_noop_is_not_encodable() {
        assert!(matches!(
            SyncMessage::Noop.encode(),
            Err(CodecError::NoopMessage)
        ));
    }

    #[test]
    fn test_membership_by_track_id() {
        let mut playlist = Playlist::new(Uuid::new_v4(), "Party");
        playlist.songs.push(song(42));

        let mut renamed = song(42);
        renamed.track_name = "Different metadata".to_string();

        assert!(playlist.contains(&renamed));
        assert!(!playlist.contains(&song(43)));
        assert_eq!(playlist.position_of(42), Some(0));
    }
}
