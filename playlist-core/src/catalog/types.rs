//! Types for iTunes Search API responses

use serde::Deserialize;

use crate::sync::Song;

/// Top-level search response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub result_count: usize,
    pub results: Vec<SearchResult>,
}

/// One search hit. Only `wrapperType` is guaranteed; the rest depends on the kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub wrapper_type: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub artist_id: Option<i64>,
    #[serde(default)]
    pub track_id: Option<i64>,
    #[serde(default)]
    pub artist_name: Option<String>,
    #[serde(default)]
    pub track_name: Option<String>,
    #[serde(default, rename = "artworkUrl100")]
    pub artwork_url_100: Option<String>,
}

impl SearchResult {
    /// Convert a song hit; anything else (videos, podcasts, partial records) is None
    pub fn into_song(self) -> Option<Song> {
        if self.wrapper_type != "track" || self.kind.as_deref() != Some("song") {
            return None;
        }
        Some(Song {
            artist_id: self.artist_id?,
            artist_name: self.artist_name?,
            artwork_url: self.artwork_url_100?,
            track_id: self.track_id?,
            track_name: self.track_name?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "resultCount": 3,
        "results": [
            {
                "wrapperType": "track",
                "kind": "song",
                "artistId": 5468295,
                "collectionId": 1440818839,
                "trackId": 1440818876,
                "artistName": "Daft Punk",
                "trackName": "One More Time",
                "artworkUrl100": "https://is1-ssl.mzstatic.com/image/100x100bb.jpg",
                "trackPrice": 1.29
            },
            {
                "wrapperType": "track",
                "kind": "music-video",
                "artistId": 5468295,
                "trackId": 1,
                "artistName": "Daft Punk",
                "trackName": "One More Time (Video)",
                "artworkUrl100": "https://example.com/v.jpg"
            },
            {
                "wrapperType": "collection",
                "collectionName": "Discovery"
            }
        ]
    }"#;

    #[test]
    fn test_only_songs_are_kept() {
        let response: SearchResponse = serde_json::from_str(RESPONSE).unwrap();
        assert_eq!(response.result_count, 3);

        let songs: Vec<Song> = response
            .results
            .into_iter()
            .filter_map(SearchResult::into_song)
            .collect();
        assert_eq!(
            songs,
            vec![Song {
                artist_id: 5468295,
                artist_name: "Daft Punk".to_string(),
                artwork_url: "https://is1-ssl.mzstatic.com/image/100x100bb.jpg".to_string(),
                track_id: 1440818876,
                track_name: "One More Time".to_string(),
            }]
        );
    }

    #[test]
    fn test_incomplete_song_skipped() {
        let result: SearchResult = serde_json::from_str(
            r#"{"wrapperType":"track","kind":"song","trackId":1,"trackName":"No artist"}"#,
        )
        .unwrap();
        assert!(result.into_song().is_none());
    }
}
