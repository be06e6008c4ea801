//! iTunes Search API HTTP Client

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::types::{SearchResponse, SearchResult};
use crate::sync::Song;

/// Public iTunes Search API
pub const DEFAULT_BASE_URL: &str = "https://itunes.apple.com";

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when searching the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: HTTP {0}")]
    Api(u16),
}

/// Song search over the iTunes catalog
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new() -> Result<Self, CatalogError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client at another server (mirrors, tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, CatalogError> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build the search request. Spaces in the term are sent as `+`.
    pub fn search_request(&self, query: &str) -> Result<reqwest::Request, CatalogError> {
        let request = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("term", search_term(query)), ("entity", "song")])
            .header("Content-type", "application/json")
            .build()?;
        Ok(request)
    }

    /// Search for songs. An empty query returns no results without a request.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn search(&self, query: &str) -> Result<Vec<Song>, CatalogError> {
        if search_term(query).is_empty() {
            return Ok(Vec::new());
        }

        let resp = self.http.execute(self.search_request(query)?).await?;
        let status = resp.status();
        if !status.is_success() {
            warn!("Catalog search failed: HTTP {}", status.as_u16());
            return Err(CatalogError::Api(status.as_u16()));
        }

        let body: SearchResponse = resp.json().await?;
        let songs: Vec<Song> = body
            .results
            .into_iter()
            .filter_map(SearchResult::into_song)
            .collect();
        debug!(
            "Catalog returned {} results, {} songs",
            body.result_count,
            songs.len()
        );
        Ok(songs)
    }
}

/// Query text as sent to the catalog
pub fn search_term(query: &str) -> &str {
    query.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_request_url() {
        let client = CatalogClient::new().unwrap();
        let request = client.search_request("  daft punk ").unwrap();
        assert_eq!(request.url().path(), "/search");
        assert_eq!(request.url().host_str(), Some("itunes.apple.com"));
        assert_eq!(request.url().query(), Some("term=daft+punk&entity=song"));
    }

    #[test]
    fn test_search_term_escapes_reserved() {
        let client = CatalogClient::with_base_url("http://127.0.0.1:9/").unwrap();
        let request = client.search_request("AC/DC & co").unwrap();
        assert_eq!(
            request.url().query(),
            Some("term=AC%2FDC+%26+co&entity=song")
        );
        assert_eq!(request.url().as_str().matches("//").count(), 1);
    }

    #[tokio::test]
    async fn test_blank_query_skips_request() {
        // Nothing listens on the discard port; a request would fail
        let client = CatalogClient::with_base_url("http://127.0.0.1:9").unwrap();
        assert!(client.search("   ").await.unwrap().is_empty());
    }
}
