//! Song catalog search
//!
//! Looks songs up in the iTunes catalog so they can be proposed to a playlist.

mod client;
mod types;

pub use client::{search_term, CatalogClient, CatalogError, DEFAULT_BASE_URL};
pub use types::{SearchResponse, SearchResult};
