//! Shared Playlist - Core Library
//!
//! This library lets one device host a playlist on the local network while
//! nearby guests discover it, join, and propose songs over P2P networking.

pub mod catalog;
pub mod logging;
pub mod network;
pub mod service;
pub mod store;
pub mod sync;

// Re-exports for convenience
pub use catalog::CatalogClient;
pub use network::{NetworkConfig, NetworkManager, PlaylistHost};
pub use service::{GuestHandle, GuestService, HostHandle, HostService, PlaylistDelegate, SyncConfig};
pub use store::{FileStore, PlaylistStore};
pub use sync::{Playlist, Song, SyncMessage};
