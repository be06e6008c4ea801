//! Host discovery
//!
//! Hosts advertise a small key-value payload (the playlist name) so guests can
//! list them before opening a session.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Protocol namespace shared by hosts and guests
pub const SERVICE_TYPE: &str = "shared-playlist";

/// Discovery payload key carrying the playlist name
pub const PLAYLIST_NAME_KEY: &str = "playlistName";

/// Key-value payload published while advertising
pub type DiscoveryInfo = BTreeMap<String, String>;

/// Build the discovery payload for a playlist
pub fn discovery_info(playlist_name: &str) -> DiscoveryInfo {
    let mut info = DiscoveryInfo::new();
    info.insert(PLAYLIST_NAME_KEY.to_string(), playlist_name.to_string());
    info
}

/// What an advertising host answers to a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub service_type: String,
    /// Device display name
    pub display_name: String,
    pub info: DiscoveryInfo,
}

/// A host seen by the browser
#[derive(Debug, Clone)]
pub struct PlaylistHost {
    /// Peer identity, stable for one discovery session
    pub id: String,
    /// Device display name
    pub name: String,
    /// Missing if the host did not publish one
    pub playlist_name: Option<String>,
}

impl PlaylistHost {
    pub fn from_announcement(peer_id: impl Into<String>, announcement: &Announcement) -> Self {
        Self {
            id: peer_id.into(),
            name: announcement.display_name.clone(),
            playlist_name: announcement.info.get(PLAYLIST_NAME_KEY).cloned(),
        }
    }
}

// Identity is the peer id only
impl PartialEq for PlaylistHost {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PlaylistHost {}

impl Hash for PlaylistHost {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Browser notifications
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    HostFound(PlaylistHost),
    HostLost(String),
}

/// Something that can publish our presence
pub trait Advertise: Send + Sync + 'static {
    fn start_advertising(&self, info: DiscoveryInfo);
    fn stop_advertising(&self);
}

/// Something that can look for advertising hosts
pub trait Browse: Send + Sync + 'static {
    fn start_browsing(&self);
    fn stop_browsing(&self);
}

/// Toggles advertising of one discovery payload. Stops on drop.
pub struct Advertiser<A: Advertise> {
    control: A,
    info: DiscoveryInfo,
    active: bool,
}

impl<A: Advertise> Advertiser<A> {
    pub fn new(control: A, info: DiscoveryInfo) -> Self {
        Self {
            control,
            info,
            active: false,
        }
    }

    pub fn start(&mut self) {
        if self.active {
            return;
        }
        debug!("Advertiser: starting ({:?})", self.info);
        self.control.start_advertising(self.info.clone());
        self.active = true;
    }

    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        debug!("Advertiser: stopping");
        self.control.stop_advertising();
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl<A: Advertise> Drop for Advertiser<A> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Keeps the live set of hosts reported by a [`Browse`] implementation.
/// Stops on drop.
pub struct Browser<B: Browse> {
    control: B,
    events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    hosts: HashMap<String, PlaylistHost>,
    active: bool,
}

impl<B: Browse> Browser<B> {
    pub fn new(control: B, events: mpsc::UnboundedReceiver<DiscoveryEvent>) -> Self {
        Self {
            control,
            events,
            hosts: HashMap::new(),
            active: false,
        }
    }

    pub fn start(&mut self) {
        if self.active {
            return;
        }
        self.control.start_browsing();
        self.active = true;
    }

    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.control.stop_browsing();
        self.hosts.clear();
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Wait for the next change to the host set.
    ///
    /// Returns None once the underlying network is gone. Lost events for hosts
    /// that were never found are swallowed.
    pub async fn next_event(&mut self) -> Option<DiscoveryEvent> {
        loop {
            let event = self.events.recv().await?;
            if let Some(event) = self.apply(event) {
                return Some(event);
            }
        }
    }

    fn apply(&mut self, event: DiscoveryEvent) -> Option<DiscoveryEvent> {
        if !self.active {
            return None;
        }
        match event {
            DiscoveryEvent::HostFound(host) => {
                self.hosts.insert(host.id.clone(), host.clone());
                Some(DiscoveryEvent::HostFound(host))
            }
            DiscoveryEvent::HostLost(id) => self
                .hosts
                .remove(&id)
                .map(|_| DiscoveryEvent::HostLost(id)),
        }
    }

    /// Hosts currently visible, sorted by playlist name then device name
    pub fn hosts(&self) -> Vec<PlaylistHost> {
        let mut list: Vec<PlaylistHost> = self.hosts.values().cloned().collect();
        list.sort_by(|a, b| {
            a.playlist_name
                .cmp(&b.playlist_name)
                .then_with(|| a.name.cmp(&b.name))
        });
        list
    }

    pub fn host(&self, id: &str) -> Option<&PlaylistHost> {
        self.hosts.get(id)
    }
}

impl<B: Browse> Drop for Browser<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
