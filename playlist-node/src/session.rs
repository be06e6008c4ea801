//! Runs one host or guest session on the local network

use crate::commands::{Command, HELP};
use crate::status::{describe_song, truncate_peer_id, LogLevel, SessionStatus, Status};
use parking_lot::RwLock;
use playlist_core::catalog::CatalogClient;
use playlist_core::network::{
    Browser, DiscoveryEvent, NetworkConfig, NetworkHandle, NetworkManager, PlaylistHost,
};
use playlist_core::service::{
    GuestHandle, GuestService, HostHandle, HostService, PlaylistDelegate, SessionEnd, SyncConfig,
};
use playlist_core::store::FileStore;
use playlist_core::sync::{GuestPhase, Playlist};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How long a guest browses before giving up on finding a host
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// What this node does
#[derive(Debug, Clone)]
pub enum Mode {
    Host { name: String },
    /// Join the first host whose name, playlist or peer id matches, or any host
    Join { host: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Options {
    pub mode: Mode,
    pub display_name: String,
    pub store_dir: PathBuf,
    /// Extra multiaddrs to dial when mDNS cannot see the other side
    pub dial: Vec<String>,
}

/// Mirrors service callbacks into the dashboard status
struct StatusDelegate {
    status: Arc<RwLock<Status>>,
    ended_tx: mpsc::UnboundedSender<SessionEnd>,
}

impl PlaylistDelegate for StatusDelegate {
    fn on_playlist_changed(&self, playlist: &Playlist) {
        self.status.write().playlist_changed(playlist);
    }

    fn on_session_ended(&self, reason: SessionEnd) {
        let _ = self.ended_tx.send(reason);
    }
}

#[derive(Clone)]
enum Role {
    Host(HostHandle),
    Guest(GuestHandle),
}

struct Session {
    role: Role,
    network: NetworkHandle,
    catalog: CatalogClient,
    status: Arc<RwLock<Status>>,
}

/// Start the session, then execute commands until quit or the session ends
pub async fn run(
    options: Options,
    status: Arc<RwLock<Status>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) -> Result<(), BoxError> {
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let session = match start(&options, &status, ended_tx).await {
        Ok(session) => session,
        Err(e) => {
            let mut s = status.write();
            s.status = SessionStatus::Ended;
            s.log(LogLevel::Error, format!("Failed to start: {}", e));
            return Err(e);
        }
    };
    status.write().status = SessionStatus::Running;

    loop {
        tokio::select! {
            Some(reason) = ended_rx.recv() => {
                let mut s = status.write();
                s.status = SessionStatus::Ended;
                s.log(LogLevel::Info, format!("Session ended: {:?}", reason));
                break;
            }
            command = commands.recv() => match command {
                Some(Command::Quit) | None => {
                    session.quit().await;
                    break;
                }
                Some(command) => session.execute(command).await,
            },
        }
    }

    session.network.shutdown();
    Ok(())
}

async fn start(
    options: &Options,
    status: &Arc<RwLock<Status>>,
    ended_tx: mpsc::UnboundedSender<SessionEnd>,
) -> Result<Session, BoxError> {
    let config = NetworkConfig::default().with_display_name(options.display_name.clone());
    let (network, events, discovery) = NetworkManager::with_config(config).start()?;
    {
        let mut s = status.write();
        s.peer_id = Some(network.local_peer_id.clone());
        s.log(
            LogLevel::Info,
            format!("Peer ID: {}", truncate_peer_id(&network.local_peer_id)),
        );
    }
    for addr in &options.dial {
        network.dial_peer(addr)?;
        status.write().log(LogLevel::Info, format!("Dialing {}", addr));
    }

    let mut browser = Browser::new(network.clone(), discovery);
    browser.start();

    let delegate = Arc::new(StatusDelegate {
        status: Arc::clone(status),
        ended_tx,
    });

    let role = match &options.mode {
        Mode::Host { name } => {
            let store = FileStore::open(&options.store_dir)?;
            let host = HostService::start(
                name,
                store,
                network.clone(),
                events,
                delegate,
                SyncConfig::default(),
            )?;
            status
                .write()
                .log(LogLevel::Info, format!("Hosting \"{}\"", name));
            tokio::spawn(mirror_host(host.clone(), Arc::clone(status)));
            Role::Host(host)
        }
        Mode::Join { host: wanted } => {
            status.write().phase = "Browsing".to_string();
            let target = find_host(&mut browser, wanted.as_deref(), status).await?;
            status.write().log(
                LogLevel::Connection,
                format!("Joining {} ({})", target.name, truncate_peer_id(&target.id)),
            );
            let guest = GuestService::start(
                &target.id,
                network.clone(),
                events,
                delegate,
                SyncConfig::default(),
            );
            tokio::spawn(mirror_guest(guest.clone(), Arc::clone(status)));
            Role::Guest(guest)
        }
    };

    tokio::spawn(pump_discovery(browser, Arc::clone(status)));

    Ok(Session {
        role,
        network,
        catalog: CatalogClient::new()?,
        status: Arc::clone(status),
    })
}

/// Browse until a matching host shows up
async fn find_host(
    browser: &mut Browser<NetworkHandle>,
    wanted: Option<&str>,
    status: &Arc<RwLock<Status>>,
) -> Result<PlaylistHost, BoxError> {
    let search = async {
        while let Some(event) = browser.next_event().await {
            record_discovery(status, &event, browser.hosts());
            if let DiscoveryEvent::HostFound(host) = event {
                if wanted.map(|w| host_matches(&host, w)).unwrap_or(true) {
                    return Some(host);
                }
            }
        }
        None
    };

    match tokio::time::timeout(DISCOVERY_TIMEOUT, search).await {
        Ok(Some(host)) => Ok(host),
        Ok(None) => Err("Network stopped while browsing".into()),
        Err(_) => Err(match wanted {
            Some(w) => format!("No host matching \"{}\" found", w).into(),
            None => "No hosts found nearby".into(),
        }),
    }
}

/// Case-insensitive match on display name, playlist name or peer id
pub fn host_matches(host: &PlaylistHost, wanted: &str) -> bool {
    host.id == wanted
        || host.name.eq_ignore_ascii_case(wanted)
        || host
            .playlist_name
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case(wanted))
            .unwrap_or(false)
}

fn record_discovery(status: &Arc<RwLock<Status>>, event: &DiscoveryEvent, hosts: Vec<PlaylistHost>) {
    let mut s = status.write();
    s.hosts = hosts;
    match event {
        DiscoveryEvent::HostFound(host) => s.log(
            LogLevel::Info,
            format!(
                "Found {} ({})",
                host.name,
                host.playlist_name.as_deref().unwrap_or("untitled")
            ),
        ),
        DiscoveryEvent::HostLost(id) => {
            s.log(LogLevel::Info, format!("Lost {}", truncate_peer_id(id)))
        }
    }
}

async fn pump_discovery(mut browser: Browser<NetworkHandle>, status: Arc<RwLock<Status>>) {
    while let Some(event) = browser.next_event().await {
        record_discovery(&status, &event, browser.hosts());
    }
    debug!("Discovery stream closed");
}

async fn mirror_host(host: HostHandle, status: Arc<RwLock<Status>>) {
    let mut state = host.subscribe();
    loop {
        let (peers, phase) = {
            let s = state.borrow_and_update();
            (s.peer_list(), format!("{:?}", s.phase))
        };
        {
            let mut s = status.write();
            s.phase = phase;
            s.set_peers(peers);
        }
        if state.changed().await.is_err() {
            break;
        }
    }
}

async fn mirror_guest(guest: GuestHandle, status: Arc<RwLock<Status>>) {
    let mut state = guest.subscribe();
    loop {
        let (phase, host) = {
            let s = state.borrow_and_update();
            (s.phase, s.host_peer_id.clone())
        };
        {
            let mut s = status.write();
            s.phase = format!("{:?}", phase);
            let peers = match phase {
                GuestPhase::Connected | GuestPhase::Synced => vec![host],
                _ => Vec::new(),
            };
            if s.peers != peers {
                s.set_peers(peers);
            }
        }
        if state.changed().await.is_err() {
            break;
        }
    }
}

impl Session {
    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.status.write().log(level, message);
    }

    async fn execute(&self, command: Command) {
        match command {
            Command::Search(query) => {
                let catalog = self.catalog.clone();
                let status = Arc::clone(&self.status);
                tokio::spawn(async move {
                    let result = catalog.search(&query).await;
                    let mut s = status.write();
                    match result {
                        Ok(songs) => {
                            s.log(LogLevel::Info, format!("{} results for \"{}\"", songs.len(), query));
                            let lines: Vec<String> = songs
                                .iter()
                                .enumerate()
                                .map(|(i, song)| describe_song(i + 1, song))
                                .collect();
                            s.search_results = songs;
                            for line in lines {
                                s.log(LogLevel::Info, line);
                            }
                        }
                        Err(e) => s.log(LogLevel::Error, format!("Search failed: {}", e)),
                    }
                });
            }
            Command::Add(n) => {
                let song = self.status.read().search_result(n).cloned();
                let Some(song) = song else {
                    self.log(LogLevel::Warning, format!("No search result {}", n));
                    return;
                };
                let role = self.role.clone();
                let status = Arc::clone(&self.status);
                tokio::spawn(async move {
                    let name = song.track_name.clone();
                    let result = match role {
                        Role::Host(host) => host.add_song(song).await,
                        Role::Guest(guest) => guest.add_new_song(song).await,
                    };
                    match result {
                        Ok(()) => status.write().log(LogLevel::Sync, format!("Added {}", name)),
                        Err(e) => status
                            .write()
                            .log(LogLevel::Warning, format!("Could not add {}: {}", name, e)),
                    }
                });
            }
            Command::Remove(n) => {
                let song = self.status.read().playlist_song(n).cloned();
                let Some(song) = song else {
                    self.log(LogLevel::Warning, format!("No song {} in the playlist", n));
                    return;
                };
                match &self.role {
                    Role::Host(host) => match host.remove_song(song.track_id).await {
                        Ok(()) => self.log(LogLevel::Sync, format!("Removed {}", song.track_name)),
                        Err(e) => self.log(LogLevel::Warning, format!("Could not remove: {}", e)),
                    },
                    Role::Guest(guest) => {
                        guest.remove_song(&song);
                        self.log(LogLevel::Warning, "Only the host can remove songs");
                    }
                }
            }
            Command::List => {
                let lines: Vec<String> = match &self.status.read().playlist {
                    Some(playlist) if !playlist.is_empty() => playlist
                        .songs
                        .iter()
                        .enumerate()
                        .map(|(i, song)| describe_song(i + 1, song))
                        .collect(),
                    _ => vec!["Playlist is empty".to_string()],
                };
                for line in lines {
                    self.log(LogLevel::Info, line);
                }
            }
            Command::Hosts => {
                let hosts = self.status.read().hosts.clone();
                if hosts.is_empty() {
                    self.log(LogLevel::Info, "No hosts nearby");
                }
                for host in hosts {
                    self.log(
                        LogLevel::Info,
                        format!(
                            "{} - {} ({})",
                            host.name,
                            host.playlist_name.as_deref().unwrap_or("untitled"),
                            truncate_peer_id(&host.id)
                        ),
                    );
                }
            }
            Command::Save => match &self.role {
                Role::Host(host) => {
                    if let Err(e) = host.save_playlist().await {
                        self.log(LogLevel::Error, format!("Save failed: {}", e));
                    }
                }
                Role::Guest(guest) => {
                    guest.save_playlist();
                    self.log(LogLevel::Warning, "Only the host can save the playlist");
                }
            },
            Command::Help => self.log(LogLevel::Info, HELP),
            Command::Quit => self.quit().await,
        }
    }

    /// Discard (host) or leave (guest)
    async fn quit(&self) {
        match &self.role {
            Role::Host(host) => {
                self.log(LogLevel::Info, host.role().dismiss_label());
                host.dismiss_playlist().await;
            }
            Role::Guest(guest) => {
                self.log(LogLevel::Info, guest.role().dismiss_label());
                guest.dismiss_playlist().await;
            }
        }
        self.status.write().status = SessionStatus::Ended;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str, name: &str, playlist: Option<&str>) -> PlaylistHost {
        PlaylistHost {
            id: id.to_string(),
            name: name.to_string(),
            playlist_name: playlist.map(str::to_string),
        }
    }

    #[test]
    fn test_host_matches() {
        let h = host("12D3KooWxyz", "Kitchen Speaker", Some("Friday"));
        assert!(host_matches(&h, "kitchen speaker"));
        assert!(host_matches(&h, "FRIDAY"));
        assert!(host_matches(&h, "12D3KooWxyz"));
        assert!(!host_matches(&h, "12d3koowxyz"));
        assert!(!host_matches(&h, "Saturday"));
        assert!(!host_matches(&host("a", "b", None), "untitled"));
    }

    #[test]
    fn test_delegate_updates_status() {
        let status = Arc::new(RwLock::new(Status::new("Guest", "me")));
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        let delegate = StatusDelegate {
            status: Arc::clone(&status),
            ended_tx,
        };

        let playlist = Playlist::new(uuid::Uuid::nil(), "Party");
        delegate.on_playlist_changed(&playlist);
        delegate.on_session_ended(SessionEnd::Disconnected);

        assert_eq!(status.read().playlist.as_ref().map(|p| p.name.clone()), Some("Party".to_string()));
        assert_eq!(ended_rx.try_recv().unwrap(), SessionEnd::Disconnected);
    }
}
