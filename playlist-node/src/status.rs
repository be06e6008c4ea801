//! Session status shown by the dashboard

use chrono::{DateTime, Local};
use playlist_core::network::PlaylistHost;
use playlist_core::sync::{Playlist, Song};
use std::collections::VecDeque;
use tracing::{info, warn};

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

/// A log entry for the dashboard
#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Connection,
    Sync,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Connection => "CONN",
            LogLevel::Sync => "SYNC",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum SessionStatus {
    Starting,
    Running,
    Ended,
}

/// Everything the front end displays
pub struct Status {
    /// Node start time
    pub start_time: DateTime<Local>,

    /// "Host" or "Guest"
    pub role: &'static str,

    /// Our peer ID
    pub peer_id: Option<String>,

    pub display_name: String,

    /// Host or guest phase, as text
    pub phase: String,

    /// Last known playlist
    pub playlist: Option<Playlist>,

    /// Remote peers in the session (host) or the host we joined (guest)
    pub peers: Vec<String>,

    /// Hosts currently advertising nearby
    pub hosts: Vec<PlaylistHost>,

    /// Results of the last search, numbered from 1
    pub search_results: Vec<Song>,

    /// Log entries
    pub logs: VecDeque<LogEntry>,

    pub status: SessionStatus,
}

impl Status {
    pub fn new(role: &'static str, display_name: impl Into<String>) -> Self {
        Self {
            start_time: Local::now(),
            role,
            peer_id: None,
            display_name: display_name.into(),
            phase: "Idle".to_string(),
            playlist: None,
            peers: Vec::new(),
            hosts: Vec::new(),
            search_results: Vec::new(),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            status: SessionStatus::Starting,
        }
    }

    /// Add a log entry. Also goes to tracing, which only prints in logging mode.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Warning | LogLevel::Error => warn!("{}", message),
            _ => info!("{}", message),
        }

        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message,
        });
    }

    /// Replace the peer list, logging who came and went
    pub fn set_peers(&mut self, peers: Vec<String>) {
        let joined: Vec<String> = peers
            .iter()
            .filter(|p| !self.peers.contains(p))
            .cloned()
            .collect();
        let left: Vec<String> = self
            .peers
            .iter()
            .filter(|p| !peers.contains(p))
            .cloned()
            .collect();

        self.peers = peers;
        for peer in joined {
            self.log(LogLevel::Connection, format!("Connected: {}", truncate_peer_id(&peer)));
        }
        for peer in left {
            self.log(LogLevel::Connection, format!("Disconnected: {}", truncate_peer_id(&peer)));
        }
    }

    /// Store a new snapshot
    pub fn playlist_changed(&mut self, playlist: &Playlist) {
        let count = playlist.len();
        self.playlist = Some(playlist.clone());
        self.log(
            LogLevel::Sync,
            format!("{}: {} song{}", playlist.name, count, if count == 1 { "" } else { "s" }),
        );
    }

    /// Nth song (1-based) of the last search
    pub fn search_result(&self, n: usize) -> Option<&Song> {
        n.checked_sub(1).and_then(|i| self.search_results.get(i))
    }

    /// Nth song (1-based) of the current playlist
    pub fn playlist_song(&self, n: usize) -> Option<&Song> {
        let playlist = self.playlist.as_ref()?;
        n.checked_sub(1).and_then(|i| playlist.songs.get(i))
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let duration = Local::now().signed_duration_since(self.start_time);
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            format!("{}h {}m", hours, mins)
        }
    }
}

/// Truncate peer ID for display (show first and last few chars)
pub fn truncate_peer_id(peer_id: &str) -> String {
    if peer_id.len() > 16 && peer_id.is_ascii() {
        format!("{}...{}", &peer_id[..8], &peer_id[peer_id.len() - 4..])
    } else {
        peer_id.to_string()
    }
}

/// One line per song, numbered from 1
pub fn describe_song(n: usize, song: &Song) -> String {
    format!("{:>2}. {} - {}", n, song.track_name, song.artist_name)
}
