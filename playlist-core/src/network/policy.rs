//! Inbound session verification

/// Maximum session size including ourselves
pub const MAX_SESSION_PEERS: usize = 7;

/// Decides which remote peers may join or talk to our session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPolicy {
    /// Host: anyone, as long as the session stays under `max_peers` (self included)
    Capped { max_peers: usize },
    /// Guest: only the host we targeted
    HostOnly(String),
}

impl SessionPolicy {
    pub fn host() -> Self {
        SessionPolicy::Capped {
            max_peers: MAX_SESSION_PEERS,
        }
    }

    pub fn guest(host_peer_id: impl Into<String>) -> Self {
        SessionPolicy::HostOnly(host_peer_id.into())
    }

    /// Whether `peer_id` may join, given how many remote peers are connected now
    pub fn admits(&self, peer_id: &str, connected_remote: usize) -> bool {
        match self {
            SessionPolicy::Capped { max_peers } => connected_remote + 1 < *max_peers,
            SessionPolicy::HostOnly(host) => host == peer_id,
        }
    }
}
