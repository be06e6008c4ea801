//! Transport Session abstraction
//!
//! Services talk to the network only through [`Transport`] and consume the
//! [`TransportEvent`] stream it produces. The libp2p [`NetworkHandle`] and the
//! in-process [`LoopbackTransport`] both implement it.
//!
//! [`NetworkHandle`]: super::NetworkHandle
//! [`LoopbackTransport`]: super::LoopbackTransport

use std::fmt;
use std::time::Duration;

use super::policy::SessionPolicy;

/// Connection state of one remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    NotConnected,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected => write!(f, "connected"),
            PeerState::NotConnected => write!(f, "not connected"),
        }
    }
}

/// Notifications produced by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A remote peer changed connection state
    PeerStateChanged { peer_id: String, state: PeerState },
    /// Payload received from a session peer (in arrival order per sender)
    Data { from: String, payload: Vec<u8> },
}

/// Point-to-point encrypted session with a set of remote peers.
///
/// None of these calls block: outcomes arrive later as [`TransportEvent`]s.
pub trait Transport: Send + Sync + 'static {
    /// Our own peer identity
    fn local_peer_id(&self) -> &str;

    /// Install the rule for inbound invitations and accepted outbound ones.
    /// Until a policy is set every invitation is rejected.
    fn set_policy(&self, policy: SessionPolicy);

    /// Ask a remote peer to join our session
    fn connect(&self, peer_id: &str, timeout: Duration);

    /// Reliable send to the given session peers. Failures are logged.
    fn send(&self, payload: Vec<u8>, to: &[String]);

    /// Leave every session. Safe to call more than once.
    fn disconnect(&self);
}
