//! P2P Networking
//!
//! Local-network sessions between one host and its guests, on libp2p or on an
//! in-process loopback hub.

mod behaviour;
mod discovery;
mod frame;
mod loopback;
mod policy;
mod transport;

pub use behaviour::{NetworkConfig, NetworkError, NetworkHandle, NetworkManager, IDENTIFY_PROTOCOL};
pub use discovery::{
    discovery_info, Advertise, Advertiser, Announcement, Browse, Browser, DiscoveryEvent,
    DiscoveryInfo, PlaylistHost, PLAYLIST_NAME_KEY, SERVICE_TYPE,
};
pub use frame::{SessionFrame, SessionReply, MAX_FRAME_SIZE, SESSION_PROTOCOL};
pub use loopback::{LoopbackEndpoint, LoopbackHub, LoopbackTransport};
pub use policy::{SessionPolicy, MAX_SESSION_PEERS};
pub use transport::{PeerState, Transport, TransportEvent};
