//! In-process transport
//!
//! A hub that wires endpoints together inside one process. Invitations,
//! payload delivery and discovery behave like the libp2p transport, minus the
//! sockets.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::discovery::{Advertise, Browse, DiscoveryEvent, DiscoveryInfo, PlaylistHost, PLAYLIST_NAME_KEY};
use super::policy::SessionPolicy;
use super::transport::{PeerState, Transport, TransportEvent};

struct Endpoint {
    display_name: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    discovery: mpsc::UnboundedSender<DiscoveryEvent>,
    policy: Option<SessionPolicy>,
    sessions: BTreeSet<String>,
    advertising: Option<DiscoveryInfo>,
    browsing: bool,
}

impl Endpoint {
    fn notify(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn peer_state(&self, peer_id: &str, state: PeerState) {
        self.notify(TransportEvent::PeerStateChanged {
            peer_id: peer_id.to_string(),
            state,
        });
    }

    fn admits(&self, peer_id: &str) -> bool {
        self.policy
            .as_ref()
            .map(|p| p.admits(peer_id, self.sessions.len()))
            .unwrap_or(false)
    }

    fn as_host(&self, id: &str) -> Option<PlaylistHost> {
        self.advertising.as_ref().map(|info| PlaylistHost {
            id: id.to_string(),
            name: self.display_name.clone(),
            playlist_name: info.get(PLAYLIST_NAME_KEY).cloned(),
        })
    }
}

/// Shared switchboard for [`LoopbackTransport`] endpoints
#[derive(Clone, Default)]
pub struct LoopbackHub {
    endpoints: Arc<Mutex<HashMap<String, Endpoint>>>,
}

/// Receivers handed out with a new endpoint
pub struct LoopbackEndpoint {
    pub transport: LoopbackTransport,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub discovery: mpsc::UnboundedReceiver<DiscoveryEvent>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new endpoint. An existing endpoint with the same id is replaced.
    pub fn endpoint(&self, peer_id: &str, display_name: &str) -> LoopbackEndpoint {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (discovery_tx, discovery) = mpsc::unbounded_channel();
        self.endpoints.lock().insert(
            peer_id.to_string(),
            Endpoint {
                display_name: display_name.to_string(),
                events: events_tx,
                discovery: discovery_tx,
                policy: None,
                sessions: BTreeSet::new(),
                advertising: None,
                browsing: false,
            },
        );
        LoopbackEndpoint {
            transport: LoopbackTransport {
                hub: self.clone(),
                peer_id: peer_id.to_string(),
            },
            events,
            discovery,
        }
    }
}

/// One peer attached to a [`LoopbackHub`]
#[derive(Clone)]
pub struct LoopbackTransport {
    hub: LoopbackHub,
    peer_id: String,
}

impl LoopbackTransport {
    /// Remote peers currently in our session
    pub fn session_peers(&self) -> Vec<String> {
        self.hub
            .endpoints
            .lock()
            .get(&self.peer_id)
            .map(|e| e.sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Leave the hub entirely, as a process exit would
    pub fn shutdown(&self) {
        self.disconnect();
        self.stop_advertising();
        self.hub.endpoints.lock().remove(&self.peer_id);
    }
}

impl Transport for LoopbackTransport {
    fn local_peer_id(&self) -> &str {
        &self.peer_id
    }

    fn set_policy(&self, policy: SessionPolicy) {
        if let Some(me) = self.hub.endpoints.lock().get_mut(&self.peer_id) {
            me.policy = Some(policy);
        }
    }

    fn connect(&self, peer_id: &str, _timeout: Duration) {
        let mut endpoints = self.hub.endpoints.lock();
        let Some(me) = endpoints.get(&self.peer_id) else {
            return;
        };
        me.peer_state(peer_id, PeerState::Connecting);

        let admitted = match endpoints.get(peer_id) {
            Some(target) => {
                target.advertising.is_some()
                    && target.admits(&self.peer_id)
                    && me.admits(peer_id)
            }
            None => false,
        };

        if !admitted {
            debug!("Loopback: {} was not admitted by {}", self.peer_id, peer_id);
            me.peer_state(peer_id, PeerState::NotConnected);
            return;
        }

        if let Some(target) = endpoints.get_mut(peer_id) {
            target.sessions.insert(self.peer_id.clone());
            target.peer_state(&self.peer_id, PeerState::Connected);
        }
        if let Some(me) = endpoints.get_mut(&self.peer_id) {
            me.sessions.insert(peer_id.to_string());
            me.peer_state(peer_id, PeerState::Connected);
        }
    }

    fn send(&self, payload: Vec<u8>, to: &[String]) {
        let endpoints = self.hub.endpoints.lock();
        let Some(me) = endpoints.get(&self.peer_id) else {
            return;
        };
        for peer_id in to {
            let delivered = me.sessions.contains(peer_id)
                && endpoints
                    .get(peer_id)
                    .filter(|peer| peer.sessions.contains(&self.peer_id))
                    .map(|peer| {
                        peer.notify(TransportEvent::Data {
                            from: self.peer_id.clone(),
                            payload: payload.clone(),
                        })
                    })
                    .is_some();
            if !delivered {
                debug!("Loopback: dropping payload for {} (not in session)", peer_id);
            }
        }
    }

    fn disconnect(&self) {
        let mut endpoints = self.hub.endpoints.lock();
        let peers = match endpoints.get_mut(&self.peer_id) {
            Some(me) => std::mem::take(&mut me.sessions),
            None => return,
        };
        for peer_id in peers {
            if let Some(peer) = endpoints.get_mut(&peer_id) {
                if peer.sessions.remove(&self.peer_id) {
                    peer.peer_state(&self.peer_id, PeerState::NotConnected);
                }
            }
        }
    }
}

impl Advertise for LoopbackTransport {
    fn start_advertising(&self, info: DiscoveryInfo) {
        let mut endpoints = self.hub.endpoints.lock();
        let host = match endpoints.get_mut(&self.peer_id) {
            Some(me) => {
                me.advertising = Some(info);
                me.as_host(&self.peer_id)
            }
            None => None,
        };
        if let Some(host) = host {
            for (id, endpoint) in endpoints.iter() {
                if id != &self.peer_id && endpoint.browsing {
                    let _ = endpoint.discovery.send(DiscoveryEvent::HostFound(host.clone()));
                }
            }
        }
    }

    fn stop_advertising(&self) {
        let mut endpoints = self.hub.endpoints.lock();
        let was_advertising = endpoints
            .get_mut(&self.peer_id)
            .and_then(|me| me.advertising.take())
            .is_some();
        if !was_advertising {
            return;
        }
        for (id, endpoint) in endpoints.iter() {
            if id != &self.peer_id && endpoint.browsing {
                let _ = endpoint
                    .discovery
                    .send(DiscoveryEvent::HostLost(self.peer_id.clone()));
            }
        }
    }
}

impl Browse for LoopbackTransport {
    fn start_browsing(&self) {
        let mut endpoints = self.hub.endpoints.lock();
        let hosts: Vec<PlaylistHost> = endpoints
            .iter()
            .filter(|(id, _)| *id != &self.peer_id)
            .filter_map(|(id, endpoint)| endpoint.as_host(id))
            .collect();
        if let Some(me) = endpoints.get_mut(&self.peer_id) {
            me.browsing = true;
            for host in hosts {
                let _ = me.discovery.send(DiscoveryEvent::HostFound(host));
            }
        }
    }

    fn stop_browsing(&self) {
        if let Some(me) = self.hub.endpoints.lock().get_mut(&self.peer_id) {
            me.browsing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::discovery::discovery_info;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn state(peer_id: &str, state: PeerState) -> TransportEvent {
        TransportEvent::PeerStateChanged {
            peer_id: peer_id.to_string(),
            state,
        }
    }

    fn advertising_host(hub: &LoopbackHub) -> LoopbackEndpoint {
        let host = hub.endpoint("host", "Host phone");
        host.transport.set_policy(SessionPolicy::host());
        host.transport.start_advertising(discovery_info("Party"));
        host
    }

    #[test]
    fn test_connect_and_send_in_order() {
        let hub = LoopbackHub::new();
        let mut host = advertising_host(&hub);
        let mut guest = hub.endpoint("guest", "Guest phone");
        guest.transport.set_policy(SessionPolicy::guest("host"));

        guest.transport.connect("host", TIMEOUT);
        assert_eq!(guest.events.try_recv().unwrap(), state("host", PeerState::Connecting));
        assert_eq!(guest.events.try_recv().unwrap(), state("host", PeerState::Connected));
        assert_eq!(host.events.try_recv().unwrap(), state("guest", PeerState::Connected));

        for i in 0..3u8 {
            guest.transport.send(vec![i], &["host".to_string()]);
        }
        for i in 0..3u8 {
            assert_eq!(
                host.events.try_recv().unwrap(),
                TransportEvent::Data {
                    from: "guest".to_string(),
                    payload: vec![i]
                }
            );
        }
    }

    #[test]
    fn test_host_rejects_when_not_advertising_or_full() {
        let hub = LoopbackHub::new();
        let host = hub.endpoint("host", "Host phone");
        host.transport.set_policy(SessionPolicy::Capped { max_peers: 2 });

        let mut early = hub.endpoint("early", "Early");
        early.transport.set_policy(SessionPolicy::guest("host"));
        early.transport.connect("host", TIMEOUT);
        assert_eq!(early.events.try_recv().unwrap(), state("host", PeerState::Connecting));
        assert_eq!(early.events.try_recv().unwrap(), state("host", PeerState::NotConnected));

        host.transport.start_advertising(discovery_info("Party"));
        early.transport.connect("host", TIMEOUT);
        assert_eq!(host.transport.session_peers(), vec!["early".to_string()]);

        let mut late = hub.endpoint("late", "Late");
        late.transport.set_policy(SessionPolicy::guest("host"));
        late.transport.connect("host", TIMEOUT);
        assert_eq!(late.events.try_recv().unwrap(), state("host", PeerState::Connecting));
        assert_eq!(late.events.try_recv().unwrap(), state("host", PeerState::NotConnected));
    }

    #[test]
    fn test_guest_policy_refuses_other_hosts() {
        let hub = LoopbackHub::new();
        let _host = advertising_host(&hub);
        let mut guest = hub.endpoint("guest", "Guest phone");
        guest.transport.set_policy(SessionPolicy::guest("someone-else"));

        guest.transport.connect("host", TIMEOUT);
        assert_eq!(guest.events.try_recv().unwrap(), state("host", PeerState::Connecting));
        assert_eq!(guest.events.try_recv().unwrap(), state("host", PeerState::NotConnected));
    }

    #[test]
    fn test_disconnect_notifies_peers_once() {
        let hub = LoopbackHub::new();
        let mut host = advertising_host(&hub);
        let guest = hub.endpoint("guest", "Guest phone");
        guest.transport.set_policy(SessionPolicy::guest("host"));
        guest.transport.connect("host", TIMEOUT);
        assert_eq!(host.events.try_recv().unwrap(), state("guest", PeerState::Connected));

        guest.transport.disconnect();
        guest.transport.disconnect();
        assert_eq!(host.events.try_recv().unwrap(), state("guest", PeerState::NotConnected));
        assert!(host.events.try_recv().is_err());

        // Nothing is delivered outside a session
        host.transport.send(vec![1], &["guest".to_string()]);
        assert!(host.transport.session_peers().is_empty());
    }

    #[test]
    fn test_discovery_found_then_lost() {
        let hub = LoopbackHub::new();
        let mut guest = hub.endpoint("guest", "Guest phone");
        guest.transport.start_browsing();

        let host = advertising_host(&hub);
        match guest.discovery.try_recv().unwrap() {
            DiscoveryEvent::HostFound(found) => {
                assert_eq!(found.id, "host");
                assert_eq!(found.name, "Host phone");
                assert_eq!(found.playlist_name.as_deref(), Some("Party"));
            }
            other => panic!("unexpected {:?}", other),
        }

        host.transport.shutdown();
        assert_eq!(
            guest.discovery.try_recv().unwrap(),
            DiscoveryEvent::HostLost("host".to_string())
        );

        // Late browsers see hosts that are already advertising
        let _again = advertising_host(&hub);
        let mut late = hub.endpoint("late", "Late");
        late.transport.start_browsing();
        assert!(matches!(
            late.discovery.try_recv().unwrap(),
            DiscoveryEvent::HostFound(_)
        ));
    }
}
