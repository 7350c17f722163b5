//! Peer session manager: link and per-peer connection state, driven by transport callbacks.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::identity::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Listener bookkeeping the host must apply to its transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    RegisterListeners,
    UnregisterListeners,
}

/// Tracks the transport link and every known peer. Mutated only from the
/// transport's callback context.
#[derive(Debug, Default)]
pub struct PeerSessionManager {
    link: SessionState,
    peers: BTreeMap<PeerId, SessionState>,
    listeners_registered: bool,
}

impl PeerSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_state(&self) -> SessionState {
        self.link
    }

    pub fn peer_state(&self, peer: &PeerId) -> SessionState {
        self.peers.get(peer).copied().unwrap_or_default()
    }

    pub fn listeners_registered(&self) -> bool {
        self.listeners_registered
    }

    /// Host asked the transport to connect (e.g. the watch face became visible).
    pub fn on_connect_requested(&mut self) {
        if self.link == SessionState::Disconnected {
            self.link = SessionState::Connecting;
        }
    }

    /// Link is up. `peers` is the transport's connected-peer list at this moment.
    pub fn on_connected(&mut self, peers: Vec<PeerId>) -> Vec<SessionAction> {
        self.link = SessionState::Connected;
        self.peers = peers
            .into_iter()
            .map(|p| (p, SessionState::Connected))
            .collect();
        info!(peers = self.peers.len(), "transport connected");
        self.register().into_iter().collect()
    }

    /// Link dropped but the transport will try to come back.
    pub fn on_connection_suspended(&mut self, cause: i32) -> Vec<SessionAction> {
        warn!(cause, "transport connection suspended");
        self.link = SessionState::Connecting;
        for state in self.peers.values_mut() {
            *state = SessionState::Connecting;
        }
        self.unregister().into_iter().collect()
    }

    /// Link could not be established.
    pub fn on_connection_failed(&mut self, reason: &str) -> Vec<SessionAction> {
        warn!(reason, "transport connection failed");
        self.drop_link()
    }

    /// Host is tearing the link down (e.g. the watch face went invisible).
    pub fn on_disconnect_requested(&mut self) -> Vec<SessionAction> {
        debug!("transport disconnect requested");
        self.drop_link()
    }

    /// Returns true if the peer was not already connected.
    pub fn on_peer_joined(&mut self, peer: PeerId) -> bool {
        let state = if self.link == SessionState::Connected {
            SessionState::Connected
        } else {
            SessionState::Connecting
        };
        debug!(%peer, ?state, "peer joined");
        self.peers.insert(peer, state) != Some(SessionState::Connected)
            && state == SessionState::Connected
    }

    pub fn on_peer_left(&mut self, peer: &PeerId) {
        if self.peers.remove(peer).is_some() {
            debug!(%peer, "peer left");
        }
    }

    pub fn is_peer_connected(&self, peer: &PeerId) -> bool {
        self.link == SessionState::Connected && self.peer_state(peer) == SessionState::Connected
    }

    pub fn is_any_peer_connected(&self) -> bool {
        self.link == SessionState::Connected
            && self.peers.values().any(|s| *s == SessionState::Connected)
    }

    /// Snapshot of connected peers, sorted. Not live-updating.
    pub fn list_connected_peers(&self) -> Vec<PeerId> {
        if self.link != SessionState::Connected {
            return Vec::new();
        }
        self.peers
            .iter()
            .filter(|(_, s)| **s == SessionState::Connected)
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn drop_link(&mut self) -> Vec<SessionAction> {
        self.link = SessionState::Disconnected;
        self.peers.clear();
        self.unregister().into_iter().collect()
    }

    fn register(&mut self) -> Option<SessionAction> {
        if self.listeners_registered {
            return None;
        }
        self.listeners_registered = true;
        Some(SessionAction::RegisterListeners)
    }

    fn unregister(&mut self) -> Option<SessionAction> {
        if !self.listeners_registered {
            return None;
        }
        self.listeners_registered = false;
        Some(SessionAction::UnregisterListeners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn connect_registers_listeners_once() {
        let mut s = PeerSessionManager::new();
        s.on_connect_requested();
        assert_eq!(s.link_state(), SessionState::Connecting);
        let actions = s.on_connected(vec![peer("phone")]);
        assert_eq!(actions, vec![SessionAction::RegisterListeners]);
        assert!(s.listeners_registered());
        assert!(s.on_connected(vec![peer("phone")]).is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut s = PeerSessionManager::new();
        s.on_connected(vec![peer("phone")]);
        assert_eq!(
            s.on_connection_suspended(1),
            vec![SessionAction::UnregisterListeners]
        );
        assert!(s.on_connection_failed("gone").is_empty());
        assert!(s.on_disconnect_requested().is_empty());
        assert!(!s.listeners_registered());
    }

    #[test]
    fn connected_peers_snapshot() {
        let mut s = PeerSessionManager::new();
        assert!(!s.is_any_peer_connected());
        s.on_connected(vec![peer("b"), peer("a")]);
        assert!(s.is_any_peer_connected());
        assert_eq!(s.list_connected_peers(), vec![peer("a"), peer("b")]);

        let snapshot = s.list_connected_peers();
        s.on_peer_left(&peer("a"));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(s.list_connected_peers(), vec![peer("b")]);
    }

    #[test]
    fn peer_join_and_leave() {
        let mut s = PeerSessionManager::new();
        s.on_connected(vec![]);
        assert!(!s.is_any_peer_connected());
        assert!(s.on_peer_joined(peer("watch")));
        assert!(!s.on_peer_joined(peer("watch")));
        assert!(s.is_peer_connected(&peer("watch")));
        s.on_peer_left(&peer("watch"));
        assert_eq!(s.peer_state(&peer("watch")), SessionState::Disconnected);
        assert!(!s.is_any_peer_connected());
    }

    #[test]
    fn peer_joined_before_link_is_not_connected() {
        let mut s = PeerSessionManager::new();
        s.on_connect_requested();
        assert!(!s.on_peer_joined(peer("watch")));
        assert_eq!(s.peer_state(&peer("watch")), SessionState::Connecting);
        assert!(!s.is_peer_connected(&peer("watch")));
        assert!(s.list_connected_peers().is_empty());
    }

    #[test]
    fn suspension_keeps_peers_connecting() {
        let mut s = PeerSessionManager::new();
        s.on_connected(vec![peer("phone")]);
        s.on_connection_suspended(2);
        assert_eq!(s.link_state(), SessionState::Connecting);
        assert_eq!(s.peer_state(&peer("phone")), SessionState::Connecting);
        assert!(!s.is_any_peer_connected());
    }

    #[test]
    fn failure_clears_peers() {
        let mut s = PeerSessionManager::new();
        s.on_connected(vec![peer("phone")]);
        s.on_connection_failed("api unavailable");
        assert_eq!(s.link_state(), SessionState::Disconnected);
        assert_eq!(s.peer_state(&peer("phone")), SessionState::Disconnected);
    }
}
