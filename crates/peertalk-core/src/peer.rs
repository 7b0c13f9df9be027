//! Peer record and its state machine (spec.md §4.1).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::peer_id::{PeerId, Tick};
use crate::transport::{Endpoint, TransportKind};

/// Which transport to prefer when more than one is available for the same
/// peer (spec.md §4.1 "merge"). `PreferFastest` defers the choice to
/// whichever transport most recently completed a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportPreference {
    PreferTcp,
    PreferAdsp,
    PreferFastest,
}

/// Mirrors spec.md §4.1's state diagram. `Unused` is not a variant here —
/// it is represented by the slot simply having no `Peer` occupying it
/// (spec.md §10 invariant 1: `p.state == Unused ⇒ p.send_queue == ⊥`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    Discovered,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
    Disconnected,
}

impl PeerState {
    /// The transition table from spec.md §4.1. Anything not listed here is
    /// rejected with `InvalidTransition`. `Disconnected` is the terminal
    /// state right before the slot is released back to `Unused`.
    pub fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, next),
            (Discovered, Connecting)
                | (Discovered, Disconnected)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connecting, Disconnected)
                | (Connected, Disconnecting)
                | (Connected, Disconnected)
                | (Disconnecting, Disconnected)
                | (Failed, Disconnected)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    LocalRequest,
    RemoteClose,
    Timeout,
    TransportError,
    Superseded,
}

/// One transport-level path to a peer. A peer can accumulate more than one
/// (e.g. discovered over NBP, later connected over TCP) — spec.md §4.1
/// "add_transport"/"remove_transport".
#[derive(Debug, Clone)]
pub struct TransportRecord {
    pub kind: TransportKind,
    pub endpoint: Endpoint,
    pub last_activity: Tick,
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub state: PeerState,
    pub transports: Vec<TransportRecord>,
    pub discovered_at: Tick,
    pub state_entered_at: Tick,
    pub connect_start: Option<Tick>,
    /// The transport a *Connecting*/*Connected*/*Failed* peer is using,
    /// kept around after the `Connection` itself is freed so a later
    /// `disconnect()` can still report an accurate transport on
    /// `on_peer_disconnected` (spec.md §6) even for a peer that never
    /// finished connecting.
    pub connect_transport: Option<TransportKind>,
    /// Per-peer sequence counters (spec.md §4.3, §5: "never decreases
    /// while Connected; reset on reconnect").
    pub send_seq: u8,
    pub recv_seq: u8,
    /// Tick the last outstanding ping was sent, cleared once the matching
    /// Pong is observed (spec.md §4.3 Pong dispatch: "RTT from the peer's
    /// last outstanding ping tick").
    pub last_ping_sent: Option<Tick>,
}

impl Peer {
    pub(crate) fn new(id: PeerId, name: String, now: Tick) -> Self {
        Self {
            id,
            name,
            state: PeerState::Discovered,
            transports: Vec::new(),
            discovered_at: now,
            state_entered_at: now,
            connect_start: None,
            connect_transport: None,
            send_seq: 0,
            recv_seq: 0,
            last_ping_sent: None,
        }
    }

    pub(crate) fn set_state(&mut self, next: PeerState, now: Tick) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition);
        }
        if next == PeerState::Connecting {
            self.connect_start = Some(now);
        }
        if next == PeerState::Connected {
            self.send_seq = 0;
            self.recv_seq = 0;
        }
        self.state = next;
        self.state_entered_at = now;
        Ok(())
    }

    pub fn transport(&self, kind: TransportKind) -> Option<&TransportRecord> {
        self.transports.iter().find(|t| t.kind == kind)
    }

    pub(crate) fn add_transport(&mut self, kind: TransportKind, endpoint: Endpoint, now: Tick) {
        if let Some(existing) = self.transports.iter_mut().find(|t| t.kind == kind) {
            existing.endpoint = endpoint;
            existing.last_activity = now;
            return;
        }
        self.transports.push(TransportRecord {
            kind,
            endpoint,
            last_activity: now,
        });
    }

    pub(crate) fn remove_transport(&mut self, kind: TransportKind) -> bool {
        let before = self.transports.len();
        self.transports.retain(|t| t.kind != kind);
        self.transports.len() != before
    }

    /// Picks which transport to use for an outgoing send, honoring
    /// `TransportPreference` (spec.md §4.1 merge policy, reused for routing).
    pub fn preferred_transport(&self, preference: TransportPreference) -> Option<&TransportRecord> {
        if self.transports.is_empty() {
            return None;
        }
        match preference {
            TransportPreference::PreferTcp => self
                .transport(TransportKind::Tcp)
                .or_else(|| self.transports.first()),
            TransportPreference::PreferAdsp => self
                .transport(TransportKind::Adsp)
                .or_else(|| self.transports.first()),
            TransportPreference::PreferFastest => {
                self.transports.iter().max_by_key(|t| t.last_activity.0)
            }
        }
    }
}

/// Read-only snapshot returned by `Context::get_peer_info` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub name: String,
    pub state: PeerState,
    pub transports: Vec<TransportKind>,
}

impl From<&Peer> for PeerInfo {
    fn from(p: &Peer) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            state: p.state,
            transports: p.transports.iter().map(|t| t.kind).collect(),
        }
    }
}

/// Case-insensitive name strength used for discovery dedup (spec.md §4.1
/// "auto_merge_peers"). `Exact` wins over `Fold`ed matches when both exist.
pub(crate) fn name_key(name: &str) -> String {
    name.to_lowercase()
}

pub(crate) type NameIndex = HashMap<String, PeerId>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_are_accepted() {
        assert!(PeerState::Discovered.can_transition_to(PeerState::Connecting));
        assert!(PeerState::Connecting.can_transition_to(PeerState::Connected));
        assert!(PeerState::Connected.can_transition_to(PeerState::Disconnecting));
        assert!(PeerState::Disconnecting.can_transition_to(PeerState::Disconnected));
        assert!(PeerState::Connecting.can_transition_to(PeerState::Failed));
        assert!(PeerState::Failed.can_transition_to(PeerState::Disconnected));
    }

    #[test]
    fn skipping_disconnecting_is_rejected() {
        assert!(!PeerState::Connected.can_transition_to(PeerState::Discovered));
        assert!(!PeerState::Disconnected.can_transition_to(PeerState::Connected));
    }

    #[test]
    fn preferred_transport_falls_back_when_absent() {
        let mut peer = Peer::new(PeerId::new(1, 1), "abc".to_string(), Tick(0));
        peer.add_transport(TransportKind::Udp, Endpoint::Ip("127.0.0.1:1".parse().unwrap()), Tick(0));
        let chosen = peer
            .preferred_transport(TransportPreference::PreferTcp)
            .unwrap();
        assert_eq!(chosen.kind, TransportKind::Udp);
    }
}
