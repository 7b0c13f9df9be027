//! Peer table: the stable `PeerId → slot` mapping, dedup indices, and the
//! operations of spec.md §4.1. Mirrors the slab-plus-free-list shape
//! `librqbit`'s piece/peer tracking uses, generalized with a generation
//! counter per slot (see `peer_id.rs`) so a reused slot never aliases a
//! destroyed peer's id.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::active_set::ActiveSet;
use crate::error::{Error, Result};
use crate::peer::{name_key, DisconnectReason, Peer, PeerState};
use crate::peer_id::{PeerId, Tick};
use crate::transport::{Endpoint, TransportKind};

/// Events emitted by peer-manager operations for the poll driver to turn
/// into structured log records or user callbacks (spec.md §5: "the poll
/// driver translates... into structured log records").
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Discovered(PeerId),
    TransportAdded(PeerId, TransportKind),
    TransportRemoved(PeerId, TransportKind),
    /// Last transport record removed while not `Connected` (spec.md §4.1
    /// `remove_transport`) — maps to `on_peer_lost(peer_id, transport)`.
    PeerLost(PeerId, TransportKind),
    PeersMerged { keep: PeerId, merged: PeerId },
    StateChanged {
        id: PeerId,
        from: PeerState,
        to: PeerState,
        transport: Option<TransportKind>,
    },
    /// Discovery freshness timeout (spec.md §4.4 "quiet destructions") —
    /// also maps to `on_peer_lost`.
    TimedOut(PeerId, TransportKind),
    /// A live connection was torn down (spec.md §4.5 "Disconnect") — maps
    /// to `on_peer_disconnected(peer_id, transport, reason)`.
    ConnectionClosed {
        id: PeerId,
        transport: TransportKind,
        reason: DisconnectReason,
    },
}

struct Slot {
    peer: Option<Peer>,
    generation: u32,
}

pub struct PeerManager {
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: ActiveSet,
    name_index: HashMap<String, PeerId>,
    endpoint_index: HashMap<(TransportKind, Endpoint), PeerId>,
    auto_merge_peers: bool,
    freshness_timeout: Duration,
}

impl PeerManager {
    pub fn new(capacity: usize, auto_merge_peers: bool, freshness_timeout: Duration) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                peer: None,
                generation: 0,
            })
            .collect();
        Self {
            slots,
            free: (0..capacity as u32).rev().collect(),
            active: ActiveSet::new(capacity),
            name_index: HashMap::new(),
            endpoint_index: HashMap::new(),
            auto_merge_peers,
            freshness_timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// spec.md §4.1 `create`: fresh slot, or merges into an existing peer
    /// discovered under the same name when `auto_merge_peers` is enabled.
    pub fn create(
        &mut self,
        name: &str,
        transport: TransportKind,
        endpoint: Endpoint,
        now: Tick,
        events: &mut Vec<PeerEvent>,
    ) -> Result<PeerId> {
        if self.auto_merge_peers {
            if let Some(&existing) = self.name_index.get(&name_key(name)) {
                self.add_transport(existing, transport, endpoint, now, events)?;
                return Ok(existing);
            }
        }

        let slot_index = self.free.pop().ok_or(Error::PoolExhausted)?;
        let generation = {
            let slot = &mut self.slots[slot_index as usize];
            slot.generation += 1;
            slot.generation
        };
        let id = PeerId::new(slot_index, generation);
        let mut peer = Peer::new(id, name.to_string(), now);
        peer.add_transport(transport, endpoint.clone(), now);

        self.slots[slot_index as usize].peer = Some(peer);
        self.active.insert(slot_index as usize);
        self.name_index.insert(name_key(name), id);
        self.endpoint_index.insert((transport, endpoint), id);

        info!(peer = %id, name, "peer discovered");
        events.push(PeerEvent::Discovered(id));
        Ok(id)
    }

    fn slot_for(&self, id: PeerId) -> Option<usize> {
        let slot = id.slot() as usize;
        let entry = self.slots.get(slot)?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.peer.as_ref()?;
        Some(slot)
    }

    pub fn find_by_id(&self, id: PeerId) -> Option<&Peer> {
        let slot = self.slot_for(id)?;
        self.slots[slot].peer.as_ref()
    }

    pub fn find_by_id_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        let slot = self.slot_for(id)?;
        self.slots[slot].peer.as_mut()
    }

    pub fn find_by_endpoint(&self, transport: TransportKind, endpoint: &Endpoint) -> Option<&Peer> {
        let id = *self.endpoint_index.get(&(transport, endpoint.clone()))?;
        self.find_by_id(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.active
            .iter()
            .filter_map(move |slot| self.slots[slot].peer.as_ref())
    }

    /// spec.md §4.1 `add_transport`: idempotent on (peer, transport);
    /// emits `TransportAdded` only when the transport is new.
    pub fn add_transport(
        &mut self,
        id: PeerId,
        transport: TransportKind,
        endpoint: Endpoint,
        now: Tick,
        events: &mut Vec<PeerEvent>,
    ) -> Result<()> {
        let slot = self.slot_for(id).ok_or(Error::NotFound)?;
        let peer = self.slots[slot].peer.as_mut().expect("slot_for guarantees occupied");
        let is_new = peer.transport(transport).is_none();
        peer.add_transport(transport, endpoint.clone(), now);
        self.endpoint_index.insert((transport, endpoint), id);
        if is_new {
            events.push(PeerEvent::TransportAdded(id, transport));
        }
        Ok(())
    }

    /// spec.md §4.1 `remove_transport`: if the peer loses all records and
    /// is not `Connected`, the peer is destroyed.
    pub fn remove_transport(
        &mut self,
        id: PeerId,
        transport: TransportKind,
        events: &mut Vec<PeerEvent>,
    ) -> Result<()> {
        let slot = self.slot_for(id).ok_or(Error::NotFound)?;
        let peer = self.slots[slot].peer.as_mut().expect("slot_for guarantees occupied");
        if !peer.remove_transport(transport) {
            return Ok(());
        }
        self.endpoint_index.retain(|_, v| *v != id);
        events.push(PeerEvent::TransportRemoved(id, transport));

        let peer_ref = self.slots[slot].peer.as_ref().expect("still occupied");
        if peer_ref.transports.is_empty() && peer_ref.state != PeerState::Connected {
            self.destroy_slot(slot, id, events, PeerEvent::PeerLost(id, transport));
        }
        Ok(())
    }

    /// spec.md §4.1 `merge`: keep absorbs all of merge's transports; merge
    /// is destroyed.
    pub fn merge(&mut self, keep_id: PeerId, merge_id: PeerId, events: &mut Vec<PeerEvent>) -> Result<()> {
        if keep_id == merge_id {
            return Err(Error::InvalidArg("merge ids must be distinct"));
        }
        let merge_slot = self.slot_for(merge_id).ok_or(Error::NotFound)?;
        self.slot_for(keep_id).ok_or(Error::NotFound)?;

        let transports = self.slots[merge_slot]
            .peer
            .as_ref()
            .expect("slot_for guarantees occupied")
            .transports
            .clone();
        for record in transports {
            self.add_transport(keep_id, record.kind, record.endpoint, record.last_activity, events)?;
        }

        self.destroy_slot(
            merge_slot,
            merge_id,
            events,
            PeerEvent::PeersMerged {
                keep: keep_id,
                merged: merge_id,
            },
        );
        Ok(())
    }

    /// spec.md §4.1 `set_state`. `transport` is carried through to the
    /// `StateChanged` event purely for `on_peer_connected`'s signature
    /// (spec.md §6); it has no bearing on the transition itself. Does not
    /// accept `Disconnected` as a target — that transition always destroys
    /// the slot and must go through `finish_disconnect` so the destroy can
    /// carry a transport and reason.
    pub fn set_state(
        &mut self,
        id: PeerId,
        new_state: PeerState,
        transport: Option<TransportKind>,
        now: Tick,
        events: &mut Vec<PeerEvent>,
    ) -> Result<()> {
        debug_assert!(new_state != PeerState::Disconnected, "use finish_disconnect");
        let slot = self.slot_for(id).ok_or(Error::NotFound)?;
        let peer = self.slots[slot].peer.as_mut().expect("slot_for guarantees occupied");
        let from = peer.state;
        peer.set_state(new_state, now)?;
        if new_state == PeerState::Connecting {
            peer.connect_transport = transport;
        }
        debug!(peer = %id, ?from, to = ?new_state, "peer state transition");
        events.push(PeerEvent::StateChanged {
            id,
            from,
            to: new_state,
            transport,
        });
        Ok(())
    }

    /// `Disconnect(id)`'s terminal step (spec.md §4.5): transitions the
    /// peer to `Disconnected` and immediately destroys its slot, firing
    /// `ConnectionClosed` with the transport that was torn down and the
    /// caller-supplied reason — unlike the discovery-driven destructions,
    /// this one is user-visible via `on_peer_disconnected`.
    pub fn finish_disconnect(
        &mut self,
        id: PeerId,
        transport: TransportKind,
        reason: DisconnectReason,
        now: Tick,
        events: &mut Vec<PeerEvent>,
    ) -> Result<()> {
        let slot = self.slot_for(id).ok_or(Error::NotFound)?;
        let peer = self.slots[slot].peer.as_mut().expect("slot_for guarantees occupied");
        let from = peer.state;
        peer.set_state(PeerState::Disconnected, now)?;
        debug!(peer = %id, ?from, ?reason, "peer disconnected");
        self.destroy_slot(
            slot,
            id,
            events,
            PeerEvent::ConnectionClosed {
                id,
                transport,
                reason,
            },
        );
        Ok(())
    }

    /// spec.md §4.1 `check_timeouts`: destroys peers whose last activity
    /// has exceeded `freshness_timeout` while still `Discovered`. Quiet —
    /// one structured log event, no user-visible error.
    pub fn check_timeouts(&mut self, now: Tick, events: &mut Vec<PeerEvent>) {
        let stale: Vec<(usize, PeerId, TransportKind)> = self
            .active
            .iter()
            .filter_map(|slot| {
                let peer = self.slots[slot].peer.as_ref()?;
                if peer.state != PeerState::Discovered {
                    return None;
                }
                let newest = peer.transports.iter().max_by_key(|t| t.last_activity.0);
                let (last_seen, transport) = match newest {
                    Some(record) => (record.last_activity, record.kind),
                    None => (peer.discovered_at, TransportKind::Udp),
                };
                if now.elapsed_since(last_seen) >= self.freshness_timeout {
                    Some((slot, peer.id, transport))
                } else {
                    None
                }
            })
            .collect();

        for (slot, id, transport) in stale {
            warn!(peer = %id, "peer discovery record timed out");
            self.destroy_slot(slot, id, events, PeerEvent::TimedOut(id, transport));
        }
    }

    fn destroy_slot(&mut self, slot: usize, id: PeerId, events: &mut Vec<PeerEvent>, event: PeerEvent) {
        if let Some(peer) = self.slots[slot].peer.take() {
            self.name_index.remove(&name_key(&peer.name));
            self.endpoint_index.retain(|_, v| *v != id);
        }
        self.active.remove(slot);
        self.free.push(slot as u32);
        events.push(event);
    }

    /// Used by the lifecycle module to attribute a disconnect reason in
    /// logs before the state transition destroys the slot.
    pub fn log_disconnect(&self, id: PeerId, reason: DisconnectReason) {
        debug!(peer = %id, ?reason, "peer disconnecting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::Ip(([127, 0, 0, 1], port).into())
    }

    #[test]
    fn create_then_find_roundtrips() {
        let mut pm = PeerManager::new(8, true, Duration::from_secs(30));
        let mut events = Vec::new();
        let id = pm
            .create("Alice", TransportKind::Tcp, endpoint(1), Tick(0), &mut events)
            .unwrap();
        assert!(pm.find_by_id(id).is_some());
        assert!(matches!(events[0], PeerEvent::Discovered(_)));
    }

    #[test]
    fn duplicate_name_merges_instead_of_creating() {
        let mut pm = PeerManager::new(8, true, Duration::from_secs(30));
        let mut events = Vec::new();
        let a = pm
            .create("Alice", TransportKind::Tcp, endpoint(1), Tick(0), &mut events)
            .unwrap();
        let b = pm
            .create("alice", TransportKind::Udp, endpoint(2), Tick(0), &mut events)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(pm.len(), 1);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let mut pm = PeerManager::new(1, false, Duration::from_secs(30));
        let mut events = Vec::new();
        pm.create("A", TransportKind::Tcp, endpoint(1), Tick(0), &mut events)
            .unwrap();
        let err = pm.create("B", TransportKind::Tcp, endpoint(2), Tick(0), &mut events);
        assert!(matches!(err, Err(Error::PoolExhausted)));
    }

    #[test]
    fn destroyed_slot_id_never_aliases_reused_slot() {
        let mut pm = PeerManager::new(1, false, Duration::from_secs(30));
        let mut events = Vec::new();
        let a = pm
            .create("A", TransportKind::Tcp, endpoint(1), Tick(0), &mut events)
            .unwrap();
        pm.remove_transport(a, TransportKind::Tcp, &mut events).unwrap();
        assert!(pm.find_by_id(a).is_none());
        let b = pm
            .create("B", TransportKind::Tcp, endpoint(2), Tick(0), &mut events)
            .unwrap();
        assert_ne!(a, b);
        assert!(pm.find_by_id(a).is_none());
        assert!(pm.find_by_id(b).is_some());
    }

    #[test]
    fn check_timeouts_destroys_stale_discovered_peers_only() {
        let mut pm = PeerManager::new(8, false, Duration::from_secs(30));
        let mut events = Vec::new();
        let id = pm
            .create("A", TransportKind::Tcp, endpoint(1), Tick(0), &mut events)
            .unwrap();
        pm.check_timeouts(Tick(31_000), &mut events);
        assert!(pm.find_by_id(id).is_none());
        assert!(events.iter().any(|e| matches!(e, PeerEvent::TimedOut(_, _))));
    }

    #[test]
    fn merge_absorbs_transports_and_destroys_source() {
        let mut pm = PeerManager::new(8, false, Duration::from_secs(30));
        let mut events = Vec::new();
        let a = pm
            .create("A", TransportKind::Tcp, endpoint(1), Tick(0), &mut events)
            .unwrap();
        let b = pm
            .create("B", TransportKind::Udp, endpoint(2), Tick(0), &mut events)
            .unwrap();
        pm.merge(a, b, &mut events).unwrap();
        assert!(pm.find_by_id(b).is_none());
        let peer = pm.find_by_id(a).unwrap();
        assert!(peer.transport(TransportKind::Udp).is_some());
    }
}
