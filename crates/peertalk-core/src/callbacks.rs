//! Application callbacks (spec.md §6 `SetCallbacks`).
//!
//! spec.md §5 describes an ISR-safe hot/cold handoff for hosts where
//! transport completion fires from interrupt or deferred-task context: a
//! transport driver may only flip atomic bits on a small per-connection hot
//! struct there, and something else must translate those bits into real
//! work later. That translation boundary is `TransportOps` itself —
//! `poll_connect`/`recv`/`poll_accept` (`transport.rs`) are the synchronous,
//! allocation-free, non-blocking calls the poll driver makes every tick,
//! and a concrete driver for an interrupt-driven host is expected to do its
//! own hot-bit bookkeeping internally and answer those calls from it. Core
//! only ever sees the synchronous answer, never the interrupt. Logging and
//! the user's callbacks still run exclusively from the poll driver, never
//! from a transport completion callback.

use crate::peer::DisconnectReason;
use crate::peer_id::PeerId;
use crate::receive_pipeline::BatchEntry;
use crate::transport::TransportKind;

/// User-supplied callbacks (spec.md §6 `SetCallbacks`). All invoked from
/// the poll driver only, never from a transport completion callback.
#[derive(Default)]
pub struct Callbacks {
    pub on_peer_discovered: Option<Box<dyn FnMut(PeerId)>>,
    pub on_peer_connected: Option<Box<dyn FnMut(PeerId, TransportKind)>>,
    pub on_peer_disconnected: Option<Box<dyn FnMut(PeerId, TransportKind, DisconnectReason)>>,
    /// Fired when a peer's last transport record ages out or is explicitly
    /// removed while not `Connected` (spec.md §4.4 discovery timeout, §4.1
    /// `remove_transport`) — distinct from `on_peer_disconnected`, which is
    /// reserved for a live connection closing (spec.md §6).
    pub on_peer_lost: Option<Box<dyn FnMut(PeerId, TransportKind)>>,
    pub on_transport_added: Option<Box<dyn FnMut(PeerId, TransportKind)>>,
    pub on_transport_removed: Option<Box<dyn FnMut(PeerId, TransportKind)>>,
    pub on_peers_merged: Option<Box<dyn FnMut(PeerId, PeerId)>>,
    pub on_message_received: Option<Box<dyn FnMut(PeerId, &[u8])>>,
    pub on_batch: Option<Box<dyn FnMut(&[BatchEntry])>>,
}

impl Callbacks {
    pub fn has_batch(&self) -> bool {
        self.on_batch.is_some()
    }

    pub fn has_message(&self) -> bool {
        self.on_message_received.is_some()
    }

    pub fn fire_discovered(&mut self, id: PeerId) {
        if let Some(cb) = &mut self.on_peer_discovered {
            cb(id);
        }
    }

    pub fn fire_connected(&mut self, id: PeerId, transport: TransportKind) {
        if let Some(cb) = &mut self.on_peer_connected {
            cb(id, transport);
        }
    }

    pub fn fire_disconnected(&mut self, id: PeerId, transport: TransportKind, reason: DisconnectReason) {
        if let Some(cb) = &mut self.on_peer_disconnected {
            cb(id, transport, reason);
        }
    }

    pub fn fire_lost(&mut self, id: PeerId, transport: TransportKind) {
        if let Some(cb) = &mut self.on_peer_lost {
            cb(id, transport);
        }
    }

    pub fn fire_transport_added(&mut self, id: PeerId, transport: TransportKind) {
        if let Some(cb) = &mut self.on_transport_added {
            cb(id, transport);
        }
    }

    pub fn fire_transport_removed(&mut self, id: PeerId, transport: TransportKind) {
        if let Some(cb) = &mut self.on_transport_removed {
            cb(id, transport);
        }
    }

    pub fn fire_peers_merged(&mut self, keep: PeerId, merged: PeerId) {
        if let Some(cb) = &mut self.on_peers_merged {
            cb(keep, merged);
        }
    }

    pub fn fire_message(&mut self, id: PeerId, payload: &[u8]) {
        if let Some(cb) = &mut self.on_message_received {
            cb(id, payload);
        }
    }

    pub fn fire_batch(&mut self, batch: &[BatchEntry]) {
        if let Some(cb) = &mut self.on_batch {
            cb(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_callbacks_fire_when_installed() {
        let mut callbacks = Callbacks::default();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        callbacks.on_peer_discovered = Some(Box::new(move |id| seen2.borrow_mut().push(id)));
        callbacks.fire_discovered(PeerId::new(1, 1));
        assert_eq!(seen.borrow().len(), 1);
    }
}
