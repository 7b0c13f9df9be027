//! Discovery engine (spec.md §4.4): advertise this host and learn about
//! others on configured transports without a central directory. Returns
//! outgoing datagrams to the caller rather than writing sockets itself, so
//! it stays transport-agnostic and easy to drive from the poll loop.

use std::time::Duration;

use tracing::{trace, warn};

use peertalk_protocol::{DiscoveryDatagram, DiscoveryType};

use crate::error::Result;
use crate::peer_id::Tick;
use crate::peer_manager::{PeerEvent, PeerManager};
use crate::transport::{Endpoint, TransportKind};

pub struct DiscoveryEngine {
    local_name: String,
    local_port: u16,
    announce_interval: Duration,
    running: bool,
    last_announce: Option<Tick>,
}

impl DiscoveryEngine {
    pub fn new(local_name: String, local_port: u16, announce_interval: Duration) -> Self {
        Self {
            local_name,
            local_port,
            announce_interval,
            running: false,
            last_announce: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn announce_datagram(&self) -> DiscoveryDatagram {
        DiscoveryDatagram {
            kind: DiscoveryType::Announce,
            flags: 0,
            sender_port: self.local_port,
            name: self.local_name.clone(),
        }
    }

    fn goodbye_datagram(&self) -> DiscoveryDatagram {
        DiscoveryDatagram {
            kind: DiscoveryType::Goodbye,
            flags: 0,
            sender_port: self.local_port,
            name: self.local_name.clone(),
        }
    }

    /// `StartDiscovery`: arms the periodic schedule and returns the
    /// immediate `Announce` the caller must broadcast.
    pub fn start(&mut self, now: Tick) -> DiscoveryDatagram {
        self.running = true;
        self.last_announce = Some(now);
        self.announce_datagram()
    }

    /// `StopDiscovery`: returns the `Goodbye` to broadcast, if discovery
    /// was running; `None` if it was already stopped (idempotent).
    pub fn stop(&mut self) -> Option<DiscoveryDatagram> {
        if !self.running {
            return None;
        }
        self.running = false;
        Some(self.goodbye_datagram())
    }

    /// Called once per poll: returns a re-`Announce` when the interval has
    /// elapsed (spec.md §4.4: "schedule periodic announces (10s)").
    pub fn tick_periodic_announce(&mut self, now: Tick) -> Option<DiscoveryDatagram> {
        if !self.running {
            return None;
        }
        let due = match self.last_announce {
            None => true,
            Some(last) => now.elapsed_since(last) >= self.announce_interval,
        };
        if !due {
            return None;
        }
        self.last_announce = Some(now);
        Some(self.announce_datagram())
    }

    /// Processes one inbound discovery datagram (spec.md §4.4 per-poll
    /// drain). `local_endpoint` is compared to drop self-originated
    /// datagrams. Returns an `Announce` reply when `datagram` was a
    /// `Query`.
    pub fn handle_datagram(
        &mut self,
        datagram: &DiscoveryDatagram,
        source: &Endpoint,
        local_endpoint: &Endpoint,
        transport: TransportKind,
        now: Tick,
        peers: &mut PeerManager,
        events: &mut Vec<PeerEvent>,
    ) -> Result<Option<DiscoveryDatagram>> {
        if source == local_endpoint {
            trace!("dropping self-originated discovery datagram");
            return Ok(None);
        }

        match datagram.kind {
            DiscoveryType::Announce => {
                peers.create(&datagram.name, transport, source.clone(), now, events)?;
                Ok(None)
            }
            DiscoveryType::Query => Ok(Some(self.announce_datagram())),
            DiscoveryType::Goodbye => {
                if let Some(peer) = peers.find_by_endpoint(transport, source) {
                    let id = peer.id;
                    if let Err(e) = peers.remove_transport(id, transport, events) {
                        warn!(error = %e, "failed removing transport on Goodbye");
                    }
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::Ip(([127, 0, 0, 1], port).into())
    }

    #[test]
    fn start_sends_an_immediate_announce() {
        let mut engine = DiscoveryEngine::new("Alice".to_string(), 7354, Duration::from_secs(10));
        let datagram = engine.start(Tick(0));
        assert_eq!(datagram.kind, DiscoveryType::Announce);
        assert!(engine.is_running());
    }

    #[test]
    fn periodic_announce_waits_for_interval() {
        let mut engine = DiscoveryEngine::new("Alice".to_string(), 7354, Duration::from_secs(10));
        engine.start(Tick(0));
        assert!(engine.tick_periodic_announce(Tick(2_000)).is_none());
        assert!(engine.tick_periodic_announce(Tick(11_000)).is_some());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut engine = DiscoveryEngine::new("Alice".to_string(), 7354, Duration::from_secs(10));
        assert!(engine.stop().is_none());
        engine.start(Tick(0));
        assert!(engine.stop().is_some());
        assert!(engine.stop().is_none());
    }

    #[test]
    fn announce_from_remote_creates_peer() {
        let mut engine = DiscoveryEngine::new("Alice".to_string(), 7354, Duration::from_secs(10));
        let mut peers = crate::peer_manager::PeerManager::new(8, true, Duration::from_secs(30));
        let mut events = Vec::new();
        let datagram = DiscoveryDatagram {
            kind: DiscoveryType::Announce,
            flags: 0,
            sender_port: 7361,
            name: "Bob".to_string(),
        };
        let reply = engine
            .handle_datagram(
                &datagram,
                &endpoint(7361),
                &endpoint(7354),
                TransportKind::Tcp,
                Tick(0),
                &mut peers,
                &mut events,
            )
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn query_is_answered_with_an_announce() {
        let mut engine = DiscoveryEngine::new("Alice".to_string(), 7354, Duration::from_secs(10));
        let mut peers = crate::peer_manager::PeerManager::new(8, true, Duration::from_secs(30));
        let mut events = Vec::new();
        let datagram = DiscoveryDatagram {
            kind: DiscoveryType::Query,
            flags: 0,
            sender_port: 7361,
            name: "Bob".to_string(),
        };
        let reply = engine
            .handle_datagram(
                &datagram,
                &endpoint(7361),
                &endpoint(7354),
                TransportKind::Tcp,
                Tick(0),
                &mut peers,
                &mut events,
            )
            .unwrap();
        assert_eq!(reply.unwrap().kind, DiscoveryType::Announce);
    }

    #[test]
    fn self_originated_datagram_is_dropped() {
        let mut engine = DiscoveryEngine::new("Alice".to_string(), 7354, Duration::from_secs(10));
        let mut peers = crate::peer_manager::PeerManager::new(8, true, Duration::from_secs(30));
        let mut events = Vec::new();
        let datagram = DiscoveryDatagram {
            kind: DiscoveryType::Announce,
            flags: 0,
            sender_port: 7354,
            name: "Alice".to_string(),
        };
        engine
            .handle_datagram(
                &datagram,
                &endpoint(7354),
                &endpoint(7354),
                TransportKind::Tcp,
                Tick(0),
                &mut peers,
                &mut events,
            )
            .unwrap();
        assert_eq!(peers.len(), 0);
    }
}
