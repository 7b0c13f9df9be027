//! `Context`: the value `Init` returns (spec.md §6) and the sole owner of
//! every pool, counter, and config value — "no global/static state" is a
//! Non-goal by construction, everything lives here.

use std::time::Duration;

use tracing::warn;

use peertalk_protocol::{FrameHeader, MessageType};

use crate::callbacks::Callbacks;
use crate::config::Config;
use crate::discovery::DiscoveryEngine;
use crate::error::{Error, Result};
use crate::lifecycle::{self, Connection};
use crate::peer::{DisconnectReason, PeerInfo, PeerState, TransportPreference};
use crate::peer_id::{PeerId, Tick};
use crate::peer_manager::{PeerEvent, PeerManager};
use crate::send_queue::{CoalesceKey, Priority};
use crate::stats::{GlobalStats, PeerCountersAtomic, PeerStats};
use crate::transport::{Endpoint, TransportKind, TransportOps};

/// `SendEx` flags (spec.md §6). `CoalesceNewest`/`CoalesceOldest` are
/// mutually exclusive; the caller picks at most one. A small hand-rolled
/// bitmask, the same shape as `transport::TransportSet`, rather than
/// pulling in a flags crate for three bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendFlags(u8);

impl SendFlags {
    pub const UNRELIABLE: SendFlags = SendFlags(0b0000_0001);
    pub const COALESCE_NEWEST: SendFlags = SendFlags(0b0000_0010);
    pub const COALESCE_OLDEST: SendFlags = SendFlags(0b0000_0100);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: SendFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SendFlags {
    type Output = SendFlags;
    fn bitor(self, rhs: SendFlags) -> SendFlags {
        SendFlags(self.0 | rhs.0)
    }
}

pub struct Context {
    config: Config,
    peers: PeerManager,
    connections: Vec<Option<Connection>>,
    stats: Vec<PeerCountersAtomic>,
    discovery: DiscoveryEngine,
    callbacks: Callbacks,
    transport_ops: Box<dyn TransportOps>,
}

impl Context {
    /// `Init(config) → Context`.
    pub fn init(config: Config, transport_ops: Box<dyn TransportOps>) -> Self {
        let peers = PeerManager::new(
            config.max_peers,
            config.auto_merge_peers,
            config.discovery_freshness_timeout,
        );
        let discovery = DiscoveryEngine::new(
            config.local_name.clone(),
            config.discovery_port,
            config.discovery_announce_interval,
        );
        let stats = (0..config.max_peers).map(|_| PeerCountersAtomic::default()).collect();
        let connections = (0..config.max_peers).map(|_| None).collect();
        Self {
            config,
            peers,
            connections,
            stats,
            discovery,
            callbacks: Callbacks::default(),
            transport_ops,
        }
    }

    /// `Shutdown(ctx)`: sends Goodbye/Disconnects, frees resources.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        let now = self.transport_ops.now_ticks();
        let ids: Vec<PeerId> = self.peers.iter().map(|p| p.id).collect();
        let mut events = Vec::new();
        for id in ids {
            let _ = lifecycle::disconnect(
                &mut self.peers,
                &mut self.connections,
                self.transport_ops.as_mut(),
                id,
                DisconnectReason::LocalRequest,
                now,
                &mut events,
            );
        }
        if let Some(datagram) = self.discovery.stop() {
            self.broadcast_discovery_datagram(&datagram);
        }
        self.drain_events(events);
    }

    pub fn set_callbacks(&mut self, callbacks: Callbacks) {
        self.callbacks = callbacks;
    }

    pub fn start_discovery(&mut self) -> Result<()> {
        let now = self.transport_ops.now_ticks();
        let datagram = self.discovery.start(now);
        self.broadcast_discovery_datagram(&datagram);
        Ok(())
    }

    pub fn stop_discovery(&mut self) -> Result<()> {
        if let Some(datagram) = self.discovery.stop() {
            self.broadcast_discovery_datagram(&datagram);
        }
        Ok(())
    }

    pub(crate) fn broadcast_discovery_datagram(&mut self, datagram: &peertalk_protocol::DiscoveryDatagram) {
        let mut buf = [0u8; peertalk_protocol::MAX_DATAGRAM_LEN];
        match datagram.encode(&mut buf) {
            Some(len) => {
                if self.transport_ops.broadcast_discovery(&buf[..len]).is_none() {
                    tracing::debug!("discovery broadcast unsupported by transport");
                }
            }
            None => tracing::warn!("discovery datagram too large to encode"),
        }
    }

    pub fn connect(&mut self, id: PeerId) -> Result<()> {
        self.connect_with_preference(id, self.config.transport_preference)
    }

    /// `ConnectVia(ctx, id, transport)`.
    pub fn connect_via(&mut self, id: PeerId, transport: TransportKind) -> Result<()> {
        let peer = self.peers.find_by_id(id).ok_or(Error::NotFound)?;
        if peer.transport(transport).is_none() {
            return Err(Error::NotSupported);
        }
        let preference = match transport {
            TransportKind::Tcp => TransportPreference::PreferTcp,
            TransportKind::Adsp => TransportPreference::PreferAdsp,
            _ => TransportPreference::PreferFastest,
        };
        self.connect_with_preference(id, preference)
    }

    fn connect_with_preference(&mut self, id: PeerId, preference: TransportPreference) -> Result<()> {
        let now = self.transport_ops.now_ticks();
        let mut events = Vec::new();
        self.stats[id.slot() as usize].on_connection_attempt();
        let result = lifecycle::connect(
            &mut self.peers,
            &mut self.connections,
            self.transport_ops.as_mut(),
            id,
            preference,
            self.config.queue_capacity_per_priority,
            self.config.message_max,
            self.config.queue_capacity_per_priority,
            now,
            &mut events,
        );
        self.drain_events(events);
        result
    }

    pub fn disconnect(&mut self, id: PeerId) -> Result<()> {
        let now = self.transport_ops.now_ticks();
        let mut events = Vec::new();
        let result = lifecycle::disconnect(
            &mut self.peers,
            &mut self.connections,
            self.transport_ops.as_mut(),
            id,
            DisconnectReason::LocalRequest,
            now,
            &mut events,
        );
        self.drain_events(events);
        result
    }

    /// `Send(ctx, id, bytes)`: shorthand for `SendEx` at `Normal` priority,
    /// no coalesce, reliable.
    pub fn send(&mut self, id: PeerId, bytes: &[u8]) -> Result<()> {
        self.send_ex(id, bytes, SendFlags::empty(), Priority::Normal, None)
    }

    /// `SendEx(ctx, id, bytes, flags, priority, coalesce_id)`.
    pub fn send_ex(
        &mut self,
        id: PeerId,
        bytes: &[u8],
        flags: SendFlags,
        priority: Priority,
        coalesce_key: Option<CoalesceKey>,
    ) -> Result<()> {
        if bytes.len() > self.config.message_max as usize {
            return Err(Error::MessageTooLarge {
                len: bytes.len(),
                max: self.config.message_max as usize,
            });
        }

        if flags.contains(SendFlags::UNRELIABLE) {
            let peer = self.peers.find_by_id(id).ok_or(Error::NotFound)?;
            let record = peer
                .preferred_transport(self.config.transport_preference)
                .ok_or(Error::NotFound)?;
            let endpoint = record.endpoint.clone();
            if !self.transport_ops.supports_udp() {
                return Err(Error::NotSupported);
            }
            let mut datagram = vec![0u8; peertalk_protocol::unreliable::HEADER_LEN + bytes.len()];
            let written = peertalk_protocol::unreliable::encode_datagram(
                self.config.udp_port,
                bytes,
                &mut datagram,
            )
            .ok_or(Error::MessageTooLarge {
                len: bytes.len(),
                max: self.config.message_max as usize,
            })?;
            self.transport_ops
                .send_udp(&endpoint, &datagram[..written])
                .ok_or(Error::NotSupported)?;
            self.stats[id.slot() as usize].on_sent(bytes.len());
            return Ok(());
        }

        if bytes.len() > self.config.slot_max {
            return Err(Error::MessageTooLarge {
                len: bytes.len(),
                max: self.config.slot_max,
            });
        }

        let peer = self.peers.find_by_id_mut(id).ok_or(Error::NotFound)?;
        if peer.state != PeerState::Connected {
            return Err(Error::InvalidState);
        }
        peer.send_seq = peer.send_seq.wrapping_add(1);
        let sequence = peer.send_seq;

        let slot = id.slot() as usize;
        let connection = self.connections[slot].as_mut().ok_or(Error::InvalidState)?;

        let header = FrameHeader::data(sequence, bytes.len() as u16);
        let mut framed = vec![0u8; peertalk_protocol::HEADER_LEN + bytes.len() + 2];
        peertalk_protocol::encode_frame(&header, bytes, &mut framed).ok_or(Error::MessageTooLarge {
            len: bytes.len(),
            max: self.config.message_max as usize,
        })?;

        let coalesce_policy = if flags.contains(SendFlags::COALESCE_OLDEST) {
            crate::send_queue::CoalescePolicy::Oldest
        } else {
            crate::send_queue::CoalescePolicy::Newest
        };

        connection.send_queue.try_push(
            priority,
            framed.into_boxed_slice(),
            coalesce_key,
            coalesce_policy,
        )
    }

    pub fn get_peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|p| p.id).collect()
    }

    pub fn get_peer_info(&self, id: PeerId) -> Option<PeerInfo> {
        self.peers.find_by_id(id).map(PeerInfo::from)
    }

    pub fn get_peer_transports(&self, id: PeerId) -> Option<Vec<TransportKind>> {
        self.peers
            .find_by_id(id)
            .map(|p| p.transports.iter().map(|t| t.kind).collect())
    }

    pub fn get_queue_pressure(&self, id: PeerId) -> Option<u8> {
        let slot = id.slot() as usize;
        self.connections.get(slot)?.as_ref().map(|c| c.send_queue.pressure_pct())
    }

    pub fn get_peer_stats(&self, id: PeerId) -> Option<PeerStats> {
        let slot = id.slot() as usize;
        if self.peers.find_by_id(id).is_none() {
            return None;
        }
        self.stats.get(slot).map(PeerStats::from)
    }

    pub fn get_stats(&self) -> GlobalStats {
        let mut total_sent = 0;
        let mut total_received = 0;
        let mut connected = 0;
        for peer in self.peers.iter() {
            let slot = peer.id.slot() as usize;
            if let Some(counters) = self.stats.get(slot) {
                let snapshot = PeerStats::from(counters);
                total_sent += snapshot.bytes_sent;
                total_received += snapshot.bytes_received;
            }
            if peer.state == PeerState::Connected {
                connected += 1;
            }
        }
        GlobalStats {
            peer_count: self.peers.len(),
            connected_count: connected,
            total_bytes_sent: total_sent,
            total_bytes_received: total_received,
        }
    }

    pub fn merge_peers(&mut self, keep_id: PeerId, merge_id: PeerId) -> Result<()> {
        let mut events = Vec::new();
        let result = self.peers.merge(keep_id, merge_id, &mut events);
        self.drain_events(events);
        result
    }

    /// `SplitPeer(ctx, id, transport)`: detaches `transport` from `id` into
    /// a newly created peer of the same name. The inverse of `merge`; not
    /// otherwise specified, so this is the natural reading of "peer-table
    /// maintenance" alongside `MergePeers`.
    pub fn split_peer(&mut self, id: PeerId, transport: TransportKind) -> Result<PeerId> {
        let peer = self.peers.find_by_id(id).ok_or(Error::NotFound)?;
        let record = peer.transport(transport).ok_or(Error::NotFound)?.clone();
        let name = peer.name.clone();

        let mut events = Vec::new();
        self.peers.remove_transport(id, transport, &mut events)?;
        let now = self.transport_ops.now_ticks();
        let new_id = self.peers.create(&name, transport, record.endpoint, now, &mut events)?;
        self.drain_events(events);
        Ok(new_id)
    }

    pub fn remove_peer(&mut self, id: PeerId) -> Result<()> {
        self.disconnect(id).or(Ok(()))?;
        let transports = self
            .peers
            .find_by_id(id)
            .map(|p| p.transports.iter().map(|t| t.kind).collect::<Vec<_>>())
            .unwrap_or_default();
        let mut events = Vec::new();
        for transport in transports {
            let _ = self.peers.remove_transport(id, transport, &mut events);
        }
        self.drain_events(events);
        Ok(())
    }

    pub fn remove_peer_transport(&mut self, id: PeerId, transport: TransportKind) -> Result<()> {
        let mut events = Vec::new();
        let result = self.peers.remove_transport(id, transport, &mut events);
        self.drain_events(events);
        result
    }

    /// Peer ids currently in `state`, in active-set order (spec.md §4.6
    /// "peers are serviced in active-set order").
    pub(crate) fn peer_ids_in_state(&self, state: PeerState) -> Vec<PeerId> {
        self.peers.iter().filter(|p| p.state == state).map(|p| p.id).collect()
    }

    pub(crate) fn record_latency_sample(&mut self, id: PeerId, rtt_ms: u32) {
        self.stats[id.slot() as usize].on_pong(rtt_ms);
    }

    /// Enqueues a control-message reply built by the poll driver (e.g. the
    /// `Pong` answering a received `Ping`) at `High` priority.
    pub(crate) fn enqueue_control_reply(&mut self, id: PeerId, header: FrameHeader) {
        let slot = id.slot() as usize;
        let Some(connection) = self.connections.get_mut(slot).and_then(Option::as_mut) else {
            return;
        };
        let mut buf = vec![0u8; peertalk_protocol::HEADER_LEN + 2];
        if peertalk_protocol::encode_frame(&header, &[], &mut buf).is_some() {
            let _ = connection.send_queue.try_push(
                Priority::High,
                buf.into_boxed_slice(),
                None,
                crate::send_queue::CoalescePolicy::Newest,
            );
        }
    }

    /// Closes a connection the poll driver found in a terminal state (peer
    /// requested close, framing error, fatal transport error).
    pub(crate) fn close_peer_from_poll(&mut self, id: PeerId, reason: DisconnectReason) {
        let now = self.transport_ops.now_ticks();
        let mut events = Vec::new();
        let _ = lifecycle::disconnect(
            &mut self.peers,
            &mut self.connections,
            self.transport_ops.as_mut(),
            id,
            reason,
            now,
            &mut events,
        );
        self.drain_events(events);
    }

    pub(crate) fn drain_events(&mut self, events: Vec<PeerEvent>) {
        for event in events {
            match event {
                PeerEvent::Discovered(id) => self.callbacks.fire_discovered(id),
                PeerEvent::StateChanged { id, to, transport, .. } => {
                    if to == PeerState::Connected {
                        self.callbacks
                            .fire_connected(id, transport.unwrap_or(TransportKind::Tcp));
                    }
                }
                PeerEvent::PeerLost(id, transport) | PeerEvent::TimedOut(id, transport) => {
                    self.callbacks.fire_lost(id, transport);
                }
                PeerEvent::ConnectionClosed { id, transport, reason } => {
                    self.callbacks.fire_disconnected(id, transport, reason);
                }
                PeerEvent::TransportAdded(id, transport) => {
                    self.callbacks.fire_transport_added(id, transport);
                }
                PeerEvent::TransportRemoved(id, transport) => {
                    self.callbacks.fire_transport_removed(id, transport);
                }
                PeerEvent::PeersMerged { keep, merged } => {
                    self.callbacks.fire_peers_merged(keep, merged);
                }
            }
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &mut PeerManager,
        &mut Vec<Option<Connection>>,
        &mut Vec<PeerCountersAtomic>,
        &mut DiscoveryEngine,
        &mut Callbacks,
        &mut dyn TransportOps,
    ) {
        (
            &mut self.peers,
            &mut self.connections,
            &mut self.stats,
            &mut self.discovery,
            &mut self.callbacks,
            self.transport_ops.as_mut(),
        )
    }
}

/// Dispatches a just-received control message's side effect (spec.md
/// §4.3: Ping -> enqueue Pong; Disconnect -> close).
pub(crate) fn control_reply(msg_type: MessageType) -> Option<FrameHeader> {
    match msg_type {
        MessageType::Ping => Some(FrameHeader::control(MessageType::Pong)),
        _ => None,
    }
}

pub(crate) fn warn_dropped_message(id: PeerId) {
    warn!(peer = %id, "dropped data message: no callback installed");
}
