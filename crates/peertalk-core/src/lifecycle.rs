//! Connection lifecycle glue (spec.md §4.5): drives a peer between
//! *Discovered* and *Connected* using only non-blocking transport calls.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::peer::{DisconnectReason, PeerState, TransportPreference};
use crate::peer_id::{PeerId, Tick};
use crate::peer_manager::{PeerEvent, PeerManager};
use crate::receive_pipeline::ReceivePipeline;
use crate::send_queue::SendQueue;
use crate::transport::{ConnectOutcome, Endpoint, TransportKind, TransportOps};

/// The queues and framer state a *Connecting*/*Connected* peer owns.
/// Allocated before the transport call is issued (spec.md §4.5 step 3:
/// "some transports complete connections in interrupt-time callbacks that
/// cannot allocate memory").
pub struct Connection {
    pub peer_id: PeerId,
    pub transport: TransportKind,
    pub endpoint: Endpoint,
    pub send_queue: SendQueue,
    pub receive_pipeline: ReceivePipeline,
}

impl Connection {
    fn new(
        peer_id: PeerId,
        transport: TransportKind,
        endpoint: Endpoint,
        queue_capacity_per_priority: usize,
        message_max: u32,
        batch_capacity: usize,
    ) -> Self {
        Self {
            peer_id,
            transport,
            endpoint,
            send_queue: SendQueue::new(queue_capacity_per_priority),
            receive_pipeline: ReceivePipeline::new(message_max, batch_capacity),
        }
    }
}

/// `Connect(id)` (spec.md §4.5 "Active open").
pub fn connect(
    peers: &mut PeerManager,
    connections: &mut Vec<Option<Connection>>,
    transport_ops: &mut dyn TransportOps,
    id: PeerId,
    preference: TransportPreference,
    queue_capacity_per_priority: usize,
    message_max: u32,
    batch_capacity: usize,
    now: Tick,
    events: &mut Vec<PeerEvent>,
) -> Result<()> {
    let peer = peers.find_by_id(id).ok_or(Error::NotFound)?;
    if peer.state != PeerState::Discovered {
        return Err(Error::InvalidState);
    }
    let record = peer.preferred_transport(preference).ok_or(Error::NotFound)?;
    let transport = record.kind;
    let endpoint = record.endpoint.clone();
    let slot = id.slot() as usize;

    let connection = Connection::new(
        id,
        transport,
        endpoint.clone(),
        queue_capacity_per_priority,
        message_max,
        batch_capacity,
    );
    if slot >= connections.len() {
        connections.resize_with(slot + 1, || None);
    }
    connections[slot] = Some(connection);

    peers.set_state(id, PeerState::Connecting, Some(transport), now, events)?;
    match transport_ops.connect(transport, &endpoint) {
        ConnectOutcome::Connected => {
            peers.set_state(id, PeerState::Connected, Some(transport), now, events)?;
            info!(peer = %id, %transport, "connected synchronously");
        }
        ConnectOutcome::Pending => {}
        ConnectOutcome::Failed => {
            connections[slot] = None;
            peers.set_state(id, PeerState::Failed, Some(transport), now, events)?;
        }
    }
    Ok(())
}

/// spec.md §4.5 step 5: poll-time monitoring of *Connecting* slots.
pub fn poll_connecting(
    peers: &mut PeerManager,
    connections: &mut [Option<Connection>],
    transport_ops: &mut dyn TransportOps,
    connect_timeout: std::time::Duration,
    now: Tick,
    events: &mut Vec<PeerEvent>,
) {
    let connecting: Vec<PeerId> = peers
        .iter()
        .filter(|p| p.state == PeerState::Connecting)
        .map(|p| p.id)
        .collect();

    for id in connecting {
        let Some(peer) = peers.find_by_id(id) else {
            continue;
        };
        let connect_start = peer.connect_start.unwrap_or(now);
        let attempted_transport = peer.connect_transport;
        if now.elapsed_since(connect_start) >= connect_timeout {
            let slot = id.slot() as usize;
            if let Some(conn) = connections.get_mut(slot).and_then(Option::take) {
                transport_ops.disconnect(conn.transport, &conn.endpoint);
            }
            warn!(peer = %id, "connect timed out");
            let _ = peers.set_state(id, PeerState::Failed, attempted_transport, now, events);
            continue;
        }

        let slot = id.slot() as usize;
        let Some(conn) = connections.get(slot).and_then(Option::as_ref) else {
            continue;
        };
        let transport = conn.transport;
        match transport_ops.poll_connect(conn.transport, &conn.endpoint) {
            ConnectOutcome::Connected => {
                let _ = peers.set_state(id, PeerState::Connected, Some(transport), now, events);
                info!(peer = %id, "connection completed");
            }
            ConnectOutcome::Pending => {}
            ConnectOutcome::Failed => {
                if let Some(conn) = connections.get_mut(slot).and_then(Option::take) {
                    transport_ops.disconnect(conn.transport, &conn.endpoint);
                }
                let _ = peers.set_state(id, PeerState::Failed, Some(transport), now, events);
            }
        }
    }
}

/// `Disconnect(id)` (spec.md §4.5 "Disconnect").
pub fn disconnect(
    peers: &mut PeerManager,
    connections: &mut [Option<Connection>],
    transport_ops: &mut dyn TransportOps,
    id: PeerId,
    reason: DisconnectReason,
    now: Tick,
    events: &mut Vec<PeerEvent>,
) -> Result<()> {
    let peer = peers.find_by_id(id).ok_or(Error::NotFound)?;
    let state = peer.state;
    if !matches!(
        state,
        PeerState::Connected | PeerState::Connecting | PeerState::Failed
    ) {
        return Err(Error::InvalidState);
    }

    peers.log_disconnect(id, reason);
    let slot = id.slot() as usize;
    let mut transport = None;
    if let Some(conn) = connections.get_mut(slot).and_then(Option::take) {
        transport_ops.disconnect(conn.transport, &conn.endpoint);
        transport = Some(conn.transport);
    }
    let transport = transport.or(peer.connect_transport).unwrap_or(TransportKind::Tcp);

    if state == PeerState::Connected {
        peers.set_state(id, PeerState::Disconnecting, Some(transport), now, events)?;
    }
    peers.finish_disconnect(id, transport, reason, now, events)?;
    Ok(())
}
