//! `Poll(ctx)` (spec.md §4.6): the sole place the core performs work on
//! the application's behalf. Steps run in the fixed order the spec lists
//! so the log stream never reorders relative to the events that produced
//! it; within a step, peers are serviced in active-set order.

use tracing::warn;

use peertalk_protocol::{DiscoveryDatagram, MessageType};

use crate::context::{control_reply, warn_dropped_message, Context};
use crate::lifecycle;
use crate::peer::{DisconnectReason, PeerState};
use crate::peer_id::{PeerId, Tick};
use crate::receive_pipeline::Dispatch;
use crate::transport::{Endpoint, RecvOutcome, SendOutcome, TransportKind};

const RECV_SCRATCH_LEN: usize = 4096;

impl Context {
    /// Advances the world by one tick. Never blocks; returns once every
    /// step below has drained whatever immediate work it found.
    pub fn poll(&mut self) {
        let now = self.now();
        poll_discovery(self, now);
        poll_connections(self, now);
        poll_receive(self, now);
        poll_send(self);
        poll_housekeeping(self, now);
        poll_flush_batch(self);
    }

    fn now(&mut self) -> Tick {
        let (_, _, _, _, _, transport_ops) = self.parts_mut();
        transport_ops.now_ticks()
    }
}

/// spec.md §4.6 step 2: drain inbound discovery datagrams, reply to
/// queries, and emit a periodic re-announce when due.
fn poll_discovery(ctx: &mut Context, now: Tick) {
    let local_endpoint = Endpoint::Ip((std::net::Ipv4Addr::UNSPECIFIED, ctx.config().discovery_port).into());

    let mut events = Vec::new();
    let mut replies: Vec<DiscoveryDatagram> = Vec::new();
    {
        let (peers, _connections, _stats, discovery, _callbacks, transport_ops) = ctx.parts_mut();
        let mut scratch = [0u8; peertalk_protocol::MAX_DATAGRAM_LEN];
        while let Some((len, source)) = transport_ops.poll_discovery(&mut scratch) {
            let datagram = match DiscoveryDatagram::decode(&scratch[..len]) {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "malformed discovery datagram");
                    continue;
                }
            };
            let transport = match source {
                Endpoint::Ip(_) => TransportKind::Udp,
                Endpoint::AppleTalk(_) => TransportKind::Nbp,
            };
            match discovery.handle_datagram(&datagram, &source, &local_endpoint, transport, now, peers, &mut events) {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "discovery datagram rejected"),
            }
        }
        if let Some(datagram) = discovery.tick_periodic_announce(now) {
            replies.push(datagram);
        }
    }
    ctx.drain_events(events);
    for datagram in &replies {
        ctx.broadcast_discovery_datagram(datagram);
    }
}

/// spec.md §4.6 step 3: completion flags, passive accept, and *Connecting*
/// expiry.
fn poll_connections(ctx: &mut Context, now: Tick) {
    let connect_timeout = ctx.config().connect_timeout;
    let mut events = Vec::new();
    {
        let (peers, connections, _stats, _discovery, _callbacks, transport_ops) = ctx.parts_mut();
        lifecycle::poll_connecting(peers, connections, transport_ops, connect_timeout, now, &mut events);
    }
    ctx.drain_events(events);

    let transports = ctx.config().transports;
    let mut accepted: Vec<(TransportKind, Endpoint)> = Vec::new();
    {
        let (_peers, _connections, _stats, _discovery, _callbacks, transport_ops) = ctx.parts_mut();
        for transport in transports.iter() {
            while let Some(endpoint) = transport_ops.poll_accept(transport) {
                accepted.push((transport, endpoint));
            }
        }
    }
    for (transport, endpoint) in accepted {
        let name = format!("{endpoint}");
        let mut events = Vec::new();
        {
            let (peers, _connections, _stats, _discovery, _callbacks, _transport_ops) = ctx.parts_mut();
            if let Err(e) = peers.create(&name, transport, endpoint, now, &mut events) {
                warn!(error = %e, "failed to record inbound connection");
            }
        }
        ctx.drain_events(events);
    }
}

/// spec.md §4.6 step 4: drive receive for every *Connected* peer, looping
/// the framer until the transport reports no more input.
fn poll_receive(ctx: &mut Context, now: Tick) {
    let connected = ctx.peer_ids_in_state(PeerState::Connected);

    let mut pongs: Vec<(PeerId, u32)> = Vec::new();
    let mut pings: Vec<PeerId> = Vec::new();
    let mut closes: Vec<(PeerId, DisconnectReason)> = Vec::new();

    {
        let (peers, connections, stats, _discovery, callbacks, transport_ops) = ctx.parts_mut();
        for id in connected {
            let slot = id.slot() as usize;
            let Some(connection) = connections.get_mut(slot).and_then(Option::as_mut) else {
                continue;
            };
            let Some(peer) = peers.find_by_id_mut(id) else {
                continue;
            };
            let counters = &stats[slot];

            loop {
                let mut scratch = [0u8; RECV_SCRATCH_LEN];
                let outcome = transport_ops.recv(connection.transport, &connection.endpoint, &mut scratch);
                let input: &[u8] = match outcome {
                    RecvOutcome::Data(bytes) => bytes,
                    RecvOutcome::WouldBlock => break,
                    RecvOutcome::Closed => {
                        closes.push((id, DisconnectReason::RemoteClose));
                        break;
                    }
                };
                if input.is_empty() {
                    break;
                }

                let mut remaining = input;
                loop {
                    let (consumed, dispatch) = connection.receive_pipeline.feed(
                        id,
                        remaining,
                        now,
                        &mut peer.recv_seq,
                        &mut peer.last_ping_sent,
                        callbacks.has_batch(),
                        callbacks.has_message(),
                        counters,
                    );
                    match dispatch {
                        Dispatch::Continue | Dispatch::Batched => {}
                        Dispatch::Immediate(payload) => callbacks.fire_message(id, &payload),
                        Dispatch::Dropped => warn_dropped_message(id),
                        Dispatch::PongRtt(rtt) => pongs.push((id, rtt)),
                        Dispatch::PingReceived => pings.push(id),
                        Dispatch::PeerRequestedClose => closes.push((id, DisconnectReason::RemoteClose)),
                        Dispatch::FramingError => closes.push((id, DisconnectReason::TransportError)),
                    }
                    if consumed == 0 || consumed >= remaining.len() {
                        break;
                    }
                    remaining = &remaining[consumed..];
                }
            }
        }
    }

    for (id, rtt) in pongs {
        ctx.record_latency_sample(id, rtt);
    }
    for id in pings {
        if let Some(header) = control_reply(MessageType::Ping) {
            ctx.enqueue_control_reply(id, header);
        }
    }
    for (id, reason) in closes {
        ctx.close_peer_from_poll(id, reason);
    }
}

/// spec.md §4.6 step 5: pop the highest-priority queued message per
/// *Connected* peer whose transport is ready and hand it to `send`.
fn poll_send(ctx: &mut Context) {
    let connected = ctx.peer_ids_in_state(PeerState::Connected);
    let mut fatal: Vec<PeerId> = Vec::new();
    {
        let (_peers, connections, stats, _discovery, _callbacks, transport_ops) = ctx.parts_mut();
        for id in connected {
            let slot = id.slot() as usize;
            let Some(connection) = connections.get_mut(slot).and_then(Option::as_mut) else {
                continue;
            };
            let Some((priority, payload)) = connection.send_queue.pop_priority() else {
                continue;
            };
            let (written, outcome) = transport_ops.send(connection.transport, &connection.endpoint, &payload);
            match outcome {
                SendOutcome::SentAll => stats[slot].on_sent(written),
                SendOutcome::FlowControlled => connection.send_queue.push_front(priority, payload),
                SendOutcome::Fatal => fatal.push(id),
            }
        }
    }
    for id in fatal {
        ctx.close_peer_from_poll(id, DisconnectReason::TransportError);
    }
}

/// spec.md §4.6 step 6: discovery-record timeout sweep.
fn poll_housekeeping(ctx: &mut Context, now: Tick) {
    let mut events = Vec::new();
    {
        let (peers, _connections, _stats, _discovery, _callbacks, _transport_ops) = ctx.parts_mut();
        peers.check_timeouts(now, &mut events);
    }
    ctx.drain_events(events);
}

/// spec.md §4.6 step 7: flush the batch buffer if a batch callback is
/// installed and it's non-empty.
fn poll_flush_batch(ctx: &mut Context) {
    let ids = ctx.peer_ids_in_state(PeerState::Connected);
    let (_peers, connections, _stats, _discovery, callbacks, _transport_ops) = ctx.parts_mut();
    if !callbacks.has_batch() {
        return;
    }
    let mut batch = Vec::new();
    for id in ids {
        let slot = id.slot() as usize;
        if let Some(connection) = connections.get_mut(slot).and_then(Option::as_mut) {
            batch.extend(connection.receive_pipeline.drain_batch());
        }
    }
    if !batch.is_empty() {
        callbacks.fire_batch(&batch);
    }
}
