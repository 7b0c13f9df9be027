//! End-to-end: discovery announce arrives, the peer gets connected, a
//! reliable message sent to it round-trips through the framer and reaches
//! the message callback.
//!
//! The fake `TransportOps` below loops sent bytes straight back into its
//! own recv queue, standing in for a second host that echoes whatever it
//! receives — enough to exercise every poll step without a real socket.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use peertalk_core::{
    Callbacks, Config, ConnectOutcome, Context, Endpoint, PeerId, RecvOutcome, SendOutcome,
    TransportKind, TransportOps,
};
use peertalk_protocol::{DiscoveryDatagram, DiscoveryType, MAX_DATAGRAM_LEN};

struct LoopbackTransport {
    tick: u64,
    discovery_inbox: VecDeque<(Vec<u8>, Endpoint)>,
    recv_inbox: VecDeque<u8>,
}

impl TransportOps for LoopbackTransport {
    fn now_ticks(&self) -> peertalk_core::Tick {
        peertalk_core::Tick(self.tick)
    }

    fn connect(&mut self, _transport: TransportKind, _endpoint: &Endpoint) -> ConnectOutcome {
        ConnectOutcome::Connected
    }

    fn poll_connect(&mut self, _transport: TransportKind, _endpoint: &Endpoint) -> ConnectOutcome {
        ConnectOutcome::Connected
    }

    fn disconnect(&mut self, _transport: TransportKind, _endpoint: &Endpoint) {}

    fn send(&mut self, _transport: TransportKind, _endpoint: &Endpoint, data: &[u8]) -> (usize, SendOutcome) {
        self.recv_inbox.extend(data.iter().copied());
        (data.len(), SendOutcome::SentAll)
    }

    fn recv<'a>(&mut self, _transport: TransportKind, _endpoint: &Endpoint, buf: &'a mut [u8]) -> RecvOutcome<'a> {
        if self.recv_inbox.is_empty() {
            return RecvOutcome::WouldBlock;
        }
        let n = self.recv_inbox.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.recv_inbox.pop_front().expect("checked non-empty above");
        }
        RecvOutcome::Data(&buf[..n])
    }

    fn send_udp(&mut self, _endpoint: &Endpoint, _data: &[u8]) -> Option<usize> {
        None
    }

    fn poll_discovery<'a>(&mut self, buf: &'a mut [u8]) -> Option<(usize, Endpoint)> {
        let (bytes, source) = self.discovery_inbox.pop_front()?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Some((n, source))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn encode(datagram: &DiscoveryDatagram) -> Vec<u8> {
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    let n = datagram.encode(&mut buf).expect("fits in one datagram");
    buf[..n].to_vec()
}

#[test]
fn discover_then_connect_then_exchange() {
    init_tracing();
    let remote_endpoint = Endpoint::Ip("10.0.0.2:7354".parse().unwrap());
    let announce = DiscoveryDatagram {
        kind: DiscoveryType::Announce,
        flags: 0,
        sender_port: 7354,
        name: "Bob".to_string(),
    };

    let transport = LoopbackTransport {
        tick: 0,
        discovery_inbox: VecDeque::from([(encode(&announce), remote_endpoint)]),
        recv_inbox: VecDeque::new(),
    };

    let mut config = Config::default();
    config.local_name = "Alice".to_string();
    let mut ctx = Context::init(config, Box::new(transport));

    ctx.start_discovery().unwrap();
    ctx.poll();

    let peers = ctx.get_peers();
    assert_eq!(peers.len(), 1, "the Announce datagram should have registered Bob");
    let bob: PeerId = peers[0];
    let info = ctx.get_peer_info(bob).unwrap();
    assert_eq!(info.name, "Bob");

    ctx.connect(bob).unwrap();
    let info = ctx.get_peer_info(bob).unwrap();
    assert_eq!(info.state, peertalk_core::PeerState::Connected);

    let received = Rc::new(RefCell::new(Vec::new()));
    let received_clone = received.clone();
    let mut callbacks = Callbacks::default();
    callbacks.on_message_received = Some(Box::new(move |id, bytes| {
        received_clone.borrow_mut().push((id, bytes.to_vec()));
    }));
    ctx.set_callbacks(callbacks);

    ctx.send(bob, b"hello bob").unwrap();

    // Step 5 (send) runs after step 4 (receive) within a single poll, so the
    // framed bytes only land in the loopback transport's recv queue after
    // this call returns; a second poll is needed to read them back.
    ctx.poll();
    assert!(received.borrow().is_empty(), "message is still in flight after the send-side poll");

    ctx.poll();
    let delivered = received.borrow();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, bob);
    assert_eq!(delivered[0].1, b"hello bob");
}

#[test]
fn stop_discovery_is_idempotent_and_does_not_panic() {
    init_tracing();
    let transport = LoopbackTransport {
        tick: 0,
        discovery_inbox: VecDeque::new(),
        recv_inbox: VecDeque::new(),
    };
    let mut ctx = Context::init(Config::default(), Box::new(transport));
    ctx.start_discovery().unwrap();
    ctx.stop_discovery().unwrap();
    ctx.stop_discovery().unwrap();
}
