//! The platform capability handle (spec.md §3, §9): a trait the core
//! requires from any transport driver, replacing the source's C
//! function-pointer vtable. Implementations (sockets, MacTCP, Open
//! Transport, ADSP) are external collaborators (spec.md §1) — this crate
//! only names them through this trait.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::peer_id::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Tcp,
    Udp,
    Adsp,
    Nbp,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::Tcp,
        TransportKind::Udp,
        TransportKind::Adsp,
        TransportKind::Nbp,
    ];

    fn bit(&self) -> u8 {
        match self {
            TransportKind::Tcp => 0b0001,
            TransportKind::Udp => 0b0010,
            TransportKind::Adsp => 0b0100,
            TransportKind::Nbp => 0b1000,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            TransportKind::Tcp => 0,
            TransportKind::Udp => 1,
            TransportKind::Adsp => 2,
            TransportKind::Nbp => 3,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Adsp => "adsp",
            TransportKind::Nbp => "nbp",
        };
        f.write_str(s)
    }
}

/// A bitmask set of transports, e.g. the config's "transport selection
/// bitmask (default TCP+UDP)" and a peer's `available_transports`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransportSet(u8);

impl TransportSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, t: TransportKind) {
        self.0 |= t.bit();
    }

    pub fn remove(&mut self, t: TransportKind) {
        self.0 &= !t.bit();
    }

    pub fn contains(&self, t: TransportKind) -> bool {
        self.0 & t.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TransportKind> + '_ {
        TransportKind::ALL.into_iter().filter(|t| self.contains(*t))
    }
}

impl FromIterator<TransportKind> for TransportSet {
    fn from_iter<I: IntoIterator<Item = TransportKind>>(iter: I) -> Self {
        let mut s = Self::empty();
        for t in iter {
            s.insert(t);
        }
        s
    }
}

/// Per-transport address. IP transports carry a real socket address; the
/// AppleTalk transports address by name, not by IP, so they get an opaque
/// string identifier instead (spec.md §3: "endpoint").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    Ip(std::net::SocketAddr),
    AppleTalk(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ip(addr) => write!(f, "{addr}"),
            Endpoint::AppleTalk(name) => write!(f, "{name}"),
        }
    }
}

/// Outcome of a non-blocking send attempt (spec.md §4.6 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    SentAll,
    FlowControlled,
    Fatal,
}

/// Outcome of draining one connection's readable bytes (spec.md §4.6 step 4).
#[derive(Debug)]
pub enum RecvOutcome<'a> {
    Data(&'a [u8]),
    WouldBlock,
    Closed,
}

/// Outcome of a non-blocking connect attempt (spec.md §4.5 step 4-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Pending,
    Connected,
    Failed,
}

/// The capability set the core requires from any transport (spec.md §3
/// "Platform Capability Handle", §9 "Polymorphism over transports").
/// Object-safe so a `Context` can hold `Box<dyn TransportOps>`.
pub trait TransportOps {
    fn now_ticks(&self) -> Tick;

    fn connect(&mut self, transport: TransportKind, endpoint: &Endpoint) -> ConnectOutcome;
    fn poll_connect(&mut self, transport: TransportKind, endpoint: &Endpoint) -> ConnectOutcome;
    fn disconnect(&mut self, transport: TransportKind, endpoint: &Endpoint);

    /// Non-blocking send on a connection-oriented transport. `data` is
    /// consumed left-to-right; returns how much was actually written along
    /// with the outcome.
    fn send(
        &mut self,
        transport: TransportKind,
        endpoint: &Endpoint,
        data: &[u8],
    ) -> (usize, SendOutcome);

    /// Non-blocking recv; `buf` is scratch space owned by the caller
    /// (pre-allocated, per spec.md §5 memory policy).
    fn recv<'a>(
        &mut self,
        transport: TransportKind,
        endpoint: &Endpoint,
        buf: &'a mut [u8],
    ) -> RecvOutcome<'a>;

    /// Unreliable datagram send, absent (`None`) on platforms without a
    /// datagram path — callers must map that to `NotSupported`.
    fn send_udp(&mut self, endpoint: &Endpoint, data: &[u8]) -> Option<usize>;

    fn supports_udp(&self) -> bool {
        true
    }

    /// Listener/accept completion for a transport with a passive-open
    /// socket (spec.md §4.5 "Passive accept"). `None` when nothing is
    /// pending. Default: no passive accept support.
    fn poll_accept(&mut self, _transport: TransportKind) -> Option<Endpoint> {
        None
    }

    /// Broadcasts a discovery datagram on the configured discovery port
    /// (spec.md §4.4). Default: unsupported.
    fn broadcast_discovery(&mut self, _bytes: &[u8]) -> Option<usize> {
        None
    }

    /// Drains one pending discovery datagram, if any (spec.md §4.4 "drain
    /// all pending discovery datagrams"). `buf` is scratch space owned by
    /// the caller. Default: nothing pending.
    fn poll_discovery<'a>(&mut self, _buf: &'a mut [u8]) -> Option<(usize, Endpoint)> {
        None
    }
}
