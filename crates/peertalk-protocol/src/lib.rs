//! Wire-level framing for PeerTalk: frame headers, CRC-16, the byte-level
//! receive state machine, and the discovery/unreliable datagram formats.
//!
//! This crate does no I/O and holds no connection state beyond a single
//! [`framer::Framer`] per stream; it can be used outside of `peertalk-core`.

pub mod crc16;
pub mod discovery;
pub mod frame;
pub mod framer;
pub mod unreliable;

pub use crc16::{crc16, Crc16Digest};
pub use discovery::{DiscoveryDatagram, DiscoveryType, MAX_DATAGRAM_LEN};
pub use frame::{FrameError, FrameHeader, MessageType, DEFAULT_MESSAGE_MAX, HEADER_LEN};
pub use framer::{encode_frame, Framer, FramerEvent};
pub use unreliable::{decode_datagram, encode_datagram, UnreliableHeader};
