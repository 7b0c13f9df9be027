//! Discovery datagram format (spec.md §4.4, §6):
//!
//! `{type:u8, flags:u16 BE, sender_port:u16 BE, name_len:u8, name[name_len]}`,
//! bounded to 128 bytes total.

use byteorder::{BE, ByteOrder};

use crate::frame::FrameError;

pub const MAX_DATAGRAM_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 31;
const DISCOVERY_PREAMBLE_LEN: usize = 1 + 2 + 2 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiscoveryType {
    Announce = 0,
    Query = 1,
    Goodbye = 2,
}

impl DiscoveryType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Announce),
            1 => Some(Self::Query),
            2 => Some(Self::Goodbye),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryDatagram {
    pub kind: DiscoveryType,
    pub flags: u16,
    pub sender_port: u16,
    pub name: String,
}

impl DiscoveryDatagram {
    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        let name_bytes = self.name.as_bytes();
        if name_bytes.len() > MAX_NAME_LEN {
            return None;
        }
        let total = DISCOVERY_PREAMBLE_LEN + name_bytes.len();
        if total > MAX_DATAGRAM_LEN || out.len() < total {
            return None;
        }
        out[0] = self.kind as u8;
        BE::write_u16(&mut out[1..3], self.flags);
        BE::write_u16(&mut out[3..5], self.sender_port);
        out[5] = name_bytes.len() as u8;
        out[6..6 + name_bytes.len()].copy_from_slice(name_bytes);
        Some(total)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < DISCOVERY_PREAMBLE_LEN {
            return Err(FrameError::PayloadTooLarge {
                len: buf.len() as u32,
                max: DISCOVERY_PREAMBLE_LEN as u32,
            });
        }
        let kind = DiscoveryType::from_u8(buf[0]).ok_or(FrameError::UnsupportedType(buf[0]))?;
        let flags = BE::read_u16(&buf[1..3]);
        let sender_port = BE::read_u16(&buf[3..5]);
        let name_len = buf[5] as usize;
        let name_start = DISCOVERY_PREAMBLE_LEN;
        if buf.len() < name_start + name_len {
            return Err(FrameError::PayloadTooLarge {
                len: buf.len() as u32,
                max: (name_start + name_len) as u32,
            });
        }
        let name = String::from_utf8_lossy(&buf[name_start..name_start + name_len]).into_owned();
        Ok(Self {
            kind,
            flags,
            sender_port,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let d = DiscoveryDatagram {
            kind: DiscoveryType::Announce,
            flags: 0,
            sender_port: 7354,
            name: "Alice".to_string(),
        };
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        let n = d.encode(&mut buf).unwrap();
        assert!(n <= MAX_DATAGRAM_LEN);
        let decoded = DiscoveryDatagram::decode(&buf[..n]).unwrap();
        assert_eq!(d, decoded);
    }

    #[test]
    fn name_too_long_is_rejected_at_encode() {
        let d = DiscoveryDatagram {
            kind: DiscoveryType::Query,
            flags: 0,
            sender_port: 1,
            name: "x".repeat(MAX_NAME_LEN + 1),
        };
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        assert!(d.encode(&mut buf).is_none());
    }
}
