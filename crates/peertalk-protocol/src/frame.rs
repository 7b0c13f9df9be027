//! The 10-byte frame header (spec.md §4.3):
//!
//! ```text
//! offset  len  field
//! 0       4    magic
//! 4       1    version
//! 5       1    type
//! 6       1    flags
//! 7       1    sequence
//! 8       2    payload_len (BE)
//! ```

use byteorder::{BE, ByteOrder};

pub const MAGIC: [u8; 4] = *b"PTLK";
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 10;
pub const CRC_LEN: usize = 2;
pub const DEFAULT_MESSAGE_MAX: u32 = 4096;

/// Reserved for the batch-framing extension hinted at by `PT_MSG_FLAG_BATCH`
/// in the source but left unspecified (spec.md §9). Accepted on the wire,
/// never set by this implementation.
pub const FLAG_BATCH_RESERVED: u8 = 0b0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Data = 0,
    Ping = 1,
    Pong = 2,
    Disconnect = 3,
    Ack = 4,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Data),
            1 => Some(Self::Ping),
            2 => Some(Self::Pong),
            3 => Some(Self::Disconnect),
            4 => Some(Self::Ack),
            _ => None,
        }
    }

    /// Control messages always carry sequence 0 and an empty payload.
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Data)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad magic: {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported message type {0}")]
    UnsupportedType(u8),
    #[error("payload length {len} exceeds message_max {max}")]
    PayloadTooLarge { len: u32, max: u32 },
    #[error("crc mismatch: expected {expected:04x}, computed {computed:04x}")]
    CrcMismatch { expected: u16, computed: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub msg_type: MessageType,
    pub flags: u8,
    pub sequence: u8,
    pub payload_len: u16,
}

impl FrameHeader {
    pub fn data(sequence: u8, payload_len: u16) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Data,
            flags: 0,
            sequence,
            payload_len,
        }
    }

    pub fn control(msg_type: MessageType) -> Self {
        debug_assert!(msg_type.is_control());
        Self {
            version: PROTOCOL_VERSION,
            msg_type,
            flags: 0,
            sequence: 0,
            payload_len: 0,
        }
    }

    pub fn encode(&self, buf: &mut [u8; HEADER_LEN]) {
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version;
        buf[5] = self.msg_type as u8;
        buf[6] = self.flags;
        buf[7] = self.sequence;
        BE::write_u16(&mut buf[8..10], self.payload_len);
    }

    pub fn decode(buf: &[u8; HEADER_LEN], message_max: u32) -> Result<Self, FrameError> {
        let magic: [u8; 4] = buf[0..4].try_into().unwrap();
        if magic != MAGIC {
            return Err(FrameError::BadMagic(magic));
        }
        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let msg_type =
            MessageType::from_u8(buf[5]).ok_or(FrameError::UnsupportedType(buf[5]))?;
        let flags = buf[6];
        let sequence = buf[7];
        let payload_len = BE::read_u16(&buf[8..10]);
        if payload_len as u32 > message_max {
            return Err(FrameError::PayloadTooLarge {
                len: payload_len as u32,
                max: message_max,
            });
        }
        Ok(Self {
            version,
            msg_type,
            flags,
            sequence,
            payload_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        for h in [
            FrameHeader::data(7, 42),
            FrameHeader::data(0, 0),
            FrameHeader::control(MessageType::Ping),
            FrameHeader::control(MessageType::Disconnect),
        ] {
            let mut buf = [0u8; HEADER_LEN];
            h.encode(&mut buf);
            let decoded = FrameHeader::decode(&buf, DEFAULT_MESSAGE_MAX).unwrap();
            assert_eq!(h, decoded);
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = [0u8; HEADER_LEN];
        assert!(matches!(
            FrameHeader::decode(&buf, DEFAULT_MESSAGE_MAX),
            Err(FrameError::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_oversize_payload() {
        let h = FrameHeader::data(0, 4097);
        let mut buf = [0u8; HEADER_LEN];
        h.encode(&mut buf);
        assert!(matches!(
            FrameHeader::decode(&buf, DEFAULT_MESSAGE_MAX),
            Err(FrameError::PayloadTooLarge { len: 4097, max: 4096 })
        ));
    }

    #[test]
    fn message_max_boundary_is_accepted() {
        let h = FrameHeader::data(0, DEFAULT_MESSAGE_MAX as u16);
        let mut buf = [0u8; HEADER_LEN];
        h.encode(&mut buf);
        assert!(FrameHeader::decode(&buf, DEFAULT_MESSAGE_MAX).is_ok());
    }
}
