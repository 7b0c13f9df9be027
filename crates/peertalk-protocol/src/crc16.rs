//! CRC-16 used to trail every framed message (spec: header || payload).
//!
//! Pinned to CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection,
//! no xorout) — the source only referenced the CRC routine by name, so this
//! is the implementer's choice spec.md §9 calls out as an Open Question.

use crc::{Crc, Digest};

pub const CRC16: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// One-shot CRC over a single contiguous buffer.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Incremental CRC accumulator. `crc_update(a ‖ b) == crc_update(crc_update(a), b)`
/// falls out of `crc`'s `Digest` being a running checksum.
pub struct Crc16Digest<'a>(Digest<'a, u16>);

impl Default for Crc16Digest<'_> {
    fn default() -> Self {
        Self(CRC16.digest())
    }
}

impl Crc16Digest<'_> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> u16 {
        self.0.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_matches_incremental_split() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let whole = crc16(data);

        for split in 0..data.len() {
            let (a, b) = data.split_at(split);
            let mut d = Crc16Digest::new();
            d.update(a);
            d.update(b);
            assert_eq!(d.finalize(), whole, "split at {split}");
        }
    }

    #[test]
    fn empty_payload_has_a_defined_crc() {
        // payload_len == 0 frames still CRC the (header-only) bytes.
        let header = [0u8; 10];
        assert_eq!(crc16(&header), crc16(&header));
    }
}
