//! Byte-level receive state machine (spec.md §4.3).
//!
//! Turns an arbitrarily-chunked stream into validated frames. Never blocks,
//! never allocates past construction: `payload_buf` is sized once, at
//! `Framer::new`, to the connection's negotiated `message_max`.

use byteorder::{BE, ByteOrder};

use crate::crc16::crc16;
use crate::frame::{CRC_LEN, FrameError, FrameHeader, HEADER_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitHeader,
    AwaitPayload,
    AwaitCrc,
}

/// Result of feeding bytes into the framer for one step.
#[derive(Debug)]
pub enum FramerEvent {
    /// Consumed what it could; needs more bytes before anything else happens.
    NeedMore,
    /// A full frame validated. Read it via `Framer::header`/`Framer::payload`,
    /// then call `Framer::advance` before feeding more bytes.
    FrameReady,
    /// The frame failed validation. The framer has already reset itself to
    /// `AwaitHeader`; the caller should close the connection (spec.md §4.3,
    /// §8 S5).
    Rejected(FrameError),
}

pub struct Framer {
    message_max: u32,
    state: State,
    header_buf: [u8; HEADER_LEN],
    header_filled: usize,
    payload_buf: Box<[u8]>,
    payload_filled: usize,
    crc_buf: [u8; CRC_LEN],
    crc_filled: usize,
    header: Option<FrameHeader>,
}

impl Framer {
    pub fn new(message_max: u32) -> Self {
        Self {
            message_max,
            state: State::AwaitHeader,
            header_buf: [0u8; HEADER_LEN],
            header_filled: 0,
            payload_buf: vec![0u8; message_max as usize].into_boxed_slice(),
            payload_filled: 0,
            crc_buf: [0u8; CRC_LEN],
            crc_filled: 0,
            header: None,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::AwaitHeader;
        self.header_filled = 0;
        self.payload_filled = 0;
        self.crc_filled = 0;
        self.header = None;
    }

    /// The header of the frame currently sitting in `FrameReady`.
    pub fn header(&self) -> Option<&FrameHeader> {
        self.header.as_ref()
    }

    /// The payload of the frame currently sitting in `FrameReady`.
    pub fn payload(&self) -> &[u8] {
        &self.payload_buf[..self.payload_filled]
    }

    /// Consume as many bytes of `input` as the current state wants, returning
    /// how many were consumed and what happened. Callers should loop, slicing
    /// off `consumed` bytes, until the input is empty or an event other than
    /// `NeedMore` with full consumption is returned — `AwaitHeader`,
    /// `AwaitPayload`, `AwaitCrc` are each serviced by exactly one call, so a
    /// full frame may take up to three calls to materialize.
    pub fn feed(&mut self, input: &[u8]) -> (usize, FramerEvent) {
        match self.state {
            State::AwaitHeader => self.feed_header(input),
            State::AwaitPayload => self.feed_payload(input),
            State::AwaitCrc => self.feed_crc(input),
        }
    }

    /// Call after consuming a `FrameReady` event, to go back to `AwaitHeader`.
    pub fn advance(&mut self) {
        self.reset();
    }

    fn feed_header(&mut self, input: &[u8]) -> (usize, FramerEvent) {
        let need = HEADER_LEN - self.header_filled;
        let take = need.min(input.len());
        self.header_buf[self.header_filled..self.header_filled + take]
            .copy_from_slice(&input[..take]);
        self.header_filled += take;
        if self.header_filled < HEADER_LEN {
            return (take, FramerEvent::NeedMore);
        }

        let header = match FrameHeader::decode(&self.header_buf, self.message_max) {
            Ok(h) => h,
            Err(e) => {
                self.reset();
                return (take, FramerEvent::Rejected(e));
            }
        };
        self.header = Some(header);
        if header.payload_len == 0 {
            self.state = State::AwaitCrc;
        } else {
            self.state = State::AwaitPayload;
        }
        (take, FramerEvent::NeedMore)
    }

    fn feed_payload(&mut self, input: &[u8]) -> (usize, FramerEvent) {
        let payload_len = self.header.as_ref().unwrap().payload_len as usize;
        let need = payload_len - self.payload_filled;
        let take = need.min(input.len());
        self.payload_buf[self.payload_filled..self.payload_filled + take]
            .copy_from_slice(&input[..take]);
        self.payload_filled += take;
        if self.payload_filled < payload_len {
            return (take, FramerEvent::NeedMore);
        }
        self.state = State::AwaitCrc;
        (take, FramerEvent::NeedMore)
    }

    fn feed_crc(&mut self, input: &[u8]) -> (usize, FramerEvent) {
        let need = CRC_LEN - self.crc_filled;
        let take = need.min(input.len());
        self.crc_buf[self.crc_filled..self.crc_filled + take].copy_from_slice(&input[..take]);
        self.crc_filled += take;
        if self.crc_filled < CRC_LEN {
            return (take, FramerEvent::NeedMore);
        }

        let expected = BE::read_u16(&self.crc_buf);
        let computed = self.compute_crc();
        if expected != computed {
            self.reset();
            return (
                take,
                FramerEvent::Rejected(FrameError::CrcMismatch { expected, computed }),
            );
        }
        (take, FramerEvent::FrameReady)
    }

    fn compute_crc(&self) -> u16 {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload_filled);
        buf.extend_from_slice(&self.header_buf);
        buf.extend_from_slice(&self.payload_buf[..self.payload_filled]);
        crc16(&buf)
    }
}

/// Encode a complete frame (header + payload + CRC) into `out`. Returns the
/// number of bytes written, or `None` if `out` is too small.
pub fn encode_frame(header: &FrameHeader, payload: &[u8], out: &mut [u8]) -> Option<usize> {
    let total = HEADER_LEN + payload.len() + CRC_LEN;
    if out.len() < total {
        return None;
    }
    let mut hbuf = [0u8; HEADER_LEN];
    header.encode(&mut hbuf);
    out[..HEADER_LEN].copy_from_slice(&hbuf);
    out[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
    let crc = crc16(&out[..HEADER_LEN + payload.len()]);
    BE::write_u16(&mut out[HEADER_LEN + payload.len()..total], crc);
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MessageType;

    fn feed_all(framer: &mut Framer, mut input: &[u8]) -> Vec<(Vec<u8>, u8)> {
        let mut frames = Vec::new();
        while !input.is_empty() {
            let (consumed, event) = framer.feed(input);
            input = &input[consumed..];
            match event {
                FramerEvent::NeedMore => {}
                FramerEvent::FrameReady => {
                    frames.push((framer.payload().to_vec(), framer.header().unwrap().sequence));
                    framer.advance();
                }
                FramerEvent::Rejected(e) => panic!("unexpected rejection: {e}"),
            }
            if consumed == 0 {
                break;
            }
        }
        frames
    }

    #[test]
    fn single_frame_in_one_shot() {
        let header = FrameHeader::data(5, 3);
        let mut buf = [0u8; 64];
        let n = encode_frame(&header, b"abc", &mut buf).unwrap();

        let mut framer = Framer::new(4096);
        let frames = feed_all(&mut framer, &buf[..n]);
        assert_eq!(frames, vec![(b"abc".to_vec(), 5)]);
    }

    #[test]
    fn byte_at_a_time_still_assembles() {
        let header = FrameHeader::data(9, 5);
        let mut buf = [0u8; 64];
        let n = encode_frame(&header, b"hello", &mut buf).unwrap();

        let mut framer = Framer::new(4096);
        let mut frames = Vec::new();
        for b in &buf[..n] {
            let (consumed, event) = framer.feed(std::slice::from_ref(b));
            assert_eq!(consumed, 1);
            match event {
                FramerEvent::NeedMore => {}
                FramerEvent::FrameReady => {
                    frames.push(framer.payload().to_vec());
                    framer.advance();
                }
                FramerEvent::Rejected(e) => panic!("{e}"),
            }
        }
        assert_eq!(frames, vec![b"hello".to_vec()]);
    }

    #[test]
    fn zero_length_payload_skips_straight_to_crc() {
        let header = FrameHeader::control(MessageType::Ping);
        let mut buf = [0u8; 32];
        let n = encode_frame(&header, &[], &mut buf).unwrap();
        assert_eq!(n, HEADER_LEN + CRC_LEN);

        let mut framer = Framer::new(4096);
        let frames = feed_all(&mut framer, &buf[..n]);
        assert_eq!(frames, vec![(Vec::new(), 0)]);
    }

    #[test]
    fn crc_mismatch_resets_and_is_reported() {
        let header = FrameHeader::data(1, 5);
        let mut buf = [0u8; 32];
        let n = encode_frame(&header, b"hello", &mut buf).unwrap();
        // Corrupt one CRC byte.
        buf[n - 1] ^= 0xff;

        let mut framer = Framer::new(4096);
        let mut input = &buf[..n];
        let mut rejected = false;
        while !input.is_empty() {
            let (consumed, event) = framer.feed(input);
            input = &input[consumed..];
            if let FramerEvent::Rejected(FrameError::CrcMismatch { .. }) = event {
                rejected = true;
            }
        }
        assert!(rejected);
        // The framer must have reset back to AwaitHeader.
        assert_eq!(framer.state, State::AwaitHeader);
    }

    #[test]
    fn message_max_plus_one_is_rejected_at_header() {
        let header = FrameHeader::data(0, 10);
        let mut buf = [0u8; 32];
        let n = encode_frame(&header, &[0u8; 10], &mut buf).unwrap();

        let mut framer = Framer::new(9);
        let (_, event) = framer.feed(&buf[..n]);
        assert!(matches!(
            event,
            FramerEvent::Rejected(FrameError::PayloadTooLarge { len: 10, max: 9 })
        ));
    }
}
