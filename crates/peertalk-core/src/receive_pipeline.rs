//! Per-peer receive pipeline (spec.md §4.3): wraps a `peertalk_protocol`
//! framer with the dispatch policy by message type and the batch buffer.

use std::collections::VecDeque;

use tracing::warn;

use peertalk_protocol::{FrameHeader, Framer, FramerEvent, MessageType};

use crate::peer_id::{PeerId, Tick};
use crate::stats::PeerCountersAtomic;

/// One queued `Data` message awaiting batch-flush delivery (spec.md §4.3
/// dispatch table: "append `{from_peer, payload, length}`").
pub struct BatchEntry {
    pub from_peer: PeerId,
    pub payload: Box<[u8]>,
}

/// What the poll driver must do as a result of feeding bytes through a
/// peer's pipeline.
pub enum Dispatch {
    /// Nothing to deliver yet; keep feeding bytes.
    Continue,
    /// A `Data` message was appended to the batch buffer.
    Batched,
    /// A `Data` message must be delivered immediately — no batch callback
    /// installed, or the batch buffer is full.
    Immediate(Box<[u8]>),
    /// The dispatch dropped a `Data` message (no batch room, no per-message
    /// callback) — spec.md §4.3: "else drop with warn."
    Dropped,
    /// A Pong was processed; RTT in milliseconds is reported for the
    /// caller to fold into peer stats outside this module's borrow.
    PongRtt(u32),
    /// A Ping arrived; caller should enqueue a Pong control reply.
    PingReceived,
    /// A Disconnect control message arrived: close this connection.
    PeerRequestedClose,
    /// The framer rejected the stream (bad magic/version/CRC/oversize):
    /// the transport-layer connection must be closed.
    FramingError,
}

pub struct ReceivePipeline {
    framer: Framer,
    batch: VecDeque<BatchEntry>,
    batch_capacity: usize,
}

impl ReceivePipeline {
    pub fn new(message_max: u32, batch_capacity: usize) -> Self {
        Self {
            framer: Framer::new(message_max),
            batch: VecDeque::with_capacity(batch_capacity),
            batch_capacity,
        }
    }

    pub fn drain_batch(&mut self) -> impl Iterator<Item = BatchEntry> + '_ {
        self.batch.drain(..)
    }

    pub fn has_batch_room(&self) -> bool {
        self.batch.len() < self.batch_capacity
    }

    /// Feeds `input` through the framer, driving it across as many of its
    /// internal header/payload/crc steps as the bytes on hand allow (spec.md
    /// §4.6 step 4: "invoke the framer repeatedly until it reports no more
    /// input"), stopping at the first assembled frame, rejection, or
    /// exhausted input. Returns how many bytes were consumed and what the
    /// caller should do; the caller loops with the remaining slice until
    /// `Continue` is returned with 0 consumed.
    pub fn feed(
        &mut self,
        from_peer: PeerId,
        input: &[u8],
        now: Tick,
        peer_recv_seq: &mut u8,
        peer_last_ping_sent: &mut Option<Tick>,
        batch_callback_installed: bool,
        per_message_callback_installed: bool,
        counters: &PeerCountersAtomic,
    ) -> (usize, Dispatch) {
        let mut total_consumed = 0;
        let mut remaining = input;
        loop {
            let (consumed, event) = self.framer.feed(remaining);
            total_consumed += consumed;
            remaining = &remaining[consumed..];
            match event {
                FramerEvent::NeedMore => {
                    if consumed == 0 || remaining.is_empty() {
                        return (total_consumed, Dispatch::Continue);
                    }
                }
                FramerEvent::Rejected(_) => {
                    counters.on_frame_error();
                    self.framer.advance();
                    return (total_consumed, Dispatch::FramingError);
                }
                FramerEvent::FrameReady => {
                    let header = *self.framer.header().expect("FrameReady implies header");
                    let payload = self.framer.payload().to_vec().into_boxed_slice();
                    self.framer.advance();
                    counters.on_received(peertalk_protocol::HEADER_LEN + payload.len());
                    let dispatch = self.dispatch_frame(
                        from_peer,
                        header,
                        payload,
                        now,
                        peer_recv_seq,
                        peer_last_ping_sent,
                        batch_callback_installed,
                        per_message_callback_installed,
                    );
                    return (total_consumed, dispatch);
                }
            }
        }
    }

    fn dispatch_frame(
        &mut self,
        from_peer: PeerId,
        header: FrameHeader,
        payload: Box<[u8]>,
        now: Tick,
        peer_recv_seq: &mut u8,
        peer_last_ping_sent: &mut Option<Tick>,
        batch_callback_installed: bool,
        per_message_callback_installed: bool,
    ) -> Dispatch {
        match header.msg_type {
            MessageType::Data => {
                *peer_recv_seq = header.sequence;
                if batch_callback_installed && self.has_batch_room() {
                    self.batch.push_back(BatchEntry { from_peer, payload });
                    Dispatch::Batched
                } else if per_message_callback_installed {
                    Dispatch::Immediate(payload)
                } else {
                    warn!(peer = %from_peer, "dropping data frame: no callback installed");
                    Dispatch::Dropped
                }
            }
            MessageType::Ping => Dispatch::PingReceived,
            MessageType::Pong => {
                let rtt = peer_last_ping_sent
                    .take()
                    .map(|sent| now.elapsed_since(sent).as_millis() as u32)
                    .unwrap_or(0);
                Dispatch::PongRtt(rtt)
            }
            MessageType::Disconnect => Dispatch::PeerRequestedClose,
            MessageType::Ack => Dispatch::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_id::PeerId;
    use peertalk_protocol::{encode_frame, FrameHeader};

    fn some_peer() -> PeerId {
        PeerId::new(1, 1)
    }

    #[test]
    fn data_frame_without_any_callback_is_dropped() {
        let mut pipeline = ReceivePipeline::new(4096, 4);
        let header = FrameHeader::data(1, 3);
        let mut buf = vec![0u8; 64];
        let n = encode_frame(&header, b"abc", &mut buf).unwrap();
        let counters = PeerCountersAtomic::default();
        let mut recv_seq = 0u8;
        let mut last_ping = None;
        let (_, dispatch) = pipeline.feed(
            some_peer(),
            &buf[..n],
            Tick(0),
            &mut recv_seq,
            &mut last_ping,
            false,
            false,
            &counters,
        );
        assert!(matches!(dispatch, Dispatch::Dropped));
    }

    #[test]
    fn data_frame_batches_when_room_available() {
        let mut pipeline = ReceivePipeline::new(4096, 4);
        let header = FrameHeader::data(1, 3);
        let mut buf = vec![0u8; 64];
        let n = encode_frame(&header, b"abc", &mut buf).unwrap();
        let counters = PeerCountersAtomic::default();
        let mut recv_seq = 0u8;
        let mut last_ping = None;
        let (_, dispatch) = pipeline.feed(
            some_peer(),
            &buf[..n],
            Tick(0),
            &mut recv_seq,
            &mut last_ping,
            true,
            false,
            &counters,
        );
        assert!(matches!(dispatch, Dispatch::Batched));
        assert_eq!(pipeline.drain_batch().count(), 1);
    }

    #[test]
    fn pong_computes_rtt_from_outstanding_ping() {
        let mut pipeline = ReceivePipeline::new(4096, 4);
        let header = FrameHeader::control(MessageType::Pong);
        let mut buf = vec![0u8; 64];
        let n = encode_frame(&header, &[], &mut buf).unwrap();
        let counters = PeerCountersAtomic::default();
        let mut recv_seq = 0u8;
        let mut last_ping = Some(Tick(100));
        let (_, dispatch) = pipeline.feed(
            some_peer(),
            &buf[..n],
            Tick(140),
            &mut recv_seq,
            &mut last_ping,
            false,
            false,
            &counters,
        );
        match dispatch {
            Dispatch::PongRtt(rtt) => assert_eq!(rtt, 40),
            _ => panic!("expected PongRtt"),
        }
        assert!(last_ping.is_none());
    }

    #[test]
    fn bad_magic_reports_framing_error() {
        let mut pipeline = ReceivePipeline::new(4096, 4);
        let counters = PeerCountersAtomic::default();
        let mut recv_seq = 0u8;
        let mut last_ping = None;
        let garbage = [0xffu8; 10];
        let (_, dispatch) = pipeline.feed(
            some_peer(),
            &garbage,
            Tick(0),
            &mut recv_seq,
            &mut last_ping,
            false,
            false,
            &counters,
        );
        assert!(matches!(dispatch, Dispatch::FramingError));
    }
}
