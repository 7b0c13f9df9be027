//! Per-peer statistics: bytes/messages in/out, rolling latency, quality
//! banding (spec.md §3 "Statistics"). Follows the atomic-counters-plus-
//! snapshot split rqbit's `peer/stats/{atomic,snapshot}.rs` uses — counters
//! live behind `Atomic*` so the poll driver can update them without a
//! peer-wide lock, and callers read a plain, serializable snapshot.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub(crate) struct PeerCountersAtomic {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub frame_errors: AtomicU32,
    pub connection_attempts: AtomicU32,
    /// Rolling latency in milliseconds, fixed-point x100 so the EWMA's
    /// integer division (spec.md §4.3 Pong handling: `(old*3+sample)/4`)
    /// doesn't collapse small samples to zero.
    rolling_latency_ms_x100: AtomicU64,
    quality: AtomicU32,
}

impl PeerCountersAtomic {
    pub(crate) fn on_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_received(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_frame_error(&self) {
        self.frame_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds an RTT sample into the rolling latency (spec.md §4.3: "new =
    /// (old·3 + sample)/4") and recomputes the 0-100 quality band.
    pub(crate) fn on_pong(&self, rtt_ms: u32) {
        let sample_x100 = rtt_ms as u64 * 100;
        let old = self.rolling_latency_ms_x100.load(Ordering::Relaxed);
        let new = if old == 0 {
            sample_x100
        } else {
            (old * 3 + sample_x100) / 4
        };
        self.rolling_latency_ms_x100.store(new, Ordering::Relaxed);
        self.quality.store(quality_band(new / 100), Ordering::Relaxed);
    }

    fn rolling_latency_ms(&self) -> u64 {
        self.rolling_latency_ms_x100.load(Ordering::Relaxed) / 100
    }
}

/// Maps a rolling latency sample to a 0-100 quality score. Below 50 ms is
/// excellent; above 1000 ms is the floor. Linear in between.
fn quality_band(latency_ms: u64) -> u32 {
    const EXCELLENT_MS: u64 = 50;
    const FLOOR_MS: u64 = 1000;
    if latency_ms <= EXCELLENT_MS {
        return 100;
    }
    if latency_ms >= FLOOR_MS {
        return 0;
    }
    let span = FLOOR_MS - EXCELLENT_MS;
    let over = latency_ms - EXCELLENT_MS;
    (100 - (over * 100 / span)) as u32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub frame_errors: u32,
    pub connection_attempts: u32,
    pub rolling_latency_ms: u64,
    pub quality: u32,
}

impl From<&PeerCountersAtomic> for PeerStats {
    fn from(c: &PeerCountersAtomic) -> Self {
        Self {
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            messages_sent: c.messages_sent.load(Ordering::Relaxed),
            messages_received: c.messages_received.load(Ordering::Relaxed),
            frame_errors: c.frame_errors.load(Ordering::Relaxed),
            connection_attempts: c.connection_attempts.load(Ordering::Relaxed),
            rolling_latency_ms: c.rolling_latency_ms(),
            quality: c.quality.load(Ordering::Relaxed),
        }
    }
}

/// Aggregate snapshot returned by `Context::get_stats` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub peer_count: usize,
    pub connected_count: usize,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_latency_converges_to_steady_samples() {
        let counters = PeerCountersAtomic::default();
        for _ in 0..20 {
            counters.on_pong(40);
        }
        assert_eq!(counters.rolling_latency_ms(), 40);
    }

    #[test]
    fn quality_band_extremes() {
        assert_eq!(quality_band(10), 100);
        assert_eq!(quality_band(2000), 0);
    }

    #[test]
    fn first_sample_sets_latency_directly() {
        let counters = PeerCountersAtomic::default();
        counters.on_pong(200);
        assert_eq!(counters.rolling_latency_ms(), 200);
    }
}
