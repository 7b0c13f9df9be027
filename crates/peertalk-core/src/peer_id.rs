//! A dense, non-zero, generation-tagged peer identifier.
//!
//! Mirrors the job rqbit's `PeerHandle = SocketAddr` does (a stable key into
//! the peer table), but spec.md §3 additionally requires that a destroyed
//! peer's id never refers to a living peer even though slots are reused —
//! plain `SocketAddr` doesn't give us that, so `PeerId` folds a generation
//! counter in alongside the slot index, the standard generational-arena
//! rendering of "stable index, reused storage, no aliasing."

use std::num::NonZeroU64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(NonZeroU64);

impl PeerId {
    pub(crate) fn new(slot: u32, generation: u32) -> Self {
        debug_assert!(generation > 0);
        let packed = ((generation as u64) << 32) | slot as u64;
        Self(NonZeroU64::new(packed).expect("generation > 0 implies nonzero"))
    }

    pub(crate) fn slot(&self) -> u32 {
        (self.0.get() & 0xffff_ffff) as u32
    }

    pub(crate) fn generation(&self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}.{}", self.slot(), self.generation())
    }
}

/// Monotonic tick supplied by the platform capability handle's `now_ticks`
/// (spec.md §3). Opaque on purpose: the core only ever compares and
/// subtracts ticks, never interprets them as wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    pub fn elapsed_since(&self, earlier: Tick) -> std::time::Duration {
        std::time::Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reused_slot_gets_a_different_id() {
        let a = PeerId::new(3, 1);
        let b = PeerId::new(3, 2);
        assert_ne!(a, b);
        assert_eq!(a.slot(), b.slot());
    }

    #[test]
    fn id_is_never_zero() {
        let a = PeerId::new(0, 1);
        assert_ne!(a.0.get(), 0);
    }
}
