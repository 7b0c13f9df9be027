//! Priority/coalescing send queue (spec.md §4.2).
//!
//! Each priority owns its own fixed-capacity pool and free-list so that a
//! burst on one priority can never starve another of slots (spec.md S2:
//! "free-list independent"). Coalescing replaces a still-queued message
//! that shares a caller-supplied key instead of growing the queue, e.g.
//! repeated cursor-position updates collapsing into the latest one.

use std::collections::HashMap;

use crate::config::{QUEUE_PRESSURE_BLOCKING, QUEUE_PRESSURE_WARNING};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub const ALL_HIGH_TO_LOW: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    fn index(self) -> usize {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }
}

/// Replacement policy when a coalesce key is already queued (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescePolicy {
    /// The new payload replaces the queued one.
    Newest,
    /// The new payload is silently dropped; the queued one is kept.
    Oldest,
}

/// Optional coalescing key supplied with a send (spec.md §4.2). Scoped by
/// (domain id, peer id) at the caller: each peer owns its own `SendQueue`,
/// so the key only needs to be unique within that peer's traffic.
pub type CoalesceKey = u64;

struct QueuedMessage {
    payload: Box<[u8]>,
    coalesce_key: Option<CoalesceKey>,
}

/// Fixed-capacity slab for one priority plus its own free-list, never
/// touched by another priority's traffic.
struct SubPool {
    slots: Vec<Option<QueuedMessage>>,
    free: Vec<u32>,
    order: std::collections::VecDeque<u32>,
}

impl SubPool {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity as u32).rev().collect(),
            order: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn pressure_pct(&self) -> u8 {
        if self.capacity() == 0 {
            return 0;
        }
        ((self.len() * 100) / self.capacity()) as u8
    }
}

pub struct SendQueue {
    pools: [SubPool; 4],
    coalesce_index: HashMap<(usize, CoalesceKey), u32>,
}

impl SendQueue {
    pub fn new(capacity_per_priority: usize) -> Self {
        Self {
            pools: [
                SubPool::new(capacity_per_priority),
                SubPool::new(capacity_per_priority),
                SubPool::new(capacity_per_priority),
                SubPool::new(capacity_per_priority),
            ],
            coalesce_index: HashMap::new(),
        }
    }

    /// Enqueues `payload` at `priority`. If `coalesce_key` matches an
    /// already-queued message, `coalesce_policy` (a per-call choice,
    /// spec.md §6 `SendEx` flags) decides whether it's replaced in place
    /// or the new payload is dropped. Otherwise occupies a free slot, or
    /// returns `WouldBlock` / `Resource` depending on overall queue
    /// pressure. Never blocks.
    pub fn try_push(
        &mut self,
        priority: Priority,
        payload: Box<[u8]>,
        coalesce_key: Option<CoalesceKey>,
        coalesce_policy: CoalescePolicy,
    ) -> Result<()> {
        let idx = priority.index();
        if let Some(key) = coalesce_key {
            if let Some(&slot) = self.coalesce_index.get(&(idx, key)) {
                match coalesce_policy {
                    CoalescePolicy::Oldest => return Ok(()),
                    CoalescePolicy::Newest => {
                        let pool = &mut self.pools[idx];
                        if let Some(msg) = &mut pool.slots[slot as usize] {
                            msg.payload = payload;
                            return Ok(());
                        }
                    }
                }
            }
        }

        let pool = &mut self.pools[idx];
        let Some(slot) = pool.free.pop() else {
            return Err(if self.pressure_pct() >= QUEUE_PRESSURE_BLOCKING {
                Error::WouldBlock
            } else {
                Error::Resource
            });
        };
        pool.slots[slot as usize] = Some(QueuedMessage {
            payload,
            coalesce_key,
        });
        pool.order.push_back(slot);
        if let Some(key) = coalesce_key {
            self.coalesce_index.insert((idx, key), slot);
        }
        Ok(())
    }

    /// Pops the oldest message at the highest non-empty priority. A single
    /// queued `Critical` message preempts all `Low`/`Normal`/`High` ones.
    /// Returns the priority it was popped from alongside the payload, so a
    /// flow-controlled send can be re-queued at the head of the same pool.
    pub fn pop_priority(&mut self) -> Option<(Priority, Box<[u8]>)> {
        for priority in Priority::ALL_HIGH_TO_LOW {
            let idx = priority.index();
            let pool = &mut self.pools[idx];
            let Some(slot) = pool.order.pop_front() else {
                continue;
            };
            let msg = pool.slots[slot as usize].take().expect("order/slots desync");
            pool.free.push(slot);
            if let Some(key) = msg.coalesce_key {
                self.coalesce_index.remove(&(idx, key));
            }
            return Some((priority, msg.payload));
        }
        None
    }

    /// Re-queues a popped payload at the head of its priority's order
    /// (spec.md §4.6 step 5: flow-controlled sends are "left in queue or
    /// re-enqueued at head"). Silently dropped if the pool has no free
    /// slot left — this only happens if something else raced to fill it
    /// between the pop and this call, which cannot happen under the
    /// single-owner poll model.
    pub fn push_front(&mut self, priority: Priority, payload: Box<[u8]>) {
        let idx = priority.index();
        let pool = &mut self.pools[idx];
        let Some(slot) = pool.free.pop() else {
            return;
        };
        pool.slots[slot as usize] = Some(QueuedMessage {
            payload,
            coalesce_key: None,
        });
        pool.order.push_front(slot);
    }

    /// Worst-case fill fraction across priorities (spec.md §4.2 pressure
    /// reporting — callers compare against the warning/blocking bands).
    pub fn pressure_pct(&self) -> u8 {
        self.pools.iter().map(SubPool::pressure_pct).max().unwrap_or(0)
    }

    pub fn is_blocking(&self) -> bool {
        self.pressure_pct() >= QUEUE_PRESSURE_BLOCKING
    }

    pub fn is_warning(&self) -> bool {
        self.pressure_pct() >= QUEUE_PRESSURE_WARNING
    }

    pub fn is_empty(&self) -> bool {
        self.pools.iter().all(|p| p.len() == 0)
    }

    pub fn len(&self) -> usize {
        self.pools.iter().map(SubPool::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(n: u8) -> Box<[u8]> {
        vec![n].into_boxed_slice()
    }

    fn push(q: &mut SendQueue, priority: Priority, n: u8) -> Result<()> {
        q.try_push(priority, payload(n), None, CoalescePolicy::Newest)
    }

    #[test]
    fn critical_preempts_everything_else() {
        let mut q = SendQueue::new(4);
        push(&mut q, Priority::Low, 1).unwrap();
        push(&mut q, Priority::High, 2).unwrap();
        push(&mut q, Priority::Critical, 3).unwrap();
        assert_eq!(q.pop_priority().unwrap().1[0], 3);
        assert_eq!(q.pop_priority().unwrap().1[0], 2);
        assert_eq!(q.pop_priority().unwrap().1[0], 1);
    }

    #[test]
    fn one_priority_full_does_not_block_another() {
        let mut q = SendQueue::new(1);
        push(&mut q, Priority::Low, 1).unwrap();
        assert!(push(&mut q, Priority::Low, 2).is_err());
        assert!(push(&mut q, Priority::High, 3).is_ok());
    }

    #[test]
    fn full_queue_reports_resource_before_blocking_band() {
        // capacity 4 per pool => 3/4 fill on the Low pool is 75%, the
        // warning band, but overall pressure (max across pools) is what's
        // compared, so fill Low to exactly the blocking threshold boundary.
        let mut q = SendQueue::new(4);
        for i in 0..3 {
            push(&mut q, Priority::Low, i).unwrap();
        }
        // 3/4 = 75% >= warning (75), < blocking (95)
        let err = push(&mut q, Priority::Normal, 9);
        assert!(err.is_ok()); // Normal pool still has room; this just exercises pressure reads
        assert!(q.is_warning());
        assert!(!q.is_blocking());
    }

    #[test]
    fn coalescing_newest_replaces_in_place() {
        let mut q = SendQueue::new(4);
        q.try_push(Priority::Normal, payload(1), Some(42), CoalescePolicy::Newest)
            .unwrap();
        q.try_push(Priority::Normal, payload(2), Some(42), CoalescePolicy::Newest)
            .unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_priority().unwrap().1[0], 2);
    }

    #[test]
    fn coalescing_oldest_drops_new_payload() {
        let mut q = SendQueue::new(4);
        q.try_push(Priority::Normal, payload(1), Some(42), CoalescePolicy::Oldest)
            .unwrap();
        q.try_push(Priority::Normal, payload(2), Some(42), CoalescePolicy::Oldest)
            .unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_priority().unwrap().1[0], 1);
    }

    #[test]
    fn pressure_reflects_worst_priority() {
        let mut q = SendQueue::new(2);
        push(&mut q, Priority::Low, 1).unwrap();
        push(&mut q, Priority::Low, 2).unwrap();
        assert_eq!(q.pressure_pct(), 100);
        assert!(q.is_blocking());
    }
}
