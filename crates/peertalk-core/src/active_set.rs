//! Active-slot tracking (spec.md §5: "iteration must be O(active peers),
//! not O(capacity)"). Below 32 slots a `bitvec` bitmap is cheaper than an
//! indirection table; above that an indexed array plus a reverse map
//! keeps iteration flat without growing the bitmap unboundedly. Mirrors
//! rqbit's `bitvec`-backed piece bitfields (`peer_binary_protocol.rs`),
//! reused here for set membership instead of piece ownership.

use bitvec::order::Lsb0;
use bitvec::vec::BitVec;

enum Repr {
    Bitmap(BitVec<usize, Lsb0>),
    Indexed {
        members: Vec<usize>,
        position: Vec<Option<u32>>,
    },
}

pub struct ActiveSet {
    repr: Repr,
    capacity: usize,
}

const BITMAP_THRESHOLD: usize = 32;

impl ActiveSet {
    pub fn new(capacity: usize) -> Self {
        let repr = if capacity <= BITMAP_THRESHOLD {
            Repr::Bitmap(BitVec::repeat(false, capacity))
        } else {
            Repr::Indexed {
                members: Vec::new(),
                position: vec![None; capacity],
            }
        };
        Self { repr, capacity }
    }

    pub fn insert(&mut self, slot: usize) {
        debug_assert!(slot < self.capacity);
        match &mut self.repr {
            Repr::Bitmap(bits) => bits.set(slot, true),
            Repr::Indexed { members, position } => {
                if position[slot].is_some() {
                    return;
                }
                position[slot] = Some(members.len() as u32);
                members.push(slot);
            }
        }
    }

    pub fn remove(&mut self, slot: usize) {
        debug_assert!(slot < self.capacity);
        match &mut self.repr {
            Repr::Bitmap(bits) => bits.set(slot, false),
            Repr::Indexed { members, position } => {
                let Some(pos) = position[slot].take() else {
                    return;
                };
                let pos = pos as usize;
                let last = members.len() - 1;
                members.swap(pos, last);
                members.pop();
                if pos != last {
                    let moved = members[pos];
                    position[moved] = Some(pos as u32);
                }
            }
        }
    }

    pub fn contains(&self, slot: usize) -> bool {
        match &self.repr {
            Repr::Bitmap(bits) => bits[slot],
            Repr::Indexed { position, .. } => position[slot].is_some(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Bitmap(bits) => bits.count_ones(),
            Repr::Indexed { members, .. } => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = usize> + '_> {
        match &self.repr {
            Repr::Bitmap(bits) => Box::new(bits.iter_ones()),
            Repr::Indexed { members, .. } => Box::new(members.iter().copied()),
        }
    }
}
