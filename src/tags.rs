//! Tag ↔ slot bookkeeping with slot reuse.
//!
//! Tags are opaque 32-bit identifiers chosen by the caller; slots are the
//! index's internal addresses. The map is bijective over live points: every
//! bound tag has exactly one slot and vice versa. Slots given back by
//! consolidation land on a free list and are handed out again before the
//! occupied range grows.

use std::collections::{BTreeSet, HashMap};

use crate::error::{IndexError, Result};

/// Reserved tag meaning "absent". Never bindable.
pub const NULL_TAG: u32 = 0;

/// Bidirectional tag ↔ slot map plus the slot free list.
pub struct TagMap {
    tag_to_slot: HashMap<u32, u32>,
    slot_to_tag: HashMap<u32, u32>,
    // BTreeSet so recycled slots are reissued lowest-first, which keeps
    // slot allocation deterministic for a fixed operation sequence.
    free_slots: BTreeSet<u32>,
    next_slot: u32,
    max_slots: u32,
}

impl TagMap {
    /// A map over `max_slots` user-addressable slots, all unallocated.
    pub fn new(max_slots: usize) -> Self {
        Self {
            tag_to_slot: HashMap::new(),
            slot_to_tag: HashMap::new(),
            free_slots: BTreeSet::new(),
            next_slot: 0,
            max_slots: max_slots as u32,
        }
    }

    /// Hands out a slot: recycled if available, otherwise the next slot of
    /// the untouched range.
    pub fn allocate(&mut self) -> Result<u32> {
        if let Some(slot) = self.free_slots.pop_first() {
            return Ok(slot);
        }
        if self.next_slot == self.max_slots {
            return Err(IndexError::Capacity {
                capacity: self.max_slots as usize,
            });
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        Ok(slot)
    }

    /// Binds `tag` to `slot`. The slot must have been allocated and must
    /// not already carry a tag.
    pub fn bind(&mut self, tag: u32, slot: u32) -> Result<()> {
        if tag == NULL_TAG {
            return Err(IndexError::InvalidConfig("tag 0 is reserved".into()));
        }
        if self.tag_to_slot.contains_key(&tag) {
            return Err(IndexError::DuplicateTag(tag));
        }
        debug_assert!(!self.slot_to_tag.contains_key(&slot));
        self.tag_to_slot.insert(tag, slot);
        self.slot_to_tag.insert(slot, tag);
        Ok(())
    }

    /// Removes the binding for `tag` in both directions and returns its
    /// slot. The slot stays occupied until [`TagMap::release`].
    pub fn unbind(&mut self, tag: u32) -> Result<u32> {
        let slot = self
            .tag_to_slot
            .remove(&tag)
            .ok_or(IndexError::UnknownTag(tag))?;
        self.slot_to_tag.remove(&slot);
        Ok(slot)
    }

    /// Returns an unbound slot to the free list.
    pub fn release(&mut self, slot: u32) {
        debug_assert!(slot < self.next_slot);
        debug_assert!(!self.slot_to_tag.contains_key(&slot));
        self.free_slots.insert(slot);
    }

    pub fn resolve(&self, tag: u32) -> Option<u32> {
        self.tag_to_slot.get(&tag).copied()
    }

    pub fn tag_of(&self, slot: u32) -> Option<u32> {
        self.slot_to_tag.get(&slot).copied()
    }

    /// Slots currently allocated and not on the free list. Includes slots
    /// whose tag has been unbound but not yet released.
    pub fn occupied(&self) -> usize {
        self.next_slot as usize - self.free_slots.len()
    }

    /// Number of bound tags.
    pub fn len(&self) -> usize {
        self.tag_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_to_slot.is_empty()
    }

    /// Free-list size plus the untouched tail of the slot range.
    pub fn empty_slots(&self) -> usize {
        self.max_slots as usize - self.occupied()
    }

    /// Upper bound (exclusive) of the allocated slot range.
    pub fn allocated_range(&self) -> u32 {
        self.next_slot
    }

    pub fn is_free(&self, slot: u32) -> bool {
        slot >= self.next_slot || self.free_slots.contains(&slot)
    }

    /// Allocated slots that are not on the free list, ascending.
    pub fn occupied_slots(&self) -> Vec<u32> {
        (0..self.next_slot)
            .filter(|slot| !self.free_slots.contains(slot))
            .collect()
    }

    /// Checks the occupancy arithmetic and the bijection over bound tags.
    /// Test support; cheap enough to call after every mutation.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        if self.tag_to_slot.len() != self.slot_to_tag.len() {
            return Err(format!(
                "tag->slot has {} entries, slot->tag has {}",
                self.tag_to_slot.len(),
                self.slot_to_tag.len()
            ));
        }
        for (&tag, &slot) in &self.tag_to_slot {
            match self.slot_to_tag.get(&slot) {
                Some(&back) if back == tag => {}
                other => return Err(format!("tag {tag} -> slot {slot} -> {other:?}")),
            }
            if self.free_slots.contains(&slot) {
                return Err(format!("bound slot {slot} is on the free list"));
            }
            if slot >= self.next_slot {
                return Err(format!("bound slot {slot} outside allocated range"));
            }
        }
        if self.occupied() + self.empty_slots() != self.max_slots as usize {
            return Err("occupied + empty != capacity".into());
        }
        Ok(())
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u32),
        Remove(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1..40u32).prop_map(Op::Insert),
            (1..40u32).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// The map stays bijective and its occupancy arithmetic stays exact
        /// under arbitrary insert/remove interleavings.
        #[test]
        fn prop_bijective_under_churn(ops in proptest::collection::vec(op_strategy(), 0..120)) {
            let mut tags = TagMap::new(64);
            for op in ops {
                match op {
                    Op::Insert(tag) => {
                        if tags.resolve(tag).is_none() {
                            let slot = tags.allocate().unwrap();
                            tags.bind(tag, slot).unwrap();
                        }
                    }
                    Op::Remove(tag) => {
                        if tags.resolve(tag).is_some() {
                            let slot = tags.unbind(tag).unwrap();
                            tags.release(slot);
                        }
                    }
                }
                prop_assert!(tags.check_consistency().is_ok());
            }
        }

        /// Slot reuse never hands out a slot twice.
        #[test]
        fn prop_allocation_is_unique(releases in proptest::collection::btree_set(0..16u32, 0..16)) {
            let mut tags = TagMap::new(32);
            for _ in 0..16 {
                tags.allocate().unwrap();
            }
            for &slot in &releases {
                tags.release(slot);
            }
            let mut seen = std::collections::HashSet::new();
            for _ in 0..releases.len() {
                prop_assert!(seen.insert(tags.allocate().unwrap()));
            }
        }
    }
}
