//! Search-state index: an open-addressed map from decode state to the
//! position of its token in the current beam.
//!
//! The map is cleared at the top of every frame. Clearing a table this size
//! with `memset` every 10 ms is measurable, so each slot carries the
//! version of the frame that wrote it; bumping the version retires every
//! slot at once.

use super::State;

#[derive(Clone, Copy)]
struct Slot {
    version: u32,
    state: State,
    value: u32,
}

const EMPTY_SLOT: Slot = Slot {
    version: 0,
    state: State { hclg: 0, lm: 0 },
    value: 0,
};

pub struct StateTable {
    slots: Vec<Slot>,
    version: u32,
    len: usize,
}

impl StateTable {
    /// Capacity is rounded up to a power of two, at least twice `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (capacity * 2).next_power_of_two().max(16);
        StateTable {
            slots: vec![EMPTY_SLOT; slots],
            version: 1,
            len: 0,
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        if self.version == u32::MAX {
            self.slots.fill(EMPTY_SLOT);
            self.version = 1;
        } else {
            self.version += 1;
        }
    }

    pub fn get(&self, state: State) -> Option<u32> {
        let mask = self.slots.len() - 1;
        let mut idx = state.hash() as usize & mask;
        loop {
            let slot = &self.slots[idx];
            if slot.version != self.version {
                return None;
            }
            if slot.state == state {
                return Some(slot.value);
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Insert or overwrite the value for `state`.
    pub fn insert(&mut self, state: State, value: u32) {
        if self.len * 4 >= self.slots.len() * 3 {
            self.grow();
        }
        let mask = self.slots.len() - 1;
        let mut idx = state.hash() as usize & mask;
        loop {
            let slot = &mut self.slots[idx];
            if slot.version != self.version {
                *slot = Slot {
                    version: self.version,
                    state,
                    value,
                };
                self.len += 1;
                return;
            }
            if slot.state == state {
                slot.value = value;
                return;
            }
            idx = (idx + 1) & mask;
        }
    }

    fn grow(&mut self) {
        let live: Vec<Slot> = self
            .slots
            .iter()
            .filter(|s| s.version == self.version)
            .copied()
            .collect();
        self.slots = vec![EMPTY_SLOT; self.slots.len() * 2];
        self.len = 0;
        for slot in live {
            self.insert(slot.state, slot.value);
        }
    }
}
