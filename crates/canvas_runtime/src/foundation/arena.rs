//! Fixed-capacity slot arena
//!
//! Canvases, displays, pointers and buffers all live in arenas of this type.
//! Handles are plain indices into the pool: allocation is first-fit over the
//! `valid` flag, the pool never grows, and an index is only handed out again
//! after its previous occupant has been released.

use thiserror::Error;

/// Arena errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// Every slot is occupied
    #[error("slot arena exhausted (capacity {capacity})")]
    Exhausted {
        /// Fixed capacity of the arena
        capacity: usize,
    },

    /// Index lies outside `[0, capacity)`
    #[error("slot index {index} out of range (capacity {capacity})")]
    InvalidIndex {
        /// Requested index
        index: usize,
        /// Fixed capacity of the arena
        capacity: usize,
    },

    /// Index is in range but the slot is not currently valid
    #[error("slot {index} is not valid")]
    NotValid {
        /// Requested index
        index: usize,
    },
}

/// A record that can live in a [`SlotArena`]
///
/// `Default` must produce an invalid, zeroed record: releasing a slot resets it
/// to this value.
pub trait Slot: Default {
    /// Whether the slot is currently occupied
    fn is_valid(&self) -> bool;

    /// Mark the slot occupied or free
    fn set_valid(&mut self, valid: bool);
}

/// Fixed-capacity pool of handle-addressable records
pub struct SlotArena<T: Slot> {
    slots: Box<[T]>,
}

impl<T: Slot> SlotArena<T> {
    /// Create an arena with `capacity` free slots
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| T::default()).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Fixed capacity of the arena
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first free slot, returning its index
    ///
    /// The slot is reset to its default state and marked valid.
    pub fn allocate(&mut self) -> Result<usize, ArenaError> {
        let index = self
            .slots
            .iter()
            .position(|slot| !slot.is_valid())
            .ok_or(ArenaError::Exhausted {
                capacity: self.slots.len(),
            })?;

        let slot = &mut self.slots[index];
        *slot = T::default();
        slot.set_valid(true);
        Ok(index)
    }

    /// Release a valid slot, returning the record it held
    pub fn release(&mut self, index: usize) -> Result<T, ArenaError> {
        self.check(index)?;
        let record = std::mem::take(&mut self.slots[index]);
        Ok(record)
    }

    /// Release every valid slot
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = T::default();
        }
    }

    /// Check that `index` names a valid slot
    pub fn check(&self, index: usize) -> Result<(), ArenaError> {
        match self.slots.get(index) {
            None => Err(ArenaError::InvalidIndex {
                index,
                capacity: self.slots.len(),
            }),
            Some(slot) if !slot.is_valid() => Err(ArenaError::NotValid { index }),
            Some(_) => Ok(()),
        }
    }

    /// Get a valid slot
    pub fn get(&self, index: usize) -> Result<&T, ArenaError> {
        self.check(index)?;
        Ok(&self.slots[index])
    }

    /// Get a valid slot mutably
    pub fn get_mut(&mut self, index: usize) -> Result<&mut T, ArenaError> {
        self.check(index)?;
        Ok(&mut self.slots[index])
    }

    /// Whether `index` names a valid slot
    pub fn is_valid(&self, index: usize) -> bool {
        self.check(index).is_ok()
    }

    /// Number of valid slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_valid()).count()
    }

    /// Whether no slot is valid
    pub fn is_empty(&self) -> bool {
        !self.slots.iter().any(Slot::is_valid)
    }

    /// Iterate over valid slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_valid())
    }

    /// Iterate mutably over valid slots in index order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(_, slot)| slot.is_valid())
    }

    /// Indices of all valid slots
    pub fn indices(&self) -> Vec<usize> {
        self.iter().map(|(index, _)| index).collect()
    }

    /// Linear scan for the first valid slot matching `predicate`
    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<usize> {
        self.iter()
            .find(|(_, slot)| predicate(slot))
            .map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Record {
        valid: bool,
        value: u32,
    }

    impl Slot for Record {
        fn is_valid(&self) -> bool {
            self.valid
        }

        fn set_valid(&mut self, valid: bool) {
            self.valid = valid;
        }
    }

    #[test]
    fn test_allocate_first_fit() {
        let mut arena = SlotArena::<Record>::with_capacity(3);
        assert_eq!(arena.allocate(), Ok(0));
        assert_eq!(arena.allocate(), Ok(1));
        arena.release(0).unwrap();
        assert_eq!(arena.allocate(), Ok(0));
        assert_eq!(arena.allocate(), Ok(2));
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut arena = SlotArena::<Record>::with_capacity(1);
        arena.allocate().unwrap();
        assert_eq!(arena.allocate(), Err(ArenaError::Exhausted { capacity: 1 }));
    }

    #[test]
    fn test_release_invalid_indices() {
        let mut arena = SlotArena::<Record>::with_capacity(2);
        assert_eq!(
            arena.release(5).err(),
            Some(ArenaError::InvalidIndex { index: 5, capacity: 2 })
        );
        assert_eq!(arena.release(1).err(), Some(ArenaError::NotValid { index: 1 }));
    }

    #[test]
    fn test_release_resets_record() {
        let mut arena = SlotArena::<Record>::with_capacity(2);
        let index = arena.allocate().unwrap();
        arena.get_mut(index).unwrap().value = 42;

        let old = arena.release(index).unwrap();
        assert_eq!(old.value, 42);

        let again = arena.allocate().unwrap();
        assert_eq!(again, index);
        assert_eq!(arena.get(again).unwrap().value, 0);
    }

    #[test]
    fn test_find_scans_valid_slots_only() {
        let mut arena = SlotArena::<Record>::with_capacity(4);
        for value in [7, 8, 9] {
            let index = arena.allocate().unwrap();
            arena.get_mut(index).unwrap().value = value;
        }
        arena.release(1).unwrap();

        assert_eq!(arena.find(|r| r.value == 9), Some(2));
        assert_eq!(arena.find(|r| r.value == 8), None);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_valid_indices_never_collide() {
        let mut arena = SlotArena::<Record>::with_capacity(4);
        let mut live: Vec<usize> = Vec::new();

        // Deterministic allocate/release interleaving
        for step in 0..64usize {
            if step % 3 == 2 && !live.is_empty() {
                let victim = live.remove(step % live.len());
                arena.release(victim).unwrap();
            } else if let Ok(index) = arena.allocate() {
                assert!(!live.contains(&index), "index {index} handed out twice");
                live.push(index);
            }

            let mut sorted = arena.indices();
            sorted.sort_unstable();
            let mut expected = live.clone();
            expected.sort_unstable();
            assert_eq!(sorted, expected);
        }
    }
}
