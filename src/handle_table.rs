//! HandleTable: open-addressing table keyed by non-zero `u64` handles.

use crate::capacity::{
    expand_at_count, min_buffer_size, next_buffer_size, DEFAULT_EXPECTED_ELEMENTS, MAX_CAPACITY,
};
use crate::probe::{ideal_slot, probe_distance, Probe};
use core::fmt;
use std::collections::TryReserveError;
use log::{debug, trace, warn};

/// Key value marking an empty slot. Never a valid handle.
const EMPTY: u64 = 0;

/// Errors returned by fallible `HandleTable` operations. The table is left
/// unchanged whenever one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// Handle 0 is reserved as the empty-slot marker.
    #[error("0 is a special value that is not supported for use as a key")]
    ZeroKey,
    /// The table would need more than `MAX_CAPACITY` slots.
    #[error("maximum table capacity exceeded (elements: {elements})")]
    CapacityExceeded {
        /// Number of elements the table was asked to hold.
        elements: usize,
    },
    /// The allocator refused the buffers for a resize.
    #[error("not enough memory to allocate buffers for rehashing: {from} -> {to}")]
    Allocation {
        /// Slot count before the resize.
        from: usize,
        /// Requested slot count.
        to: usize,
    },
}

/// Paired key/value arrays of `capacity + 1` slots. The trailing slot is the
/// zero-key slot of the layout this table follows; it stays empty because key
/// 0 is rejected, but it is still carried across resizes.
struct Buffers<V> {
    keys: Box<[u64]>,
    values: Box<[Option<V>]>,
}

impl<V> Buffers<V> {
    fn try_new(capacity: usize, current: usize) -> Result<Self, TableError> {
        debug_assert!(capacity.is_power_of_two());
        let len = capacity + 1;
        let err = |_: TryReserveError| TableError::Allocation {
            from: current,
            to: capacity,
        };

        let mut keys = Vec::new();
        keys.try_reserve_exact(len).map_err(err)?;
        keys.resize(len, EMPTY);

        let mut values = Vec::new();
        values.try_reserve_exact(len).map_err(err)?;
        values.resize_with(len, || None);

        Ok(Self {
            keys: keys.into_boxed_slice(),
            values: values.into_boxed_slice(),
        })
    }
}

/// Single-threaded map from non-zero `u64` handles to values.
///
/// Collisions are resolved by linear probing and removal uses backward-shift
/// deletion, so the table never holds tombstones.
pub struct HandleTable<V> {
    keys: Box<[u64]>,
    values: Box<[Option<V>]>,
    assigned: usize,
    resize_at: usize,
    mask: usize,
    next_key: u64,
    max_capacity: usize,
}

impl<V> HandleTable<V> {
    /// Creates an empty table sized for a handful of entries.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EXPECTED_ELEMENTS)
            .expect("default capacity is always representable")
    }

    /// Creates an empty table that holds `expected` entries without growing.
    pub fn with_capacity(expected: usize) -> Result<Self, TableError> {
        Self::with_limits(expected, MAX_CAPACITY)
    }

    fn with_limits(expected: usize, max_capacity: usize) -> Result<Self, TableError> {
        let capacity = min_buffer_size(expected, max_capacity)?;
        let Buffers { keys, values } = Buffers::try_new(capacity, 0)?;
        Ok(Self {
            keys,
            values,
            assigned: 0,
            resize_at: expand_at_count(capacity),
            mask: capacity - 1,
            next_key: 1,
            max_capacity,
        })
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.assigned
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.assigned == 0
    }

    /// Number of probe slots (a power of two).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Finds `key`: `Ok(slot)` if present, `Err(slot)` with the first empty
    /// slot of its probe sequence otherwise.
    fn locate(&self, key: u64) -> Result<usize, usize> {
        debug_assert_ne!(key, EMPTY);
        for slot in Probe::new(key, self.mask) {
            match self.keys[slot] {
                EMPTY => return Err(slot),
                existing if existing == key => return Ok(slot),
                _ => {}
            }
        }
        unreachable!("probe sequence has no empty slot");
    }

    pub fn contains_key(&self, key: u64) -> bool {
        key != EMPTY && self.locate(key).is_ok()
    }

    /// Returns the value stored under `key`. Key 0 is never present.
    pub fn get(&self, key: u64) -> Option<&V> {
        if key == EMPTY {
            return None;
        }
        let slot = self.locate(key).ok()?;
        self.values[slot].as_ref()
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        if key == EMPTY {
            return None;
        }
        let slot = self.locate(key).ok()?;
        self.values[slot].as_mut()
    }

    /// Stores `value` under `key`, returning the value it replaced.
    ///
    /// Grows the table when the insertion would cross the load factor. On
    /// error nothing is modified.
    pub fn put(&mut self, key: u64, value: V) -> Result<Option<V>, TableError> {
        if key == EMPTY {
            return Err(TableError::ZeroKey);
        }
        debug_assert!(self.assigned < self.capacity());

        let slot = match self.locate(key) {
            Ok(slot) => return Ok(self.values[slot].replace(value)),
            Err(slot) => slot,
        };

        if self.assigned == self.resize_at {
            self.allocate_then_insert_then_rehash(slot, key, value)?;
        } else {
            self.keys[slot] = key;
            self.values[slot] = Some(value);
        }
        self.assigned += 1;
        Ok(None)
    }

    /// Stores `value` under a freshly issued handle and returns the handle.
    ///
    /// Handles count up from 1, wrap past `u64::MAX` back to 1 and skip keys
    /// that are already present.
    pub fn insert(&mut self, value: V) -> Result<u64, TableError> {
        let mut key = self.next_key;
        while self.contains_key(key) {
            key = following(key);
        }
        self.put(key, value)?;
        self.next_key = following(key);
        Ok(key)
    }

    /// Removes `key`, returning its value. Absent keys (and 0) are a no-op.
    pub fn remove(&mut self, key: u64) -> Option<V> {
        if key == EMPTY {
            return None;
        }
        let gap = self.locate(key).ok()?;
        Some(self.shift_conflicting_keys(gap))
    }

    /// Grows the table, if needed, so that `additional` more entries fit
    /// without another resize.
    pub fn reserve(&mut self, additional: usize) -> Result<(), TableError> {
        let expected = self
            .assigned
            .checked_add(additional)
            .ok_or(TableError::CapacityExceeded {
                elements: usize::MAX,
            })?;
        self.ensure_capacity(expected)
    }

    fn ensure_capacity(&mut self, expected: usize) -> Result<(), TableError> {
        if expected <= self.resize_at {
            return Ok(());
        }
        let capacity = min_buffer_size(expected, self.max_capacity)?;
        let fresh = Buffers::try_new(capacity, self.capacity())?;
        debug!(
            "reserving handle table: {} -> {} slots ({} entries)",
            self.capacity(),
            capacity,
            self.assigned
        );
        self.install(fresh);
        Ok(())
    }

    /// Called when `key` must go into the empty `slot` but the table is at its
    /// resize threshold. The new buffers are allocated first; only then is
    /// the pending entry parked in the old buffers (momentarily leaving them
    /// without an empty slot) and everything rehashed together.
    fn allocate_then_insert_then_rehash(
        &mut self,
        slot: usize,
        key: u64,
        value: V,
    ) -> Result<(), TableError> {
        debug_assert!(self.assigned == self.resize_at && self.keys[slot] == EMPTY);

        let current = self.capacity();
        let fresh = next_buffer_size(current, self.assigned, self.max_capacity)
            .and_then(|capacity| Buffers::try_new(capacity, current))
            .map_err(|e| {
                warn!("handle table cannot grow past {current} slots: {e}");
                e
            })?;
        debug!(
            "growing handle table: {} -> {} slots ({} entries)",
            current,
            fresh.keys.len() - 1,
            self.assigned + 1
        );

        self.keys[slot] = key;
        self.values[slot] = Some(value);
        self.install(fresh);
        Ok(())
    }

    /// Rehashes every entry into `fresh` and swaps it in.
    fn install(&mut self, mut fresh: Buffers<V>) {
        let capacity = fresh.keys.len() - 1;
        let mask = capacity - 1;
        rehash(&self.keys, &mut self.values, &mut fresh, mask);

        self.keys = fresh.keys;
        self.values = fresh.values;
        self.mask = mask;
        self.resize_at = expand_at_count(capacity);
    }

    /// Empties `gap` and pulls displaced successors back so that every entry
    /// stays reachable from its ideal slot. Returns the removed value.
    fn shift_conflicting_keys(&mut self, mut gap: usize) -> V {
        let mask = self.mask;
        let removed = self.values[gap].take();

        let mut distance = 0;
        let mut shifts = 0usize;
        loop {
            distance += 1;
            let slot = (gap + distance) & mask;
            let existing = self.keys[slot];
            if existing == EMPTY {
                break;
            }

            // An entry that already travelled at least `distance` from its
            // ideal slot would have stopped at the gap had it been free.
            if probe_distance(ideal_slot(existing, mask), slot, mask) >= distance {
                self.keys[gap] = existing;
                self.values[gap] = self.values[slot].take();
                gap = slot;
                distance = 0;
                shifts += 1;
            }
        }

        self.keys[gap] = EMPTY;
        self.values[gap] = None;
        self.assigned -= 1;
        if shifts > 0 {
            trace!("handle table removal shifted {shifts} entries");
        }
        removed.expect("occupied slot holds a value")
    }

    #[cfg(test)]
    pub(crate) fn with_max_capacity(max_capacity: usize) -> Self {
        Self::with_limits(DEFAULT_EXPECTED_ELEMENTS, max_capacity)
            .expect("test limit fits the default capacity")
    }

    /// Asserts every structural invariant of the table.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let capacity = self.capacity();
        assert!(capacity.is_power_of_two() && capacity >= crate::capacity::MIN_CAPACITY);
        assert_eq!(self.keys.len(), capacity + 1);
        assert_eq!(self.values.len(), capacity + 1);
        assert_eq!(self.keys[capacity], EMPTY, "zero-key slot must stay empty");
        assert!(self.values[capacity].is_none());
        assert!(self.assigned <= self.resize_at && self.resize_at < capacity);
        assert_eq!(self.resize_at, expand_at_count(capacity));

        let live = self.keys[..capacity].iter().filter(|&&k| k != EMPTY).count();
        assert_eq!(live, self.assigned);
        assert!(live < capacity, "at least one slot must stay empty");

        for slot in 0..capacity {
            let key = self.keys[slot];
            assert_eq!(key != EMPTY, self.values[slot].is_some());
            if key == EMPTY {
                continue;
            }
            let mut probe = ideal_slot(key, self.mask);
            while probe != slot {
                assert_ne!(self.keys[probe], EMPTY, "gap before key {key:#x}");
                assert_ne!(self.keys[probe], key, "duplicate key {key:#x}");
                probe = (probe + 1) & self.mask;
            }
        }
    }
}

fn following(key: u64) -> u64 {
    match key.wrapping_add(1) {
        EMPTY => 1,
        next => next,
    }
}

/// Moves every entry of the old arrays into `into`, re-probing each one
/// against the new `mask`. The zero-key slot is copied as is.
fn rehash<V>(from_keys: &[u64], from_values: &mut [Option<V>], into: &mut Buffers<V>, mask: usize) {
    debug_assert_eq!(from_keys.len(), from_values.len());
    debug_assert!((from_keys.len() - 1).is_power_of_two());

    let last = from_keys.len() - 1;
    let new_last = into.keys.len() - 1;
    into.keys[new_last] = from_keys[last];
    into.values[new_last] = from_values[last].take();

    for from in (0..last).rev() {
        let existing = from_keys[from];
        if existing == EMPTY {
            continue;
        }
        let slot = Probe::new(existing, mask)
            .find(|&slot| into.keys[slot] == EMPTY)
            .expect("grown table has room for every entry");
        into.keys[slot] = existing;
        into.values[slot] = from_values[from].take();
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for HandleTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.assigned)
            .field("capacity", &self.capacity())
            .field("resize_at", &self.resize_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mix_phi;

    /// First `n` keys (ascending from 1) whose ideal slot under `mask` is `slot`.
    fn colliding_keys(slot: usize, mask: usize, n: usize) -> Vec<u64> {
        (1u64..)
            .filter(|&k| (mix_phi(k) as usize & mask) == slot)
            .take(n)
            .collect()
    }

    /// Invariant: key 0 is rejected without touching the table.
    #[test]
    fn zero_key_rejected() {
        let mut t = HandleTable::new();
        t.put(7, "x").unwrap();
        assert_eq!(t.put(0, "zero"), Err(TableError::ZeroKey));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(0), None);
        assert_eq!(t.remove(0), None);
        assert!(!t.contains_key(0));
        t.check_invariants();
    }

    /// Invariant: overwriting keeps `len` and returns the previous value.
    #[test]
    fn overwrite_in_place() {
        let mut t = HandleTable::new();
        assert_eq!(t.put(5, 1), Ok(None));
        assert_eq!(t.put(5, 2), Ok(Some(1)));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(5), Some(&2));
        *t.get_mut(5).unwrap() += 1;
        assert_eq!(t.get(5), Some(&3));
    }

    /// Invariant: a new table has 8 slots and grows to 16 on its 7th entry.
    #[test]
    fn grows_at_threshold() {
        let mut t = HandleTable::new();
        assert_eq!(t.capacity(), 8);
        for k in 1..=6u64 {
            t.put(k, k * 10).unwrap();
            assert_eq!(t.capacity(), 8);
        }
        t.put(7, 70).unwrap();
        assert_eq!(t.capacity(), 16);
        assert_eq!(t.len(), 7);
        for k in 1..=7u64 {
            assert_eq!(t.get(k), Some(&(k * 10)));
        }
        t.check_invariants();
    }

    /// Invariant: overwriting at the threshold never triggers growth.
    #[test]
    fn overwrite_at_threshold_does_not_grow() {
        let mut t = HandleTable::new();
        for k in 1..=6u64 {
            t.put(k, 0).unwrap();
        }
        t.put(3, 1).unwrap();
        assert_eq!(t.capacity(), 8);
        assert_eq!(t.get(3), Some(&1));
    }

    /// Invariant: removing the head of a collision chain pulls the next
    /// entry back into its ideal slot.
    #[test]
    fn removal_shifts_collided_entry_back() {
        let mut t = HandleTable::new();
        let keys = colliding_keys(3, t.mask, 2);
        t.put(keys[0], "first").unwrap();
        t.put(keys[1], "second").unwrap();
        assert_eq!(t.keys[3], keys[0]);
        assert_eq!(t.keys[4], keys[1]);

        assert_eq!(t.remove(keys[0]), Some("first"));
        assert_eq!(t.keys[3], keys[1]);
        assert_eq!(t.keys[4], EMPTY);
        assert_eq!(t.get(keys[1]), Some(&"second"));
        t.check_invariants();
    }

    /// Invariant: entries sitting at their ideal slot are not moved into a gap
    /// before them.
    #[test]
    fn removal_leaves_home_entries_in_place() {
        let mut t = HandleTable::new();
        let a = colliding_keys(2, t.mask, 2);
        let b = colliding_keys(4, t.mask, 1)[0];
        // Slots: 2 = a0, 3 = a1, 4 = b (home).
        t.put(a[0], 1).unwrap();
        t.put(a[1], 2).unwrap();
        t.put(b, 3).unwrap();

        t.remove(a[0]).unwrap();
        assert_eq!(t.keys[2], a[1]);
        assert_eq!(t.keys[3], EMPTY);
        assert_eq!(t.keys[4], b);
        t.check_invariants();
    }

    /// Invariant: backward shift across the wrap-around boundary.
    #[test]
    fn removal_wraps_around() {
        let mut t = HandleTable::new();
        let keys = colliding_keys(7, t.mask, 3);
        for (i, &k) in keys.iter().enumerate() {
            t.put(k, i).unwrap();
        }
        assert_eq!(t.keys[7], keys[0]);
        assert_eq!(t.keys[0], keys[1]);
        assert_eq!(t.keys[1], keys[2]);

        t.remove(keys[1]).unwrap();
        assert_eq!(t.keys[0], keys[2]);
        assert_eq!(t.keys[1], EMPTY);
        assert_eq!(t.get(keys[0]), Some(&0));
        assert_eq!(t.get(keys[2]), Some(&2));
        t.check_invariants();
    }

    /// Invariant: the zero-key slot stays empty through several resizes.
    #[test]
    fn sentinel_slot_survives_resize() {
        let mut t = HandleTable::new();
        for k in 1..=200u64 {
            t.put(k, k).unwrap();
        }
        assert_eq!(t.capacity(), 512);
        t.check_invariants();
    }

    /// Invariant: hitting the capacity limit fails and leaves the table as it was.
    #[test]
    fn capacity_limit_is_hard() {
        let mut t = HandleTable::with_max_capacity(8);
        for k in 1..=6u64 {
            t.put(k, k).unwrap();
        }
        assert_eq!(
            t.put(99, 99),
            Err(TableError::CapacityExceeded { elements: 6 })
        );
        assert_eq!(t.len(), 6);
        assert_eq!(t.capacity(), 8);
        assert_eq!(t.get(99), None);
        for k in 1..=6u64 {
            assert_eq!(t.get(k), Some(&k));
        }
        // Overwrites and removals still work at the limit.
        assert_eq!(t.put(1, 100), Ok(Some(1)));
        assert_eq!(t.remove(2), Some(2));
        t.put(99, 99).unwrap();
        t.check_invariants();
    }

    #[test]
    fn reserve_presizes() {
        let mut t = HandleTable::new();
        t.put(1, "a").unwrap();
        t.reserve(100).unwrap();
        assert_eq!(t.capacity(), 256);
        assert_eq!(t.get(1), Some(&"a"));
        for k in 2..=101u64 {
            t.put(k, "b").unwrap();
        }
        assert_eq!(t.capacity(), 256);
        t.check_invariants();

        assert!(t.reserve(usize::MAX).is_err());
        assert_eq!(t.len(), 101);
    }

    #[test]
    fn with_capacity_rejects_oversized_requests() {
        assert!(matches!(
            HandleTable::<()>::with_capacity(MAX_CAPACITY),
            Err(TableError::CapacityExceeded { .. })
        ));
        assert_eq!(HandleTable::<()>::with_capacity(100).unwrap().capacity(), 256);
    }

    /// Invariant: issued handles are non-zero, unique and skip taken keys.
    #[test]
    fn insert_issues_fresh_handles() {
        let mut t = HandleTable::new();
        t.put(2, "taken").unwrap();
        assert_eq!(t.insert("a"), Ok(1));
        assert_eq!(t.insert("b"), Ok(3));
        assert_eq!(t.get(2), Some(&"taken"));

        t.next_key = u64::MAX;
        assert_eq!(t.insert("c"), Ok(u64::MAX));
        // Wraps past 0; 1..=3 are taken.
        assert_eq!(t.insert("d"), Ok(4));
        assert_eq!(t.len(), 5);
        t.check_invariants();
    }

    #[test]
    fn debug_reports_shape() {
        let t: HandleTable<u8> = HandleTable::new();
        assert_eq!(
            format!("{t:?}"),
            "HandleTable { len: 0, capacity: 8, resize_at: 6 }"
        );
    }
}
