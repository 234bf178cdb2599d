//! Probe sequencing: multiplicative hashing and the linear walk every table
//! operation follows.

/// 64-bit fractional part of the golden ratio.
const PHI_C64: u64 = 0x9e37_79b9_7f4a_7c15;

/// Mixes a 64-bit key into a 32-bit hash whose low bits depend on the whole key.
#[inline]
pub fn mix_phi(key: u64) -> u32 {
    let h = key.wrapping_mul(PHI_C64);
    (h ^ (h >> 32)) as u32
}

/// First slot probed for `key` under `mask`.
#[inline]
pub fn ideal_slot(key: u64, mask: usize) -> usize {
    debug_assert_ne!(key, 0, "the empty-slot marker is never hashed");
    mix_phi(key) as usize & mask
}

#[inline]
pub fn next_slot(slot: usize, mask: usize) -> usize {
    (slot + 1) & mask
}

/// Distance `slot` lies past `ideal`, wrapping at the table bound.
#[inline]
pub fn probe_distance(ideal: usize, slot: usize, mask: usize) -> usize {
    slot.wrapping_sub(ideal) & mask
}

/// Linear probe sequence starting at a key's ideal slot.
///
/// Yields every slot in `[0, mask]` exactly once, then stops. Callers stop
/// earlier on a match or an empty slot.
#[derive(Clone, Debug)]
pub struct Probe {
    slot: usize,
    mask: usize,
    remaining: usize,
}

impl Probe {
    pub fn new(key: u64, mask: usize) -> Self {
        Self {
            slot: ideal_slot(key, mask),
            mask,
            remaining: mask + 1,
        }
    }
}

impl Iterator for Probe {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let slot = self.slot;
        self.slot = next_slot(slot, self.mask);
        Some(slot)
    }
}
