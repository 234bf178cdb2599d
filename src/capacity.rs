//! Capacity planning: converts element counts into power-of-two slot counts
//! and derives the occupancy at which the table must grow.

use crate::handle_table::TableError;

/// Fraction of slots that may be occupied before the table grows.
pub const LOAD_FACTOR: f64 = 0.75;

/// Number of elements a freshly created table is sized for.
pub const DEFAULT_EXPECTED_ELEMENTS: usize = 4;

/// Smallest slot count a table ever uses.
pub const MIN_CAPACITY: usize = 4;

/// Largest slot count a table may grow to.
pub const MAX_CAPACITY: usize = 0x8000_0000 >> 1;

/// Slot count needed to hold `elements` entries without growing.
///
/// Always leaves at least one slot empty so every probe walk terminates.
pub fn min_buffer_size(elements: usize, max_capacity: usize) -> Result<usize, TableError> {
    let mut length = (elements as f64 / LOAD_FACTOR).ceil() as usize;
    if length == elements {
        length = length.saturating_add(1);
    }
    let length = length
        .checked_next_power_of_two()
        .ok_or(TableError::CapacityExceeded { elements })?
        .max(MIN_CAPACITY);
    if length > max_capacity {
        return Err(TableError::CapacityExceeded { elements });
    }
    Ok(length)
}

/// Occupancy at which a table of `capacity` slots must grow before the next
/// insertion.
pub fn expand_at_count(capacity: usize) -> usize {
    debug_assert!(capacity.is_power_of_two() && capacity > 1);
    (capacity - 1).min((capacity as f64 * LOAD_FACTOR).ceil() as usize)
}

/// Slot count after one growth step from `capacity`.
pub fn next_buffer_size(
    capacity: usize,
    elements: usize,
    max_capacity: usize,
) -> Result<usize, TableError> {
    debug_assert!(capacity.is_power_of_two());
    if capacity >= max_capacity {
        return Err(TableError::CapacityExceeded { elements });
    }
    Ok(capacity << 1)
}
