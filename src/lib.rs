//! handle-table: a single-threaded map from non-zero `u64` handles to
//! values, built for looking objects up by handle at a language boundary.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: O(1) average lookup by a 64-bit integer without boxed keys or a
//!   general-purpose hasher.
//! - Layers:
//!   - `capacity`: turns "room for N elements" into a power-of-two slot
//!     count and the occupancy at which the table must grow.
//!   - `probe`: golden-ratio multiplicative hash folded to 32 bits, plus
//!     the linear probe walk every operation follows.
//!   - `HandleTable<V>`: paired key/value arrays with insertion, lookup,
//!     backward-shift deletion and grow-and-rehash.
//!
//! Constraints
//! - Single-threaded: no internal locking. Callers that share a table wrap
//!   the whole table in one mutex.
//! - Key 0 marks an empty slot. `put(0, _)` fails; `get(0)` and
//!   `remove(0)` see nothing.
//! - At least one slot is always empty, so every probe walk terminates.
//! - Every live entry is reachable from its ideal slot through occupied
//!   slots only. Removal keeps this without tombstones by shifting
//!   displaced successors back into the vacated slot.
//!
//! Growth
//! - The load factor is fixed at 0.75. When an insertion finds an empty
//!   slot but the table already holds `resize_at` entries, new buffers of
//!   twice the size are allocated first. Only once that succeeded is the
//!   pending entry written and everything re-probed into the new buffers,
//!   so a failed allocation leaves the table untouched.
//! - Growth past `MAX_CAPACITY` slots is a hard error, not retried.
//!
//! Layout
//! - Both arrays carry one slot past `capacity`. It is the zero-key slot of
//!   the layout this table is modelled on; since key 0 is rejected it stays
//!   empty, is never probed, and is copied across resizes unchanged.
//!
//! Notes and non-goals
//! - No iteration, no generic keys, no persistence.
//! - `insert` hands out fresh handles from an internal cursor; callers that
//!   own their handle space use `put` directly.

mod capacity;
mod handle_table;
mod handle_table_proptest;
mod probe;

// Public surface
pub use capacity::{DEFAULT_EXPECTED_ELEMENTS, LOAD_FACTOR, MAX_CAPACITY, MIN_CAPACITY};
pub use handle_table::{HandleTable, TableError};
