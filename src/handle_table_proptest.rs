#![cfg(test)]

// Property tests for HandleTable kept inside the crate so they can check
// structural invariants after every operation.

use crate::handle_table::{HandleTable, TableError};
use crate::probe::mix_phi;
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Op {
    Put(usize, i32),
    Insert(i32),
    Get(usize),
    Remove(usize),
    Mutate(usize, i32),
}

fn arb_ops(pool_len: usize) -> impl Strategy<Value = Vec<Op>> {
    let idx = 0..pool_len;
    let op = prop_oneof![
        4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Put(i, v)),
        1 => any::<i32>().prop_map(Op::Insert),
        2 => idx.clone().prop_map(Op::Get),
        3 => idx.clone().prop_map(Op::Remove),
        1 => (idx, any::<i32>()).prop_map(|(i, d)| Op::Mutate(i, d)),
    ];
    proptest::collection::vec(op, 1..200)
}

/// Keys whose ideal slots fall in `buckets` adjacent slots of an 8-slot
/// table, so chains overlap and wrap regardless of growth.
fn clustered_keys(buckets: usize, n: usize) -> Vec<u64> {
    (1u64..)
        .filter(|&k| (mix_phi(k) as usize & 7) >= 8 - buckets)
        .take(n)
        .collect()
}

fn run(pool: &[u64], ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut sut: HandleTable<i32> = HandleTable::new();
    let mut model: HashMap<u64, i32> = HashMap::new();

    for op in ops {
        match op {
            Op::Put(i, v) => {
                let k = pool[i];
                let prev = sut.put(k, v).map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(prev, model.insert(k, v));
            }
            Op::Insert(v) => {
                let k = sut.insert(v).map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_ne!(k, 0);
                prop_assert!(model.insert(k, v).is_none(), "issued handle {} was taken", k);
            }
            Op::Get(i) => {
                let k = pool[i];
                prop_assert_eq!(sut.get(k), model.get(&k));
                prop_assert_eq!(sut.contains_key(k), model.contains_key(&k));
            }
            Op::Remove(i) => {
                let k = pool[i];
                prop_assert_eq!(sut.remove(k), model.remove(&k));
                prop_assert_eq!(sut.get(k), None);
            }
            Op::Mutate(i, d) => {
                let k = pool[i];
                if let Some(v) = sut.get_mut(k) {
                    *v = v.wrapping_add(d);
                }
                if let Some(v) = model.get_mut(&k) {
                    *v = v.wrapping_add(d);
                }
            }
        }

        sut.check_invariants();
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        prop_assert_eq!(sut.put(0, 0), Err(TableError::ZeroKey));
    }

    for (k, v) in &model {
        prop_assert_eq!(sut.get(*k), Some(v));
    }
    Ok(())
}

// Property: state-machine equivalence against std::collections::HashMap over
// arbitrary non-zero keys. Invariants are re-checked after every operation.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(
        (pool, ops) in proptest::collection::vec(1u64..=u64::MAX, 1..=32)
            .prop_flat_map(|pool| {
                let len = pool.len();
                (Just(pool), arb_ops(len))
            })
    ) {
        run(&pool, ops)?;
    }
}

// Property: same model check with keys crowded into a few adjacent ideal
// slots, stressing backward shifts across chains and the wrap-around.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions(
        buckets in 1usize..=3,
        ops in arb_ops(24),
    ) {
        let pool = clustered_keys(buckets, 24);
        run(&pool, ops)?;
    }
}

// Property: after any set of insertions, removing any single key leaves all
// others reachable.
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_single_removal_keeps_reachability(
        n in 1usize..40,
        victim in any::<prop::sample::Index>(),
    ) {
        let keys = clustered_keys(2, n);
        let mut t = HandleTable::new();
        for &k in &keys {
            t.put(k, k).unwrap();
        }
        let gone = keys[victim.index(keys.len())];
        prop_assert_eq!(t.remove(gone), Some(gone));
        t.check_invariants();
        for &k in keys.iter().filter(|&&k| k != gone) {
            prop_assert_eq!(t.get(k), Some(&k));
        }
        prop_assert_eq!(t.len(), n - 1);
    }
}
