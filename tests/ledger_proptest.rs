// Ledger property tests.
//
// Property: state-machine equivalence against a model history.
//  - Model: chronological Vec of (root hash, full key/value state).
//  - Operations: put, delete, erase (of a hash picked from history, of the
//    current hash, or of a hash never produced), point read of a retained
//    root.
//  - Invariants after every step:
//    - history() equals the model's root sequence and ends with root_hash();
//    - every retained root snapshots to exactly the model's state;
//    - erase succeeds iff the hash is retained and not current, and an
//      erased hash stops resolving immediately;
//    - occurrences() equals the number of model entries with that hash.
use hash_ledger::{Ledger, LedgerError};
use proptest::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Op {
    Put(u8, u8),
    Delete(u8),
    EraseAt(usize),
    EraseCurrent,
    EraseUnknown,
    ReadAt(usize, u8),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        6 => (0u8..5, 0u8..3).prop_map(|(k, v)| Op::Put(k, v)),
        3 => (0u8..5).prop_map(Op::Delete),
        3 => (0usize..64).prop_map(Op::EraseAt),
        1 => Just(Op::EraseCurrent),
        1 => Just(Op::EraseUnknown),
        2 => (0usize..64, 0u8..5).prop_map(|(i, k)| Op::ReadAt(i, k)),
    ];
    proptest::collection::vec(op, 1..60)
}

fn key(k: u8) -> String {
    format!("key{k}")
}

fn value(v: u8) -> String {
    format!("value{v}")
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_ledger_matches_model(ops in arb_ops()) {
        let l = Ledger::new();
        let mut state: HashMap<String, String> = HashMap::new();
        let mut model: Vec<(String, HashMap<String, String>)> = Vec::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    let r = l.put(&key(k), &value(v)).unwrap();
                    state.insert(key(k), value(v));
                    model.push((r, state.clone()));
                }
                Op::Delete(k) => {
                    let r = l.delete(&key(k)).unwrap();
                    state.remove(&key(k));
                    model.push((r, state.clone()));
                }
                Op::EraseAt(i) => {
                    if model.is_empty() {
                        continue;
                    }
                    let target = model[i % model.len()].0.clone();
                    let is_current = model.last().map(|(r, _)| *r == target).unwrap_or(false);
                    match l.erase_root_hash(&target) {
                        Ok(()) => {
                            prop_assert!(!is_current);
                            model.retain(|(r, _)| *r != target);
                            prop_assert!(l.get_all_previous(&target).is_err());
                            prop_assert_eq!(l.occurrences(&target), 0);
                        }
                        Err(LedgerError::InvalidOperation(_)) => prop_assert!(is_current),
                        Err(e) => prop_assert!(false, "unexpected error: {}", e),
                    }
                }
                Op::EraseCurrent => {
                    let current = l.root_hash();
                    let res = l.erase_root_hash(&current);
                    if model.is_empty() {
                        prop_assert!(matches!(res, Err(LedgerError::NotFound(_))));
                    } else {
                        prop_assert!(matches!(res, Err(LedgerError::InvalidOperation(_))));
                    }
                }
                Op::EraseUnknown => {
                    let res = l.erase_root_hash("bmV2ZXIgcHJvZHVjZWQgYnkgYSB3cml0ZSEhISEhISE=");
                    prop_assert!(matches!(res, Err(LedgerError::NotFound(_))));
                }
                Op::ReadAt(i, k) => {
                    if model.is_empty() {
                        continue;
                    }
                    let (r, snap) = &model[i % model.len()];
                    match (l.get_previous_value(r, &key(k)), snap.get(&key(k))) {
                        (Ok(got), Some(want)) => prop_assert_eq!(&got, want),
                        (Err(e), None) => prop_assert!(e.is_key_not_found()),
                        (got, want) => prop_assert!(false, "got {:?}, want {:?}", got, want),
                    }
                }
            }

            let roots: Vec<String> = model.iter().map(|(r, _)| r.clone()).collect();
            prop_assert_eq!(l.history(), roots.clone());
            if let Some(last) = roots.last() {
                prop_assert_eq!(&l.root_hash(), last);
            }
            for (r, snap) in &model {
                let got = l.get_all_previous(r).unwrap();
                prop_assert!(got.is_complete());
                prop_assert_eq!(&got.entries, snap);
                prop_assert_eq!(l.occurrences(r), roots.iter().filter(|x| *x == r).count());
            }
            prop_assert_eq!(l.get_all().unwrap().entries, state.clone());
        }
    }
}
