#![cfg(test)]

// Property tests for History kept inside the crate so they can reach the
// handle accessors without feature gates.

use crate::digest::{encode_root, Hash};
use crate::history::{Handle, History, RemoveError};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Put(u8),
    RemoveAll(u8),
    Lookup(u8),
}

fn root(b: u8) -> Hash {
    let mut h = [0u8; 32];
    h[0] = b;
    h
}

// A small pool of root values makes recurrences common.
fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        4 => (0u8..6).prop_map(Op::Put),
        2 => (0u8..6).prop_map(Op::RemoveAll),
        1 => (0u8..6).prop_map(Op::Lookup),
    ];
    proptest::collection::vec(op, 1..80)
}

// Property: state-machine equivalence against a chronological Vec model.
// Invariants exercised across random operation sequences:
// - every put appends exactly one occurrence, even for a repeated root;
// - index slots list occurrences in the order they happened;
// - removing all occurrences of a hash drops its slot, and is refused
//   without side effects when one of them is the tail;
// - prev/next links always agree with the model's adjacency;
// - no slot is ever left with zero occurrences.
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_history_matches_model(ops in arb_ops()) {
        let mut sut = History::new();
        let mut model: Vec<(Handle, Hash)> = Vec::new();

        for op in ops {
            match op {
                Op::Put(b) => {
                    let (h, enc) = sut.put(root(b));
                    prop_assert_eq!(enc, encode_root(&root(b)));
                    model.push((h, root(b)));
                }
                Op::RemoveAll(b) => {
                    let enc = encode_root(&root(b));
                    let occ = sut.get(&enc).to_vec();
                    let expected: Vec<Handle> = model
                        .iter()
                        .filter(|(_, r)| *r == root(b))
                        .map(|(h, _)| *h)
                        .collect();
                    prop_assert_eq!(&occ, &expected);

                    let includes_tail = model.last().map(|(h, _)| occ.contains(h)).unwrap_or(false);
                    let before = sut.len();
                    match sut.remove_occurrences(&enc, &occ) {
                        Ok(n) => {
                            prop_assert!(!includes_tail);
                            prop_assert_eq!(n, occ.len());
                            model.retain(|(_, r)| *r != root(b));
                        }
                        Err(RemoveError::Tail) => {
                            prop_assert!(includes_tail);
                            prop_assert_eq!(sut.len(), before);
                        }
                        Err(RemoveError::Stale) => prop_assert!(false, "handles from get() are live"),
                    }
                }
                Op::Lookup(b) => {
                    let enc = encode_root(&root(b));
                    let count = model.iter().filter(|(_, r)| *r == root(b)).count();
                    prop_assert_eq!(sut.get(&enc).len(), count);
                }
            }

            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.tail(), model.last().map(|(h, _)| *h));
            let seq: Vec<(Handle, Hash)> = sut.iter().map(|(h, r)| (h, *r)).collect();
            prop_assert_eq!(&seq, &model);
            for (i, (h, _)) in model.iter().enumerate() {
                let prev = if i == 0 { None } else { Some(model[i - 1].0) };
                let next = model.get(i + 1).map(|(n, _)| *n);
                prop_assert_eq!(h.prev(&sut), prev);
                prop_assert_eq!(h.next(&sut), next);
            }
            let mut distinct: Vec<Hash> = model.iter().map(|(_, r)| *r).collect();
            distinct.sort();
            distinct.dedup();
            prop_assert_eq!(sut.distinct(), distinct.len());
        }
    }
}
