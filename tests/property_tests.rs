//! Property-based tests for revision isolation.

use std::collections::BTreeMap;

use proptest::prelude::*;
use revtrie::commit::StorageConfig;
use revtrie::store::Storage;

#[derive(Clone, Debug)]
enum Op {
    Set(u64, Vec<u8>),
    Remove(u64),
}

/// Mostly keys of the first data pages, sometimes far apart.
fn key() -> impl Strategy<Value = u64> {
    prop_oneof![0..256u64, 0..(1u64 << 20)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key(), proptest::collection::vec(any::<u8>(), 0..16)).prop_map(|(k, v)| Op::Set(k, v)),
        1 => key().prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_revision_matches_its_model(
        commits in proptest::collection::vec(proptest::collection::vec(op(), 1..24), 1..5),
        capacity in 1usize..16,
    ) {
        let storage = Storage::in_memory(StorageConfig::default().with_log_cache_capacity(capacity)).unwrap();
        let mut model: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        model.insert(0, Vec::new());
        let mut history = vec![model.clone()];

        for ops in &commits {
            let mut trx = storage.begin_write().unwrap();
            for op in ops {
                match op {
                    Op::Set(key, value) => {
                        trx.set_record(*key, value).unwrap();
                        model.insert(*key, value.clone());
                    }
                    Op::Remove(key) => {
                        let removed = trx.remove_record(*key).unwrap();
                        prop_assert_eq!(removed.map(|r| r.to_vec()), model.remove(key));
                    }
                }
            }
            trx.commit().unwrap().wait().unwrap();
            history.push(model.clone());
        }

        for (revision, expected) in history.iter().enumerate() {
            let reader = storage.begin_read_at(revision as u64).unwrap();
            prop_assert_eq!(reader.revision_size().unwrap(), expected.len() as u64);
            for (key, value) in expected {
                let record = reader.get_record(*key).unwrap();
                prop_assert_eq!(record.map(|r| r.to_vec()), Some(value.clone()));
            }
        }
    }
}
