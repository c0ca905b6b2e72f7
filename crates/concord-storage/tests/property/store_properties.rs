use concord_core::keys::CoreKey;
use concord_core::traits::{CoreOptions, CoreStore, LogCore};
use concord_storage::{replicate, MemoryStore, SqliteStore};
use proptest::prelude::*;

const ENCRYPTION_KEY: [u8; 32] = [9; 32];

#[derive(Debug, Clone)]
enum Op {
    Append(Vec<Vec<u8>>),
    /// Truncate to this percentage of the current length.
    Truncate(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..4)
            .prop_map(Op::Append),
        1 => (0u8..=100).prop_map(Op::Truncate),
    ]
}

fn contents(core: &dyn LogCore) -> Vec<Vec<u8>> {
    (0..core.length())
        .map(|i| core.get(i).unwrap().unwrap())
        .collect()
}

/// Runs `ops` against `store` and a plain vector, checking they agree
/// after every step, then checks a fresh peer receives the same blocks.
fn check_store(store: &dyn CoreStore, options: CoreOptions, ops: &[Op]) -> Result<(), TestCaseError> {
    let key = CoreKey::from_bytes([1; 32]);
    let core = store.open_core(&key, &options).unwrap();
    let mut model: Vec<Vec<u8>> = Vec::new();
    for op in ops {
        match op {
            Op::Append(blocks) => {
                model.extend(blocks.iter().cloned());
                prop_assert_eq!(core.append(blocks).unwrap(), model.len() as u64);
            }
            Op::Truncate(percent) => {
                let length = model.len() * usize::from(*percent) / 100;
                model.truncate(length);
                core.truncate(length as u64).unwrap();
            }
        }
        prop_assert_eq!(core.length(), model.len() as u64);
        prop_assert_eq!(core.get(model.len() as u64).unwrap(), None);
    }
    prop_assert_eq!(&contents(core.as_ref()), &model);
    prop_assert_eq!(contents(core.session().as_ref()), model.clone());

    let peer = MemoryStore::new();
    replicate(store, &peer).unwrap();
    prop_assert_eq!(peer.stored_length(&key).unwrap(), model.len() as u64);
    let copy = peer.open_core(&key, &options).unwrap();
    prop_assert_eq!(contents(copy.as_ref()), model);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn memory_cores_behave_like_a_vector(ops in prop::collection::vec(op(), 1..24)) {
        check_store(&MemoryStore::new(), CoreOptions::writer(None), &ops)?;
    }

    #[test]
    fn sqlite_cores_behave_like_a_vector(ops in prop::collection::vec(op(), 1..24)) {
        let store = SqliteStore::open_in_memory().unwrap();
        check_store(&store, CoreOptions::writer(None), &ops)?;
    }

    #[test]
    fn encrypted_cores_behave_like_a_vector(ops in prop::collection::vec(op(), 1..24)) {
        check_store(&MemoryStore::new(), CoreOptions::writer(Some(ENCRYPTION_KEY)), &ops)?;
    }
}
