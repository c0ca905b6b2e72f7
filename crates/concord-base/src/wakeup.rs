//! Wake-up hints: writers known to hold data this instance has not read.

use std::collections::BTreeMap;

use concord_core::errors::BaseResult;
use concord_core::keys::WriterKey;
use concord_core::models::SystemInfo;
use concord_core::traits::CoreStore;
use concord_dag::{ActiveWriterSet, Linearizer};

/// Pending hints keyed by writer. `None` when the hinted length is unknown.
#[derive(Debug, Default)]
pub struct WakeupHints {
    hints: BTreeMap<WriterKey, Option<u64>>,
}

impl WakeupHints {
    /// Records a hint, keeping the longest length seen for `key`.
    pub fn add(&mut self, key: WriterKey, length: Option<u64>) {
        let entry = self.hints.entry(key).or_insert(length);
        *entry = match (*entry, length) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn take(&mut self) -> BTreeMap<WriterKey, Option<u64>> {
        std::mem::take(&mut self.hints)
    }
}

/// Writers worth opening: hinted members whose hint is not stale, plus
/// every member not open whose stored log outgrew what was merged.
pub fn writers_to_wake(
    hints: BTreeMap<WriterKey, Option<u64>>,
    store: &dyn CoreStore,
    system: &SystemInfo,
    writers: &ActiveWriterSet,
    linearizer: &Linearizer,
) -> BaseResult<Vec<WriterKey>> {
    let mut wake = Vec::new();
    for (key, length) in hints {
        if writers.contains(&key) || !system.is_member(&key) {
            continue;
        }
        if length.is_some_and(|l| l <= linearizer.merged_length(&key)) {
            continue;
        }
        wake.push(key);
    }
    for (key, info) in &system.writers {
        if info.is_removed || writers.contains(key) || wake.contains(key) {
            continue;
        }
        if store.stored_length(&key.core_key())? > linearizer.merged_length(key) {
            wake.push(*key);
        }
    }
    Ok(wake)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_keep_the_longest_length() {
        let key = WriterKey::from_bytes([1; 32]);
        let mut hints = WakeupHints::default();
        hints.add(key, Some(3));
        hints.add(key, Some(7));
        hints.add(key, Some(5));
        assert_eq!(hints.take().get(&key), Some(&Some(7)));
        assert!(hints.is_empty());

        hints.add(key, Some(3));
        hints.add(key, None);
        assert_eq!(hints.take().get(&key), Some(&None));
    }
}
