use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use concord_apply::{
    find_checkpoint, AddWriterOptions, ApplyEntry, ApplyHost, ApplyState, Handlers, ViewRef,
    ViewStore,
};
use concord_core::constants::{CURRENT_VERSION, SYSTEM_VIEW_NAME};
use concord_core::errors::{BaseError, BaseResult, StorageError, StorageResult};
use concord_core::keys::{CoreKey, WriterKey};
use concord_core::models::{BootRecord, Node, NodeId, SystemInfo};
use concord_core::traits::{CoreKind, CoreOptions, CoreStore, LogCore};
use concord_dag::LinearizedBatch;
use concord_storage::{replicate, MemoryStore};

/// Appends plain values to the "list" view. `+w:<hex>` adds an indexer,
/// `-w:<hex>` removes a writer, `!` interrupts.
#[derive(Debug, Default)]
struct ListHandlers;

#[async_trait]
impl Handlers for ListHandlers {
    type View = ViewRef;

    fn open(&self, store: &ViewStore) -> BaseResult<ViewRef> {
        store.get("list")
    }

    async fn apply(
        &self,
        batch: &[ApplyEntry],
        view: &ViewRef,
        host: &mut ApplyHost<'_>,
    ) -> BaseResult<()> {
        for entry in batch {
            let text = String::from_utf8_lossy(&entry.value).into_owned();
            if let Some(hex) = text.strip_prefix("+w:") {
                host.add_writer(WriterKey::from_hex(hex)?, AddWriterOptions::indexer())?;
            } else if let Some(hex) = text.strip_prefix("-w:") {
                host.remove_writer(&WriterKey::from_hex(hex)?)?;
            } else if text == "!" {
                return Err(host.interrupt("stop"));
            } else {
                view.append([entry.value.clone()]);
            }
        }
        Ok(())
    }
}

fn store(seed: u8) -> (Arc<MemoryStore>, WriterKey) {
    let store = Arc::new(MemoryStore::with_primary_key([seed; 32]));
    let key = WriterKey::from_primary(&[seed; 32]);
    (store, key)
}

fn local_core(store: &Arc<MemoryStore>) -> Arc<dyn LogCore> {
    let key = WriterKey::from_primary(&store.primary_key());
    store
        .open_core(&key.core_key(), &CoreOptions::writer(None))
        .unwrap()
}

fn open_state(store: &Arc<MemoryStore>, bootstrap: WriterKey) -> ApplyState<ListHandlers> {
    let dyn_store: Arc<dyn CoreStore> = store.clone();
    ApplyState::open(
        Arc::new(ListHandlers),
        dyn_store,
        local_core(store),
        bootstrap,
        None,
    )
    .unwrap()
}

/// Single-node groups of `writer` starting at `seq`.
fn batch(start: u64, writer: WriterKey, seq: u64, values: &[Option<&str>]) -> LinearizedBatch {
    let nodes = values
        .iter()
        .enumerate()
        .map(|(i, value)| Node {
            writer,
            seq: seq + i as u64,
            batch: 1,
            heads: vec![],
            value: value.map(|v| v.as_bytes().to_vec()),
            height: seq + i as u64 + 1,
            version: CURRENT_VERSION,
        })
        .collect();
    LinearizedBatch { start, nodes }
}

fn list(state: &ApplyState<ListHandlers>) -> Vec<String> {
    let view = state.view();
    (0..view.length())
        .map(|i| String::from_utf8(view.get(i).unwrap().unwrap()).unwrap())
        .collect()
}

#[tokio::test]
async fn applies_values_in_order_and_counts_acks() {
    let (store, a) = store(1);
    let mut state = open_state(&store, a);

    let outcome = state
        .update(&batch(0, a, 0, &[Some("x"), None, Some("y")]))
        .await
        .unwrap();
    assert_eq!(outcome.applied, 3);
    assert_eq!(outcome.values, 2);
    assert!(!outcome.indexers_updated);

    assert_eq!(list(&state), vec!["x", "y"]);
    assert_eq!(state.indexed_length(), 3);
    assert_eq!(state.system_view().length(), 3);
    let ack = state.system_view().entry(1).unwrap().unwrap();
    assert_eq!(ack.node, NodeId::new(a, 1));
    assert_eq!(ack.info.indexed_length, 2);

    let info = state.system();
    assert_eq!(info.writer_length(&a), 3);
    assert_eq!(info.writer_height(&a), 3);
    assert_eq!(info.heads, vec![NodeId::new(a, 2)]);
    assert_eq!(info.views.len(), 1);
    assert_eq!(info.views[0].name, "list");
    assert!(state.should_flush());
}

#[tokio::test]
async fn interrupt_discards_the_whole_batch() {
    let (store, a) = store(1);
    let mut state = open_state(&store, a);

    let err = state
        .update(&batch(0, a, 0, &[Some("x"), Some("!")]))
        .await
        .unwrap_err();
    assert!(err.is_interrupt());
    assert!(matches!(err, BaseError::Interrupted { reason: Some(ref r) } if r == "stop"));
    assert!(list(&state).is_empty());
    assert_eq!(state.indexed_length(), 0);
    assert_eq!(state.system_view().length(), 0);

    state
        .update(&batch(0, a, 0, &[Some("x")]))
        .await
        .unwrap();
    assert_eq!(list(&state), vec!["x"]);
}

#[test]
fn removing_the_last_indexer_is_rejected() {
    let a = WriterKey::from_bytes([1; 32]);
    let b = WriterKey::from_bytes([2; 32]);
    let mut info = SystemInfo::genesis(a, CURRENT_VERSION);
    let mut host = ApplyHost::new(&mut info);

    let err = host.remove_writer(&a).unwrap_err();
    assert!(matches!(err, BaseError::LastIndexer { .. }));
    assert!(!host.indexers_changed());

    host.add_writer(b, AddWriterOptions::indexer()).unwrap();
    assert!(host.indexers_changed());
    assert_eq!(host.indexers(), &[a, b]);
    host.remove_writer(&a).unwrap();
    assert_eq!(host.indexers(), &[b]);
    assert!(!host.is_member(&a));
    assert!(matches!(
        host.remove_writer(&b).unwrap_err(),
        BaseError::LastIndexer { .. }
    ));
}

#[test]
fn the_system_view_name_is_reserved() {
    let (store, a) = store(1);
    let state = open_state(&store, a);
    assert!(matches!(
        state.view_store().get(SYSTEM_VIEW_NAME).unwrap_err(),
        BaseError::Handler { .. }
    ));
}

#[tokio::test]
async fn indexer_change_cuts_the_batch_and_migrates_views() {
    let (store, a) = store(1);
    let b = WriterKey::from_bytes([9; 32]);
    let mut state = open_state(&store, a);
    let old_list = state.view().key();

    let add_b = format!("+w:{}", b.to_hex());
    let outcome = state
        .update(&batch(0, a, 0, &[Some("x"), Some(&add_b), Some("z")]))
        .await
        .unwrap();
    assert_eq!(outcome.applied, 2, "the group after the change is cut");
    assert!(outcome.indexers_updated);
    assert!(outcome.membership_changed);
    assert_eq!(state.indexed_length(), 2);
    assert_eq!(state.system().indexers, {
        let mut both = vec![a, b];
        both.sort();
        both
    });

    let persisted = BootRecord::load(local_core(&store).as_ref()).unwrap().unwrap();
    assert!(persisted.indexers_updated);
    assert!(state.should_migrate());

    let key = state.migrate().unwrap();
    assert_eq!(key, CoreKey::for_view(&a, SYSTEM_VIEW_NAME, &[a, b]));
    assert_eq!(state.system_key(), key);
    assert_eq!(state.system_view().length(), 2);
    assert!(!state.should_migrate());
    assert!(!state.boot().indexers_updated);

    assert_ne!(state.view().key(), old_list);
    assert_eq!(state.view().key(), CoreKey::for_view(&a, "list", &[a, b]));
    assert_eq!(list(&state), vec!["x"]);

    state
        .update(&batch(2, a, 2, &[Some("z")]))
        .await
        .unwrap();
    assert_eq!(list(&state), vec!["x", "z"]);
    assert_eq!(state.indexed_length(), 3);
}

#[tokio::test]
async fn reopen_resumes_from_the_boot_record() {
    let (store, a) = store(1);
    let mut state = open_state(&store, a);
    state
        .update(&batch(0, a, 0, &[Some("x"), Some("y"), None]))
        .await
        .unwrap();
    state.close().await.unwrap();

    let state = open_state(&store, a);
    assert_eq!(state.indexed_length(), 3);
    assert_eq!(list(&state), vec!["x", "y"]);

    let lin = state.catchup();
    assert_eq!(lin.indexed_length(), 3);
    assert_eq!(lin.merged_length(&a), 3);
    assert_eq!(lin.writer_height(&a), 3);
    assert_eq!(lin.get_heads(), vec![NodeId::new(a, 2)]);
    assert_eq!(lin.indexers(), &[a]);
}

#[tokio::test]
async fn reopen_before_migrating_keeps_the_old_cores() {
    let (store, a) = store(1);
    let b = WriterKey::from_bytes([9; 32]);
    let mut state = open_state(&store, a);
    let add_b = format!("+w:{}", b.to_hex());
    state
        .update(&batch(0, a, 0, &[Some("x"), Some(&add_b)]))
        .await
        .unwrap();
    drop(state);

    let mut state = open_state(&store, a);
    assert!(state.boot().indexers_updated);
    assert!(state.should_migrate());
    assert_eq!(state.view().key(), CoreKey::for_view(&a, "list", &[a]));
    assert_eq!(list(&state), vec!["x"]);

    state.migrate().unwrap();
    assert_eq!(state.view().key(), CoreKey::for_view(&a, "list", &[a, b]));
    assert_eq!(list(&state), vec!["x"]);
}

#[tokio::test]
async fn lagging_instance_adopts_a_remote_checkpoint() {
    let (store_a, a) = store(1);
    let (store_b, _) = store(2);
    let mut leader = open_state(&store_a, a);
    let values: Vec<String> = (0..20).map(|i| format!("v{i}")).collect();
    let refs: Vec<Option<&str>> = values.iter().map(|v| Some(v.as_str())).collect();
    leader.update(&batch(0, a, 0, &refs)).await.unwrap();

    replicate(store_a.as_ref(), store_b.as_ref()).unwrap();
    let mut lagging = open_state(&store_b, a);

    assert!(find_checkpoint(store_b.as_ref(), &a, None, 10, 16, None)
        .unwrap()
        .is_none());
    let preferred = find_checkpoint(
        store_b.as_ref(),
        &a,
        None,
        10,
        16,
        Some(leader.system_key()),
    )
    .unwrap();
    assert!(preferred.is_some());

    let checkpoint = find_checkpoint(store_b.as_ref(), &a, None, 0, 16, None)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.key, leader.system_key());
    assert_eq!(checkpoint.length, 20);
    assert_eq!(checkpoint.views.len(), 1);
    assert_eq!(checkpoint.views[0].length, 20);

    lagging.adopt(&checkpoint).unwrap();
    assert_eq!(lagging.indexed_length(), 20);
    assert_eq!(list(&lagging), values);
    assert!(lagging.boot().fast_forwarding);
    assert_eq!(lagging.catchup().merged_length(&a), 20);

    assert!(lagging.confirm_fast_forward().unwrap());
    assert!(!lagging.confirm_fast_forward().unwrap());
}

#[tokio::test]
async fn adopting_a_stale_checkpoint_fails() {
    let (store, a) = store(1);
    let mut state = open_state(&store, a);
    state
        .update(&batch(0, a, 0, &[Some("x")]))
        .await
        .unwrap();
    let checkpoint = concord_core::models::Checkpoint {
        key: state.system_key(),
        length: 1,
        indexers: vec![a],
        views: vec![],
    };
    assert!(matches!(
        state.adopt(&checkpoint).unwrap_err(),
        BaseError::FastForward { .. }
    ));
}

#[tokio::test]
async fn values_of_non_members_are_skipped() {
    let (store, a) = store(1);
    let stranger = WriterKey::from_bytes([7; 32]);
    let mut state = open_state(&store, a);

    let mut mixed = batch(0, a, 0, &[Some("x")]);
    mixed.nodes.extend(batch(1, stranger, 0, &[Some("spam")]).nodes);
    let outcome = state.update(&mixed).await.unwrap();
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.values, 1);
    assert_eq!(list(&state), vec!["x"]);
    assert_eq!(state.indexed_length(), 2);
    assert_eq!(state.system().writer_length(&stranger), 1);
}

#[tokio::test]
async fn linearized_strangers_never_become_members() {
    let (store, a) = store(1);
    let stranger = WriterKey::from_bytes([7; 32]);
    let mut state = open_state(&store, a);

    let outcome = state
        .update(&batch(0, stranger, 0, &[Some("first"), Some("second")]))
        .await
        .unwrap();
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.values, 0);
    assert!(list(&state).is_empty());
    assert!(!state.system().is_member(&stranger));
    assert_eq!(state.system().writer_length(&stranger), 2);

    state
        .update(&batch(2, stranger, 2, &[Some("third")]))
        .await
        .unwrap();
    assert!(list(&state).is_empty());
    assert!(!state.system().is_member(&stranger));

    let lin = state.catchup();
    assert_eq!(lin.indexed_length(), 3);
    assert_eq!(lin.merged_length(&stranger), 3, "skipped nodes stay linearized");
}

/// Cores whose appends fail while their key is the gated one.
#[derive(Debug)]
struct GatedCore {
    inner: Arc<dyn LogCore>,
    gated: Arc<Mutex<Option<CoreKey>>>,
}

impl LogCore for GatedCore {
    fn key(&self) -> CoreKey {
        self.inner.key()
    }
    fn kind(&self) -> CoreKind {
        self.inner.kind()
    }
    fn length(&self) -> u64 {
        self.inner.length()
    }
    fn signed_length(&self) -> u64 {
        self.inner.signed_length()
    }
    fn get(&self, index: u64) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(index)
    }
    fn append(&self, values: &[Vec<u8>]) -> StorageResult<u64> {
        if *self.gated.lock().unwrap() == Some(self.inner.key()) {
            return Err(StorageError::Corrupted {
                details: "append refused".to_string(),
            });
        }
        self.inner.append(values)
    }
    fn truncate(&self, length: u64) -> StorageResult<()> {
        self.inner.truncate(length)
    }
    fn copy_prologue(&self, source: &dyn LogCore, length: u64) -> StorageResult<()> {
        self.inner.copy_prologue(source, length)
    }
    fn checkout(&self, length: u64) -> StorageResult<()> {
        self.inner.checkout(length)
    }
    fn session(&self) -> Arc<dyn LogCore> {
        Arc::new(GatedCore {
            inner: self.inner.session(),
            gated: self.gated.clone(),
        })
    }
    fn get_user_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get_user_data(key)
    }
    fn set_user_data(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.inner.set_user_data(key, value)
    }
}

#[derive(Debug)]
struct GatedStore {
    inner: Arc<MemoryStore>,
    gated: Arc<Mutex<Option<CoreKey>>>,
}

impl CoreStore for GatedStore {
    fn primary_key(&self) -> [u8; 32] {
        self.inner.primary_key()
    }
    fn open_core(&self, key: &CoreKey, options: &CoreOptions) -> StorageResult<Arc<dyn LogCore>> {
        Ok(Arc::new(GatedCore {
            inner: self.inner.open_core(key, options)?,
            gated: self.gated.clone(),
        }))
    }
    fn stored_length(&self, key: &CoreKey) -> StorageResult<u64> {
        self.inner.stored_length(key)
    }
    fn core_keys(&self) -> StorageResult<Vec<(CoreKey, CoreKind)>> {
        self.inner.core_keys()
    }
    fn export_blocks(&self, key: &CoreKey, start: u64) -> StorageResult<Vec<Vec<u8>>> {
        self.inner.export_blocks(key, start)
    }
    fn import_blocks(
        &self,
        key: &CoreKey,
        kind: CoreKind,
        start: u64,
        blocks: Vec<Vec<u8>>,
    ) -> StorageResult<()> {
        self.inner.import_blocks(key, kind, start, blocks)
    }
}

#[tokio::test]
async fn failed_system_commit_rolls_back_application_views() {
    let (memory, a) = store(1);
    let gated = Arc::new(Mutex::new(None));
    let gated_store: Arc<dyn CoreStore> = Arc::new(GatedStore {
        inner: memory.clone(),
        gated: gated.clone(),
    });
    let mut state =
        ApplyState::open(Arc::new(ListHandlers), gated_store, local_core(&memory), a, None)
            .unwrap();
    let list_key = state.view_store().key_for("list", &[a]);

    *gated.lock().unwrap() = Some(state.system_key());
    let err = state
        .update(&batch(0, a, 0, &[Some("x"), Some("y")]))
        .await
        .unwrap_err();
    assert!(matches!(err, BaseError::Storage(_)), "{err}");
    assert!(list(&state).is_empty());
    assert_eq!(state.indexed_length(), 0);
    assert_eq!(state.system_view().length(), 0);
    assert_eq!(memory.stored_length(&list_key).unwrap(), 0);

    *gated.lock().unwrap() = None;
    state
        .update(&batch(0, a, 0, &[Some("x"), Some("y")]))
        .await
        .unwrap();
    assert_eq!(list(&state), vec!["x", "y"]);
    assert_eq!(state.indexed_length(), 2);
    assert_eq!(memory.stored_length(&list_key).unwrap(), 2);
}

#[tokio::test]
async fn view_hashes_agree_on_equal_contents() {
    let (first, a) = store(1);
    let (second, _) = store(2);
    let mut left = open_state(&first, a);
    let mut right = open_state(&second, a);
    assert_eq!(left.view().hash().unwrap(), right.view().hash().unwrap());

    let values = batch(0, a, 0, &[Some("x"), Some("y")]);
    left.update(&values).await.unwrap();
    right.update(&values).await.unwrap();
    assert_eq!(left.view().hash().unwrap(), right.view().hash().unwrap());

    right
        .update(&batch(2, a, 2, &[Some("z")]))
        .await
        .unwrap();
    assert_ne!(left.view().hash().unwrap(), right.view().hash().unwrap());
}
