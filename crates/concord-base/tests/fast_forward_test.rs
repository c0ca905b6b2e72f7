use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use concord_apply::{ApplyEntry, ApplyHost, Handlers, ViewRef, ViewStore};
use concord_base::{Base, BaseEvent};
use concord_core::config::{BaseConfig, FastForwardConfig, OpenOptions};
use concord_core::errors::BaseResult;
use concord_core::keys::CoreKey;
use concord_storage::replicate;
use test_fixtures::{memory_store, open_base, test_config, values, ListHandlers};

/// [`ListHandlers`] that counts the entries it is asked to apply.
#[derive(Debug, Default)]
struct CountingHandlers {
    applied: Arc<AtomicUsize>,
}

#[async_trait]
impl Handlers for CountingHandlers {
    type View = ViewRef;

    fn open(&self, store: &ViewStore) -> BaseResult<ViewRef> {
        ListHandlers.open(store)
    }

    async fn apply(
        &self,
        batch: &[ApplyEntry],
        view: &ViewRef,
        host: &mut ApplyHost<'_>,
    ) -> BaseResult<()> {
        self.applied.fetch_add(batch.len(), Ordering::SeqCst);
        ListHandlers.apply(batch, view, host).await
    }
}

fn fast_forward_config(minimum: u64) -> BaseConfig {
    let mut config = test_config();
    config.fast_forward = FastForwardConfig {
        enabled: true,
        key: None,
        minimum,
        timeout_ms: 1_000,
    };
    config
}

#[tokio::test]
async fn late_joiner_starts_from_a_checkpoint() -> anyhow::Result<()> {
    let a = open_base(memory_store(), None, test_config()).await?;
    for i in 0..40 {
        a.append(format!("v{i}")).await?;
    }

    let store = memory_store();
    replicate(a.store().as_ref(), store.as_ref())?;
    let applied = Arc::new(AtomicUsize::new(0));
    let handlers = CountingHandlers {
        applied: applied.clone(),
    };
    let mut options = OpenOptions::new(fast_forward_config(16));
    options.bootstrap = Some(a.local_key());
    let c = Base::open(store, handlers, options).await?;

    assert_eq!(c.indexed_length(), a.indexed_length());
    assert_eq!(c.system_key(), a.system_key());
    assert_eq!(applied.load(Ordering::SeqCst), 0, "entries were replayed");

    let view = c.view();
    let list: Vec<String> = (0..view.length())
        .map(|i| -> anyhow::Result<String> {
            let raw = view.get(i)?.ok_or_else(|| anyhow::anyhow!("entry {i} missing"))?;
            Ok(String::from_utf8_lossy(&raw).into_owned())
        })
        .collect::<anyhow::Result<_>>()?;
    assert_eq!(list, values(&a)?);
    Ok(())
}

#[tokio::test]
async fn requested_fast_forward_adopts_the_remote_state() -> anyhow::Result<()> {
    let a = open_base(memory_store(), None, test_config()).await?;
    let b = open_base(memory_store(), Some(a.local_key()), fast_forward_config(16)).await?;
    assert_eq!(b.indexed_length(), 0);

    for i in 0..40 {
        a.append(format!("v{i}")).await?;
    }
    replicate(a.store().as_ref(), b.store().as_ref())?;

    let mut events = b.subscribe();
    b.request_fast_forward();
    b.update().await?;

    let mut jumped = None;
    while let Ok(event) = events.try_recv() {
        if let BaseEvent::FastForward { from, to } = event {
            jumped = Some((from, to));
        }
    }
    assert_eq!(jumped, Some((0, a.indexed_length())));
    assert_eq!(values(&b)?, values(&a)?);

    a.append("after").await?;
    replicate(a.store().as_ref(), b.store().as_ref())?;
    b.update().await?;
    assert_eq!(values(&b)?.last().map(String::as_str), Some("after"));
    Ok(())
}

#[tokio::test]
async fn search_for_a_missing_key_gives_up() -> anyhow::Result<()> {
    let mut config = fast_forward_config(1);
    config.fast_forward.key = Some(CoreKey::from_bytes([5; 32]).to_hex());
    config.fast_forward.timeout_ms = 100;

    let a = open_base(memory_store(), None, config).await?;
    assert_eq!(a.indexed_length(), 0);
    a.append("still works").await?;
    assert_eq!(values(&a)?, ["still works"]);
    Ok(())
}
