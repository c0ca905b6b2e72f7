//! [`Base`]: one participant in a multi-writer base.
//!
//! External operations only register intents (values to append, hints,
//! a fast-forward check) and trigger the single-flight drain; the drain
//! is the only code that touches the writers, the linearizer and the
//! views. Introspection reads a snapshot published after every drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use concord_apply::{ApplyState, Handlers, ViewStore};
use concord_core::config::{BaseConfig, OpenOptions};
use concord_core::constants::ENCRYPTION_KEY_USER_DATA;
use concord_core::errors::{BaseError, BaseResult};
use concord_core::keys::{CoreKey, WriterKey};
use concord_core::models::{NodeId, SystemInfo};
use concord_core::traits::{CoreOptions, CoreStore, NoopWakeup, WakeupChannel};
use tokio::sync::{broadcast, watch};
use tracing::Instrument;

use crate::ack_timer::AckTimer;
use crate::drain::{DrainState, Intents};
use crate::events::{BaseEvent, EventBus};
use crate::fast_forward;
use crate::scheduler::{Debounce, Ticket};

/// State published after every drain.
#[derive(Debug, Clone)]
struct Snapshot {
    indexed_length: u64,
    system_key: CoreKey,
    writable: bool,
    is_indexer: bool,
    heads: Vec<NodeId>,
    unconfirmed_values: usize,
    system: SystemInfo,
}

impl Snapshot {
    fn capture<H: Handlers>(st: &DrainState<H>) -> Self {
        Self {
            indexed_length: st.apply.indexed_length(),
            system_key: st.apply.system_key(),
            writable: st.writable,
            is_indexer: st.is_indexer,
            heads: st.linearizer.get_heads(),
            unconfirmed_values: st.linearizer.unconfirmed_values(),
            system: st.apply.system().clone(),
        }
    }
}

pub(crate) struct Inner<H: Handlers> {
    pub(crate) local_key: WriterKey,
    pub(crate) bootstrap: WriterKey,
    pub(crate) store: Arc<dyn CoreStore>,
    pub(crate) encryption_key: Option<[u8; 32]>,
    pub(crate) config: BaseConfig,
    pub(crate) events: EventBus,
    pub(crate) wakeup: Arc<dyn WakeupChannel>,
    view: H::View,
    view_store: Arc<ViewStore>,
    state: tokio::sync::Mutex<DrainState<H>>,
    intents: Mutex<Intents>,
    snapshot: Mutex<Snapshot>,
    scheduler: Debounce,
    ack_timer: Mutex<Option<AckTimer>>,
    paused: watch::Sender<bool>,
    closing: AtomicBool,
    closed: AtomicBool,
    halted: AtomicBool,
    acking: AtomicBool,
}

impl<H: Handlers> Inner<H> {
    pub(crate) fn intents(&self) -> MutexGuard<'_, Intents> {
        self.intents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ack_timer(&self) -> MutexGuard<'_, Option<AckTimer>> {
        self.ack_timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    async fn wait_resumed(&self) {
        let mut paused = self.paused.subscribe();
        // The sender lives as long as `self`.
        let _ = paused.wait_for(|p| !*p).await;
    }

    fn trigger(self: &Arc<Self>) -> Ticket {
        let weak = Arc::downgrade(self);
        self.scheduler.trigger(move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.advance().await;
                }
            }
        })
    }

    async fn advance(&self) {
        if let Err(err) = self.try_advance().await {
            self.on_error(err);
        }
    }

    /// One drain plus the bookkeeping that follows it.
    async fn try_advance(&self) -> BaseResult<()> {
        if self.is_closing() || self.is_paused() {
            return Ok(());
        }
        let mut st = self.state.lock().await;
        if self.is_closing() {
            return Ok(());
        }

        let local_before = st.writers.get(&self.local_key).map_or(0, |w| w.available());
        let span = crate::drain_span!(self.local_key.short(), st.apply.indexed_length());
        self.drain(&mut st).instrument(span).await?;
        if self.is_closing() {
            return Ok(());
        }

        if st.apply.boot().fast_forwarding && st.fast_forward_to.is_none() {
            st.apply.confirm_fast_forward()?;
        }
        self.emit_transitions(&mut st);

        if st.updating {
            st.updating = false;
            let local_after = st.writers.get(&self.local_key).map_or(0, |w| w.available());
            if local_after != local_before {
                st.ack_tick = 0;
            } else {
                st.ack_tick += 1;
            }
            self.events.emit(BaseEvent::Update);
        }
        self.maybe_ack_soon(&st);

        *self.snapshot() = Snapshot::capture(&st);
        Ok(())
    }

    fn emit_transitions(&self, st: &mut DrainState<H>) {
        let info = st.apply.system();
        let writable = info.is_member(&self.local_key);
        let is_indexer = info.is_indexer(&self.local_key);
        if writable != st.writable {
            st.writable = writable;
            self.events.emit(if writable {
                BaseEvent::Writable
            } else {
                BaseEvent::Unwritable
            });
        }
        if is_indexer != st.is_indexer {
            st.is_indexer = is_indexer;
            self.events.emit(if is_indexer {
                BaseEvent::IsIndexer
            } else {
                BaseEvent::IsNonIndexer
            });
        }
    }

    /// Fires the ack timer early after enough drains went by without the
    /// local writer acking.
    fn maybe_ack_soon(&self, st: &DrainState<H>) {
        let threshold = self.config.ack.threshold * st.linearizer.indexers().len() as u64;
        if threshold == 0 || !st.is_indexer || st.ack_tick < threshold {
            return;
        }
        if let Some(timer) = self.ack_timer().as_ref() {
            timer.asap();
        }
    }

    fn on_error(&self, err: BaseError) {
        if let BaseError::Interrupted { reason } = err {
            self.closing.store(true, Ordering::Release);
            tracing::info!(?reason, "apply interrupted, base stops advancing");
            self.events.emit(BaseEvent::Interrupt { reason });
            return;
        }
        if !err.is_fatal() {
            tracing::warn!(error = %err, "drain failed");
            self.events.emit(BaseEvent::Warning {
                message: err.to_string(),
            });
            return;
        }
        if self.closing.swap(true, Ordering::AcqRel) && self.closed.load(Ordering::Acquire) {
            tracing::debug!(error = %err, "error after close");
            return;
        }
        self.halted.store(true, Ordering::Release);
        if let Some(timer) = self.ack_timer().take() {
            timer.stop();
        }
        if !self.events.has_observers() {
            tracing::error!(error = %err, "fatal error with no observer, aborting");
            std::process::abort();
        }
        tracing::error!(error = %err, "base halted");
        self.events.emit(BaseEvent::Error {
            message: err.to_string(),
        });
    }

    async fn update(self: &Arc<Self>) -> BaseResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BaseError::Closing);
        }
        if self.is_paused() {
            return Ok(());
        }
        let ticket = self.trigger();
        self.scheduler.wait(ticket).await;
        if self.halted.load(Ordering::Acquire) {
            return Err(BaseError::Closing);
        }
        Ok(())
    }

    async fn append_values(self: &Arc<Self>, values: Vec<Option<Vec<u8>>>) -> BaseResult<()> {
        if self.is_closing() {
            return Err(BaseError::Closing);
        }
        if values.iter().any(Option::is_some) && !self.snapshot().writable {
            return Err(not_writable());
        }
        let epoch = self.intents().queue(values);
        loop {
            self.wait_resumed().await;
            if self.is_closing() {
                return Err(BaseError::Closing);
            }
            let ticket = self.trigger();
            self.scheduler.wait(ticket).await;
            let outcome = self.intents().outcome(epoch);
            match outcome {
                Some(true) => return Ok(()),
                Some(false) => return Err(not_writable()),
                None => {}
            }
        }
    }

    async fn ack(self: &Arc<Self>, force: bool) -> BaseResult<()> {
        if self.is_closing() || self.acking.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.ack_once(force).await;
        self.acking.store(false, Ordering::Release);
        result
    }

    async fn ack_once(self: &Arc<Self>, force: bool) -> BaseResult<()> {
        self.update().await?;
        let should_ack = {
            let mut st = self.state.lock().await;
            st.ack_tick = 0;
            st.writable && st.linearizer.should_ack(&self.local_key, force)
        };
        if should_ack {
            tracing::debug!(force, "acking");
            self.append_values(vec![None]).await?;
        }
        if let Some(timer) = self.ack_timer().as_ref() {
            timer.bump();
        }
        Ok(())
    }

    fn start_ack_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.ack.interval_ms);
        let timer = AckTimer::start(interval, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                if inner.is_closing() {
                    return false;
                }
                if let Err(err) = inner.ack(false).await {
                    tracing::warn!(error = %err, "background ack failed");
                }
                true
            }
        });
        *self.ack_timer() = Some(timer);
    }
}

fn not_writable() -> BaseError {
    BaseError::NotWritable {
        reason: "local writer is not a member of the base".to_string(),
    }
}

/// Resolves the block encryption key: the supplied one, else the one
/// stored on the local core, else a fresh one when `encrypt` is set.
/// Whatever is resolved is persisted for the next open.
fn resolve_encryption_key(
    store: &dyn CoreStore,
    local_key: &WriterKey,
    options: &OpenOptions,
) -> BaseResult<Option<[u8; 32]>> {
    let core = store.open_core(&local_key.core_key(), &CoreOptions::writer(None))?;
    let stored = core
        .get_user_data(ENCRYPTION_KEY_USER_DATA)?
        .map(|raw| {
            <[u8; 32]>::try_from(raw.as_slice()).map_err(|_| BaseError::Decode {
                details: format!("stored encryption key has {} bytes", raw.len()),
            })
        })
        .transpose()?;

    let key = match (options.encryption_key, stored) {
        (Some(key), _) | (None, Some(key)) => Some(key),
        (None, None) if options.config.encryption.encrypt => Some(rand::random()),
        (None, None) => None,
    };
    match key {
        Some(key) if stored != Some(key) => core.set_user_data(ENCRYPTION_KEY_USER_DATA, &key)?,
        Some(_) => {}
        None if options.config.encryption.encrypted => return Err(BaseError::EncryptionKeyMissing),
        None => {}
    }
    Ok(key)
}

/// One participant of a base.
///
/// Cheap to clone; clones share the instance.
pub struct Base<H: Handlers> {
    inner: Arc<Inner<H>>,
}

impl<H: Handlers> Clone for Base<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: Handlers> std::fmt::Debug for Base<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Base")
            .field("local_key", &self.inner.local_key)
            .field("bootstrap", &self.inner.bootstrap)
            .field("indexed_length", &self.indexed_length())
            .finish_non_exhaustive()
    }
}

impl<H: Handlers> Base<H> {
    /// Opens the base on `store` and runs the first drain.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn open(store: Arc<dyn CoreStore>, handlers: H, options: OpenOptions) -> BaseResult<Self> {
        Self::open_with_wakeup(store, handlers, options, Arc::new(NoopWakeup)).await
    }

    /// Like [`Base::open`], announcing new local heads on `wakeup`.
    #[tracing::instrument(name = "concord.open", skip_all)]
    pub async fn open_with_wakeup(
        store: Arc<dyn CoreStore>,
        handlers: H,
        options: OpenOptions,
        wakeup: Arc<dyn WakeupChannel>,
    ) -> BaseResult<Self> {
        let local_key = WriterKey::from_primary(&store.primary_key());
        let bootstrap = options.bootstrap.unwrap_or(local_key);
        let encryption_key = resolve_encryption_key(store.as_ref(), &local_key, &options)?;
        let config = options.config;

        let local = store.open_core(&local_key.core_key(), &CoreOptions::writer(encryption_key))?;
        let mut apply = ApplyState::open(
            Arc::new(handlers),
            store.clone(),
            local.clone(),
            bootstrap,
            encryption_key,
        )?;
        if apply.should_migrate() {
            let span = crate::migrate_span!(apply.system().indexers.len());
            let _guard = span.enter();
            apply.migrate()?;
        }

        let checkpoint = fast_forward::search(
            store.clone(),
            bootstrap,
            encryption_key,
            apply.indexed_length(),
            &config.fast_forward,
        )
        .await?;

        let view = apply.view().clone();
        let view_store = apply.view_store().clone();
        let state = DrainState::new(
            apply,
            local_key,
            local,
            config.pool.core_pool_size,
            checkpoint,
        );
        let snapshot = Snapshot::capture(&state);
        let timer_enabled = config.ack.timer_enabled();
        let (paused, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            local_key,
            bootstrap,
            store,
            encryption_key,
            config,
            events: EventBus::new(),
            wakeup,
            view,
            view_store,
            state: tokio::sync::Mutex::new(state),
            intents: Mutex::new(Intents::new()),
            snapshot: Mutex::new(snapshot),
            scheduler: Debounce::new(),
            ack_timer: Mutex::new(None),
            paused,
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            acking: AtomicBool::new(false),
        });

        // Nobody can observe errors yet, so the first drain reports them.
        inner.try_advance().await?;
        if timer_enabled {
            inner.start_ack_timer();
        }
        tracing::info!(
            local = %local_key.short(),
            bootstrap = %bootstrap.short(),
            indexed_length = inner.snapshot().indexed_length,
            "base opened"
        );
        Ok(Self { inner })
    }

    /// Appends one value from the local writer. Resolves once the value is
    /// in the local log and merged into the DAG.
    pub async fn append(&self, value: impl Into<Vec<u8>>) -> BaseResult<()> {
        self.inner.append_values(vec![Some(value.into())]).await
    }

    /// Appends several values as one co-appended group.
    pub async fn append_batch<I, V>(&self, values: I) -> BaseResult<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Vec<u8>>,
    {
        let values: Vec<_> = values.into_iter().map(|v| Some(v.into())).collect();
        if values.is_empty() {
            return Ok(());
        }
        self.inner.append_values(values).await
    }

    /// Appends an empty node when it would let pending nodes confirm, or
    /// always for an indexer with `force`.
    pub async fn ack(&self, force: bool) -> BaseResult<()> {
        self.inner.ack(force).await
    }

    /// Runs a drain and waits for it.
    pub async fn update(&self) -> BaseResult<()> {
        self.inner.update().await
    }

    /// Drains until every queued local value has been written.
    pub async fn flush(&self) -> BaseResult<()> {
        loop {
            self.inner.wait_resumed().await;
            self.inner.update().await?;
            if self.inner.is_closing() || !self.inner.intents().has_pending() {
                return Ok(());
            }
        }
    }

    /// Stops draining. Appends queue up until [`Base::resume`].
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
        tracing::debug!("paused");
    }

    /// Resumes draining. Must be called inside a tokio runtime.
    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
        self.inner.trigger();
        tracing::debug!("resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    /// Records that `key` has data up to `length` (`None` when unknown) and
    /// triggers a drain that opens it if worthwhile.
    pub fn hint_wakeup(&self, hints: impl IntoIterator<Item = (WriterKey, Option<u64>)>) {
        {
            let mut intents = self.inner.intents();
            for (key, length) in hints {
                intents.hints.add(key, length);
            }
        }
        self.inner.trigger();
    }

    /// Asks the next drain to look for a checkpoint to adopt.
    pub fn request_fast_forward(&self) {
        self.inner.intents().check_fast_forward = true;
        self.inner.trigger();
    }

    /// Stops the instance. Idempotent.
    #[tracing::instrument(name = "concord.close", skip_all, fields(local = %self.inner.local_key.short()))]
    pub async fn close(&self) -> BaseResult<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        inner.closing.store(true, Ordering::Release);
        if let Some(timer) = inner.ack_timer().take() {
            timer.stop();
        }
        inner.scheduler.idle().await;

        let mut st = inner.state.lock().await;
        st.writers.clear();
        st.apply.close().await?;
        drop(st);

        // Releases appenders parked on a pause.
        inner.paused.send_replace(false);
        tracing::info!(local = %inner.local_key.short(), "base closed");
        Ok(())
    }

    pub fn is_closing(&self) -> bool {
        self.inner.is_closing()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BaseEvent> {
        self.inner.events.subscribe()
    }

    pub fn local_key(&self) -> WriterKey {
        self.inner.local_key
    }

    pub fn bootstrap(&self) -> WriterKey {
        self.inner.bootstrap
    }

    pub fn store(&self) -> &Arc<dyn CoreStore> {
        &self.inner.store
    }

    pub fn encryption_key(&self) -> Option<[u8; 32]> {
        self.inner.encryption_key
    }

    pub fn config(&self) -> &BaseConfig {
        &self.inner.config
    }

    /// The application view returned by [`Handlers::open`].
    pub fn view(&self) -> H::View {
        self.inner.view.clone()
    }

    pub fn view_store(&self) -> &Arc<ViewStore> {
        &self.inner.view_store
    }

    pub fn indexed_length(&self) -> u64 {
        self.inner.snapshot().indexed_length
    }

    pub fn system_key(&self) -> CoreKey {
        self.inner.snapshot().system_key
    }

    pub fn writable(&self) -> bool {
        self.inner.snapshot().writable
    }

    pub fn is_indexer(&self) -> bool {
        self.inner.snapshot().is_indexer
    }

    /// Frontier of the merged DAG.
    pub fn heads(&self) -> Vec<NodeId> {
        self.inner.snapshot().heads.clone()
    }

    /// Merged but unconfirmed nodes that carry a value.
    pub fn unconfirmed_values(&self) -> usize {
        self.inner.snapshot().unconfirmed_values
    }

    /// Committed membership snapshot.
    pub fn system_info(&self) -> SystemInfo {
        self.inner.snapshot().system.clone()
    }

    /// Whether removing `key` would be accepted by the indexed system.
    pub fn is_removable(&self, key: &WriterKey) -> bool {
        self.inner.snapshot().system.is_removable(key)
    }
}
