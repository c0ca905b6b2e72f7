//! Multi-instance helpers: open several bases on in-memory stores,
//! replicate them and drive them until they agree.

use std::sync::Arc;

use anyhow::{bail, Context};
use concord_base::Base;
use concord_core::config::{AckConfig, BaseConfig, FastForwardConfig, OpenOptions};
use concord_core::keys::WriterKey;
use concord_core::traits::CoreStore;
use concord_storage::{replicate, MemoryStore};
use serde::Deserialize;

use crate::list::{ListHandlers, ListOp};

pub type ListBase = Base<ListHandlers>;

/// Sync-then-ack rounds [`confirm`] tries before giving up.
pub const MAX_CONFIRM_ROUNDS: usize = 32;

/// Manual acks, no fast-forward.
pub fn test_config() -> BaseConfig {
    BaseConfig {
        ack: AckConfig::manual(),
        fast_forward: FastForwardConfig {
            enabled: false,
            ..FastForwardConfig::default()
        },
        ..BaseConfig::default()
    }
}

pub fn memory_store() -> Arc<dyn CoreStore> {
    Arc::new(MemoryStore::new())
}

pub async fn open_base(
    store: Arc<dyn CoreStore>,
    bootstrap: Option<WriterKey>,
    config: BaseConfig,
) -> anyhow::Result<ListBase> {
    let mut options = OpenOptions::new(config);
    options.bootstrap = bootstrap;
    Base::open(store, ListHandlers, options)
        .await
        .context("opening base")
}

/// `n` bases on fresh memory stores. The first is the bootstrap; the
/// others follow it but are not members yet.
pub async fn create(n: usize) -> anyhow::Result<Vec<ListBase>> {
    create_with(n, test_config()).await
}

pub async fn create_with(n: usize, config: BaseConfig) -> anyhow::Result<Vec<ListBase>> {
    let first = open_base(memory_store(), None, config.clone()).await?;
    let bootstrap = first.local_key();
    let mut bases = vec![first];
    for _ in 1..n {
        bases.push(open_base(memory_store(), Some(bootstrap), config.clone()).await?);
    }
    Ok(bases)
}

/// `by` appends an operation adding `who`.
pub async fn add_writer(by: &ListBase, who: &ListBase, indexer: bool) -> anyhow::Result<()> {
    by.append(ListOp::add_writer(&who.local_key(), indexer).encode())
        .await
        .with_context(|| format!("adding writer {}", who.local_key().short()))
}

/// Every store exchanges every core with every other store.
pub fn replicate_all(bases: &[ListBase]) -> anyhow::Result<()> {
    for (i, a) in bases.iter().enumerate() {
        for b in &bases[i + 1..] {
            replicate(a.store().as_ref(), b.store().as_ref()).context("replicating stores")?;
        }
    }
    Ok(())
}

/// Replicates, then lets every base drain.
pub async fn sync(bases: &[ListBase]) -> anyhow::Result<()> {
    replicate_all(bases)?;
    for base in bases {
        base.update().await.context("updating after sync")?;
    }
    Ok(())
}

/// Every base has confirmed every value and agrees on the indexed length.
pub fn converged(bases: &[ListBase]) -> bool {
    let Some(first) = bases.first() else {
        return true;
    };
    let length = first.indexed_length();
    bases
        .iter()
        .all(|b| b.unconfirmed_values() == 0 && b.indexed_length() == length)
}

/// Syncs and acks until every base confirmed everything.
pub async fn confirm(bases: &[ListBase]) -> anyhow::Result<()> {
    for _ in 0..MAX_CONFIRM_ROUNDS {
        sync(bases).await?;
        for base in bases {
            if base.is_indexer() {
                base.ack(false).await.context("acking")?;
            }
        }
        sync(bases).await?;
        if converged(bases) {
            return Ok(());
        }
    }
    let state: Vec<(u64, usize)> = bases
        .iter()
        .map(|b| (b.indexed_length(), b.unconfirmed_values()))
        .collect();
    bail!("bases did not converge after {MAX_CONFIRM_ROUNDS} rounds: {state:?}")
}

/// The list view as strings.
pub fn values(base: &ListBase) -> anyhow::Result<Vec<String>> {
    let view = base.view();
    (0..view.length())
        .map(|i| -> anyhow::Result<String> {
            let raw = view.get(i)?.with_context(|| format!("list entry {i} missing"))?;
            Ok(String::from_utf8_lossy(&raw).into_owned())
        })
        .collect()
}

/// Fails unless every base holds the same list.
pub fn compare(bases: &[ListBase]) -> anyhow::Result<()> {
    let Some(first) = bases.first() else {
        return Ok(());
    };
    let expected = values(first)?;
    for (i, base) in bases.iter().enumerate().skip(1) {
        let actual = values(base)?;
        if actual != expected {
            bail!("base {i} diverged: {actual:?} != {expected:?}");
        }
    }
    Ok(())
}

/// A scripted run loaded from `fixtures/scenarios`.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Instances; the first bootstraps and adds the others.
    pub writers: usize,
    /// Instances added as indexers. The bootstrap always is one.
    #[serde(default)]
    pub indexers: Vec<usize>,
    pub steps: Vec<Step>,
    /// Exact final list.
    #[serde(default)]
    pub expect: Option<Vec<String>>,
    /// Final list contents in any order.
    #[serde(default)]
    pub expect_unordered: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Step {
    Append { writer: usize, values: Vec<String> },
    Ack { writer: usize },
    Sync,
    Confirm,
}

/// Creates the instances of `scenario`, adds the writers and runs every
/// step, returning the bases for inspection.
pub async fn run_scenario(scenario: &Scenario) -> anyhow::Result<Vec<ListBase>> {
    let bases = create(scenario.writers).await?;
    for (i, base) in bases.iter().enumerate().skip(1) {
        add_writer(&bases[0], base, scenario.indexers.contains(&i)).await?;
    }
    confirm(&bases).await?;

    for step in &scenario.steps {
        match step {
            Step::Append { writer, values } => {
                let base = bases
                    .get(*writer)
                    .with_context(|| format!("{}: no writer {writer}", scenario.name))?;
                base.append_batch(values.iter().map(String::as_str)).await?;
            }
            Step::Ack { writer } => {
                let base = bases
                    .get(*writer)
                    .with_context(|| format!("{}: no writer {writer}", scenario.name))?;
                base.ack(false).await?;
            }
            Step::Sync => sync(&bases).await?,
            Step::Confirm => confirm(&bases).await?,
        }
    }
    Ok(bases)
}
