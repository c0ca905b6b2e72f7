//! Bounded search for a fast-forward checkpoint.

use std::sync::Arc;
use std::time::Duration;

use concord_apply::find_checkpoint;
use concord_core::config::FastForwardConfig;
use concord_core::errors::BaseResult;
use concord_core::keys::{CoreKey, WriterKey};
use concord_core::models::Checkpoint;
use concord_core::traits::CoreStore;

/// Delay between scans while waiting for a configured checkpoint.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Looks for a checkpoint worth adopting.
///
/// Without a configured key this is a single scan. With one, the store is
/// rescanned until that core replicated far enough. Either way the search
/// gives up after `timeout_ms` and the base falls back to incremental
/// catch-up.
pub async fn search(
    store: Arc<dyn CoreStore>,
    bootstrap: WriterKey,
    encryption_key: Option<[u8; 32]>,
    local_length: u64,
    config: &FastForwardConfig,
) -> BaseResult<Option<Checkpoint>> {
    if !config.enabled {
        return Ok(None);
    }
    let preferred = config.key.as_deref().map(CoreKey::from_hex).transpose()?;
    let scan = scan_until_settled(
        store.as_ref(),
        bootstrap,
        encryption_key,
        local_length,
        config.minimum,
        preferred,
    );

    match tokio::time::timeout(Duration::from_millis(config.timeout_ms), scan).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                timeout_ms = config.timeout_ms,
                "fast-forward search timed out, catching up incrementally"
            );
            Ok(None)
        }
    }
}

async fn scan_until_settled(
    store: &dyn CoreStore,
    bootstrap: WriterKey,
    encryption_key: Option<[u8; 32]>,
    local_length: u64,
    minimum: u64,
    preferred: Option<CoreKey>,
) -> BaseResult<Option<Checkpoint>> {
    loop {
        let found = find_checkpoint(
            store,
            &bootstrap,
            encryption_key,
            local_length,
            minimum,
            preferred,
        )?;
        let settled = match (&found, preferred) {
            (_, None) => true,
            (Some(cp), Some(key)) => cp.key == key,
            (None, Some(_)) => false,
        };
        if settled {
            return Ok(found);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
