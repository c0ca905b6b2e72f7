//! A list application: every value lands in the "list" view in
//! linearized order, with a few JSON operations for membership.

use async_trait::async_trait;
use concord_apply::{AddWriterOptions, ApplyEntry, ApplyHost, Handlers, ViewRef, ViewStore};
use concord_core::errors::BaseResult;
use concord_core::keys::WriterKey;
use serde::{Deserialize, Serialize};

/// Name of the single view of [`ListHandlers`].
pub const LIST_VIEW: &str = "list";

/// Operations understood by [`ListHandlers`]. Values that do not parse as
/// one are appended to the list as they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ListOp {
    Add {
        value: String,
    },
    AddWriter {
        key: String,
        #[serde(default)]
        indexer: bool,
    },
    RemoveWriter {
        key: String,
    },
    Interrupt {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ListOp {
    pub fn add(value: impl Into<String>) -> Self {
        Self::Add {
            value: value.into(),
        }
    }

    pub fn add_writer(key: &WriterKey, indexer: bool) -> Self {
        Self::AddWriter {
            key: key.to_hex(),
            indexer,
        }
    }

    pub fn remove_writer(key: &WriterKey) -> Self {
        Self::RemoveWriter { key: key.to_hex() }
    }

    pub fn interrupt(reason: impl Into<String>) -> Self {
        Self::Interrupt {
            reason: Some(reason.into()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|e| panic!("Failed to encode {self:?}: {e}"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ListHandlers;

#[async_trait]
impl Handlers for ListHandlers {
    type View = ViewRef;

    fn open(&self, store: &ViewStore) -> BaseResult<ViewRef> {
        store.get(LIST_VIEW)
    }

    async fn apply(
        &self,
        batch: &[ApplyEntry],
        view: &ViewRef,
        host: &mut ApplyHost<'_>,
    ) -> BaseResult<()> {
        for entry in batch {
            match serde_json::from_slice::<ListOp>(&entry.value) {
                Ok(ListOp::Add { value }) => {
                    view.append([value.into_bytes()]);
                }
                Ok(ListOp::AddWriter { key, indexer }) => {
                    let options = if indexer {
                        AddWriterOptions::indexer()
                    } else {
                        AddWriterOptions::default()
                    };
                    host.add_writer(WriterKey::from_hex(&key)?, options)?;
                }
                Ok(ListOp::RemoveWriter { key }) => {
                    host.remove_writer(&WriterKey::from_hex(&key)?)?;
                }
                Ok(ListOp::Interrupt { reason }) => {
                    return Err(host.interrupt(reason.unwrap_or_else(|| "interrupted".to_string())));
                }
                Err(_) => {
                    view.append([entry.value.clone()]);
                }
            }
        }
        Ok(())
    }
}
