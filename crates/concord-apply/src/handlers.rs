//! The application's side of the apply pipeline.

use async_trait::async_trait;
use concord_core::errors::BaseResult;
use concord_core::keys::WriterKey;
use concord_core::models::Node;

use crate::host::ApplyHost;
use crate::view_store::ViewStore;

/// One value handed to [`Handlers::apply`], in linearized order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyEntry {
    pub value: Vec<u8>,
    pub writer: WriterKey,
    pub seq: u64,
    pub version: u32,
}

impl ApplyEntry {
    /// `None` for acknowledgements.
    pub fn from_node(node: &Node) -> Option<Self> {
        node.value.as_ref().map(|value| Self {
            value: value.clone(),
            writer: node.writer,
            seq: node.seq,
            version: node.version,
        })
    }
}

/// Options of [`ApplyHost::add_writer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddWriterOptions {
    /// Promote the writer to indexer.
    pub indexer: bool,
}

impl AddWriterOptions {
    pub fn indexer() -> Self {
        Self { indexer: true }
    }
}

/// Capability interface supplied by the application.
///
/// `open` builds the view from named cores of the [`ViewStore`]. `apply`
/// receives the values of one co-appended group at a time. Writes it makes
/// to view cores are staged and only persisted once the whole linearized
/// batch has been applied; returning an error (including the one produced
/// by [`ApplyHost::interrupt`]) discards every staged write of the batch.
#[async_trait]
pub trait Handlers: Send + Sync + 'static {
    /// Application state. Cloning must be cheap: it is a handle.
    type View: Clone + Send + Sync + 'static;

    fn open(&self, store: &ViewStore) -> BaseResult<Self::View>;

    async fn apply(
        &self,
        batch: &[ApplyEntry],
        view: &Self::View,
        host: &mut ApplyHost<'_>,
    ) -> BaseResult<()>;

    async fn close(&self, _view: &Self::View) -> BaseResult<()> {
        Ok(())
    }
}
