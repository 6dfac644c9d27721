//! Process-wide shared client, built once on first use.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::client::RemoteClient;
use crate::error::StoreError;

/// Holder for the one live client a process shares across all sessions.
///
/// The client is constructed lazily from the factory supplied at first use;
/// concurrent first users race on a single initialization. A failing
/// factory leaves the cell unset so a later call can retry. Inject this
/// into callers instead of reaching for ambient global state.
#[derive(Default)]
pub struct SharedConnection {
    cell: OnceCell<Arc<RemoteClient>>,
}

impl SharedConnection {
    /// Create an empty holder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// Get the shared client, constructing it on first use.
    ///
    /// # Errors
    /// Propagates the factory's failure; the holder stays unset.
    pub async fn get_or_create<F, Fut>(&self, factory: F) -> Result<Arc<RemoteClient>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RemoteClient, StoreError>>,
    {
        self.cell
            .get_or_try_init(|| async move { factory().await.map(Arc::new) })
            .await
            .cloned()
    }

    /// The client, if one has been built.
    #[must_use]
    pub fn get(&self) -> Option<Arc<RemoteClient>> {
        self.cell.get().cloned()
    }
}
