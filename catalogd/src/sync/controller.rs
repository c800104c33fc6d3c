use std::cell::Cell;
use std::sync::Arc;

use catalog_core::{CatalogError, Item, ItemSource};
use thiserror::Error;
use tokio::sync::watch;

use super::store::{ItemStore, StoreError};

pub const DEFAULT_FETCH_LIMIT: usize = 10;
/// How far [`SyncController::load_more`] grows the window.
pub const PAGE_GROWTH: usize = 10;

/// Failure captured into [`ViewState::last_error`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] CatalogError),
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Caller asked to delete a row that is not in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("index {index} is out of range for a window of {len} items")]
pub struct InvalidIndexError {
    pub index: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    /// Most recent first, at most `fetch_limit` long.
    pub items: Vec<Item>,
    pub is_loading: bool,
    pub last_error: Option<String>,
    pub fetch_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchGuard {
    Idle,
    Fetching,
}

/// Keeps a bounded window of the local store in step with the remote source.
///
/// All calls must come from one task. The guard lives in a `Cell`, so the
/// controller is not `Sync` and overlapping calls are only possible by
/// interleaving futures on that task (`join!`, `select!`, a `LocalSet`).
pub struct SyncController {
    source: Arc<dyn ItemSource>,
    store: Arc<dyn ItemStore>,
    guard: Cell<FetchGuard>,
    state: watch::Sender<ViewState>,
}

impl SyncController {
    pub fn new(source: Arc<dyn ItemSource>, store: Arc<dyn ItemStore>, fetch_limit: usize) -> Self {
        Self {
            source,
            store,
            guard: Cell::new(FetchGuard::Idle),
            state: watch::Sender::new(ViewState {
                items: Vec::new(),
                is_loading: false,
                last_error: None,
                fetch_limit,
            }),
        }
    }

    pub fn state(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Every state change is published as a full snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn fetch_limit(&self) -> usize {
        self.state.borrow().fetch_limit
    }

    /// Fetches the newest page. Call this first.
    pub async fn load_initial(&self) {
        self.load_items(None, None).await;
    }

    /// Fetches items newer than the head of the window.
    pub async fn load_newer(&self) {
        let since_id = self.state.borrow().items.first().map(|item| item.id.clone());
        self.load_items(since_id, None).await;
    }

    /// Fetches items older than or equal to the tail of the window.
    pub async fn load_older(&self) {
        let max_id = self.state.borrow().items.last().map(|item| item.id.clone());
        self.load_items(None, max_id).await;
    }

    /// Grows the window by [`PAGE_GROWTH`], then pages older from its new tail.
    pub async fn load_more(&self) {
        let grown = self.fetch_limit().saturating_add(PAGE_GROWTH);
        self.set_fetch_limit(grown).await;
        self.load_older().await;
    }

    /// Resizes the window from the store. Never goes to the remote source.
    pub async fn set_fetch_limit(&self, fetch_limit: usize) {
        self.state.send_modify(|state| state.fetch_limit = fetch_limit);
        self.reconcile().await;
    }

    /// Commits the store and re-reads the window. Starts a new error cycle, so
    /// `last_error` afterwards only describes this call.
    pub async fn reconcile(&self) {
        self.publish_outcome(None);
        self.reconcile_in_cycle().await;
    }

    /// Reconcile step of a larger operation. A store failure is recorded only
    /// if that operation has not already recorded an error.
    async fn reconcile_in_cycle(&self) {
        let limit = self.fetch_limit();
        let mut failure = None;

        if let Err(err) = self.store.commit().await {
            tracing::warn!(error = %err, "commit failed, changes stay pending");
            failure = Some(SyncError::from(err));
        }
        let window = match self.store.fetch_recent(limit).await {
            Ok(items) => Some(items),
            Err(err) => {
                tracing::warn!(error = %err, "window read failed, keeping previous items");
                if failure.is_none() {
                    failure = Some(SyncError::from(err));
                }
                None
            }
        };

        self.state.send_modify(|state| {
            if let Some(items) = window {
                state.items = items;
            }
            if let (None, Some(err)) = (&state.last_error, failure) {
                state.last_error = Some(err.to_string());
            }
        });
    }

    /// Deletes `items[index]` remotely and, only if that succeeds, locally.
    pub async fn delete_item(&self, index: usize) -> Result<(), InvalidIndexError> {
        let id = {
            let state = self.state.borrow();
            match state.items.get(index) {
                Some(item) => item.id.clone(),
                None => {
                    return Err(InvalidIndexError {
                        index,
                        len: state.items.len(),
                    });
                }
            }
        };

        let remote = self.source.delete_item(&id).await;
        match &remote {
            Ok(()) => tracing::info!(%id, "remote item deleted"),
            Err(err) => tracing::warn!(%id, error = %err, "remote delete failed, keeping local copy"),
        }
        let remote_ok = remote.is_ok();
        self.publish_outcome(remote.err().map(SyncError::from));

        if remote_ok {
            if let Err(err) = self.store.delete_by_id(&id).await {
                tracing::warn!(%id, error = %err, "local delete failed");
                self.publish_outcome(Some(SyncError::from(err)));
            }
        }

        self.reconcile_in_cycle().await;
        Ok(())
    }

    /// Submits a new item, then pulls it in through a regular newer-page load.
    /// Returns the server id, or `None` if the remote add failed. The item
    /// still reaches the server when another fetch is in flight, but then it
    /// only shows up with the next `load_newer`.
    pub async fn add_item(&self, image: &[u8], text: &str, confidence: f32) -> Option<String> {
        match self.source.add_item(image, text, confidence).await {
            Ok(id) => {
                tracing::info!(%id, "remote item added");
                let since_id = self.state.borrow().items.first().map(|item| item.id.clone());
                if !self.load_items(since_id, None).await {
                    tracing::warn!(%id, "new item not pulled in, a fetch is already in flight");
                }
                Some(id)
            }
            Err(err) => {
                tracing::warn!(error = %err, "remote add failed");
                self.publish_outcome(Some(SyncError::from(err)));
                None
            }
        }
    }

    /// Returns `false` if the guard dropped the request.
    async fn load_items(&self, since_id: Option<String>, max_id: Option<String>) -> bool {
        if self.guard.get() == FetchGuard::Fetching {
            tracing::debug!(?since_id, ?max_id, "load dropped, fetch already in flight");
            return false;
        }

        self.guard.set(FetchGuard::Fetching);
        self.state.send_modify(|state| state.is_loading = true);
        tracing::debug!(?since_id, ?max_id, "loading items");

        let result = self
            .source
            .retrieve_items(since_id.as_deref(), max_id.as_deref())
            .await;

        self.guard.set(FetchGuard::Idle);
        let (items, error) = match result {
            Ok(items) => (items, None),
            Err(err) => {
                tracing::warn!(error = %err, "item fetch failed");
                (Vec::new(), Some(SyncError::from(err)))
            }
        };
        self.state.send_modify(|state| {
            state.is_loading = false;
            state.last_error = error.map(|err| err.to_string());
        });

        let received = items.len();
        let mut inserted = 0usize;
        for item in &items {
            match self.store.add_if_absent(item).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(id = %item.id, error = %err, "merge into store failed");
                    self.publish_outcome(Some(SyncError::from(err)));
                    break;
                }
            }
        }
        tracing::debug!(received, inserted, "merged remote page");

        self.reconcile_in_cycle().await;
        true
    }

    /// Sets `last_error` for the current cycle. `None` clears it.
    fn publish_outcome(&self, error: Option<SyncError>) {
        self.state
            .send_modify(|state| state.last_error = error.map(|err| err.to_string()));
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
