use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use catalog_core::Item;
use thiserror::Error;

pub use super::store_sqlite::SqliteItemStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store state is poisoned")]
    Poisoned,
}

/// Durable cache of items keyed by id.
///
/// Mutations are visible to reads right away and become durable on
/// [`ItemStore::commit`].
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Inserts `item` unless an item with the same id exists. Returns whether
    /// anything was inserted.
    async fn add_if_absent(&self, item: &Item) -> Result<bool, StoreError>;

    /// Removes the item with `id`. Missing ids are not an error.
    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError>;

    /// Up to `limit` items ordered by id, most recent first.
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Item>, StoreError>;

    /// Flushes pending mutations. Returns `false` without touching storage
    /// when nothing is pending.
    async fn commit(&self) -> Result<bool, StoreError>;

    async fn has_changes(&self) -> bool;
}

#[derive(Debug, Default)]
struct MemoryState {
    committed: BTreeMap<String, Item>,
    working: BTreeMap<String, Item>,
    dirty: bool,
    commits: usize,
}

/// In-process store with the same visibility rules as the SQLite one.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    inner: Mutex<MemoryState>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits that actually wrote something.
    pub fn commits(&self) -> usize {
        self.inner.lock().map(|state| state.commits).unwrap_or(0)
    }

    /// Items that survived the last commit, most recent first.
    pub fn committed(&self) -> Vec<Item> {
        self.inner
            .lock()
            .map(|state| state.committed.values().rev().cloned().collect())
            .unwrap_or_default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, StoreError> {
        let mut state = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn add_if_absent(&self, item: &Item) -> Result<bool, StoreError> {
        self.with_state(|state| {
            if state.working.contains_key(&item.id) {
                return false;
            }
            state.working.insert(item.id.clone(), item.clone());
            state.dirty = true;
            true
        })
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        self.with_state(|state| {
            let removed = state.working.remove(id).is_some();
            state.dirty |= removed;
            removed
        })
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Item>, StoreError> {
        self.with_state(|state| state.working.values().rev().take(limit).cloned().collect())
    }

    async fn commit(&self) -> Result<bool, StoreError> {
        self.with_state(|state| {
            if !state.dirty {
                return false;
            }
            state.committed = state.working.clone();
            state.dirty = false;
            state.commits += 1;
            true
        })
    }

    async fn has_changes(&self) -> bool {
        self.with_state(|state| state.dirty).unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
