pub mod controller;
pub mod store;
mod store_sqlite;

pub use controller::{
    DEFAULT_FETCH_LIMIT, InvalidIndexError, PAGE_GROWTH, SyncController, SyncError, ViewState,
};
pub use store::{ItemStore, MemoryItemStore, SqliteItemStore, StoreError};
