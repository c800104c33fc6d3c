use std::fs;
use std::path::Path;

use async_trait::async_trait;
use catalog_core::Item;
use sqlx::migrate::Migrator;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use super::store::{ItemStore, StoreError};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SELECT_RECENT: &str =
    "SELECT id, image, text, confidence FROM items ORDER BY id DESC LIMIT ?1";
const INSERT_IF_ABSENT: &str = "INSERT INTO items (id, image, text, confidence)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(id) DO NOTHING";
const DELETE_BY_ID: &str = "DELETE FROM items WHERE id = ?1";

/// A mutation that changed at least one row in the open transaction.
enum Mutation {
    Insert(Item),
    Delete(String),
}

struct Pending {
    tx: Transaction<'static, Sqlite>,
    changes: u64,
    journal: Vec<Mutation>,
}

/// SQLite-backed [`ItemStore`].
///
/// The first mutation after a commit opens a transaction; later mutations and
/// reads go through it until [`ItemStore::commit`] closes it. If the commit
/// fails, the journaled mutations are replayed into a fresh transaction so they
/// stay visible and the next commit retries them.
pub struct SqliteItemStore {
    pool: SqlitePool,
    pending: Mutex<Option<Pending>>,
}

impl SqliteItemStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            pending: Mutex::new(None),
        }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    /// Single-connection in-memory database. Every connection to
    /// `sqlite::memory:` gets its own empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        tracing::info!(path = %db_path.display(), "item store opened");
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Drops uncommitted changes and closes the pool.
    pub async fn close(self) {
        if let Some(pending) = self.pending.into_inner() {
            if let Err(err) = pending.tx.rollback().await {
                tracing::warn!(error = %err, "rollback on close failed");
            }
        }
        self.pool.close().await;
    }

    /// Returns the open transaction, starting one if needed.
    async fn begin<'a>(
        &self,
        pending: &'a mut Option<Pending>,
    ) -> Result<&'a mut Pending, StoreError> {
        if pending.is_none() {
            let tx = self.pool.begin().await?;
            *pending = Some(Pending {
                tx,
                changes: 0,
                journal: Vec::new(),
            });
        }
        pending.as_mut().ok_or(StoreError::Poisoned)
    }

    /// Re-applies `journal` in a new transaction.
    async fn replay(&self, journal: Vec<Mutation>) -> Result<Pending, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut changes = 0;
        for mutation in &journal {
            let result = match mutation {
                Mutation::Insert(item) => insert_query(item).execute(&mut *tx).await?,
                Mutation::Delete(id) => {
                    sqlx::query(DELETE_BY_ID)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?
                }
            };
            changes += result.rows_affected();
        }
        Ok(Pending {
            tx,
            changes,
            journal,
        })
    }
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn add_if_absent(&self, item: &Item) -> Result<bool, StoreError> {
        let mut guard = self.pending.lock().await;
        let pending = self.begin(&mut guard).await?;
        let result = insert_query(item).execute(&mut *pending.tx).await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        pending.changes += result.rows_affected();
        pending.journal.push(Mutation::Insert(item.clone()));
        Ok(true)
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let mut guard = self.pending.lock().await;
        let pending = self.begin(&mut guard).await?;
        let result = sqlx::query(DELETE_BY_ID)
            .bind(id)
            .execute(&mut *pending.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        pending.changes += result.rows_affected();
        pending.journal.push(Mutation::Delete(id.to_string()));
        Ok(true)
    }

    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Item>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut guard = self.pending.lock().await;
        let rows = match guard.as_mut() {
            Some(pending) => {
                sqlx::query(SELECT_RECENT)
                    .bind(limit)
                    .fetch_all(&mut *pending.tx)
                    .await?
            }
            None => {
                sqlx::query(SELECT_RECENT)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(item_from_row).collect()
    }

    async fn commit(&self) -> Result<bool, StoreError> {
        let mut guard = self.pending.lock().await;
        let Some(pending) = guard.take() else {
            return Ok(false);
        };
        if pending.changes == 0 {
            pending.tx.rollback().await?;
            return Ok(false);
        }
        let Pending {
            tx,
            changes,
            journal,
        } = pending;
        if let Err(err) = tx.commit().await {
            match self.replay(journal).await {
                Ok(restored) => {
                    tracing::warn!(error = %err, changes, "commit failed, changes kept pending");
                    *guard = Some(restored);
                }
                Err(replay_err) => {
                    tracing::error!(
                        error = %err,
                        replay_error = %replay_err,
                        changes,
                        "commit failed, pending changes lost"
                    );
                }
            }
            return Err(err.into());
        }
        tracing::debug!(changes, "item store committed");
        Ok(true)
    }

    async fn has_changes(&self) -> bool {
        self.pending
            .lock()
            .await
            .as_ref()
            .is_some_and(|pending| pending.changes > 0)
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item, StoreError> {
    Ok(Item {
        id: row.try_get("id")?,
        image: row.try_get("image")?,
        text: row.try_get("text")?,
        confidence: row.try_get("confidence")?,
    })
}

fn insert_query(item: &Item) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(INSERT_IF_ABSENT)
        .bind(&item.id)
        .bind(&item.image)
        .bind(&item.text)
        .bind(item.confidence)
}
