use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use catalog_core::{CatalogClient, ItemSource};

use crate::config::CatalogConfig;
use crate::sync::controller::{SyncController, ViewState};
use crate::sync::store::SqliteItemStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List,
    Newer,
    Older,
    Delete(usize),
    Add {
        image_path: PathBuf,
        text: String,
        confidence: f32,
    },
    ClearRemote,
}

pub struct App {
    source: Arc<CatalogClient>,
    store: Arc<SqliteItemStore>,
    controller: SyncController,
}

impl App {
    /// Opens the store, builds the client and shows whatever is cached.
    pub async fn bootstrap(config: CatalogConfig, in_memory: bool) -> anyhow::Result<Self> {
        let source = Arc::new(
            CatalogClient::with_config(config.client).context("failed to build catalog client")?,
        );
        let store = if in_memory {
            SqliteItemStore::in_memory().await
        } else {
            SqliteItemStore::open(&config.db_path).await
        }
        .context("failed to open item store")?;
        let store = Arc::new(store);

        let controller = SyncController::new(source.clone(), store.clone(), config.fetch_limit);
        controller.reconcile().await;
        tracing::info!(
            cached = controller.state().items.len(),
            fetch_limit = config.fetch_limit,
            "catalog ready"
        );
        Ok(Self {
            source,
            store,
            controller,
        })
    }

    pub fn controller(&self) -> &SyncController {
        &self.controller
    }

    pub async fn execute(&self, command: Command) -> anyhow::Result<ViewState> {
        match command {
            Command::List => self.controller.load_initial().await,
            Command::Newer => self.controller.load_newer().await,
            Command::Older => self.controller.load_more().await,
            Command::Delete(index) => self.controller.delete_item(index).await?,
            Command::Add {
                image_path,
                text,
                confidence,
            } => {
                let image = tokio::fs::read(&image_path)
                    .await
                    .with_context(|| format!("failed to read image {}", image_path.display()))?;
                if let Some(id) = self.controller.add_item(&image, &text, confidence).await {
                    tracing::info!(%id, "item added");
                }
            }
            Command::ClearRemote => {
                self.source
                    .delete_all_items()
                    .await
                    .context("failed to clear remote items")?;
                tracing::info!("remote items cleared");
            }
        }
        Ok(self.controller.state())
    }

    pub async fn shutdown(self) {
        let Self { store, controller, .. } = self;
        drop(controller);
        match Arc::try_unwrap(store) {
            Ok(store) => store.close().await,
            Err(_) => tracing::warn!("item store still shared at shutdown"),
        }
    }
}

/// One line per item, then the last error if there is one.
pub fn render_state(state: &ViewState) -> String {
    let mut out = String::new();
    if state.items.is_empty() {
        out.push_str("(no items)\n");
    }
    for (index, item) in state.items.iter().enumerate() {
        let _ = writeln!(
            out,
            "{index:>3}  {}  {:.2}  {} ({} bytes)",
            item.id,
            item.confidence,
            item.text,
            item.image.len()
        );
    }
    if let Some(error) = &state.last_error {
        let _ = writeln!(out, "error: {error}");
    }
    out
}
