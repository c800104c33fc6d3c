use async_trait::async_trait;

use crate::client::CatalogError;
use crate::item::Item;

/// Paginated read/write access to the remote item collection.
///
/// Every call resolves exactly once, with either a value or an error.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Returns a page of items, most recent first.
    ///
    /// `since_id` selects items strictly newer than the given id, `max_id`
    /// selects items older than or equal to it. With neither set the most
    /// recent page is returned. Callers set at most one of the two.
    async fn retrieve_items(
        &self,
        since_id: Option<&str>,
        max_id: Option<&str>,
    ) -> Result<Vec<Item>, CatalogError>;

    /// Submits a new item and returns the id the server assigned to it.
    async fn add_item(
        &self,
        image: &[u8],
        text: &str,
        confidence: f32,
    ) -> Result<String, CatalogError>;

    async fn delete_item(&self, id: &str) -> Result<(), CatalogError>;

    async fn delete_all_items(&self) -> Result<(), CatalogError>;
}
