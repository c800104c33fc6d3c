use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// A catalog entry. Immutable once created: the server assigns `id` and the
/// remaining fields never change for that id.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Opaque cursor token. Ordering matches server recency (higher is newer).
    pub id: String,
    pub image: Vec<u8>,
    /// Text recognized in the image.
    pub text: String,
    pub confidence: f32,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        image: impl Into<Vec<u8>>,
        text: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            text: text.into(),
            confidence,
        }
    }
}

/// Item as the server serializes it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireItem {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "img")]
    pub image: String,
    pub text: String,
    pub confidence: f32,
}

impl WireItem {
    pub fn into_item(self) -> Result<Item, base64::DecodeError> {
        let image = STANDARD.decode(self.image.trim())?;
        Ok(Item {
            id: self.id,
            image,
            text: self.text,
            confidence: self.confidence,
        })
    }
}

impl From<&Item> for WireItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            image: STANDARD.encode(&item.image),
            text: item.text.clone(),
            confidence: item.confidence,
        }
    }
}

/// Body of a create request. The server picks the id.
#[derive(Debug, Serialize)]
pub(crate) struct NewItemBody<'a> {
    pub image: String,
    pub text: &'a str,
    pub confidence: f32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedItem {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
}
