mod client;
mod item;
mod source;

pub use client::{ApiErrorClass, CatalogClient, CatalogError, ClientConfig, DEFAULT_BASE_URL};
pub use item::{Item, WireItem};
pub use reqwest::StatusCode;
pub use source::ItemSource;
