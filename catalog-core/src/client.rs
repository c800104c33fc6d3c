use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Certificate, Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::item::{CreatedItem, Item, NewItemBody, WireItem};
use crate::source::ItemSource;

pub const DEFAULT_BASE_URL: &str = "https://marlove.net/e/mock/v1/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("item {id} has an undecodable image: {source}")]
    Decode {
        id: String,
        #[source]
        source: base64::DecodeError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Connection settings handed to [`CatalogClient`]. Nothing here is global;
/// two clients with different configs can coexist.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Sent verbatim in the `Authorization` header.
    pub token: String,
    pub timeout: Duration,
    /// PEM certificate to trust instead of the built-in roots.
    pub pinned_certificate: Option<Vec<u8>>,
}

impl ClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
            pinned_certificate: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Clone)]
pub struct CatalogClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CatalogClient {
    pub fn new(token: impl Into<String>) -> Result<Self, CatalogError> {
        Self::with_config(ClientConfig::new(token))
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, CatalogError> {
        Self::with_config(ClientConfig::new(token).with_base_url(base_url))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, CatalogError> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(pem) = config.pinned_certificate.as_deref() {
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(Certificate::from_pem(pem)?);
        }
        Ok(Self {
            http: builder.build()?,
            base_url: parse_base_url(&config.base_url)?,
            token: config.token,
        })
    }

    pub async fn list_items(
        &self,
        since_id: Option<&str>,
        max_id: Option<&str>,
    ) -> Result<Vec<Item>, CatalogError> {
        let mut url = self.endpoint(&["items"])?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(since_id) = since_id {
                query.append_pair("since_id", since_id);
            }
            if let Some(max_id) = max_id {
                query.append_pair("max_id", max_id);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", &self.token)
            .send()
            .await?;
        let page: Vec<WireItem> = Self::handle_response(response).await?;
        tracing::debug!(count = page.len(), ?since_id, ?max_id, "retrieved item page");

        page.into_iter()
            .map(|wire| {
                let id = wire.id.clone();
                wire.into_item()
                    .map_err(|source| CatalogError::Decode { id, source })
            })
            .collect()
    }

    pub async fn create_item(
        &self,
        image: &[u8],
        text: &str,
        confidence: f32,
    ) -> Result<String, CatalogError> {
        let url = self.endpoint(&["item"])?;
        let body = NewItemBody {
            image: STANDARD.encode(image),
            text,
            confidence,
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", &self.token)
            .json(&body)
            .send()
            .await?;
        let created: CreatedItem = Self::handle_response(response).await?;
        Ok(created.id)
    }

    pub async fn delete_item(&self, id: &str) -> Result<(), CatalogError> {
        let url = self.endpoint(&["item", id])?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", &self.token)
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    pub async fn delete_all_items(&self) -> Result<(), CatalogError> {
        let url = self.endpoint(&["item"])?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", &self.token)
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CatalogError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CatalogError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn handle_empty(response: reqwest::Response) -> Result<(), CatalogError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> CatalogError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        CatalogError::Api { status, body }
    }
}

#[async_trait]
impl ItemSource for CatalogClient {
    async fn retrieve_items(
        &self,
        since_id: Option<&str>,
        max_id: Option<&str>,
    ) -> Result<Vec<Item>, CatalogError> {
        self.list_items(since_id, max_id).await
    }

    async fn add_item(
        &self,
        image: &[u8],
        text: &str,
        confidence: f32,
    ) -> Result<String, CatalogError> {
        self.create_item(image, text, confidence).await
    }

    async fn delete_item(&self, id: &str) -> Result<(), CatalogError> {
        CatalogClient::delete_item(self, id).await
    }

    async fn delete_all_items(&self) -> Result<(), CatalogError> {
        CatalogClient::delete_all_items(self).await
    }
}

impl CatalogError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            CatalogError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn parse_base_url(value: &str) -> Result<Url, url::ParseError> {
    // Without a trailing slash the last path segment would be treated as a file.
    if value.ends_with('/') {
        Url::parse(value)
    } else {
        Url::parse(&format!("{value}/"))
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}
