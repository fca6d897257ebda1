//! Item retrieval from the upstream JSON API.
//!
//! [`ItemSource`] is the seam between the coordinator and the network; the
//! production implementation is [`HttpItemFetcher`]. A fetcher never retries:
//! every failure is returned to the caller tagged with the requested ID.

use crate::config::ApiConfig;
use crate::error::{Error, FetchError, Result};
use crate::types::{Item, ItemId};

/// Abstraction over item retrieval, enabling testability.
#[async_trait::async_trait]
pub trait ItemSource: Send + Sync {
    /// Retrieve and decode one item
    async fn fetch(&self, id: ItemId) -> std::result::Result<Item, FetchError>;

    /// The highest item ID the upstream currently knows about
    async fn max_item(&self) -> Result<ItemId>;
}

/// Production [`ItemSource`] backed by a shared `reqwest` client.
///
/// The client's connection pool is shared by every worker, so connections to the
/// API host are reused across items and batches.
#[derive(Clone)]
pub struct HttpItemFetcher {
    client: reqwest::Client,
    base: url::Url,
}

impl HttpItemFetcher {
    /// Build a fetcher for `api`, keeping up to `max_idle_connections` warm connections
    pub fn new(api: &ApiConfig, max_idle_connections: usize) -> Result<Self> {
        let base = api.parsed_base_url()?;
        let client = reqwest::Client::builder()
            .timeout(api.request_timeout)
            .user_agent(api.user_agent.as_str())
            .pool_max_idle_per_host(max_idle_connections)
            .build()?;

        Ok(Self { client, base })
    }

    /// `<base>/item/<id>.json`
    pub fn item_url(&self, id: ItemId) -> String {
        format!("{}item/{}.json", self.base, id)
    }

    /// `<base>/maxitem.json`
    pub fn max_item_url(&self) -> String {
        format!("{}maxitem.json", self.base)
    }
}

#[async_trait::async_trait]
impl ItemSource for HttpItemFetcher {
    async fn fetch(&self, id: ItemId) -> std::result::Result<Item, FetchError> {
        let response = self
            .client
            .get(self.item_url(id))
            .send()
            .await
            .map_err(|source| FetchError::Transport { id, source })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status {
                id,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport { id, source })?;

        decode_item(id, &body)
    }

    async fn max_item(&self) -> Result<ItemId> {
        let response = self.client.get(self.max_item_url()).send().await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::Other(format!(
                "max item lookup returned HTTP status {}",
                status.as_u16()
            )));
        }

        let body = response.bytes().await?;
        let max: i64 = serde_json::from_slice(&body)?;
        Ok(ItemId(max))
    }
}

/// Decode one item document
///
/// `null` or an empty body means the item does not exist. A document without an
/// `id` takes the requested one.
pub fn decode_item(id: ItemId, body: &[u8]) -> std::result::Result<Item, FetchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::Empty { id });
    }

    let item: Option<Item> =
        serde_json::from_slice(body).map_err(|source| FetchError::Decode { id, source })?;
    let mut item = item.ok_or(FetchError::Empty { id })?;

    if !item.id.is_valid() {
        item.id = id;
    } else if item.id != id {
        return Err(FetchError::IdMismatch {
            id,
            received: item.id,
        });
    }

    Ok(item)
}
