//! One-shot HTTPS fetch of a bootstrap peer list, consulted when the known
//! address database is too small to pick healthy candidates from.

use serde::Deserialize;

use headers_common::PeerAddress;

/// One entry of the bootstrap list response.
#[derive(Debug, Deserialize)]
struct BootstrapEntry {
    addr: String,
    banscore: i64,
}

/// A source of candidate peer addresses beyond the chain's hard-coded
/// seeds: an HTTPS endpoint returning a JSON array of `{addr, banscore}`.
#[async_trait::async_trait]
pub trait BootstrapSource: Send + Sync {
    /// Fetch the list, filtering out any entry with a non-zero ban score.
    async fn fetch(&self) -> Result<Vec<PeerAddress>, crate::error::PoolError>;
}

/// The production source, backed by `reqwest`.
pub struct HttpBootstrapSource {
    client: reqwest::Client,
    url: String,
}

impl HttpBootstrapSource {
    /// Construct a source fetching from `url`.
    pub fn new(url: impl Into<String>) -> Self {
        HttpBootstrapSource {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl BootstrapSource for HttpBootstrapSource {
    async fn fetch(&self) -> Result<Vec<PeerAddress>, crate::error::PoolError> {
        let entries: Vec<BootstrapEntry> = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| crate::error::PoolError::Bootstrap(e.to_string()))?
            .json()
            .await
            .map_err(|e| crate::error::PoolError::Bootstrap(e.to_string()))?;

        Ok(entries
            .into_iter()
            .filter(|e| e.banscore == 0)
            .filter_map(|e| e.addr.parse().ok())
            .collect())
    }
}
