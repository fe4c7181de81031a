//! HTTP access for downloading tile data.

use std::{future::Future, pin::Pin};

use crate::error::{Error, Result};

/// User agent for tile data requests.
const USER_AGENT: &str = concat!("tilestream/", env!("CARGO_PKG_VERSION"));

/// Future type for network fetches.
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Something that can fetch the body of a URL.
pub trait Network: Send + Sync {
    /// GET `url` and return the response body.
    ///
    /// Non-success status codes are errors.
    fn get(&self, url: &str) -> FetchFuture<'_>;
}

/// [`Network`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    http: reqwest::Client,
}

impl HttpNetwork {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Http {
                url: String::new(),
                message: format!("failed to create client: {e}"),
            })?;
        Ok(Self { http })
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "fetching");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let data = response.bytes().await.map_err(|e| Error::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(data.to_vec())
    }
}

impl Network for HttpNetwork {
    fn get(&self, url: &str) -> FetchFuture<'_> {
        let url = url.to_string();
        Box::pin(async move { self.fetch_bytes(&url).await })
    }
}
