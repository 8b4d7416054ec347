use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use crate::error::EngineError;

/// Raw-byte access to the remote capture source.
///
/// The scheduler and compositor pipeline only ever see bytes through this
/// trait, so the whole cycle can be driven by an in-memory source in tests.
pub trait TileSource: Send + Sync + 'static {
    /// One read of the capture descriptor (`latest.json`).
    fn fetch_descriptor(&self) -> impl Future<Output = Result<Bytes, EngineError>> + Send;

    /// One read of a single tile image.
    fn fetch_tile(&self, url: &str) -> impl Future<Output = Result<Bytes, EngineError>> + Send;
}

/// Production source: plain HTTP GETs against the capture endpoint.
pub struct HttpTileSource {
    client: reqwest::Client,
    descriptor_url: String,
}

impl HttpTileSource {
    pub fn new(base_url: &str) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EngineError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            descriptor_url: format!("{base_url}/latest.json"),
        })
    }

    async fn get(&self, url: &str) -> Result<Bytes, EngineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Network(format!("GET {url}: {e}")))?;
        let response = response
            .error_for_status()
            .map_err(|e| EngineError::Network(format!("GET {url}: {e}")))?;
        response
            .bytes()
            .await
            .map_err(|e| EngineError::Network(format!("GET {url}: body read failed: {e}")))
    }
}

impl TileSource for HttpTileSource {
    fn fetch_descriptor(&self) -> impl Future<Output = Result<Bytes, EngineError>> + Send {
        async move { self.get(&self.descriptor_url).await }
    }

    fn fetch_tile(&self, url: &str) -> impl Future<Output = Result<Bytes, EngineError>> + Send {
        let url = url.to_owned();
        async move { self.get(&url).await }
    }
}
