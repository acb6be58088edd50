use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;

use crate::chunk::RangeFetcher;
use crate::error::BoxError;
use crate::models::FileMetadata;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server did not report a content length for {0}")]
    NoContentLength(String),
    #[error("server ignored the range request (status {0})")]
    RangeIgnored(StatusCode),
    #[error("expected {expected} bytes for range {start}-{end}, received {received}")]
    ShortRead { start: u64, end: u64, expected: u64, received: u64 },
}

/// A remote file reachable over HTTP with byte-range support.
///
/// [`RangeFetcher::fetch_range`] blocks the calling thread on the runtime the source
/// was created in, so it must run on a blocking worker, never on an async task.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
    timeout: Duration,
    runtime: Handle,
}

impl HttpSource {
    /// Must be called from within a tokio runtime.
    pub fn new(url: impl Into<String>) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout: Duration::from_secs(60),
            runtime: Handle::current(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Looks up the object's name and size with a HEAD request.
    pub async fn metadata(&self) -> Result<FileMetadata, HttpError> {
        let resp = self
            .client
            .head(&self.url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let size = resp
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| HttpError::NoContentLength(self.url.clone()))?;
        Ok(FileMetadata { id: self.url.clone(), name: file_name_from_url(resp.url()), size })
    }

    async fn fetch(&self, start: u64, end: u64) -> Result<Vec<u8>, HttpError> {
        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, format!("bytes={}-{}", start, end))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(HttpError::RangeIgnored(resp.status()));
        }

        let expected = end - start + 1;
        let mut body = Vec::with_capacity(expected as usize);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        if body.len() as u64 != expected {
            return Err(HttpError::ShortRead { start, end, expected, received: body.len() as u64 });
        }
        Ok(body)
    }
}

impl RangeFetcher for HttpSource {
    fn fetch_range(&self, start: u64, end: u64) -> Result<Vec<u8>, BoxError> {
        Ok(self.runtime.block_on(self.fetch(start, end))?)
    }
}

/// Last non-empty path segment of the URL, or `download` when there is none.
pub fn file_name_from_url(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| "download".to_string())
}
