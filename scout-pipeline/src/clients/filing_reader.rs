//! Filing reader client (rendered PDF of a filing)

use super::DocumentSource;
use async_trait::async_trait;
use scout_common::config::TimeoutConfig;
use scout_common::retry::{retry_with_backoff, RetryPolicy};
use scout_common::{Error, Result};

const READER_URL: &str = "https://api.sec-api.io/filing-reader";

pub struct FilingReaderClient {
    client: reqwest::Client,
    api_key: String,
    retry: RetryPolicy,
}

impl FilingReaderClient {
    pub fn new(api_key: String, timeouts: &TimeoutConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts.download_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            retry: RetryPolicy::from_config(timeouts),
        })
    }

    async fn download_once(&self, filing_url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(READER_URL)
            .query(&[
                ("token", self.api_key.as_str()),
                ("type", "pdf"),
                ("url", filing_url),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: format!("filing reader returned {} for {}", status, filing_url),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.contains("application/pdf") {
            tracing::warn!(
                url = %filing_url,
                content_type = %content_type,
                "Expected PDF content type, keeping download"
            );
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl DocumentSource for FilingReaderClient {
    async fn download(&self, filing_url: &str) -> Result<Vec<u8>> {
        retry_with_backoff("document download", self.retry, || self.download_once(filing_url)).await
    }
}
