//! Step invokers
//!
//! The orchestrator never calls a stage directly. It goes through a
//! [`StepInvoker`], which either runs the step in-process ([`LocalInvoker`])
//! or posts the envelope to a step service ([`HttpInvoker`]). The local
//! invoker still serializes every request and response, so both transports
//! exchange exactly the same messages.

use crate::stages;
use crate::StepContext;
use async_trait::async_trait;
use scout_common::envelope::{
    through_wire, DiscoveryRequest, DiscoveryResponse, EnrichmentResponse, ItemRequest,
    StepResponse,
};
use scout_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[async_trait]
pub trait StepInvoker: Send + Sync {
    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResponse>;

    /// `Err` means the invocation itself failed; a failed fetch is `Ok`
    async fn fetch(&self, request: &ItemRequest) -> Result<StepResponse>;

    async fn enrich(&self, request: &ItemRequest) -> Result<EnrichmentResponse>;
}

/// Runs steps in this process
pub struct LocalInvoker {
    ctx: StepContext,
}

impl LocalInvoker {
    pub fn new(ctx: StepContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StepInvoker for LocalInvoker {
    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResponse> {
        let request = through_wire(request)?;
        let response = stages::discover(&self.ctx, &request).await?;
        through_wire(&response)
    }

    async fn fetch(&self, request: &ItemRequest) -> Result<StepResponse> {
        let request = through_wire(request)?;
        let response = stages::fetch(&self.ctx, &request).await?;
        through_wire(&response)
    }

    async fn enrich(&self, request: &ItemRequest) -> Result<EnrichmentResponse> {
        let request = through_wire(request)?;
        let response = stages::enrich(&self.ctx, &request).await?;
        through_wire(&response)
    }
}

/// Calls a remote `scout-pipeline serve` instance
pub struct HttpInvoker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInvoker {
    /// `timeout` bounds each request; the orchestrator's step deadline still applies
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: error_message(&body),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl StepInvoker for HttpInvoker {
    async fn discover(&self, request: &DiscoveryRequest) -> Result<DiscoveryResponse> {
        self.post("/steps/discover", request).await
    }

    async fn fetch(&self, request: &ItemRequest) -> Result<StepResponse> {
        self.post("/steps/fetch", request).await
    }

    async fn enrich(&self, request: &ItemRequest) -> Result<EnrichmentResponse> {
        self.post("/steps/enrich", request).await
    }
}

/// Pull `error.message` out of a service error body, falling back to the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.chars().take(300).collect())
}
