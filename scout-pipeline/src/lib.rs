//! scout-pipeline library interface
//!
//! Discovery, per-item fetch and parallel enrichment steps, the invokers
//! that call them, and the orchestrator that sequences one run.

pub mod api;
pub mod clients;
pub mod error;
pub mod invoker;
pub mod orchestrator;
pub mod prompts;
pub mod stages;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use scout_common::artifacts::ArtifactStore;
use scout_common::config::{ArtifactLayout, EnrichmentConfig};
use scout_common::genai::TextGenerator;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::clients::{DocumentSource, FilingSource};

/// Collaborators shared by every step invocation
///
/// Cloning is cheap; the context holds no per-item state.
#[derive(Clone)]
pub struct StepContext {
    /// Registry store
    pub db: SqlitePool,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub layout: ArtifactLayout,
    pub filings: Arc<dyn FilingSource>,
    pub documents: Arc<dyn DocumentSource>,
    pub generator: Arc<dyn TextGenerator>,
    pub enrichment: EnrichmentConfig,
    /// Deadline for each enrichment branch, retries included
    pub branch_timeout: Duration,
    /// Look up company identifiers for newly seen tickers
    pub enrich_company_profile: bool,
}

/// State for the HTTP step service
#[derive(Clone)]
pub struct AppState {
    pub steps: StepContext,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(steps: StepContext) -> Self {
        Self {
            steps,
            startup_time: Utc::now(),
        }
    }
}

/// Build the step service router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::step_routes())
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
