//! Parallel enrichment step
//!
//! Two independent branches run as separate tasks: document analysis over the
//! fetched PDF and a headline assessment over the window leading up to the
//! filed date. Both are always awaited; a failure or panic in one is recorded
//! in its own response and never cancels the other. Each branch runs under
//! its own deadline, shorter than the step deadline, so the step always
//! reports both outcomes. Each branch checks for its own output first, so a
//! completed branch is not redone on retry.

use super::validate_item;
use crate::prompts;
use crate::StepContext;
use chrono::Duration;
use scout_common::artifacts::PutOutcome;
use scout_common::db::filings;
use scout_common::envelope::{EnrichmentResponse, ItemRequest, StepResponse};
use scout_common::retry::with_timeout;
use scout_common::genai::{Attachment, GenerationRequest};
use scout_common::models::ArtifactKind;
use scout_common::{Error, Result};
use tokio::task::JoinError;
use tracing::{info, warn};

pub async fn enrich(ctx: &StepContext, request: &ItemRequest) -> Result<EnrichmentResponse> {
    validate_item(request)?;
    let document_locator = request
        .document_locator
        .clone()
        .ok_or_else(|| Error::InvalidInput("document_locator is required for enrichment".to_string()))?;

    let analysis = tokio::spawn(run_branch(
        ctx.clone(),
        request.clone(),
        Branch::DocumentAnalysis { document_locator },
    ));
    let headline = tokio::spawn(run_branch(ctx.clone(), request.clone(), Branch::HeadlineAssessment));

    let (analysis, headline) = tokio::join!(analysis, headline);

    let response = EnrichmentResponse {
        document_analysis: joined(analysis),
        headline_assessment: joined(headline),
    };

    info!(
        item = %request.natural_key,
        document_analysis = response.document_analysis.is_success(),
        headline_assessment = response.headline_assessment.is_success(),
        "Enrichment finished"
    );

    Ok(response)
}

enum Branch {
    DocumentAnalysis { document_locator: String },
    HeadlineAssessment,
}

impl Branch {
    fn kind(&self) -> ArtifactKind {
        match self {
            Branch::DocumentAnalysis { .. } => ArtifactKind::Analysis,
            Branch::HeadlineAssessment => ArtifactKind::Headline,
        }
    }
}

fn joined(result: std::result::Result<StepResponse, JoinError>) -> StepResponse {
    result.unwrap_or_else(|e| StepResponse::failed(format!("branch task aborted: {}", e)))
}

async fn run_branch(ctx: StepContext, request: ItemRequest, branch: Branch) -> StepResponse {
    let kind = branch.kind();
    let output = with_timeout(kind.as_str(), ctx.branch_timeout, branch_output(&ctx, &request, branch));
    match output.await {
        Ok(response) => response,
        Err(e) => {
            warn!(
                item = %request.natural_key,
                branch = %kind,
                error = %e,
                "Enrichment branch failed"
            );
            StepResponse::failed(e.to_string())
        }
    }
}

async fn branch_output(ctx: &StepContext, request: &ItemRequest, branch: Branch) -> Result<StepResponse> {
    let kind = branch.kind();
    let key = ctx.layout.key(kind, &request.subject_key, &request.natural_key);

    if ctx.artifacts.exists(&key).await? {
        filings::record_artifact(&ctx.db, &request.natural_key, kind, &key).await?;
        info!(item = %request.natural_key, branch = %kind, "Output already present, skipping");
        return Ok(StepResponse::skipped(key));
    }

    let generation = match branch {
        Branch::DocumentAnalysis { document_locator } => {
            let document = ctx.artifacts.get(&document_locator).await?;
            GenerationRequest {
                prompt: prompts::document_analysis_prompt(
                    &request.subject_key,
                    &request.classification,
                    request.effective_date,
                ),
                attachments: vec![Attachment::pdf(document)],
                search_grounding: false,
                json_output: false,
            }
        }
        Branch::HeadlineAssessment => {
            let end = request.filed_date;
            let start = end - Duration::days(ctx.enrichment.news_lookback_days);
            let company_name = filings::load_filing(&ctx.db, &request.natural_key)
                .await?
                .and_then(|f| f.company_name);
            GenerationRequest {
                prompt: prompts::headline_assessment_prompt(
                    &request.subject_key,
                    company_name.as_deref(),
                    start,
                    end,
                ),
                attachments: Vec::new(),
                search_grounding: ctx.enrichment.headline_search_grounding,
                json_output: false,
            }
        }
    };

    let text = ctx.generator.generate(generation).await?;
    let outcome = ctx.artifacts.put_if_absent(&key, text.into_bytes()).await?;
    filings::record_artifact(&ctx.db, &request.natural_key, kind, &key).await?;

    Ok(match outcome {
        PutOutcome::Written => {
            info!(item = %request.natural_key, branch = %kind, locator = %key, "Branch output stored");
            StepResponse::completed(key)
        }
        PutOutcome::AlreadyPresent => StepResponse::skipped(key),
    })
}
