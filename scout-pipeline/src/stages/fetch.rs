//! Per-item fetch step
//!
//! Exactly one document object per filing: the deterministic key is checked
//! first and a present object short-circuits the download.

use super::validate_item;
use crate::StepContext;
use scout_common::artifacts::PutOutcome;
use scout_common::db::filings;
use scout_common::envelope::{ItemRequest, StepResponse};
use scout_common::models::ArtifactKind;
use scout_common::{Error, Result};
use tracing::{info, warn};

/// Downloads shorter than this are treated as missing
pub const MIN_DOCUMENT_BYTES: usize = 100;

/// Fetch one filing's document into the artifact store
///
/// Returns `Err` only for malformed requests; download and store failures
/// come back as a failed [`StepResponse`].
pub async fn fetch(ctx: &StepContext, request: &ItemRequest) -> Result<StepResponse> {
    validate_item(request)?;

    match fetch_document(ctx, request).await {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!(
                item = %request.natural_key,
                ticker = %request.subject_key,
                error = %e,
                "Fetch failed"
            );
            Ok(StepResponse::failed(e.to_string()))
        }
    }
}

async fn fetch_document(ctx: &StepContext, request: &ItemRequest) -> Result<StepResponse> {
    let key = ctx
        .layout
        .key(ArtifactKind::Document, &request.subject_key, &request.natural_key);

    if ctx.artifacts.exists(&key).await? {
        // Re-record in case an earlier attempt stored the object but not the locator
        filings::record_artifact(&ctx.db, &request.natural_key, ArtifactKind::Document, &key).await?;
        info!(item = %request.natural_key, locator = %key, "Document already present, skipping download");
        return Ok(StepResponse::skipped(key));
    }

    let bytes = ctx.documents.download(&request.source_locator).await?;
    if bytes.len() < MIN_DOCUMENT_BYTES {
        return Err(Error::InvalidInput(format!(
            "document download too small ({} bytes) for {}",
            bytes.len(),
            request.source_locator
        )));
    }

    let size = bytes.len();
    let outcome = ctx.artifacts.put_if_absent(&key, bytes).await?;
    filings::record_artifact(&ctx.db, &request.natural_key, ArtifactKind::Document, &key).await?;

    match outcome {
        PutOutcome::Written => {
            info!(item = %request.natural_key, locator = %key, bytes = size, "Document stored");
            Ok(StepResponse::completed(key))
        }
        PutOutcome::AlreadyPresent => {
            info!(item = %request.natural_key, locator = %key, "Document stored concurrently, keeping first copy");
            Ok(StepResponse::skipped(key))
        }
    }
}
