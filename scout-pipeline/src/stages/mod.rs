//! Pipeline steps
//!
//! Each step is a stateless function of a [`StepContext`](crate::StepContext)
//! and one request envelope. Idempotency comes from checking deterministic
//! output keys before doing any work.

pub mod discovery;
pub mod enrichment;
pub mod fetch;

pub use discovery::discover;
pub use enrichment::enrich;
pub use fetch::fetch;

use scout_common::envelope::ItemRequest;
use scout_common::{Error, Result};

/// Reject per-item requests that cannot address an artifact
pub(crate) fn validate_item(request: &ItemRequest) -> Result<()> {
    if request.natural_key.trim().is_empty() {
        return Err(Error::InvalidInput("natural_key is empty".to_string()));
    }
    if request.subject_key.trim().is_empty() {
        return Err(Error::InvalidInput("subject_key is empty".to_string()));
    }
    Ok(())
}
