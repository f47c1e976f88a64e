//! Discovery step
//!
//! Queries the filing source, drops descriptors already in the registry,
//! persists the rest as metadata-only rows in one transaction and returns
//! them in source order. Registered filings that still lack a document or
//! an enrichment output come back alongside as pending items, so the next
//! run picks up what an earlier one left unfinished. Source and registry
//! errors are returned as `Err` and end the run.

use crate::clients::{FilingQuery, RawFiling};
use crate::StepContext;
use chrono::{DateTime, NaiveDate, Utc};
use scout_common::db::filings;
use scout_common::envelope::{DiscoveryRequest, DiscoveryResponse};
use scout_common::models::{
    normalize_ticker, ArtifactKind, CompanyProfile, FilingDescriptor, FilingRecord,
};
use scout_common::Result;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

pub async fn discover(ctx: &StepContext, request: &DiscoveryRequest) -> Result<DiscoveryResponse> {
    let query = FilingQuery {
        lookback_hours: request.lookback_hours,
        form_types: request.form_types.clone(),
        tickers: request.tickers.clone(),
    };

    let raw = ctx.filings.recent_filings(&query).await?;
    let processed_count = raw.len();

    let descriptors = unique_descriptors(&raw);
    let keys: Vec<String> = descriptors.iter().map(|d| d.natural_key()).collect();
    let existing = filings::existing_accessions(&ctx.db, &keys).await?;

    let mut fresh: Vec<FilingDescriptor> = descriptors
        .into_iter()
        .filter(|d| !existing.contains(&d.natural_key()))
        .collect();

    if request.max_items > 0 && fresh.len() > request.max_items {
        info!(
            available = fresh.len(),
            max_items = request.max_items,
            "Capping new items for this run"
        );
        fresh.truncate(request.max_items);
    }

    let new_items = if fresh.is_empty() {
        Vec::new()
    } else {
        register(ctx, &fresh).await?
    };
    let pending_items = incomplete_filings(ctx, request, &new_items).await?;

    if new_items.is_empty() && pending_items.is_empty() {
        info!(processed = processed_count, "No new filings");
    } else {
        info!(
            processed = processed_count,
            new = new_items.len(),
            pending = pending_items.len(),
            "Discovery complete"
        );
    }

    Ok(DiscoveryResponse {
        new_items,
        pending_items,
        processed_count,
    })
}

/// Outputs a filing must have before the pipeline is done with it
const PIPELINE_OUTPUTS: [ArtifactKind; 3] = [
    ArtifactKind::Document,
    ArtifactKind::Analysis,
    ArtifactKind::Headline,
];

/// Persist fresh descriptors as metadata-only rows in one transaction
async fn register(ctx: &StepContext, fresh: &[FilingDescriptor]) -> Result<Vec<FilingRecord>> {
    let profiles = company_profiles(ctx, fresh).await?;
    let discovered_at = Utc::now();
    let records: Vec<FilingRecord> = fresh
        .iter()
        .map(|d| {
            let profile = profiles.get(&normalize_ticker(&d.ticker));
            FilingRecord::from_descriptor(d, profile, discovered_at)
        })
        .collect();

    let inserted = filings::insert_filings(&ctx.db, &records).await?;
    if inserted < records.len() as u64 {
        warn!(
            expected = records.len(),
            inserted,
            "Some filings were registered concurrently by another run"
        );
    }

    Ok(records)
}

/// Registered filings from earlier runs still missing a pipeline output
///
/// Covers items whose fetch or enrichment failed, and items committed by a
/// discovery call whose response never reached the orchestrator.
async fn incomplete_filings(
    ctx: &StepContext,
    request: &DiscoveryRequest,
    new_items: &[FilingRecord],
) -> Result<Vec<FilingRecord>> {
    if request.pending_limit == 0 {
        return Ok(Vec::new());
    }

    let scan_limit = request.pending_limit + new_items.len();
    let candidates = filings::filings_missing_artifacts(
        &ctx.db,
        &PIPELINE_OUTPUTS,
        &request.form_types,
        Some(scan_limit),
    )
    .await?;

    let fresh: HashSet<&str> = new_items.iter().map(|r| r.accession_number.as_str()).collect();
    let tickers: HashSet<String> = request.tickers.iter().map(|t| normalize_ticker(t)).collect();

    let pending: Vec<FilingRecord> = candidates
        .into_iter()
        .filter(|r| !fresh.contains(r.accession_number.as_str()))
        .filter(|r| tickers.is_empty() || tickers.contains(&r.ticker))
        .take(request.pending_limit)
        .collect();

    if !pending.is_empty() {
        debug!(count = pending.len(), "Revisiting filings with missing outputs");
    }
    Ok(pending)
}

/// Valid descriptors in source order, first occurrence of each natural key
fn unique_descriptors(raw: &[RawFiling]) -> Vec<FilingDescriptor> {
    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(raw.len());

    for filing in raw {
        match to_descriptor(filing) {
            Ok(descriptor) => {
                if seen.insert(descriptor.natural_key()) {
                    descriptors.push(descriptor);
                } else {
                    debug!(accession = %descriptor.accession_number, "Duplicate in source batch");
                }
            }
            Err(reason) => {
                warn!(
                    accession = filing.accession_no.as_deref().unwrap_or("N/A"),
                    reason = %reason,
                    "Skipping filing with missing core data"
                );
            }
        }
    }

    descriptors
}

fn required<'a>(value: &'a Option<String>, field: &str) -> std::result::Result<&'a str, String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing {}", field))
}

/// Validate a raw source filing
pub fn to_descriptor(raw: &RawFiling) -> std::result::Result<FilingDescriptor, String> {
    let accession_number = required(&raw.accession_no, "accessionNo")?;
    let ticker = required(&raw.ticker, "ticker")?;
    let form_type = required(&raw.form_type, "formType")?;
    let filing_url = required(&raw.link_to_filing_details, "linkToFilingDetails")?;

    let filed_at = required(&raw.filed_at, "filedAt")?;
    let filed_at = DateTime::parse_from_rfc3339(filed_at)
        .map_err(|e| format!("invalid filedAt {:?}: {}", filed_at, e))?;

    let period = required(&raw.period_of_report, "periodOfReport")?;
    let period_of_report = period
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| format!("invalid periodOfReport {:?}", period))?;

    Ok(FilingDescriptor {
        accession_number: accession_number.to_string(),
        ticker: ticker.to_string(),
        company_name: raw
            .company_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from),
        form_type: form_type.to_string(),
        filed_at,
        period_of_report,
        filing_url: filing_url.to_string(),
    })
}

/// One profile per distinct ticker: registry first, then the source
///
/// Source lookup failures only warn; the filing is stored without profile.
async fn company_profiles(
    ctx: &StepContext,
    descriptors: &[FilingDescriptor],
) -> Result<HashMap<String, CompanyProfile>> {
    let mut profiles = HashMap::new();

    for descriptor in descriptors {
        let ticker = normalize_ticker(&descriptor.ticker);
        if profiles.contains_key(&ticker) {
            continue;
        }

        if let Some(profile) = filings::stored_company_profile(&ctx.db, &ticker).await? {
            profiles.insert(ticker, profile);
            continue;
        }

        if !ctx.enrich_company_profile {
            continue;
        }

        match ctx.filings.company_profile(&ticker).await {
            Ok(Some(profile)) => {
                debug!(ticker = %ticker, ?profile, "Fetched company profile");
                profiles.insert(ticker, profile);
            }
            Ok(None) => warn!(ticker = %ticker, "No company profile available"),
            Err(e) => warn!(ticker = %ticker, error = %e, "Company profile lookup failed"),
        }
    }

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(accession: &str) -> RawFiling {
        RawFiling {
            accession_no: Some(accession.to_string()),
            ticker: Some("aapl".to_string()),
            company_name: Some("Apple Inc.".to_string()),
            form_type: Some("10-Q".to_string()),
            filed_at: Some("2024-08-02T16:31:07-04:00".to_string()),
            period_of_report: Some("2024-06-29".to_string()),
            link_to_filing_details: Some("https://www.sec.gov/a.htm".to_string()),
        }
    }

    #[test]
    fn test_to_descriptor_valid() {
        let descriptor = to_descriptor(&raw("0000320193-24-000081")).unwrap();
        assert_eq!(descriptor.natural_key(), "000032019324000081");
        assert_eq!(descriptor.period_of_report, NaiveDate::from_ymd_opt(2024, 6, 29).unwrap());
        assert_eq!(descriptor.filed_at.date_naive(), NaiveDate::from_ymd_opt(2024, 8, 2).unwrap());
    }

    #[test]
    fn test_to_descriptor_missing_fields() {
        let mut filing = raw("A-1");
        filing.ticker = Some("  ".to_string());
        assert_eq!(to_descriptor(&filing).unwrap_err(), "missing ticker");

        let mut filing = raw("A-1");
        filing.period_of_report = None;
        assert!(to_descriptor(&filing).is_err());

        let mut filing = raw("A-1");
        filing.filed_at = Some("yesterday".to_string());
        assert!(to_descriptor(&filing).unwrap_err().contains("invalid filedAt"));
    }

    #[test]
    fn test_unique_descriptors_keeps_first() {
        let mut second = raw("0000320193-24-000081");
        second.form_type = Some("10-K".to_string());
        let mut invalid = raw("X");
        invalid.link_to_filing_details = None;

        let descriptors = unique_descriptors(&[
            raw("0000320193-24-000081"),
            invalid,
            second,
            raw("0000320193-24-000099"),
        ]);
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].form_type, "10-Q");
        assert_eq!(descriptors[1].natural_key(), "000032019324000099");
    }
}
