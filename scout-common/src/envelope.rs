//! Step envelope types
//!
//! Everything that crosses a step boundary is one of these messages. Steps
//! share no memory: each call carries the full item context it needs, and
//! results (including failures) come back as data.

use crate::models::FilingRecord;
use crate::Result;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Discovery call parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub lookback_hours: u32,
    pub form_types: Vec<String>,
    /// Empty = no subject filter
    #[serde(default)]
    pub tickers: Vec<String>,
    /// 0 = unlimited
    #[serde(default)]
    pub max_items: usize,
    /// Registered filings with incomplete outputs to hand back (0 = none)
    #[serde(default)]
    pub pending_limit: usize,
}

/// New items in source order, plus how many descriptors were examined
///
/// `pending_items` are filings registered by an earlier run whose fetch or
/// enrichment outputs are still missing, newest filed first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub new_items: Vec<FilingRecord>,
    #[serde(default)]
    pub pending_items: Vec<FilingRecord>,
    pub processed_count: usize,
}

/// Per-item step input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub natural_key: String,
    pub subject_key: String,
    pub source_locator: String,
    pub classification: String,
    pub effective_date: NaiveDate,
    pub filed_date: NaiveDate,
    /// Present for enrichment (output of fetch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_locator: Option<String>,
}

impl ItemRequest {
    pub fn with_document(mut self, locator: impl Into<String>) -> Self {
        self.document_locator = Some(locator.into());
        self
    }
}

impl From<&FilingRecord> for ItemRequest {
    fn from(record: &FilingRecord) -> Self {
        Self {
            natural_key: record.accession_number.clone(),
            subject_key: record.ticker.clone(),
            source_locator: record.filing_url.clone(),
            classification: record.form_type.clone(),
            effective_date: record.report_end_date,
            filed_date: record.filed_date,
            document_locator: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Per-item step output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Output already existed; no work was done
    #[serde(default)]
    pub skipped: bool,
}

impl StepResponse {
    pub fn completed(locator: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Succeeded,
            output_locator: Some(locator.into()),
            error_message: None,
            skipped: false,
        }
    }

    pub fn skipped(locator: impl Into<String>) -> Self {
        Self {
            skipped: true,
            ..Self::completed(locator)
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Failed,
            output_locator: None,
            error_message: Some(message.into()),
            skipped: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    /// Error text for a failed response
    pub fn failure_reason(&self) -> &str {
        self.error_message.as_deref().unwrap_or("unspecified failure")
    }
}

/// One response per enrichment branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResponse {
    pub document_analysis: StepResponse,
    pub headline_assessment: StepResponse,
}

impl EnrichmentResponse {
    pub fn fully_completed(&self) -> bool {
        self.document_analysis.is_success() && self.headline_assessment.is_success()
    }

    /// Exactly one branch failed
    pub fn partially_completed(&self) -> bool {
        self.document_analysis.is_success() != self.headline_assessment.is_success()
    }

    /// (stage, response) pairs in a fixed order
    pub fn branches(&self) -> [(Stage, &StepResponse); 2] {
        [
            (Stage::DocumentAnalysis, &self.document_analysis),
            (Stage::HeadlineAssessment, &self.headline_assessment),
        ]
    }
}

/// Pipeline stage an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovery,
    Fetch,
    /// The enrichment step as a whole (no per-branch result came back)
    Enrichment,
    DocumentAnalysis,
    HeadlineAssessment,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Discovery => "discovery",
            Stage::Fetch => "fetch",
            Stage::Enrichment => "enrichment",
            Stage::DocumentAnalysis => "document_analysis",
            Stage::HeadlineAssessment => "headline_assessment",
        };
        f.write_str(name)
    }
}

/// Structured error entry accumulated by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Natural key of the failed item; `None` for run-level failures
    pub item_key: Option<String>,
    pub stage: Stage,
    pub message: String,
}

/// Serialize and deserialize a message, as a step boundary would
pub fn through_wire<T>(value: &T) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let bytes = serde_json::to_vec(value)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_response_wire_format() {
        let response = StepResponse::skipped("sec-pdf/AAPL_A1.pdf");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "succeeded",
                "output_locator": "sec-pdf/AAPL_A1.pdf",
                "skipped": true
            })
        );

        let failed: StepResponse =
            serde_json::from_value(json!({"status": "failed", "error_message": "HTTP 404"})).unwrap();
        assert!(!failed.is_success());
        assert!(!failed.skipped);
        assert_eq!(failed.failure_reason(), "HTTP 404");
    }

    #[test]
    fn test_enrichment_partial_completion() {
        let partial = EnrichmentResponse {
            document_analysis: StepResponse::completed("sec-analysis/A.txt"),
            headline_assessment: StepResponse::failed("model unavailable"),
        };
        assert!(partial.partially_completed());
        assert!(!partial.fully_completed());

        let full = EnrichmentResponse {
            document_analysis: StepResponse::skipped("sec-analysis/A.txt"),
            headline_assessment: StepResponse::completed("headline-analysis/A.txt"),
        };
        assert!(full.fully_completed());
        assert!(!full.partially_completed());
    }

    #[test]
    fn test_item_request_omits_missing_document() {
        let request = ItemRequest {
            natural_key: "A1".into(),
            subject_key: "AAPL".into(),
            source_locator: "https://www.sec.gov/a".into(),
            classification: "10-K".into(),
            effective_date: NaiveDate::from_ymd_opt(2024, 9, 28).unwrap(),
            filed_date: NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
            document_locator: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("document_locator").is_none());
        assert_eq!(value["effective_date"], "2024-09-28");

        let enriched = through_wire(&request.with_document("sec-pdf/AAPL_A1.pdf")).unwrap();
        assert_eq!(enriched.document_locator.as_deref(), Some("sec-pdf/AAPL_A1.pdf"));
    }
}
