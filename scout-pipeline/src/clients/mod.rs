//! External source clients
//!
//! The stages only see the traits; the HTTP implementations live in the
//! submodules and the tests substitute in-memory fakes.

pub mod filing_reader;
pub mod sec_query;

pub use filing_reader::FilingReaderClient;
pub use sec_query::SecQueryClient;

use async_trait::async_trait;
use scout_common::models::CompanyProfile;
use scout_common::Result;
use serde::{Deserialize, Serialize};

/// Discovery query parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FilingQuery {
    pub lookback_hours: u32,
    pub form_types: Vec<String>,
    /// Empty = all subjects
    pub tickers: Vec<String>,
}

/// Filing as returned by the source; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFiling {
    pub accession_no: Option<String>,
    pub ticker: Option<String>,
    pub company_name: Option<String>,
    pub form_type: Option<String>,
    pub filed_at: Option<String>,
    pub period_of_report: Option<String>,
    pub link_to_filing_details: Option<String>,
}

/// Read-only source of recent filings
#[async_trait]
pub trait FilingSource: Send + Sync {
    /// Filings in the lookback window, newest first
    async fn recent_filings(&self, query: &FilingQuery) -> Result<Vec<RawFiling>>;

    /// CIK/SIC/exchange for one ticker; `Ok(None)` when the source has nothing
    async fn company_profile(&self, ticker: &str) -> Result<Option<CompanyProfile>>;
}

/// Source of primary filing documents
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Download the rendered document for a filing URL
    async fn download(&self, filing_url: &str) -> Result<Vec<u8>>;
}
