//! Filing query API client
//!
//! Full-text query endpoint for recent filings plus the ticker mapping
//! endpoint for company identifiers. Ticker filters are split into chunks
//! of [`TICKER_CHUNK`] and each query is paged until a short page comes
//! back. Requests are rate limited and transient failures are retried with
//! backoff.

use super::{FilingQuery, FilingSource, RawFiling};
use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use governor::{Quota, RateLimiter};
use scout_common::config::TimeoutConfig;
use scout_common::models::CompanyProfile;
use scout_common::retry::{retry_with_backoff, RetryPolicy};
use scout_common::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;

const QUERY_BASE_URL: &str = "https://api.sec-api.io";
const USER_AGENT: &str = concat!("scout/", env!("CARGO_PKG_VERSION"));
/// Page size of one query call
const PAGE_SIZE: usize = 200;
/// Highest `from` offset the query endpoint serves
const MAX_OFFSET: usize = 10_000;
/// Tickers OR-ed into one query string
pub const TICKER_CHUNK: usize = 50;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    filings: Vec<RawFiling>,
}

#[derive(Debug, Deserialize)]
struct MappingEntry {
    cik: Option<Value>,
    sic: Option<Value>,
    exchange: Option<String>,
}

pub struct SecQueryClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl SecQueryClient {
    pub fn new(api_key: String, requests_per_second: u32, timeouts: &TimeoutConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeouts.http_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: QUERY_BASE_URL.to_string(),
            api_key,
            retry: RetryPolicy::from_config(timeouts),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    async fn post_query(&self, body: &Value) -> Result<Vec<RawFiling>> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(&self.base_url)
            .query(&[("token", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: format!("filing query failed: {}", error_text.chars().take(300).collect::<String>()),
            });
        }

        let parsed: QueryResponse = response.json().await?;
        Ok(parsed.filings)
    }

    async fn get_mapping(&self, ticker: &str) -> Result<Vec<MappingEntry>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/mapping/ticker/{}", self.base_url, ticker);
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: format!("ticker mapping failed for {}", ticker),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl FilingSource for SecQueryClient {
    async fn recent_filings(&self, query: &FilingQuery) -> Result<Vec<RawFiling>> {
        let mut filings = Vec::new();

        for query_string in query_strings(query, Utc::now()) {
            tracing::info!(query = %query_string, "Querying filing source");
            let pages = collect_pages(|offset| {
                let body = json!({
                    "query": { "query_string": { "query": query_string } },
                    "from": offset.to_string(),
                    "size": PAGE_SIZE.to_string(),
                    "sort": [{ "filedAt": { "order": "desc" } }],
                });
                async move {
                    retry_with_backoff("filing query", self.retry, || self.post_query(&body)).await
                }
            })
            .await?;
            filings.extend(pages);
        }

        tracing::info!(
            count = filings.len(),
            lookback_hours = query.lookback_hours,
            "Filing source returned filings"
        );
        Ok(filings)
    }

    async fn company_profile(&self, ticker: &str) -> Result<Option<CompanyProfile>> {
        let entries =
            retry_with_backoff("ticker mapping", self.retry, || self.get_mapping(ticker)).await?;

        Ok(entries.into_iter().next().map(|entry| CompanyProfile {
            cik: entry.cik.as_ref().and_then(value_to_string),
            sic: entry.sic.as_ref().and_then(value_to_string),
            exchange: entry.exchange.filter(|e| !e.trim().is_empty()),
        }))
    }
}

/// One query string per ticker chunk (a single one without a ticker filter)
pub fn query_strings(query: &FilingQuery, now: chrono::DateTime<Utc>) -> Vec<String> {
    if query.tickers.is_empty() {
        return vec![build_query_string(query, now)];
    }

    query
        .tickers
        .chunks(TICKER_CHUNK)
        .map(|chunk| {
            let chunked = FilingQuery {
                tickers: chunk.to_vec(),
                ..query.clone()
            };
            build_query_string(&chunked, now)
        })
        .collect()
}

/// Fetch pages at increasing offsets until one comes back short
async fn collect_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<RawFiling>>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<RawFiling>>>,
{
    let mut filings = Vec::new();
    let mut offset = 0;

    loop {
        let page = fetch_page(offset).await?;
        let full = page.len() >= PAGE_SIZE;
        filings.extend(page);
        if !full {
            break;
        }

        offset += PAGE_SIZE;
        if offset >= MAX_OFFSET {
            tracing::warn!(
                fetched = filings.len(),
                "Filing query hit the source's paging limit; narrow the lookback window"
            );
            break;
        }
    }

    Ok(filings)
}

/// Lucene query string for the lookback window ending at `now`
///
/// Amendments are excluded; the optional ticker list is OR-ed together.
pub fn build_query_string(query: &FilingQuery, now: chrono::DateTime<Utc>) -> String {
    let start = now - Duration::hours(i64::from(query.lookback_hours));
    let forms = query
        .form_types
        .iter()
        .map(|f| format!("\"{}\"", f))
        .collect::<Vec<_>>()
        .join(" OR ");

    let mut parts = vec![
        format!("formType:({})", forms),
        format!(
            "filedAt:[{} TO {}]",
            start.to_rfc3339_opts(SecondsFormat::Secs, true).trim_end_matches('Z'),
            now.to_rfc3339_opts(SecondsFormat::Secs, true).trim_end_matches('Z')
        ),
        "NOT formType:(\"10-K/A\" OR \"10-Q/A\")".to_string(),
    ];

    if !query.tickers.is_empty() {
        let tickers = query
            .tickers
            .iter()
            .map(|t| format!("ticker:\"{}\"", t.trim().to_uppercase()))
            .collect::<Vec<_>>()
            .join(" OR ");
        parts.push(format!("({})", tickers));
    }

    parts.join(" AND ")
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_string_without_tickers() {
        let now = Utc.with_ymd_and_hms(2024, 8, 2, 12, 0, 0).unwrap();
        let query = FilingQuery {
            lookback_hours: 24,
            form_types: vec!["10-K".into(), "10-Q".into()],
            tickers: vec![],
        };
        assert_eq!(
            build_query_string(&query, now),
            "formType:(\"10-K\" OR \"10-Q\") AND filedAt:[2024-08-01T12:00:00 TO 2024-08-02T12:00:00] \
             AND NOT formType:(\"10-K/A\" OR \"10-Q/A\")"
        );
    }

    #[test]
    fn test_query_string_with_tickers() {
        let now = Utc.with_ymd_and_hms(2024, 8, 2, 12, 0, 0).unwrap();
        let query = FilingQuery {
            lookback_hours: 1,
            form_types: vec!["10-K".into()],
            tickers: vec!["aapl".into(), " msft ".into()],
        };
        let q = build_query_string(&query, now);
        assert!(q.ends_with("AND (ticker:\"AAPL\" OR ticker:\"MSFT\")"));
        assert!(q.contains("filedAt:[2024-08-02T11:00:00 TO 2024-08-02T12:00:00]"));
    }

    #[test]
    fn test_tickers_are_split_into_chunks() {
        let now = Utc.with_ymd_and_hms(2024, 8, 2, 12, 0, 0).unwrap();
        let query = FilingQuery {
            lookback_hours: 24,
            form_types: vec!["10-Q".into()],
            tickers: (0..120).map(|i| format!("T{:03}", i)).collect(),
        };

        let queries = query_strings(&query, now);
        assert_eq!(queries.len(), 3);
        assert!(queries[0].contains("ticker:\"T000\""));
        assert!(queries[0].contains("ticker:\"T049\""));
        assert!(!queries[0].contains("ticker:\"T050\""));
        assert!(queries[2].contains("ticker:\"T119\""));
        assert_eq!(queries[2].matches("ticker:").count(), 20);

        let unfiltered = FilingQuery { tickers: vec![], ..query };
        assert_eq!(query_strings(&unfiltered, now).len(), 1);
    }

    fn page(len: usize) -> Vec<RawFiling> {
        (0..len)
            .map(|i| RawFiling {
                accession_no: Some(format!("A-{}", i)),
                ticker: None,
                company_name: None,
                form_type: None,
                filed_at: None,
                period_of_report: None,
                link_to_filing_details: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_pages_until_short_page() {
        let mut offsets = Vec::new();
        let filings = collect_pages(|offset| {
            offsets.push(offset);
            let len = if offset < 2 * PAGE_SIZE { PAGE_SIZE } else { 17 };
            async move { Ok(page(len)) }
        })
        .await
        .unwrap();

        assert_eq!(offsets, vec![0, PAGE_SIZE, 2 * PAGE_SIZE]);
        assert_eq!(filings.len(), 2 * PAGE_SIZE + 17);
    }

    #[tokio::test]
    async fn test_paging_stops_at_offset_limit() {
        let mut calls = 0;
        let filings = collect_pages(|_| {
            calls += 1;
            async { Ok(page(PAGE_SIZE)) }
        })
        .await
        .unwrap();

        assert_eq!(calls, MAX_OFFSET / PAGE_SIZE);
        assert_eq!(filings.len(), MAX_OFFSET);
    }

    #[tokio::test]
    async fn test_page_error_is_returned() {
        let result = collect_pages(|offset| async move {
            if offset == 0 {
                Ok(page(PAGE_SIZE))
            } else {
                Err(Error::Http { status: Some(503), message: "busy".into() })
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Http { status: Some(503), .. })));
    }

    #[test]
    fn test_raw_filing_deserializes_source_fields() {
        let response: QueryResponse = serde_json::from_value(json!({
            "total": { "value": 1 },
            "filings": [{
                "accessionNo": "0000320193-24-000081",
                "ticker": "AAPL",
                "companyName": "Apple Inc.",
                "formType": "10-Q",
                "filedAt": "2024-08-02T16:31:07-04:00",
                "periodOfReport": "2024-06-29",
                "linkToFilingDetails": "https://www.sec.gov/Archives/edgar/data/320193/a.htm",
                "cik": "320193"
            }]
        }))
        .unwrap();
        let filing = &response.filings[0];
        assert_eq!(filing.accession_no.as_deref(), Some("0000320193-24-000081"));
        assert_eq!(filing.period_of_report.as_deref(), Some("2024-06-29"));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!(320193)).as_deref(), Some("320193"));
        assert_eq!(value_to_string(&json!(" 3571 ")).as_deref(), Some("3571"));
        assert_eq!(value_to_string(&json!("")), None);
        assert_eq!(value_to_string(&Value::Null), None);
    }
}
