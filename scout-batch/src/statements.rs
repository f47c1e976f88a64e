//! Statement extraction job
//!
//! Pending filings are 10-K/10-Q filings missing any of the balance sheet,
//! income statement or cash flow artifacts. For each one the worker fetches
//! the filing's XBRL data once, reduces every concept of the three statement
//! sections to one value for the report period and stores one JSON document
//! per statement. These documents are what the ratio job reads.

use crate::pool::{ReconcileJob, TaskOutcome};
use crate::ratios::formula::{
    CAPITAL_EXPENDITURE, COST_OF_REVENUE, CURRENT_ASSETS, CURRENT_LIABILITIES, LONG_TERM_DEBT, REVENUE,
    SHARES_OUTSTANDING, SHORT_TERM_DEBT, TOTAL_EQUITY, TOTAL_LIABILITIES,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use governor::{Quota, RateLimiter};
use scout_common::artifacts::{ArtifactStore, PutOutcome};
use scout_common::config::{ArtifactLayout, TimeoutConfig};
use scout_common::db::filings;
use scout_common::models::{ArtifactKind, FilingRecord};
use scout_common::retry::{retry_with_backoff, RetryPolicy};
use scout_common::{Error, Result};
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Artifacts the ratio job reads, in storage order
pub const STATEMENT_KINDS: [ArtifactKind; 3] = [
    ArtifactKind::BalanceSheet,
    ArtifactKind::IncomeStatement,
    ArtifactKind::CashFlow,
];

/// XBRL section holding each statement
const SECTIONS: [(ArtifactKind, &str); 3] = [
    (ArtifactKind::BalanceSheet, "BalanceSheets"),
    (ArtifactKind::IncomeStatement, "StatementsOfIncome"),
    (ArtifactKind::CashFlow, "StatementsOfCashFlows"),
];

/// Line-item names the ratio formulas read, with the concepts that can stand
/// in for them. The first concept present wins; a reported canonical name is
/// never replaced.
const ALIASES: [(&str, &[&str]); 9] = [
    (TOTAL_LIABILITIES, &["liabilities"]),
    (
        TOTAL_EQUITY,
        &[
            "stockholdersequity",
            "stockholdersequityincludingportionattributabletononcontrollinginterest",
        ],
    ),
    (CURRENT_ASSETS, &["assetscurrent"]),
    (CURRENT_LIABILITIES, &["liabilitiescurrent"]),
    (SHORT_TERM_DEBT, &["debtcurrent", "shorttermborrowings", "longtermdebtcurrent"]),
    (LONG_TERM_DEBT, &["longtermdebtnoncurrent", "longtermdebt"]),
    (REVENUE, &["revenues", "salesrevenuenet"]),
    (COST_OF_REVENUE, &["costofgoodsandservicessold"]),
    (
        CAPITAL_EXPENDITURE,
        &[
            "paymentstoacquirepropertyplantandequipment",
            "paymentstoacquireproductiveassets",
        ],
    ),
];

/// Source of XBRL financial data converted to JSON
#[async_trait]
pub trait StatementSource: Send + Sync {
    /// XBRL data of the filing whose primary document is at `filing_url`
    async fn xbrl_json(&self, filing_url: &str) -> Result<Value>;
}

/// One reported value and its context
#[derive(Debug, Clone, Copy)]
struct Fact {
    value: f64,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    segmented: bool,
}

/// Line-item name for an XBRL concept: namespace dropped, lower-case,
/// alphanumerics only
pub fn line_item_name(concept: &str) -> String {
    let local = concept.rsplit(':').next().unwrap_or(concept);
    local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn date(value: Option<&Value>) -> Option<NaiveDate> {
    value
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

fn parse_fact(fact: &Value) -> Option<Fact> {
    let value = number(fact.get("value")?)?;
    let period = fact.get("period");
    let end = date(
        period
            .and_then(|p| p.get("instant"))
            .or_else(|| period.and_then(|p| p.get("endDate"))),
    );
    let start = date(period.and_then(|p| p.get("startDate")));
    let segmented = fact.get("segment").is_some_and(|s| !s.is_null());
    Some(Fact {
        value,
        start,
        end,
        segmented,
    })
}

fn facts(entry: &Value) -> Vec<Fact> {
    match entry {
        Value::Array(items) => items.iter().filter_map(parse_fact).collect(),
        Value::Object(_) => parse_fact(entry).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Latest fact, non-segmented ones first. Among facts ending on the same day
/// the shortest duration wins (a quarter over the year to date).
fn latest<'a>(candidates: impl Iterator<Item = &'a Fact> + Clone) -> Option<&'a Fact> {
    candidates
        .clone()
        .filter(|f| !f.segmented)
        .max_by_key(|f| (f.end, f.start))
        .or_else(|| candidates.max_by_key(|f| (f.end, f.start)))
}

/// Value of one concept for the report period, or its latest value when
/// nothing was reported for that period
fn select_fact(facts: &[Fact], period_end: Option<NaiveDate>) -> Option<f64> {
    let at_period = facts
        .iter()
        .filter(move |f| period_end.is_some() && f.end == period_end);
    latest(at_period).or_else(|| latest(facts.iter())).map(|f| f.value)
}

/// Reduce one statement section to `line item -> value`, canonical aliases
/// included
pub fn extract_line_items(section: &Value, period_end: Option<NaiveDate>) -> BTreeMap<String, f64> {
    let mut items = BTreeMap::new();
    let Some(concepts) = section.as_object() else {
        return items;
    };

    for (concept, entry) in concepts {
        let name = line_item_name(concept);
        if name.is_empty() {
            continue;
        }
        if let Some(value) = select_fact(&facts(entry), period_end) {
            items.entry(name).or_insert(value);
        }
    }

    for (canonical, sources) in ALIASES {
        if items.contains_key(canonical) {
            continue;
        }
        if let Some(value) = sources.iter().find_map(|source| items.get(*source).copied()) {
            items.insert(canonical.to_string(), value);
        }
    }
    items
}

/// Shares outstanding from the cover page, the entity information section or
/// a top-level concept, in that order. Per-class counts at the latest date
/// are summed.
pub fn shares_outstanding(xbrl: &Value) -> Option<f64> {
    [
        &xbrl["CoverPage"]["EntityCommonStockSharesOutstanding"],
        &xbrl["DocumentAndEntityInformation"]["EntityCommonStockSharesOutstanding"],
        &xbrl["CommonStockSharesOutstanding"],
    ]
    .into_iter()
    .find_map(share_count)
}

fn share_count(entry: &Value) -> Option<f64> {
    if let Some(count) = number(entry) {
        return Some(count);
    }
    let facts = facts(entry);
    let as_of = facts.iter().map(|f| f.end).max()?;
    let current: Vec<&Fact> = facts.iter().filter(|f| f.end == as_of).collect();
    if let Some(total) = current.iter().find(|f| !f.segmented) {
        return Some(total.value);
    }
    Some(current.iter().map(|f| f.value).sum())
}

fn document_period_end(xbrl: &Value) -> Option<NaiveDate> {
    date(xbrl.get("CoverPage").and_then(|c| c.get("DocumentPeriodEndDate")))
}

/// Statement documents for one filing, one per [`STATEMENT_KINDS`] entry
///
/// A missing section yields a document with identifiers only. XBRL data
/// without any statement section is `Error::NotFound`.
pub fn extract_statements(xbrl: &Value, filing: &FilingRecord) -> Result<Vec<(ArtifactKind, Value)>> {
    if !SECTIONS
        .iter()
        .any(|(_, section)| xbrl.get(*section).is_some_and(Value::is_object))
    {
        return Err(Error::NotFound(format!(
            "no financial statements in XBRL data for {}",
            filing.accession_number
        )));
    }

    let period_end = document_period_end(xbrl).unwrap_or(filing.report_end_date);
    let mut documents = Vec::with_capacity(SECTIONS.len());

    for (kind, section) in SECTIONS {
        let mut items = extract_line_items(&xbrl[section], Some(period_end));
        if kind == ArtifactKind::BalanceSheet {
            if let Some(shares) = shares_outstanding(xbrl) {
                items.entry(SHARES_OUTSTANDING.to_string()).or_insert(shares);
            }
        }
        if items.is_empty() {
            warn!(item = %filing.accession_number, statement = %kind, "No line items in statement");
        }

        let mut document = Map::new();
        document.insert("ticker".to_string(), json!(filing.ticker));
        document.insert("accession_number".to_string(), json!(filing.accession_number));
        document.insert("period_end_date".to_string(), json!(period_end));
        document.insert("filing_date".to_string(), json!(filing.filed_date));
        for (name, value) in items {
            document.entry(name).or_insert(json!(value));
        }
        documents.push((kind, Value::Object(document)));
    }

    Ok(documents)
}

pub struct StatementJob {
    db: SqlitePool,
    artifacts: Arc<dyn ArtifactStore>,
    layout: ArtifactLayout,
    source: Arc<dyn StatementSource>,
    form_types: Vec<String>,
}

impl StatementJob {
    pub fn new(
        db: SqlitePool,
        artifacts: Arc<dyn ArtifactStore>,
        layout: ArtifactLayout,
        source: Arc<dyn StatementSource>,
        form_types: Vec<String>,
    ) -> Self {
        Self {
            db,
            artifacts,
            layout,
            source,
            form_types,
        }
    }

    async fn record_all(&self, filing: &FilingRecord) -> Result<()> {
        for kind in STATEMENT_KINDS {
            let key = self.layout.key(kind, &filing.ticker, &filing.accession_number);
            filings::record_artifact(&self.db, &filing.accession_number, kind, &key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ReconcileJob for StatementJob {
    type Item = FilingRecord;

    fn name(&self) -> &'static str {
        "statements"
    }

    async fn pending(&self) -> Result<Vec<FilingRecord>> {
        filings::filings_missing_artifacts(&self.db, &STATEMENT_KINDS, &self.form_types, None).await
    }

    fn item_key(&self, filing: &FilingRecord) -> String {
        filing.accession_number.clone()
    }

    async fn process(&self, filing: FilingRecord) -> Result<TaskOutcome> {
        let mut stored = 0;
        for kind in STATEMENT_KINDS {
            let key = self.layout.key(kind, &filing.ticker, &filing.accession_number);
            if self.artifacts.exists(&key).await? {
                stored += 1;
            }
        }
        if stored == STATEMENT_KINDS.len() {
            info!(item = %filing.accession_number, "Statements already stored, recording");
            self.record_all(&filing).await?;
            return Ok(TaskOutcome::AlreadyDone);
        }

        info!(item = %filing.accession_number, ticker = %filing.ticker, "Extracting statements");
        let xbrl = self.source.xbrl_json(&filing.filing_url).await?;
        let documents = extract_statements(&xbrl, &filing)?;

        for (kind, document) in documents {
            let key = self.layout.key(kind, &filing.ticker, &filing.accession_number);
            let bytes = serde_json::to_vec(&document)?;
            match self.artifacts.put_if_absent(&key, bytes).await? {
                PutOutcome::Written => debug!(item = %filing.accession_number, statement = %kind, "Statement stored"),
                PutOutcome::AlreadyPresent => {
                    debug!(item = %filing.accession_number, statement = %kind, "Statement already present")
                }
            }
        }

        self.record_all(&filing).await?;
        Ok(TaskOutcome::Completed)
    }
}

const XBRL_BASE_URL: &str = "https://api.sec-api.io/xbrl-to-json";

/// XBRL-to-JSON endpoint client
pub struct XbrlClient {
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

impl XbrlClient {
    pub fn new(api_key: String, requests_per_second: u32, timeouts: &TimeoutConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeouts.http_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: XBRL_BASE_URL.to_string(),
            api_key,
            retry: RetryPolicy::from_config(timeouts),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    async fn fetch(&self, filing_url: &str) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("htm-url", filing_url), ("token", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("no XBRL data for {}", filing_url)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: format!("XBRL request failed: {}", body.chars().take(200).collect::<String>()),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl StatementSource for XbrlClient {
    async fn xbrl_json(&self, filing_url: &str) -> Result<Value> {
        retry_with_backoff("xbrl", self.retry, || self.fetch(filing_url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn filing() -> FilingRecord {
        FilingRecord {
            accession_number: "000032019324000081".to_string(),
            ticker: "AAPL".to_string(),
            company_name: Some("Apple Inc.".to_string()),
            form_type: "10-Q".to_string(),
            filed_date: day(2024, 8, 2),
            report_end_date: day(2024, 6, 30),
            filing_url: "https://www.sec.gov/Archives/edgar/data/320193/aapl-20240629.htm".to_string(),
            cik: Some("320193".to_string()),
            sic: None,
            sector: None,
            industry: None,
            exchange: None,
            discovered_at: Utc::now(),
        }
    }

    fn xbrl() -> Value {
        json!({
            "CoverPage": {
                "DocumentPeriodEndDate": "2024-06-29",
                "EntityCommonStockSharesOutstanding": {
                    "period": {"instant": "2024-07-19"},
                    "value": "15204137000"
                }
            },
            "BalanceSheets": {
                "Liabilities": [
                    {"period": {"instant": "2024-06-29"}, "value": "264904000000"},
                    {"period": {"instant": "2023-09-30"}, "value": "290437000000"}
                ],
                "StockholdersEquity": [
                    {"period": {"instant": "2023-09-30"}, "value": "62146000000"},
                    {"period": {"instant": "2024-06-29"}, "value": "66708000000"}
                ],
                "AssetsCurrent": [{"period": {"instant": "2024-06-29"}, "value": "125435000000"}],
                "InventoryNet": [{"period": {"instant": "2024-06-29"}, "value": "6165000000"}]
            },
            "StatementsOfIncome": {
                "RevenueFromContractWithCustomerExcludingAssessedTax": [
                    {
                        "period": {"startDate": "2024-03-31", "endDate": "2024-06-29"},
                        "segment": {"dimension": "srt:ProductOrServiceAxis", "value": "us-gaap:ProductMember"},
                        "value": "61564000000"
                    },
                    {"period": {"startDate": "2023-10-01", "endDate": "2024-06-29"}, "value": "296105000000"},
                    {"period": {"startDate": "2024-03-31", "endDate": "2024-06-29"}, "value": "85777000000"}
                ],
                "NetIncomeLoss": [
                    {"period": {"startDate": "2023-04-02", "endDate": "2023-07-01"}, "value": "19881000000"},
                    {"period": {"startDate": "2024-03-31", "endDate": "2024-06-29"}, "value": "21448000000"}
                ],
                "CostOfGoodsAndServicesSold": [
                    {"period": {"startDate": "2024-03-31", "endDate": "2024-06-29"}, "value": "46099000000"}
                ]
            },
            "StatementsOfCashFlows": {
                "NetCashProvidedByUsedInOperatingActivities": [
                    {"period": {"startDate": "2023-10-01", "endDate": "2024-06-29"}, "value": "91443000000"}
                ],
                "PaymentsToAcquirePropertyPlantAndEquipment": [
                    {"period": {"startDate": "2023-10-01", "endDate": "2024-06-29"}, "value": "6539000000"}
                ]
            }
        })
    }

    fn statement(documents: &[(ArtifactKind, Value)], kind: ArtifactKind) -> &Value {
        &documents.iter().find(|(k, _)| *k == kind).unwrap().1
    }

    #[test]
    fn test_line_item_name() {
        assert_eq!(line_item_name("NetIncomeLoss"), "netincomeloss");
        assert_eq!(line_item_name("us-gaap:AssetsCurrent"), "assetscurrent");
        assert_eq!(line_item_name("Gain_(Loss) on Sale"), "gainlossonsale");
    }

    #[test]
    fn test_statements_use_report_period_values() {
        let documents = extract_statements(&xbrl(), &filing()).unwrap();
        assert_eq!(documents.len(), 3);

        let balance = statement(&documents, ArtifactKind::BalanceSheet);
        assert_eq!(balance["liabilities"], 264904000000.0);
        assert_eq!(balance["stockholdersequity"], 66708000000.0);
        assert_eq!(balance["shares_outstanding"], 15204137000.0);
        assert_eq!(balance["period_end_date"], "2024-06-29");
        assert_eq!(balance["filing_date"], "2024-08-02");
        assert_eq!(balance["ticker"], "AAPL");

        // Quarter total, not the product segment or the nine months
        let income = statement(&documents, ArtifactKind::IncomeStatement);
        assert_eq!(income["revenuefromcontractwithcustomerexcludingassessedtax"], 85777000000.0);
        assert_eq!(income["netincomeloss"], 21448000000.0);

        let cash = statement(&documents, ArtifactKind::CashFlow);
        assert_eq!(cash["netcashprovidedbyusedinoperatingactivities"], 91443000000.0);
    }

    #[test]
    fn test_canonical_names_are_added() {
        let documents = extract_statements(&xbrl(), &filing()).unwrap();

        let balance = statement(&documents, ArtifactKind::BalanceSheet);
        assert_eq!(balance["total_liabilities"], 264904000000.0);
        assert_eq!(balance["total_equity"], 66708000000.0);
        assert_eq!(balance["current_assets"], 125435000000.0);
        assert!(balance.get("current_liabilities").is_none());

        let income = statement(&documents, ArtifactKind::IncomeStatement);
        assert_eq!(income["costofrevenue"], 46099000000.0);

        let cash = statement(&documents, ArtifactKind::CashFlow);
        assert_eq!(cash["paymentstoacquireotherproductiveassets"], 6539000000.0);
    }

    #[test]
    fn test_reported_canonical_name_is_kept() {
        let section = json!({
            "Revenues": [{"period": {"endDate": "2024-06-29"}, "value": "10"}],
            "RevenueFromContractWithCustomerExcludingAssessedTax": [{"period": {"endDate": "2024-06-29"}, "value": "12"}]
        });
        let items = extract_line_items(&section, Some(day(2024, 6, 29)));
        assert_eq!(items["revenuefromcontractwithcustomerexcludingassessedtax"], 12.0);
        assert_eq!(items["revenues"], 10.0);
    }

    #[test]
    fn test_fact_without_period_match_falls_back_to_latest() {
        let section = json!({
            "Goodwill": [
                {"period": {"instant": "2023-09-30"}, "value": "100"},
                {"period": {"instant": "2024-03-30"}, "value": "1,250"},
                {"period": {"instant": "2024-03-30"}, "segment": {"dimension": "x", "value": "y"}, "value": "900"}
            ],
            "Note": [{"period": {"instant": "2024-06-29"}, "value": "not a number"}]
        });
        let items = extract_line_items(&section, Some(day(2024, 6, 29)));
        assert_eq!(items["goodwill"], 1250.0);
        assert!(!items.contains_key("note"));
    }

    #[test]
    fn test_shares_outstanding_sources() {
        let per_class = json!({
            "DocumentAndEntityInformation": {
                "EntityCommonStockSharesOutstanding": [
                    {"period": {"instant": "2024-07-15"}, "segment": {"dimension": "us-gaap:StatementClassOfStockAxis", "value": "goog:CapitalClassAMember"}, "value": "5849000000"},
                    {"period": {"instant": "2024-07-15"}, "segment": {"dimension": "us-gaap:StatementClassOfStockAxis", "value": "goog:CapitalClassCMember"}, "value": "5447000000"}
                ]
            }
        });
        assert_eq!(shares_outstanding(&per_class), Some(11296000000.0));

        let top_level = json!({"CommonStockSharesOutstanding": "2500"});
        assert_eq!(shares_outstanding(&top_level), Some(2500.0));

        assert_eq!(shares_outstanding(&json!({"CoverPage": {}})), None);
    }

    #[test]
    fn test_period_end_falls_back_to_filing() {
        let mut data = xbrl();
        data["CoverPage"]
            .as_object_mut()
            .unwrap()
            .remove("DocumentPeriodEndDate");
        let documents = extract_statements(&data, &filing()).unwrap();
        assert_eq!(statement(&documents, ArtifactKind::CashFlow)["period_end_date"], "2024-06-30");
    }

    #[test]
    fn test_missing_sections() {
        let only_income = json!({
            "StatementsOfIncome": {"NetIncomeLoss": [{"period": {"endDate": "2024-06-30"}, "value": "5"}]}
        });
        let documents = extract_statements(&only_income, &filing()).unwrap();
        let cash = statement(&documents, ArtifactKind::CashFlow).as_object().unwrap();
        assert_eq!(cash.len(), 4);

        let nothing = json!({"CoverPage": {"DocumentPeriodEndDate": "2024-06-29"}});
        assert!(matches!(extract_statements(&nothing, &filing()), Err(Error::NotFound(_))));
    }
}
