//! Ratio computation job
//!
//! Pending filings are those with no `ratios` row. For each one the worker
//! loads the statement artifacts for the filing and for the ticker's prior
//! filing, computes the statement ratios through a [`RatioCalculator`], adds
//! the price trend ratio from stored bars and inserts one row.

pub mod formula;
pub mod genai;

pub use formula::FormulaCalculator;
pub use genai::GenAiCalculator;

use crate::pool::{ReconcileJob, TaskOutcome};
use crate::statements::STATEMENT_KINDS;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use scout_common::artifacts::ArtifactStore;
use scout_common::config::ArtifactLayout;
use scout_common::db::{filings, prices, ratios};
use scout_common::models::{FilingRecord, RatioRecord, RatioSet};
use scout_common::{Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A stored price counts for a target date if it is at most this many days older
pub const PRICE_LOOKBACK_DAYS: i64 = 7;
const TREND_NEAR_DAYS: i64 = 20;
const TREND_FAR_DAYS: i64 = 50;

/// Identifier fields carried in statement files, not line items
const NON_METRIC_FIELDS: [&str; 5] = [
    "ticker",
    "accession_number",
    "period_end_date",
    "filing_date",
    "reported_currency",
];

/// Merged line items of one filing's statements plus the period-end price
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinancialSnapshot {
    values: BTreeMap<String, f64>,
}

impl FinancialSnapshot {
    pub fn get(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: f64) {
        if value.is_finite() {
            self.values.insert(field.into(), value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    /// Merge a statement document (an object, or an array whose first element
    /// is the latest period). Non-numeric values are dropped.
    pub fn merge_statement(&mut self, document: &Value) {
        let row = match document {
            Value::Array(rows) => rows.first(),
            other => Some(other),
        };
        let Some(Value::Object(fields)) = row else {
            return;
        };

        for (name, value) in fields {
            if NON_METRIC_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            if let Some(number) = number {
                self.insert(name.to_lowercase(), number);
            }
        }
    }
}

impl<const N: usize> From<[(&str, f64); N]> for FinancialSnapshot {
    fn from(fields: [(&str, f64); N]) -> Self {
        let mut snapshot = Self::default();
        for (name, value) in fields {
            snapshot.insert(name, value);
        }
        snapshot
    }
}

/// Calculator input for one filing
#[derive(Debug, Clone)]
pub struct RatioInputs {
    pub ticker: String,
    pub report_end_date: NaiveDate,
    pub current: FinancialSnapshot,
    pub prior: Option<FinancialSnapshot>,
}

/// Computes the statement ratios (all but the price trend ratio)
#[async_trait]
pub trait RatioCalculator: Send + Sync {
    /// Recorded as the row's data source
    fn engine(&self) -> &str;

    async fn calculate(&self, inputs: &RatioInputs) -> Result<RatioSet>;
}

/// Price(filed − 20d) / price(filed − 50d) from stored bars
pub async fn price_trend_ratio(db: &SqlitePool, ticker: &str, filed_date: NaiveDate) -> Result<Option<f64>> {
    let near = prices::price_on_or_before(
        db,
        ticker,
        filed_date - Duration::days(TREND_NEAR_DAYS),
        PRICE_LOOKBACK_DAYS,
    )
    .await?;
    let far = prices::price_on_or_before(
        db,
        ticker,
        filed_date - Duration::days(TREND_FAR_DAYS),
        PRICE_LOOKBACK_DAYS,
    )
    .await?;

    Ok(match (near, far) {
        (Some(near), Some(far)) if far != 0.0 => Some(near / far),
        _ => {
            debug!(ticker, near = ?near, far = ?far, "Price trend ratio not computable");
            None
        }
    })
}

pub struct RatioJob {
    db: SqlitePool,
    artifacts: Arc<dyn ArtifactStore>,
    layout: ArtifactLayout,
    calculator: Arc<dyn RatioCalculator>,
}

impl RatioJob {
    pub fn new(
        db: SqlitePool,
        artifacts: Arc<dyn ArtifactStore>,
        layout: ArtifactLayout,
        calculator: Arc<dyn RatioCalculator>,
    ) -> Self {
        Self {
            db,
            artifacts,
            layout,
            calculator,
        }
    }

    /// Statements for one filing; `None` when none of them is stored
    pub async fn load_snapshot(&self, filing: &FilingRecord) -> Result<Option<FinancialSnapshot>> {
        let mut snapshot = FinancialSnapshot::default();
        let mut found = 0;

        for kind in STATEMENT_KINDS {
            let key = self.layout.key(kind, &filing.ticker, &filing.accession_number);
            if !self.artifacts.exists(&key).await? {
                debug!(item = %filing.accession_number, statement = %kind, "Statement not stored");
                continue;
            }
            let bytes = self.artifacts.get(&key).await?;
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(document) => {
                    snapshot.merge_statement(&document);
                    found += 1;
                }
                Err(e) => {
                    warn!(item = %filing.accession_number, statement = %kind, error = %e, "Unreadable statement, ignoring");
                }
            }
        }

        if found == 0 {
            return Ok(None);
        }

        match prices::price_on_or_before(&self.db, &filing.ticker, filing.report_end_date, PRICE_LOOKBACK_DAYS)
            .await?
        {
            Some(price) => snapshot.insert("price_adj_close", price),
            None => warn!(ticker = %filing.ticker, date = %filing.report_end_date, "No price near report end date"),
        }

        Ok(Some(snapshot))
    }

    async fn statement_ratios(&self, filing: &FilingRecord, current: FinancialSnapshot) -> Result<RatioSet> {
        let prior = match filings::find_prior_filing(&self.db, &filing.ticker, filing.report_end_date).await? {
            Some(prior) => self.load_snapshot(&prior).await?,
            None => {
                debug!(item = %filing.accession_number, "No prior filing");
                None
            }
        };

        let inputs = RatioInputs {
            ticker: filing.ticker.clone(),
            report_end_date: filing.report_end_date,
            current,
            prior,
        };

        match self.calculator.calculate(&inputs).await {
            Ok(set) => Ok(set),
            Err(e) => {
                warn!(
                    item = %filing.accession_number,
                    engine = self.calculator.engine(),
                    error = %e,
                    "Ratio calculation failed, keeping price trend only"
                );
                Ok(RatioSet::default())
            }
        }
    }
}

#[async_trait]
impl ReconcileJob for RatioJob {
    type Item = FilingRecord;

    fn name(&self) -> &'static str {
        "ratios"
    }

    async fn pending(&self) -> Result<Vec<FilingRecord>> {
        filings::filings_missing_ratios(&self.db).await
    }

    fn item_key(&self, filing: &FilingRecord) -> String {
        filing.accession_number.clone()
    }

    async fn process(&self, filing: FilingRecord) -> Result<TaskOutcome> {
        if ratios::ratio_exists(&self.db, &filing.accession_number).await? {
            info!(item = %filing.accession_number, "Ratios already computed, skipping");
            return Ok(TaskOutcome::AlreadyDone);
        }

        let trend = price_trend_ratio(&self.db, &filing.ticker, filing.filed_date).await?;

        let (mut set, data_source) = match self.load_snapshot(&filing).await? {
            Some(current) => (
                self.statement_ratios(&filing, current).await?,
                self.calculator.engine().to_string(),
            ),
            None => {
                warn!(item = %filing.accession_number, ticker = %filing.ticker, "No statements stored, price trend only");
                (RatioSet::default(), "prices_only".to_string())
            }
        };
        set.price_trend_ratio = trend;
        let set = set.sanitized();

        if set.all_null() {
            return Err(Error::NotFound(format!(
                "no ratio computable for {} ({})",
                filing.accession_number, filing.ticker
            )));
        }

        let record = RatioRecord {
            accession_number: filing.accession_number.clone(),
            ticker: filing.ticker.clone(),
            filed_date: filing.filed_date,
            ratios: set,
            data_source,
            created_at: Utc::now(),
        };

        if ratios::insert_ratio(&self.db, &record).await? {
            info!(item = %filing.accession_number, source = %record.data_source, "Ratios stored");
            Ok(TaskOutcome::Completed)
        } else {
            info!(item = %filing.accession_number, "Ratios stored concurrently by another run");
            Ok(TaskOutcome::AlreadyDone)
        }
    }
}
