//! Test Helper Utilities
//!
//! In-memory registry and artifact store, registry fixtures and fake sources.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use scout_batch::prices::{PriceSource, PriceWindow};
use scout_batch::ratios::{FormulaCalculator, RatioCalculator, RatioInputs};
use scout_batch::statements::StatementSource;
use scout_common::artifacts::{ArtifactStore, MemoryArtifactStore};
use scout_common::config::ArtifactLayout;
use scout_common::db::{filings, prices, ratios};
use scout_common::models::{ArtifactKind, FilingRecord, PriceRecord, RatioRecord, RatioSet};
use scout_common::{Error, Result};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Single-connection in-memory registry with the schema applied
pub async fn memory_registry() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    scout_common::db::create_schema(&pool)
        .await
        .expect("Failed to create schema");
    pool
}

pub fn filing(accession: &str, ticker: &str, report_end_date: NaiveDate, filed_date: NaiveDate) -> FilingRecord {
    FilingRecord {
        accession_number: accession.to_string(),
        ticker: ticker.to_string(),
        company_name: Some(format!("{} Corp", ticker)),
        form_type: "10-Q".to_string(),
        filed_date,
        report_end_date,
        filing_url: format!("https://www.sec.gov/Archives/{}.htm", accession),
        cik: None,
        sic: None,
        sector: None,
        industry: None,
        exchange: None,
        discovered_at: Utc::now(),
    }
}

pub async fn register(db: &SqlitePool, records: &[FilingRecord]) {
    filings::insert_filings(db, records).await.unwrap();
}

/// Ratio row with only `eps` set
pub async fn existing_ratio(db: &SqlitePool, record: &FilingRecord) {
    let row = RatioRecord {
        accession_number: record.accession_number.clone(),
        ticker: record.ticker.clone(),
        filed_date: record.filed_date,
        ratios: RatioSet {
            eps: Some(1.0),
            ..RatioSet::default()
        },
        data_source: "formula".to_string(),
        created_at: Utc::now(),
    };
    assert!(ratios::insert_ratio(db, &row).await.unwrap());
}

pub async fn ratio_count(db: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM ratios")
        .fetch_one(db)
        .await
        .unwrap()
}

/// Store balance sheet, income statement and cash flow JSON for a filing
pub async fn store_statements(store: &MemoryArtifactStore, record: &FilingRecord, net_income: f64, revenue: f64) {
    let layout = ArtifactLayout::default();
    let documents = [
        (
            ArtifactKind::BalanceSheet,
            json!({
                "ticker": record.ticker,
                "total_liabilities": 300.0,
                "total_equity": 200.0,
                "current_assets": 150.0,
                "current_liabilities": 100.0,
                "inventorynet": 30.0,
                "shares_outstanding": 50.0
            }),
        ),
        (
            ArtifactKind::IncomeStatement,
            json!({
                "netincomeloss": net_income,
                "revenuefromcontractwithcustomerexcludingassessedtax": revenue,
                "costofrevenue": revenue * 0.6,
                "operatingincomeloss": revenue * 0.15
            }),
        ),
        (
            ArtifactKind::CashFlow,
            json!({
                "netcashprovidedbyusedinoperatingactivities": 120.0,
                "paymentstoacquireotherproductiveassets": 20.0
            }),
        ),
    ];

    for (kind, document) in documents {
        let key = layout.key(kind, &record.ticker, &record.accession_number);
        store
            .put_if_absent(&key, serde_json::to_vec(&document).unwrap())
            .await
            .unwrap();
    }
}

/// Daily bars with a constant adjusted close over `[start, end]`
pub async fn store_prices(db: &SqlitePool, ticker: &str, start: NaiveDate, end: NaiveDate, close: f64) {
    let mut bars = Vec::new();
    let mut day = start;
    while day <= end {
        bars.push(PriceRecord {
            ticker: ticker.to_string(),
            date: day,
            open: Some(close),
            high: Some(close),
            low: Some(close),
            adj_close: Some(close),
            volume: Some(1_000),
        });
        day += Duration::days(1);
    }
    prices::insert_prices(db, &bars).await.unwrap();
}

/// Formula engine that counts its calls
#[derive(Default)]
pub struct CountingCalculator {
    pub calls: AtomicUsize,
    pub tickers: Mutex<Vec<String>>,
}

#[async_trait]
impl RatioCalculator for CountingCalculator {
    fn engine(&self) -> &str {
        "formula"
    }

    async fn calculate(&self, inputs: &RatioInputs) -> Result<RatioSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tickers.lock().unwrap().push(inputs.ticker.clone());
        FormulaCalculator.calculate(inputs).await
    }
}

/// Price source returning one bar per day in the requested window
#[derive(Default)]
pub struct FakePriceSource {
    pub failing: Mutex<HashSet<String>>,
    pub requests: Mutex<Vec<(String, PriceWindow)>>,
}

impl FakePriceSource {
    pub fn fail_for(&self, ticker: &str) {
        self.failing.lock().unwrap().insert(ticker.to_string());
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PriceSource for FakePriceSource {
    async fn daily_bars(&self, ticker: &str, window: PriceWindow) -> Result<Vec<PriceRecord>> {
        self.requests.lock().unwrap().push((ticker.to_string(), window));
        if self.failing.lock().unwrap().contains(ticker) {
            return Err(Error::Http {
                status: Some(503),
                message: "price source unavailable".to_string(),
            });
        }

        let mut bars = Vec::new();
        let mut day = window.start;
        while day < window.end {
            bars.push(PriceRecord {
                ticker: ticker.to_string(),
                date: day,
                open: Some(10.0),
                high: Some(11.0),
                low: Some(9.0),
                adj_close: Some(10.5),
                volume: Some(5_000),
            });
            day += Duration::days(1);
        }
        Ok(bars)
    }
}

/// XBRL data keyed by filing URL
#[derive(Default)]
pub struct FakeStatementSource {
    pub filings: Mutex<HashMap<String, Value>>,
    pub failing: Mutex<HashSet<String>>,
    pub requests: AtomicUsize,
}

impl FakeStatementSource {
    pub fn add(&self, record: &FilingRecord, xbrl: Value) {
        self.filings.lock().unwrap().insert(record.filing_url.clone(), xbrl);
    }

    pub fn fail_for(&self, record: &FilingRecord) {
        self.failing.lock().unwrap().insert(record.filing_url.clone());
    }
}

#[async_trait]
impl StatementSource for FakeStatementSource {
    async fn xbrl_json(&self, filing_url: &str) -> Result<Value> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(filing_url) {
            return Err(Error::Http {
                status: Some(503),
                message: "xbrl source unavailable".to_string(),
            });
        }
        self.filings
            .lock()
            .unwrap()
            .get(filing_url)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no XBRL data for {}", filing_url)))
    }
}

/// XBRL data for a quarter ending `period_end` with a complete set of the
/// concepts the ratio formulas need
pub fn quarterly_xbrl(period_end: &str, net_income: f64, revenue: f64) -> Value {
    let instant = |value: f64| json!([{"period": {"instant": period_end}, "value": value.to_string()}]);
    let quarter = |value: f64| json!([{"period": {"endDate": period_end}, "value": value.to_string()}]);
    json!({
        "CoverPage": {
            "DocumentPeriodEndDate": period_end,
            "EntityCommonStockSharesOutstanding": {"period": {"instant": period_end}, "value": "50"}
        },
        "BalanceSheets": {
            "Liabilities": instant(300.0),
            "StockholdersEquity": instant(200.0),
            "AssetsCurrent": instant(150.0),
            "LiabilitiesCurrent": instant(100.0),
            "InventoryNet": instant(30.0)
        },
        "StatementsOfIncome": {
            "NetIncomeLoss": quarter(net_income),
            "Revenues": quarter(revenue),
            "CostOfGoodsAndServicesSold": quarter(revenue * 0.6),
            "OperatingIncomeLoss": quarter(revenue * 0.15)
        },
        "StatementsOfCashFlows": {
            "NetCashProvidedByUsedInOperatingActivities": quarter(120.0),
            "PaymentsToAcquirePropertyPlantAndEquipment": quarter(20.0)
        }
    })
}

pub async fn artifact_kinds(db: &SqlitePool, accession: &str) -> Vec<String> {
    sqlx::query_scalar("SELECT kind FROM filing_artifacts WHERE accession_number = ? ORDER BY kind")
        .bind(accession)
        .fetch_all(db)
        .await
        .unwrap()
}
