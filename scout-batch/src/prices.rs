//! Incremental daily price load
//!
//! For each ticker in the registry the missing window is
//! `[max stored date + 1, today + 1)`, or the configured history for a ticker
//! with no bars yet. Bars are appended; existing (ticker, date) rows are kept.

use crate::pool::{ReconcileJob, TaskOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use governor::{Quota, RateLimiter};
use scout_common::config::TimeoutConfig;
use scout_common::db::{filings, prices};
use scout_common::models::PriceRecord;
use scout_common::retry::{retry_with_backoff, RetryPolicy};
use scout_common::{Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, info};

/// Half-open date range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Window still to load, or `None` when the ticker is up to date
pub fn price_window(
    max_date: Option<NaiveDate>,
    today: NaiveDate,
    history_days: i64,
) -> Option<PriceWindow> {
    let start = match max_date {
        Some(last) => last + Duration::days(1),
        None => today - Duration::days(history_days),
    };
    let end = today + Duration::days(1);
    (start < end).then_some(PriceWindow { start, end })
}

/// Source of daily bars
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Bars dated within `window`, oldest first; empty when the market had none
    async fn daily_bars(&self, ticker: &str, window: PriceWindow) -> Result<Vec<PriceRecord>>;
}

pub struct PriceJob {
    db: SqlitePool,
    source: Arc<dyn PriceSource>,
    history_days: i64,
    today: NaiveDate,
}

impl PriceJob {
    pub fn new(db: SqlitePool, source: Arc<dyn PriceSource>, history_days: i64, today: NaiveDate) -> Self {
        Self {
            db,
            source,
            history_days,
            today,
        }
    }

    async fn window_for(&self, ticker: &str) -> Result<Option<PriceWindow>> {
        let max_date = prices::max_price_date(&self.db, ticker).await?;
        Ok(price_window(max_date, self.today, self.history_days))
    }
}

#[async_trait]
impl ReconcileJob for PriceJob {
    type Item = String;

    fn name(&self) -> &'static str {
        "prices"
    }

    async fn pending(&self) -> Result<Vec<String>> {
        let mut pending = Vec::new();
        for ticker in filings::distinct_tickers(&self.db).await? {
            match self.window_for(&ticker).await? {
                Some(_) => pending.push(ticker),
                None => debug!(ticker = %ticker, "Prices up to date"),
            }
        }
        Ok(pending)
    }

    fn item_key(&self, ticker: &String) -> String {
        ticker.clone()
    }

    async fn process(&self, ticker: String) -> Result<TaskOutcome> {
        let Some(window) = self.window_for(&ticker).await? else {
            info!(ticker = %ticker, "Prices loaded by another run, skipping");
            return Ok(TaskOutcome::AlreadyDone);
        };

        info!(ticker = %ticker, start = %window.start, end = %window.end, "Fetching daily bars");
        let bars: Vec<PriceRecord> = self
            .source
            .daily_bars(&ticker, window)
            .await?
            .into_iter()
            .filter(|bar| bar.date >= window.start && bar.date < window.end)
            .collect();

        if bars.is_empty() {
            info!(ticker = %ticker, "No new bars in window");
            return Ok(TaskOutcome::Completed);
        }

        let inserted = prices::insert_prices(&self.db, &bars).await?;
        info!(ticker = %ticker, fetched = bars.len(), inserted, "Bars appended");
        Ok(TaskOutcome::Completed)
    }
}

const CHART_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = concat!("scout/", env!("CARGO_PKG_VERSION"));

/// Daily chart endpoint client
pub struct ChartClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl ChartClient {
    pub fn new(requests_per_second: u32, timeouts: &TimeoutConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeouts.http_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: CHART_BASE_URL.to_string(),
            retry: RetryPolicy::from_config(timeouts),
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        })
    }

    async fn fetch_chart(&self, ticker: &str, window: PriceWindow) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let period1 = midnight_timestamp(window.start);
        let period2 = midnight_timestamp(window.end);
        let url = format!("{}/{}", self.base_url, ticker);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1d".to_string()),
                ("events", "div,splits".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: Some(status.as_u16()),
                message: format!("chart request for {} failed: {}", ticker, body.chars().take(200).collect::<String>()),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl PriceSource for ChartClient {
    async fn daily_bars(&self, ticker: &str, window: PriceWindow) -> Result<Vec<PriceRecord>> {
        let payload = retry_with_backoff("price chart", self.retry, || self.fetch_chart(ticker, window)).await?;
        parse_chart(ticker, &payload)
    }
}

fn midnight_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Convert a chart payload into bars
///
/// Bar dates are exchange-local (`meta.gmtoffset`). The adjusted close is
/// preferred; when the payload has none the raw close is used. Days where
/// every value is null are dropped.
pub fn parse_chart(ticker: &str, payload: &Value) -> Result<Vec<PriceRecord>> {
    let chart = &payload["chart"];
    if let Some(error) = chart.get("error").filter(|e| !e.is_null()) {
        let description = error["description"].as_str().unwrap_or("unknown chart error");
        // An unknown symbol or empty range comes back as an error object
        if error["code"].as_str() == Some("Not Found") {
            return Err(Error::NotFound(format!("{}: {}", ticker, description)));
        }
        return Err(Error::InvalidInput(format!("{}: {}", ticker, description)));
    }

    let Some(result) = chart["result"].get(0) else {
        return Ok(Vec::new());
    };
    let Some(timestamps) = result["timestamp"].as_array() else {
        return Ok(Vec::new());
    };

    let offset = result["meta"]["gmtoffset"].as_i64().unwrap_or(0);
    let quote = &result["indicators"]["quote"][0];
    let adjclose = &result["indicators"]["adjclose"][0]["adjclose"];

    let series = |name: &str, index: usize| quote[name].get(index).and_then(Value::as_f64);

    let mut bars = Vec::with_capacity(timestamps.len());
    for (index, ts) in timestamps.iter().enumerate() {
        let Some(date) = ts
            .as_i64()
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts + offset, 0))
            .map(|dt| dt.date_naive())
        else {
            continue;
        };

        let adj_close = adjclose
            .get(index)
            .and_then(Value::as_f64)
            .or_else(|| series("close", index));
        let bar = PriceRecord {
            ticker: ticker.to_string(),
            date,
            open: series("open", index),
            high: series("high", index),
            low: series("low", index),
            adj_close,
            volume: quote["volume"].get(index).and_then(Value::as_i64),
        };

        if bar.open.is_none() && bar.high.is_none() && bar.low.is_none() && bar.adj_close.is_none() {
            continue;
        }
        bars.push(bar);
    }

    Ok(bars)
}
