//! Daily price bars

use crate::models::PriceRecord;
use crate::Result;
use chrono::{Duration, NaiveDate};
use sqlx::SqlitePool;

/// Latest stored bar date for a ticker
pub async fn max_price_date(pool: &SqlitePool, ticker: &str) -> Result<Option<NaiveDate>> {
    let date: Option<NaiveDate> =
        sqlx::query_scalar("SELECT MAX(date) FROM price_data WHERE ticker = ?")
            .bind(ticker)
            .fetch_one(pool)
            .await?;
    Ok(date)
}

/// Append bars in one transaction; existing (ticker, date) rows are kept
pub async fn insert_prices(pool: &SqlitePool, prices: &[PriceRecord]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for price in prices {
        let result = sqlx::query(
            r#"
            INSERT INTO price_data (ticker, date, open, high, low, adj_close, volume)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker, date) DO NOTHING
            "#,
        )
        .bind(&price.ticker)
        .bind(price.date)
        .bind(price.open)
        .bind(price.high)
        .bind(price.low)
        .bind(price.adj_close)
        .bind(price.volume)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Latest adjusted close within `window_days` on or before `date`
pub async fn price_on_or_before(
    pool: &SqlitePool,
    ticker: &str,
    date: NaiveDate,
    window_days: i64,
) -> Result<Option<f64>> {
    let earliest = date - Duration::days(window_days);
    let price: Option<f64> = sqlx::query_scalar(
        r#"
        SELECT adj_close FROM price_data
        WHERE ticker = ? AND date <= ? AND date >= ? AND adj_close IS NOT NULL
        ORDER BY date DESC
        LIMIT 1
        "#,
    )
    .bind(ticker)
    .bind(date)
    .bind(earliest)
    .fetch_optional(pool)
    .await?;
    Ok(price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    fn bar(date: NaiveDate, close: f64) -> PriceRecord {
        PriceRecord {
            ticker: "AAPL".to_string(),
            date,
            open: Some(close),
            high: Some(close),
            low: Some(close),
            adj_close: Some(close),
            volume: Some(1_000),
        }
    }

    #[tokio::test]
    async fn test_max_date_and_duplicate_bars() {
        let pool = memory_pool().await;
        let d1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();

        assert_eq!(max_price_date(&pool, "AAPL").await.unwrap(), None);
        assert_eq!(insert_prices(&pool, &[bar(d1, 10.0), bar(d2, 11.0)]).await.unwrap(), 2);
        assert_eq!(insert_prices(&pool, &[bar(d2, 99.0)]).await.unwrap(), 0);
        assert_eq!(max_price_date(&pool, "AAPL").await.unwrap(), Some(d2));
    }

    #[tokio::test]
    async fn test_price_on_or_before_window() {
        let pool = memory_pool().await;
        let friday = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        insert_prices(&pool, &[bar(friday, 10.0)]).await.unwrap();

        let sunday = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
        assert_eq!(price_on_or_before(&pool, "AAPL", sunday, 7).await.unwrap(), Some(10.0));

        let too_late = NaiveDate::from_ymd_opt(2024, 3, 12).unwrap();
        assert_eq!(price_on_or_before(&pool, "AAPL", too_late, 7).await.unwrap(), None);

        let before = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        assert_eq!(price_on_or_before(&pool, "AAPL", before, 7).await.unwrap(), None);
    }
}
