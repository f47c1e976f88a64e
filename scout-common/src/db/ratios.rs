//! Computed ratio rows

use crate::models::RatioRecord;
use crate::Result;
use sqlx::SqlitePool;

pub async fn ratio_exists(pool: &SqlitePool, accession: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ratios WHERE accession_number = ?")
        .bind(accession)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Insert one ratio row; returns `false` if another writer got there first
pub async fn insert_ratio(pool: &SqlitePool, record: &RatioRecord) -> Result<bool> {
    let r = &record.ratios;
    let result = sqlx::query(
        r#"
        INSERT INTO ratios (
            accession_number, ticker, filed_date,
            debt_to_equity, fcf_yield, current_ratio, roe, gross_margin,
            operating_margin, quick_ratio, eps, eps_change, revenue_growth,
            price_trend_ratio, data_source, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(accession_number) DO NOTHING
        "#,
    )
    .bind(&record.accession_number)
    .bind(&record.ticker)
    .bind(record.filed_date)
    .bind(r.debt_to_equity)
    .bind(r.fcf_yield)
    .bind(r.current_ratio)
    .bind(r.roe)
    .bind(r.gross_margin)
    .bind(r.operating_margin)
    .bind(r.quick_ratio)
    .bind(r.eps)
    .bind(r.eps_change)
    .bind(r.revenue_growth)
    .bind(r.price_trend_ratio)
    .bind(&record.data_source)
    .bind(record.created_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
