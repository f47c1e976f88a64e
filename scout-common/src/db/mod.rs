//! Registry store (SQLite)
//!
//! Append-mostly: rows are inserted and looked up, never updated or deleted.
//! Uniqueness of natural keys and derived-record keys is enforced by the
//! schema; inserts use `ON CONFLICT DO NOTHING` so the first writer wins.

pub mod filings;
pub mod prices;
pub mod ratios;

use crate::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::info;

/// Open (creating if needed) the registry database and ensure the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new registry: {}", db_path.display());
    } else {
        info!("Opened existing registry: {}", db_path.display());
    }

    // WAL lets batch workers read while one writer appends
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all registry tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_filing_metadata_table(pool).await?;
    create_filing_artifacts_table(pool).await?;
    create_price_data_table(pool).await?;
    create_ratios_table(pool).await?;
    Ok(())
}

async fn create_filing_metadata_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filing_metadata (
            accession_number TEXT PRIMARY KEY,
            ticker TEXT NOT NULL,
            company_name TEXT,
            form_type TEXT NOT NULL,
            filed_date TEXT NOT NULL,
            report_end_date TEXT NOT NULL,
            filing_url TEXT NOT NULL,
            cik TEXT,
            sic TEXT,
            sector TEXT,
            industry TEXT,
            exchange TEXT,
            discovered_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_filing_metadata_ticker_end ON filing_metadata(ticker, report_end_date)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_filing_artifacts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS filing_artifacts (
            accession_number TEXT NOT NULL REFERENCES filing_metadata(accession_number),
            kind TEXT NOT NULL,
            locator TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (accession_number, kind)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_price_data_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS price_data (
            ticker TEXT NOT NULL,
            date TEXT NOT NULL,
            open REAL,
            high REAL,
            low REAL,
            adj_close REAL,
            volume INTEGER,
            PRIMARY KEY (ticker, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_ratios_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ratios (
            accession_number TEXT PRIMARY KEY,
            ticker TEXT NOT NULL,
            filed_date TEXT NOT NULL,
            debt_to_equity REAL,
            fcf_yield REAL,
            current_ratio REAL,
            roe REAL,
            gross_margin REAL,
            operating_margin REAL,
            quick_ratio REAL,
            eps REAL,
            eps_change REAL,
            revenue_growth REAL,
            price_trend_ratio REAL,
            data_source TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_database_creates_file_and_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("registry").join("scout.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());
        pool.close().await;

        let pool = init_database(&db_path).await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(
            tables,
            vec!["filing_artifacts", "filing_metadata", "price_data", "ratios"]
        );
    }
}
