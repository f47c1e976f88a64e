//! Filing metadata and artifact locator persistence

use crate::models::{ArtifactKind, CompanyProfile, FilingRecord};
use crate::Result;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;

/// SQLite caps bound parameters per statement; stay well below it
const MEMBERSHIP_CHUNK: usize = 500;

const FILING_COLUMNS: &str = "accession_number, ticker, company_name, form_type, filed_date, \
     report_end_date, filing_url, cik, sic, sector, industry, exchange, discovered_at";

/// Return the subset of `accessions` already present in `filing_metadata`
pub async fn existing_accessions(
    pool: &SqlitePool,
    accessions: &[String],
) -> Result<HashSet<String>> {
    let mut found = HashSet::new();

    for chunk in accessions.chunks(MEMBERSHIP_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT accession_number FROM filing_metadata WHERE accession_number IN (",
        );
        let mut separated = builder.separated(", ");
        for accession in chunk {
            separated.push_bind(accession);
        }
        separated.push_unseparated(")");

        let rows: Vec<String> = builder.build_query_scalar::<String>().fetch_all(pool).await?;
        found.extend(rows);
    }

    Ok(found)
}

/// Insert metadata-only rows in one transaction
///
/// Returns the number of rows actually inserted; rows whose accession
/// number already exists are left untouched.
pub async fn insert_filings(pool: &SqlitePool, records: &[FilingRecord]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for record in records {
        let result = sqlx::query(
            r#"
            INSERT INTO filing_metadata (
                accession_number, ticker, company_name, form_type, filed_date,
                report_end_date, filing_url, cik, sic, sector, industry, exchange, discovered_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(accession_number) DO NOTHING
            "#,
        )
        .bind(&record.accession_number)
        .bind(&record.ticker)
        .bind(&record.company_name)
        .bind(&record.form_type)
        .bind(record.filed_date)
        .bind(record.report_end_date)
        .bind(&record.filing_url)
        .bind(&record.cik)
        .bind(&record.sic)
        .bind(&record.sector)
        .bind(&record.industry)
        .bind(&record.exchange)
        .bind(record.discovered_at)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Load one filing by natural key
pub async fn load_filing(pool: &SqlitePool, accession: &str) -> Result<Option<FilingRecord>> {
    let sql = format!(
        "SELECT {} FROM filing_metadata WHERE accession_number = ?",
        FILING_COLUMNS
    );
    let row = sqlx::query(&sql).bind(accession).fetch_optional(pool).await?;
    row.map(|r| filing_from_row(&r)).transpose()
}

/// Most recent profile already stored for a ticker, if any row has one
pub async fn stored_company_profile(
    pool: &SqlitePool,
    ticker: &str,
) -> Result<Option<CompanyProfile>> {
    let row = sqlx::query(
        r#"
        SELECT cik, sic, exchange FROM filing_metadata
        WHERE ticker = ? AND (cik IS NOT NULL OR sic IS NOT NULL)
        ORDER BY filed_date DESC
        LIMIT 1
        "#,
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| CompanyProfile {
        cik: r.get("cik"),
        sic: r.get("sic"),
        exchange: r.get("exchange"),
    }))
}

/// Record a derived artifact locator (first writer wins)
///
/// Returns `true` if this call recorded it.
pub async fn record_artifact(
    pool: &SqlitePool,
    accession: &str,
    kind: ArtifactKind,
    locator: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO filing_artifacts (accession_number, kind, locator, recorded_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(accession_number, kind) DO NOTHING
        "#,
    )
    .bind(accession)
    .bind(kind.as_str())
    .bind(locator)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn artifact_locator(
    pool: &SqlitePool,
    accession: &str,
    kind: ArtifactKind,
) -> Result<Option<String>> {
    let locator = sqlx::query_scalar(
        "SELECT locator FROM filing_artifacts WHERE accession_number = ? AND kind = ?",
    )
    .bind(accession)
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(locator)
}

/// Distinct tickers known to the registry, alphabetically
pub async fn distinct_tickers(pool: &SqlitePool) -> Result<Vec<String>> {
    let tickers = sqlx::query_scalar(
        "SELECT DISTINCT ticker FROM filing_metadata WHERE ticker IS NOT NULL ORDER BY ticker",
    )
    .fetch_all(pool)
    .await?;

    Ok(tickers)
}

/// Filings with no `ratios` row, newest filed first
pub async fn filings_missing_ratios(pool: &SqlitePool) -> Result<Vec<FilingRecord>> {
    let sql = format!(
        r#"
        SELECT {}
        FROM filing_metadata m
        LEFT JOIN ratios r ON m.accession_number = r.accession_number
        WHERE r.accession_number IS NULL
          AND m.ticker IS NOT NULL
          AND m.report_end_date IS NOT NULL
        ORDER BY m.filed_date DESC, m.accession_number
        "#,
        qualified_columns("m")
    );

    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(filing_from_row).collect()
}

/// Filings lacking a recorded locator for any of `kinds`, newest filed first
///
/// `form_types` restricts the scan when non-empty; `limit` caps the rows.
pub async fn filings_missing_artifacts(
    pool: &SqlitePool,
    kinds: &[ArtifactKind],
    form_types: &[String],
    limit: Option<usize>,
) -> Result<Vec<FilingRecord>> {
    if kinds.is_empty() || limit == Some(0) {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM filing_metadata m \
         WHERE (SELECT COUNT(DISTINCT a.kind) FROM filing_artifacts a \
                WHERE a.accession_number = m.accession_number AND a.kind IN (",
        qualified_columns("m")
    ));
    let mut separated = builder.separated(", ");
    for kind in kinds {
        separated.push_bind(kind.as_str());
    }
    separated.push_unseparated(")) < ");
    builder.push_bind(kinds.len() as i64);

    if !form_types.is_empty() {
        builder.push(" AND m.form_type IN (");
        let mut separated = builder.separated(", ");
        for form_type in form_types {
            separated.push_bind(form_type);
        }
        separated.push_unseparated(")");
    }

    builder.push(" ORDER BY m.filed_date DESC, m.accession_number");
    if let Some(limit) = limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
    }

    let rows = builder.build().fetch_all(pool).await?;
    rows.iter().map(filing_from_row).collect()
}

/// Latest filing for `ticker` whose report end date is strictly earlier
pub async fn find_prior_filing(
    pool: &SqlitePool,
    ticker: &str,
    report_end_date: NaiveDate,
) -> Result<Option<FilingRecord>> {
    let sql = format!(
        r#"
        SELECT {} FROM filing_metadata
        WHERE ticker = ? AND report_end_date < ?
        ORDER BY report_end_date DESC
        LIMIT 1
        "#,
        FILING_COLUMNS
    );

    let row = sqlx::query(&sql)
        .bind(ticker)
        .bind(report_end_date)
        .fetch_optional(pool)
        .await?;
    row.map(|r| filing_from_row(&r)).transpose()
}

fn qualified_columns(alias: &str) -> String {
    FILING_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn filing_from_row(row: &SqliteRow) -> Result<FilingRecord> {
    Ok(FilingRecord {
        accession_number: row.try_get("accession_number")?,
        ticker: row.try_get("ticker")?,
        company_name: row.try_get("company_name")?,
        form_type: row.try_get("form_type")?,
        filed_date: row.try_get("filed_date")?,
        report_end_date: row.try_get("report_end_date")?,
        filing_url: row.try_get("filing_url")?,
        cik: row.try_get("cik")?,
        sic: row.try_get("sic")?,
        sector: row.try_get("sector")?,
        industry: row.try_get("industry")?,
        exchange: row.try_get("exchange")?,
        discovered_at: row.try_get("discovered_at")?,
    })
}
