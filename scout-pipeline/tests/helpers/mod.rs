//! Test Helper Utilities
//!
//! In-memory registry, artifact store and fakes for every external source.

#![allow(dead_code)]

use async_trait::async_trait;
use scout_common::artifacts::MemoryArtifactStore;
use scout_common::config::{ArtifactLayout, EnrichmentConfig};
use scout_common::genai::{GenerationRequest, TextGenerator};
use scout_common::models::CompanyProfile;
use scout_common::{Error, Result};
use scout_pipeline::clients::{DocumentSource, FilingQuery, FilingSource, RawFiling};
use scout_pipeline::StepContext;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

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

/// Source filing for `accession` (hyphenated) and `ticker`
pub fn raw_filing(accession: &str, ticker: &str) -> RawFiling {
    RawFiling {
        accession_no: Some(accession.to_string()),
        ticker: Some(ticker.to_string()),
        company_name: Some(format!("{} Corp", ticker)),
        form_type: Some("10-Q".to_string()),
        filed_at: Some("2024-08-02T16:31:07-04:00".to_string()),
        period_of_report: Some("2024-06-30".to_string()),
        link_to_filing_details: Some(format!("https://www.sec.gov/Archives/{}.htm", accession)),
    }
}

/// Filing source returning a fixed batch
#[derive(Default)]
pub struct FakeFilingSource {
    pub filings: Mutex<Vec<RawFiling>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
}

impl FakeFilingSource {
    pub fn with_filings(filings: Vec<RawFiling>) -> Self {
        Self {
            filings: Mutex::new(filings),
            ..Self::default()
        }
    }
}

#[async_trait]
impl FilingSource for FakeFilingSource {
    async fn recent_filings(&self, _query: &FilingQuery) -> Result<Vec<RawFiling>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Http {
                status: Some(503),
                message: "filing source unavailable".to_string(),
            });
        }
        Ok(self.filings.lock().unwrap().clone())
    }

    async fn company_profile(&self, _ticker: &str) -> Result<Option<CompanyProfile>> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(CompanyProfile {
            cik: Some("320193".to_string()),
            sic: Some("3571".to_string()),
            exchange: Some("NASDAQ".to_string()),
        }))
    }
}

/// Document source serving a valid PDF for every URL except `failing` ones
#[derive(Default)]
pub struct FakeDocumentSource {
    pub failing: Mutex<HashSet<String>>,
    pub tiny: Mutex<HashSet<String>>,
    pub hanging: Mutex<HashSet<String>>,
    pub downloads: AtomicUsize,
}

impl FakeDocumentSource {
    /// Downloads of `url` never finish
    pub fn hang_for(&self, url: &str) {
        self.hanging.lock().unwrap().insert(url.to_string());
    }

    pub fn fail_for(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn tiny_for(&self, url: &str) {
        self.tiny.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl DocumentSource for FakeDocumentSource {
    async fn download(&self, filing_url: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let hang = self.hanging.lock().unwrap().contains(filing_url);
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.lock().unwrap().contains(filing_url) {
            return Err(Error::Http {
                status: Some(404),
                message: format!("filing reader returned 404 for {}", filing_url),
            });
        }
        if self.tiny.lock().unwrap().contains(filing_url) {
            return Ok(b"%PDF-1.7".to_vec());
        }
        let mut pdf = b"%PDF-1.7\n".to_vec();
        pdf.extend(std::iter::repeat(b'x').take(512));
        Ok(pdf)
    }
}

/// Generator that answers per branch; requests with attachments are document analyses
#[derive(Default)]
pub struct FakeGenerator {
    pub fail_analysis: AtomicBool,
    pub fail_headline: AtomicBool,
    /// Sleep before answering a headline request
    pub headline_delay: Mutex<Option<Duration>>,
    /// Sleep before answering a document analysis request
    pub analysis_delay: Mutex<Option<Duration>>,
    pub analysis_calls: AtomicUsize,
    pub headline_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if request.attachments.is_empty() {
            self.headline_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.headline_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_headline.load(Ordering::SeqCst) {
                return Err(Error::Http { status: Some(500), message: "model unavailable".into() });
            }
            Ok("headline assessment".to_string())
        } else {
            self.analysis_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.analysis_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_analysis.load(Ordering::SeqCst) {
                return Err(Error::Http { status: Some(500), message: "model unavailable".into() });
            }
            Ok("document analysis".to_string())
        }
    }
}

/// Step context plus handles on each fake
pub struct TestPipeline {
    pub ctx: StepContext,
    pub db: SqlitePool,
    pub store: Arc<MemoryArtifactStore>,
    pub filings: Arc<FakeFilingSource>,
    pub documents: Arc<FakeDocumentSource>,
    pub generator: Arc<FakeGenerator>,
}

pub async fn test_pipeline(filings: Vec<RawFiling>) -> TestPipeline {
    let db = memory_registry().await;
    let store = Arc::new(MemoryArtifactStore::new());
    let filing_source = Arc::new(FakeFilingSource::with_filings(filings));
    let documents = Arc::new(FakeDocumentSource::default());
    let generator = Arc::new(FakeGenerator::default());

    let ctx = StepContext {
        db: db.clone(),
        artifacts: store.clone(),
        layout: ArtifactLayout::default(),
        filings: filing_source.clone(),
        documents: documents.clone(),
        generator: generator.clone(),
        enrichment: EnrichmentConfig::default(),
        branch_timeout: Duration::from_secs(20),
        enrich_company_profile: true,
    };

    TestPipeline {
        ctx,
        db,
        store,
        filings: filing_source,
        documents,
        generator,
    }
}

/// Count of `filing_metadata` rows
pub async fn metadata_count(db: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM filing_metadata")
        .fetch_one(db)
        .await
        .unwrap()
}

/// Recorded locators by kind for one filing
pub async fn recorded_artifacts(db: &SqlitePool, accession: &str) -> HashMap<String, String> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT kind, locator FROM filing_artifacts WHERE accession_number = ?")
            .bind(accession)
            .fetch_all(db)
            .await
            .unwrap();
    rows.into_iter().collect()
}
