//! Artifact store
//!
//! Blob storage for large immutable per-filing artifacts. Keys are relative,
//! slash-separated paths (`sec-pdf/AAPL_000032019324000123.pdf`); the key is
//! also the locator handed between steps. Writes are first-writer-wins: an
//! existing object is never replaced.

use crate::config::ArtifactLayout;
use crate::models::ArtifactKind;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Result of a write-once upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    AlreadyPresent,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Store `bytes` under `key` unless an object is already there
    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<PutOutcome>;

    /// Read an object; `Error::NotFound` if absent
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

impl ArtifactLayout {
    fn prefix(&self, kind: ArtifactKind) -> &str {
        match kind {
            ArtifactKind::Document => &self.document_prefix,
            ArtifactKind::Analysis => &self.analysis_prefix,
            ArtifactKind::Headline => &self.headline_prefix,
            ArtifactKind::BalanceSheet => &self.balance_sheet_prefix,
            ArtifactKind::IncomeStatement => &self.income_statement_prefix,
            ArtifactKind::CashFlow => &self.cash_flow_prefix,
        }
    }

    /// Deterministic key: `{prefix}{TICKER}_{ACCESSION}.{ext}`
    pub fn key(&self, kind: ArtifactKind, ticker: &str, accession: &str) -> String {
        format!(
            "{}{}_{}.{}",
            self.prefix(kind),
            ticker,
            accession,
            kind.extension()
        )
    }
}

/// Reject keys that could escape the store root
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("empty artifact key".to_string()));
    }
    let path = Path::new(key);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(Error::InvalidInput(format!("invalid artifact key: {}", key)));
    }
    Ok(())
}

/// Filesystem-backed store rooted at one directory
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<PutOutcome> {
        let path = self.path_for(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput(format!("invalid artifact key: {}", key)))?;
        tokio::fs::create_dir_all(parent).await?;

        // Write fully to a private temp name, then hard-link into place.
        // link() fails if the target exists, so readers never see a partial
        // object and a concurrent second writer loses cleanly.
        let temp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, &bytes).await?;
        let linked = tokio::fs::hard_link(&temp, &path).await;
        let _ = tokio::fs::remove_file(&temp).await;

        match linked {
            Ok(()) => {
                debug!(key = %key, bytes = bytes.len(), "Artifact written");
                Ok(PutOutcome::Written)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(key = %key, "Artifact already present");
                Ok(PutOutcome::AlreadyPresent)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("artifact {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<PutOutcome> {
        validate_key(key)?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        objects.insert(key.to_string(), bytes);
        Ok(PutOutcome::Written)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact {}", key)))
    }
}
