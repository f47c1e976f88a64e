//! # Scout Common Library
//!
//! Shared code for the filing pipeline and the batch jobs:
//! - Registry store (SQLite) schema and queries
//! - Artifact store trait and implementations
//! - Step envelope types (request/response messages between steps)
//! - Configuration loading and root folder resolution
//! - Retry with exponential backoff
//! - Generative-model client

pub mod artifacts;
pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod genai;
pub mod models;
pub mod retry;

pub use error::{Error, Result};
