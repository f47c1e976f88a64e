//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every section has
//! built-in defaults, so a missing file or a missing section is not an error.
//!
//! # Sources priority
//!
//! 1. Command-line arguments (`--config`, `--root-folder`)
//! 2. Environment variables (`SCOUT_CONFIG`, `SCOUT_ROOT_FOLDER`, secrets)
//! 3. TOML configuration file
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SCOUT_CONFIG";
/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "SCOUT_ROOT_FOLDER";
/// Environment variable carrying the filing source API key
pub const SEC_API_KEY_ENV_VAR: &str = "SCOUT_SEC_API_KEY";
/// Environment variable carrying the generative-model API key
pub const GENAI_API_KEY_ENV_VAR: &str = "SCOUT_GENAI_API_KEY";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder holding the registry database and artifacts
    pub root_folder: Option<PathBuf>,

    /// Registry database path (default: `<root>/scout.db`)
    pub database_path: Option<PathBuf>,

    /// Artifact store root (default: `<root>/artifacts`)
    pub artifact_root: Option<PathBuf>,

    pub logging: LoggingConfig,
    pub secrets: SecretsConfig,
    pub discovery: DiscoveryConfig,
    pub artifacts: ArtifactLayout,
    pub enrichment: EnrichmentConfig,
    pub batch: BatchConfig,
    pub timeouts: TimeoutConfig,
    pub service: ServiceConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` directive such as `scout_pipeline=debug,info`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// API keys (environment variables take priority)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub sec_api_key: Option<String>,
    pub genai_api_key: Option<String>,
}

/// Discovery stage parameters (fixed per deployment)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub lookback_hours: u32,
    pub form_types: Vec<String>,
    /// Restrict discovery to these tickers (empty = all)
    pub tickers: Vec<String>,
    /// Maximum new items per run (0 = unlimited)
    pub max_items: usize,
    /// Registered filings with missing outputs revisited per run (0 = none)
    pub pending_limit: usize,
    /// Look up CIK/SIC/exchange for newly seen tickers
    pub enrich_company_profile: bool,
    /// Filing source requests per second
    pub requests_per_second: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            form_types: vec!["10-K".to_string(), "10-Q".to_string()],
            tickers: Vec::new(),
            max_items: 0,
            pending_limit: 50,
            enrich_company_profile: true,
            requests_per_second: 5,
        }
    }
}

/// Deterministic artifact path prefixes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactLayout {
    pub document_prefix: String,
    pub analysis_prefix: String,
    pub headline_prefix: String,
    pub balance_sheet_prefix: String,
    pub income_statement_prefix: String,
    pub cash_flow_prefix: String,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            document_prefix: "sec-pdf/".to_string(),
            analysis_prefix: "sec-analysis/".to_string(),
            headline_prefix: "headline-analysis/".to_string(),
            balance_sheet_prefix: "balance-sheet/".to_string(),
            income_statement_prefix: "income-statement/".to_string(),
            cash_flow_prefix: "cash-flow/".to_string(),
        }
    }
}

/// Generative-model settings for the enrichment branches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Headline window length before the filed date
    pub news_lookback_days: i64,
    /// Ground the headline branch with the model's search tool
    pub headline_search_grounding: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.2,
            max_output_tokens: 8192,
            news_lookback_days: 30,
            headline_search_grounding: true,
        }
    }
}

/// Which engine computes ratio sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatioEngine {
    /// Generative model with the formulas in the prompt
    Genai,
    /// Local formula evaluation
    Formula,
}

/// Batch job parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub price_workers: usize,
    pub ratio_workers: usize,
    /// History loaded for a ticker with no prices yet
    pub price_history_days: i64,
    pub price_requests_per_second: u32,
    pub statement_workers: usize,
    pub statement_requests_per_second: u32,
    /// Forms whose XBRL statements are extracted
    pub statement_form_types: Vec<String>,
    pub ratio_engine: RatioEngine,
    pub ratio_model: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            price_workers: 4,
            ratio_workers: 8,
            price_history_days: 10 * 365 + 2,
            price_requests_per_second: 2,
            statement_workers: 4,
            statement_requests_per_second: 5,
            statement_form_types: vec!["10-K".to_string(), "10-Q".to_string()],
            ratio_engine: RatioEngine::Formula,
            ratio_model: "gemini-2.0-flash-001".to_string(),
        }
    }
}

/// Deadlines and retry policy for external calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-request timeout for API calls
    pub http_timeout_secs: u64,
    /// Per-request timeout for document downloads
    pub download_timeout_secs: u64,
    /// Per-request timeout for generative-model calls
    pub generation_timeout_secs: u64,
    /// Deadline for one enrichment branch, retries included
    pub branch_timeout_secs: u64,
    /// Deadline for one step invocation; must exceed every retried call
    /// and the branch deadline
    pub step_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            download_timeout_secs: 180,
            generation_timeout_secs: 240,
            branch_timeout_secs: 780,
            step_timeout_secs: 900,
            retry_attempts: 3,
            retry_initial_delay_ms: 2000,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn branch_timeout(&self) -> Duration {
        Duration::from_secs(self.branch_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Sum of the backoff sleeps between retry attempts
    pub fn total_backoff(&self) -> Duration {
        let max_delay = self.retry_max_delay_ms;
        let mut delay = self.retry_initial_delay_ms;
        let mut total = 0u64;
        for _ in 1..self.retry_attempts {
            total = total.saturating_add(delay.min(max_delay));
            delay = delay.saturating_mul(2).min(max_delay);
        }
        Duration::from_millis(total)
    }

    /// Longest a retried call with per-request timeout `call_secs` can take
    pub fn worst_case_call(&self, call_secs: u64) -> Duration {
        Duration::from_secs(call_secs.saturating_mul(u64::from(self.retry_attempts)))
            + self.total_backoff()
    }

    /// Reject deadlines that a retried external call could exhaust
    ///
    /// Every retried call must finish inside the step deadline, a retried
    /// generation call inside the branch deadline, and the branch deadline
    /// inside the step deadline.
    pub fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            return Err(Error::Config("retry_attempts must be at least 1".to_string()));
        }

        let longest_call = self
            .http_timeout_secs
            .max(self.download_timeout_secs)
            .max(self.generation_timeout_secs);
        let worst_call = self.worst_case_call(longest_call);
        if self.step_timeout() <= worst_call {
            return Err(Error::Config(format!(
                "step_timeout_secs ({}) must be greater than {} attempts of the longest call \
                 timeout ({}s) plus backoff ({:?})",
                self.step_timeout_secs,
                self.retry_attempts,
                longest_call,
                self.total_backoff()
            )));
        }

        let worst_generation = self.worst_case_call(self.generation_timeout_secs);
        if self.branch_timeout() <= worst_generation {
            return Err(Error::Config(format!(
                "branch_timeout_secs ({}) must be greater than a retried generation call ({:?})",
                self.branch_timeout_secs, worst_generation
            )));
        }
        if self.branch_timeout_secs >= self.step_timeout_secs {
            return Err(Error::Config(format!(
                "branch_timeout_secs ({}) must be less than step_timeout_secs ({})",
                self.branch_timeout_secs, self.step_timeout_secs
            )));
        }
        Ok(())
    }
}

/// Step service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bind address for `scout-pipeline serve`
    pub bind: String,
    /// Base URL of a remote step service; when set, `run` invokes steps over HTTP
    pub step_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5780".to_string(),
            step_url: None,
        }
    }
}

impl TomlConfig {
    /// Registry database path under the resolved root folder
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root_folder.join("scout.db"))
    }

    /// Artifact store root under the resolved root folder
    pub fn artifact_root(&self, root_folder: &Path) -> PathBuf {
        self.artifact_root
            .clone()
            .unwrap_or_else(|| root_folder.join("artifacts"))
    }
}

/// Load TOML configuration
///
/// Priority: explicit path → `SCOUT_CONFIG` → platform config file → defaults.
/// An explicitly named file that does not exist is an error; a missing
/// platform default file is not.
pub fn load_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = cli_path {
        return read_toml_config(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return read_toml_config(Path::new(&path));
    }

    match default_config_path() {
        Some(path) if path.exists() => read_toml_config(&path),
        _ => {
            info!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Read and parse one TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write a TOML config file (used by `scout-pipeline init-config`)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("scout").join("config.toml"))
}

/// Root folder resolution:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("scout"))
        .unwrap_or_else(|| PathBuf::from("./scout_data"))
}

/// Resolve an API key from environment then TOML
///
/// Fails when neither source holds a non-blank value.
pub fn resolve_secret(name: &str, env_var: &str, toml_value: Option<&String>) -> Result<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_key(v));
    let toml_value = toml_value.filter(|v| is_valid_key(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            "{} found in both environment and TOML. Using environment (highest priority).",
            name
        );
    }

    if let Some(key) = env_value {
        info!("{} loaded from environment variable", name);
        return Ok(key.trim().to_string());
    }

    if let Some(key) = toml_value {
        info!("{} loaded from TOML config", name);
        return Ok(key.trim().to_string());
    }

    Err(Error::Config(format!(
        "{} not configured. Set {} or add it to the [secrets] section of the config file",
        name, env_var
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
