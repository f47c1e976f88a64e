//! scout-batch - derived-record reconciliation jobs
//!
//! Subcommands:
//! - `prices`: append missing daily bars for every registered ticker
//! - `statements`: extract statements for every filing missing one
//! - `ratios`: compute ratios for every filing that has none
//!
//! Exit codes: 0 all items succeeded or skipped, 1 some item failed,
//! 2 startup error or pending set could not be computed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scout_batch::prices::{ChartClient, PriceJob};
use scout_batch::ratios::{FormulaCalculator, GenAiCalculator, RatioCalculator, RatioJob};
use scout_batch::statements::{StatementJob, XbrlClient};
use scout_batch::{run_job, JobReport};
use scout_common::artifacts::FsArtifactStore;
use scout_common::config::{self, RatioEngine, TomlConfig};
use scout_common::genai::{GeminiClient, SamplingSettings};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for scout-batch
#[derive(Parser, Debug)]
#[command(name = "scout-batch")]
#[command(about = "Price, statement and ratio reconciliation jobs")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "SCOUT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Root folder holding the registry and artifacts
    #[arg(short, long, env = "SCOUT_ROOT_FOLDER", global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load missing daily price bars
    Prices {
        /// Concurrent workers (overrides [batch] price_workers)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Extract missing financial statements from XBRL data
    Statements {
        /// Concurrent workers (overrides [batch] statement_workers)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Compute missing ratio rows
    Ratios {
        /// Concurrent workers (overrides [batch] ratio_workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Calculator engine (overrides [batch] ratio_engine)
        #[arg(long, value_parser = ["formula", "genai"])]
        engine: Option<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match config::load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("scout-batch: {}", e);
            return ExitCode::from(2);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(dispatch(args, config)) {
        Ok(report) => {
            for failure in &report.failures {
                error!("Failed: {}: {}", failure.key, failure.message);
            }
            match serde_json::to_string(&report) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to serialize job summary: {}", e),
            }
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            error!("Job failed: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn dispatch(args: Args, config: TomlConfig) -> Result<JobReport> {
    config.timeouts.validate()?;
    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &config);
    info!("Root folder: {}", root_folder.display());
    let db = open_registry(&config, &root_folder).await?;

    match args.command {
        Command::Prices { workers } => {
            let source = ChartClient::new(config.batch.price_requests_per_second, &config.timeouts)?;
            let today = chrono::Local::now().date_naive();
            let job = PriceJob::new(db, Arc::new(source), config.batch.price_history_days, today);
            let workers = workers.unwrap_or(config.batch.price_workers);
            run_job(Arc::new(job), workers).await.context("Price job failed")
        }
        Command::Statements { workers } => {
            let api_key = config::resolve_secret(
                "SEC API key",
                config::SEC_API_KEY_ENV_VAR,
                config.secrets.sec_api_key.as_ref(),
            )?;
            let source = XbrlClient::new(api_key, config.batch.statement_requests_per_second, &config.timeouts)?;
            let artifact_root = config.artifact_root(&root_folder);
            let job = StatementJob::new(
                db,
                Arc::new(FsArtifactStore::new(artifact_root)),
                config.artifacts.clone(),
                Arc::new(source),
                config.batch.statement_form_types.clone(),
            );
            let workers = workers.unwrap_or(config.batch.statement_workers);
            run_job(Arc::new(job), workers).await.context("Statement job failed")
        }
        Command::Ratios { workers, engine } => {
            let engine = match engine.as_deref() {
                Some("genai") => RatioEngine::Genai,
                Some(_) => RatioEngine::Formula,
                None => config.batch.ratio_engine,
            };
            let calculator = ratio_calculator(&config, engine)?;
            info!(engine = calculator.engine(), "Ratio engine selected");

            let artifact_root = config.artifact_root(&root_folder);
            let job = RatioJob::new(
                db,
                Arc::new(FsArtifactStore::new(artifact_root)),
                config.artifacts.clone(),
                calculator,
            );
            let workers = workers.unwrap_or(config.batch.ratio_workers);
            run_job(Arc::new(job), workers).await.context("Ratio job failed")
        }
    }
}

async fn open_registry(config: &TomlConfig, root_folder: &Path) -> Result<SqlitePool> {
    let db_path = config.database_path(root_folder);
    scout_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open registry {}", db_path.display()))
}

fn ratio_calculator(config: &TomlConfig, engine: RatioEngine) -> Result<Arc<dyn RatioCalculator>> {
    Ok(match engine {
        RatioEngine::Formula => Arc::new(FormulaCalculator),
        RatioEngine::Genai => {
            let api_key = config::resolve_secret(
                "Generative model API key",
                config::GENAI_API_KEY_ENV_VAR,
                config.secrets.genai_api_key.as_ref(),
            )?;
            let sampling = SamplingSettings {
                temperature: 0.1,
                max_output_tokens: 2048,
            };
            let client = GeminiClient::new(api_key, config.batch.ratio_model.clone(), sampling, &config.timeouts)?;
            Arc::new(GenAiCalculator::new(Arc::new(client), &config.batch.ratio_model))
        }
    })
}
