//! scout-pipeline - filing discovery, fetch and enrichment
//!
//! Subcommands:
//! - `run`: one orchestrated run (discovery, then fetch and enrichment per new filing)
//! - `serve`: HTTP step service used by `run --step-url`
//! - `discover`: discovery step only, prints the response
//! - `init-config`: write a config file with all defaults
//!
//! Exit codes: 0 success or nothing new, 1 failure verdict, 2 startup error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scout_common::artifacts::FsArtifactStore;
use scout_common::config::{self, TomlConfig};
use scout_common::envelope::DiscoveryRequest;
use scout_common::genai::{GeminiClient, SamplingSettings};
use scout_pipeline::clients::{FilingReaderClient, SecQueryClient};
use scout_pipeline::invoker::{HttpInvoker, LocalInvoker, StepInvoker};
use scout_pipeline::orchestrator::{Orchestrator, RunSettings};
use scout_pipeline::{AppState, StepContext};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for scout-pipeline
#[derive(Parser, Debug)]
#[command(name = "scout-pipeline")]
#[command(about = "Filing discovery, fetch and enrichment pipeline")]
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
    /// Execute one pipeline run
    Run {
        /// Invoke steps on a remote step service instead of in-process
        #[arg(long)]
        step_url: Option<String>,
    },
    /// Serve the step endpoints over HTTP
    Serve {
        /// Bind address (overrides [service] bind)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run discovery only and print the new items
    Discover,
    /// Write a default config file
    InitConfig {
        /// Output path
        #[arg(long, default_value = "scout.toml")]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match config::load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("scout-pipeline: {}", e);
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
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Returns the process exit code; `Err` is an unrecoverable startup error
async fn dispatch(args: Args, config: TomlConfig) -> Result<u8> {
    config.timeouts.validate()?;

    match args.command {
        Command::InitConfig { path } => {
            config::write_toml_config(&TomlConfig::default(), &path)?;
            info!("Wrote default configuration to {}", path.display());
            Ok(0)
        }
        Command::Run { step_url } => {
            let step_url = step_url.or_else(|| config.service.step_url.clone());
            let invoker: Arc<dyn StepInvoker> = match step_url {
                Some(url) => {
                    info!("Invoking steps on {}", url);
                    Arc::new(HttpInvoker::new(url, config.timeouts.step_timeout())?)
                }
                None => {
                    let ctx = build_context(&config, args.root_folder.as_deref()).await?;
                    Arc::new(LocalInvoker::new(ctx))
                }
            };

            let settings = RunSettings {
                discovery: discovery_request(&config),
                step_timeout: config.timeouts.step_timeout(),
                discovery_attempts: 2,
            };
            let report = Orchestrator::new(invoker, settings).run().await;

            for line in report.failure_lines() {
                error!("Failed: {}", line);
            }
            println!("{}", serde_json::to_string(&report)?);
            Ok(report.exit_code())
        }
        Command::Serve { bind } => {
            let ctx = build_context(&config, args.root_folder.as_deref()).await?;
            let bind = bind.unwrap_or_else(|| config.service.bind.clone());
            let app = scout_pipeline::build_router(AppState::new(ctx));

            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind to {}", bind))?;
            info!("Step service listening on http://{}", bind);
            info!("Health check: http://{}/health", bind);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")?;

            info!("Server shutdown complete");
            Ok(0)
        }
        Command::Discover => {
            let ctx = build_context(&config, args.root_folder.as_deref()).await?;
            let response = LocalInvoker::new(ctx)
                .discover(&discovery_request(&config))
                .await
                .context("Discovery failed")?;
            println!("{}", serde_json::to_string(&response)?);
            Ok(0)
        }
    }
}

fn discovery_request(config: &TomlConfig) -> DiscoveryRequest {
    DiscoveryRequest {
        lookback_hours: config.discovery.lookback_hours,
        form_types: config.discovery.form_types.clone(),
        tickers: config.discovery.tickers.clone(),
        max_items: config.discovery.max_items,
        pending_limit: config.discovery.pending_limit,
    }
}

/// Open the registry and artifact store and build the external clients
async fn build_context(config: &TomlConfig, cli_root: Option<&std::path::Path>) -> Result<StepContext> {
    let root_folder = config::resolve_root_folder(cli_root, config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db = scout_common::db::init_database(&config.database_path(&root_folder))
        .await
        .context("Failed to open registry")?;

    let artifact_root = config.artifact_root(&root_folder);
    std::fs::create_dir_all(&artifact_root)
        .with_context(|| format!("Failed to create artifact root {}", artifact_root.display()))?;
    info!("Artifact store: {}", artifact_root.display());

    let sec_api_key = config::resolve_secret(
        "Filing source API key",
        config::SEC_API_KEY_ENV_VAR,
        config.secrets.sec_api_key.as_ref(),
    )?;
    let genai_api_key = config::resolve_secret(
        "Generative model API key",
        config::GENAI_API_KEY_ENV_VAR,
        config.secrets.genai_api_key.as_ref(),
    )?;

    let filings = SecQueryClient::new(
        sec_api_key.clone(),
        config.discovery.requests_per_second,
        &config.timeouts,
    )?;
    let documents = FilingReaderClient::new(sec_api_key, &config.timeouts)?;
    let generator = GeminiClient::new(
        genai_api_key,
        config.enrichment.model.clone(),
        SamplingSettings::from(&config.enrichment),
        &config.timeouts,
    )?;

    Ok(StepContext {
        db,
        artifacts: Arc::new(FsArtifactStore::new(artifact_root)),
        layout: config.artifacts.clone(),
        filings: Arc::new(filings),
        documents: Arc::new(documents),
        generator: Arc::new(generator),
        enrichment: config.enrichment.clone(),
        branch_timeout: config.timeouts.branch_timeout(),
        enrich_company_profile: config.discovery.enrich_company_profile,
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
