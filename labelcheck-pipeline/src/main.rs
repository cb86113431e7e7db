//! labelcheck-pipeline - label compliance pipeline service
//!
//! `serve` runs the HTTP API with the in-process dispatcher (or HTTP push
//! transport) and the stalled-job sweeper. `run-local` evaluates facts files
//! in sequential mode and prints the report.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use labelcheck_common::config::{default_config_path, load_toml_or_default, prepare_root_folder, resolve_root_folder};
use labelcheck_common::db::DatabaseOptions;
use labelcheck_common::events::EventBus;
use labelcheck_pipeline::config::{ServiceConfig, TransportMode, CONFIG_FILE_NAME};
use labelcheck_pipeline::coordinator::{local, sweeper, PipelineContext};
use labelcheck_pipeline::db::{self, jobs, reports};
use labelcheck_pipeline::models::JobStatus;
use labelcheck_pipeline::services::{
    ChannelTransport, Dispatcher, EvaluationService, ExtractionService, FixtureExtractionService,
    HttpEvaluationClient, HttpExtractionClient, HttpPushTransport, MessageTransport,
    OfflineEvaluator, QueueTransport, RuleDetector,
};
use labelcheck_pipeline::{build_router, AppState};

/// Command-line arguments for labelcheck-pipeline
/// Facts files served by offline extraction, relative to the root folder
const FIXTURES_DIR: &str = "fixtures";

#[derive(Parser, Debug)]
#[command(name = "labelcheck-pipeline")]
#[command(about = "Label compliance pipeline service")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.config/labelcheck/labelcheck.toml)
    #[arg(long, global = true, env = "LABELCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(long, global = true)]
    root_folder: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Listen address (overrides bind_address from the config file)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Evaluate facts files sequentially and print the report
    RunLocal {
        /// Facts JSON files, one per label image
        #[arg(long, required = true, num_args = 1..)]
        facts: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| default_config_path(CONFIG_FILE_NAME));
    let mut config: ServiceConfig = load_toml_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    config.apply_env_overrides();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.common.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(config.common.logging.show_target))
        .init();

    info!("Starting labelcheck-pipeline v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(cli.root_folder.as_deref(), Some(&config.common));
    let db_path = prepare_root_folder(&root_folder)?;
    info!("Database: {}", db_path.display());

    let pool = db::open_pool(&db_path, &DatabaseOptions::default())
        .await
        .context("Failed to open database")?;

    match cli.command {
        Command::Serve { bind } => {
            // Request-supplied image refs may only name files under the fixtures folder
            let fixtures = root_folder.join(FIXTURES_DIR);
            let (extraction, evaluation) = build_services(&config, Some(fixtures))?;
            let bind = bind.unwrap_or_else(|| config.bind_address().to_string());
            serve(pool, extraction, evaluation, &config, &bind).await
        }
        Command::RunLocal { facts } => {
            let (extraction, evaluation) = build_services(&config, None)?;
            run_local(pool, extraction, evaluation, &config, facts).await
        }
    }
}

/// HTTP clients when endpoints are configured, offline stand-ins otherwise
///
/// Offline extraction reads facts files; `fixture_dir` confines it to one folder.
fn build_services(
    config: &ServiceConfig,
    fixture_dir: Option<PathBuf>,
) -> Result<(Arc<dyn ExtractionService>, Arc<dyn EvaluationService>)> {
    let extraction: Arc<dyn ExtractionService> = match &config.services.extraction_url {
        Some(url) => {
            info!("Extraction service: {}", url);
            Arc::new(HttpExtractionClient::new(
                url.clone(),
                Duration::from_secs(config.pipeline.extraction_timeout_secs),
            )?)
        }
        None => match fixture_dir {
            Some(dir) => {
                info!("Extraction service: offline (facts files under {})", dir.display());
                Arc::new(FixtureExtractionService::with_base_dir(dir))
            }
            None => {
                info!("Extraction service: offline (image refs are facts files)");
                Arc::new(FixtureExtractionService::new())
            }
        },
    };

    let evaluation: Arc<dyn EvaluationService> = match &config.services.evaluation_url {
        Some(url) => {
            info!("Evaluation service: {}", url);
            Arc::new(HttpEvaluationClient::new(
                url.clone(),
                Duration::from_secs(config.pipeline.evaluation_timeout_secs),
            )?)
        }
        None => {
            info!("Evaluation service: offline (every question needs review)");
            Arc::new(OfflineEvaluator)
        }
    };

    Ok((extraction, evaluation))
}

async fn serve(
    pool: sqlx::SqlitePool,
    extraction: Arc<dyn ExtractionService>,
    evaluation: Arc<dyn EvaluationService>,
    config: &ServiceConfig,
    bind: &str,
) -> Result<()> {
    let event_bus = EventBus::new(1000);

    let (transport, channel) = match config.transport.mode {
        TransportMode::Channel => {
            let (transport, rx) = ChannelTransport::new();
            (Arc::new(transport.clone()) as Arc<dyn MessageTransport>, Some((transport, rx)))
        }
        TransportMode::Http => {
            let base_url = config
                .transport
                .push_base_url
                .clone()
                .unwrap_or_else(|| format!("http://{}", bind));
            info!("Push transport: {}", base_url);
            let transport = HttpPushTransport::new(
                base_url,
                Duration::from_secs(config.transport.push_timeout_secs),
            )?;
            (Arc::new(transport) as Arc<dyn MessageTransport>, None)
        }
    };

    let ctx = Arc::new(
        PipelineContext::new(pool, transport)
            .with_extraction(extraction)
            .with_evaluation(evaluation)
            .with_detector(Arc::new(RuleDetector))
            .with_config(config.pipeline.clone())
            .with_event_bus(event_bus),
    );

    let dispatcher = channel.map(|(transport, rx)| {
        Dispatcher::new(
            Arc::clone(&ctx),
            &transport,
            rx,
            config.transport.dispatcher_options(),
        )
        .spawn()
    });
    let sweeper = sweeper::spawn_sweeper(Arc::clone(&ctx));

    let state = AppState::new(ctx)
        .with_transport(config.transport.mode, config.transport.dispatcher_options());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    if let Some(dispatcher) = dispatcher {
        dispatcher.abort();
    }
    info!("Server shutdown complete");
    Ok(())
}

async fn run_local(
    pool: sqlx::SqlitePool,
    extraction: Arc<dyn ExtractionService>,
    evaluation: Arc<dyn EvaluationService>,
    config: &ServiceConfig,
    facts: Vec<PathBuf>,
) -> Result<()> {
    let base = PipelineContext::new(pool, Arc::new(QueueTransport::new()))
        .with_extraction(extraction)
        .with_evaluation(evaluation)
        .with_config(config.pipeline.clone());
    let (ctx, queue) = local::sequential_context(base);

    let image_refs: Vec<String> = facts
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();

    let (job, outcomes) = local::submit_and_run(&ctx, &queue, &image_refs).await?;
    info!(job_id = %job.job_id, steps = outcomes.len(), "Sequential run finished");

    let Some(view) = jobs::job_status(&ctx.pool, job.job_id).await? else {
        bail!("job {} disappeared", job.job_id);
    };
    if view.status != JobStatus::Done {
        bail!(
            "job {} ended in {}: {}",
            job.job_id,
            view.status,
            view.failure_reason.unwrap_or_default()
        );
    }

    let report = reports::load_report(&ctx.pool, job.job_id)
        .await?
        .context("report missing for DONE job")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
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
            Ok(mut sig) => {
                sig.recv().await;
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
