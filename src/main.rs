//! Fraud Sentinel - Main Entry Point
//!
//! Polls the transaction source, scores each transaction, records the
//! decision and alerts on fraud. Runs one or more independent loops.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use fraud_sentinel::{
    alerts::{AlertSink, LogAlertSink, NatsAlertSink, WebhookAlertSink},
    config::{AlertMethod, AppConfig, LoggingConfig, StoreBackend, DEFAULT_CONFIG_PATH},
    features::FeatureSchema,
    metrics::SummaryReporter,
    models::{OnnxScorer, Scorer},
    orchestrator::{Components, Orchestrator, PollPolicy},
    report::render_daily_report,
    source::{HttpTransactionSource, TransactionSource},
    store::{MemoryResultStore, PgResultStore, ReportWindow, ResultStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Real-time transaction fraud scoring loop
#[derive(Debug, Parser)]
#[command(name = "fraud-sentinel", version, about = "Real-time transaction fraud scoring loop")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the polling loop
    Run {
        /// Number of independent loops (overrides pipeline.workers)
        #[arg(long)]
        workers: Option<usize>,
        /// Run a single cycle per loop and exit
        #[arg(long)]
        once: bool,
    },
    /// Query the transaction source's health endpoint
    Health,
    /// Print the daily aggregate report (default: yesterday, UTC)
    Report {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Look up a recorded transaction
    Lookup {
        transaction_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from_path(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Run { workers, once } => run(config, workers, once).await,
        Commands::Health => health(&config).await,
        Commands::Report { date } => report(&config, date).await,
        Commands::Lookup { transaction_id } => lookup(&config, &transaction_id).await,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!("fraud_sentinel={}", logging.level)),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if logging.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))
}

async fn run(config: AppConfig, workers: Option<usize>, once: bool) -> Result<()> {
    info!("Starting Fraud Sentinel");

    let threshold = config.threshold()?;
    info!(
        "Detection threshold: {:.2}, Alert levels: low<{:.2}, medium<{:.2}, high<{:.2}",
        threshold.value(),
        config.detection.risk_levels.low,
        config.detection.risk_levels.medium,
        config.detection.risk_levels.high
    );

    let scorer = load_scorer(&config)?;
    let store = open_store(&config).await?;
    let sink = build_sink(&config).await?;

    let http_source = HttpTransactionSource::new(&config.source)?;
    info!(url = %http_source.transaction_url(), "Polling transaction source");
    let source: Arc<dyn TransactionSource> = Arc::new(http_source);
    match source.health().await {
        Ok(health) if health.is_healthy() => info!(
            status = %health.status,
            transactions_available = ?health.transactions_available,
            "Transaction source is healthy"
        ),
        Ok(health) => warn!(status = %health.status, "Transaction source reports unhealthy"),
        Err(e) => warn!(error = %e, "Transaction source health check failed"),
    }

    let components = Components::new(source, scorer, store, sink);
    let policy = PollPolicy::from_config(&config);
    let workers = workers.unwrap_or(config.pipeline.workers).max(1);

    if once {
        for worker in 0..workers {
            let orchestrator = Orchestrator::new(worker, components.clone(), threshold, policy);
            let outcome = orchestrator.run_cycle().await;
            info!(worker, ?outcome, "Single cycle finished");
        }
        return Ok(());
    }

    info!(workers, "Starting polling loops");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        });
    }

    let mut tasks = Vec::with_capacity(workers * 2);
    for worker in 0..workers {
        let orchestrator = Orchestrator::new(worker, components.clone(), threshold, policy);

        let reporter = SummaryReporter::new(orchestrator.stats(), config.pipeline.summary_interval());
        tasks.push(tokio::spawn(reporter.run(shutdown.clone())));

        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move { orchestrator.run(token).await }));
    }

    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "Worker task terminated abnormally");
        }
    }

    info!("Fraud Sentinel shut down");
    Ok(())
}

fn load_scorer(config: &AppConfig) -> Result<Arc<dyn Scorer>> {
    let schema = match &config.model.schema_path {
        Some(path) => FeatureSchema::load(path)?,
        None => FeatureSchema::v1(),
    };
    info!(
        schema_version = %schema.version,
        features = schema.width(),
        "Feature schema ready"
    );
    debug!(columns = ?schema.column_names(), "Model input columns");

    let scorer = OnnxScorer::load(
        &config.model.path,
        &config.model.version,
        Arc::new(schema),
        config.model.onnx_threads,
    )
    .with_context(|| format!("Failed to load model from {}", config.model.path.display()))?;

    Ok(Arc::new(scorer))
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn ResultStore>> {
    let store: Arc<dyn ResultStore> = match config.store.backend {
        StoreBackend::Postgres => Arc::new(PgResultStore::connect(&config.store).await?),
        StoreBackend::Memory => {
            warn!("Using the in-memory result store; decisions are lost on exit");
            Arc::new(MemoryResultStore::new())
        }
    };

    store
        .ensure_schema()
        .await
        .context("Failed to prepare the result store")?;
    Ok(store)
}

async fn build_sink(config: &AppConfig) -> Result<Arc<dyn AlertSink>> {
    let alerts = &config.alerts;
    let risk_levels = config.detection.risk_levels.clone();

    let sink: Arc<dyn AlertSink> = match alerts.method {
        AlertMethod::Log => Arc::new(LogAlertSink::new(risk_levels)),
        AlertMethod::Nats => {
            let url = alerts.nats_url.as_deref().context("alerts.nats_url is not set")?;
            Arc::new(NatsAlertSink::connect(url, &alerts.nats_subject, risk_levels).await?)
        }
        AlertMethod::Webhook => {
            let url = alerts.webhook_url.as_deref().context("alerts.webhook_url is not set")?;
            let timeout = Duration::from_millis(config.pipeline.notify_timeout_ms);
            Arc::new(WebhookAlertSink::new(url, timeout, risk_levels)?)
        }
    };

    info!(transport = sink.transport(), "Alert sink ready");
    Ok(sink)
}

async fn health(config: &AppConfig) -> Result<()> {
    let source = HttpTransactionSource::new(&config.source)?;
    let health = source.health().await.context("Health check failed")?;

    println!("status: {}", health.status);
    if let Some(ts) = &health.timestamp {
        println!("timestamp: {ts}");
    }
    if let Some(n) = health.transactions_available {
        println!("transactions_available: {n}");
    }

    if !health.is_healthy() {
        bail!("transaction source is not healthy");
    }
    Ok(())
}

async fn report(config: &AppConfig, date: Option<NaiveDate>) -> Result<()> {
    let date = match date {
        Some(date) => date,
        None => Utc::now()
            .date_naive()
            .pred_opt()
            .context("Cannot determine yesterday's date")?,
    };

    let store = open_store(config).await?;
    let summary = store.summary(ReportWindow::for_day(date)).await?;
    info!(%date, total = summary.total_transactions, frauds = summary.fraud_count, "Report query complete");

    println!("{}", render_daily_report(&summary, date, Utc::now().naive_utc()));
    if summary.fraud_count > 0 {
        warn!("ALERT: {} fraudulent transactions detected on {}", summary.fraud_count, date);
    }
    Ok(())
}

async fn lookup(config: &AppConfig, transaction_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    match store.get(transaction_id).await? {
        Some(scored) => {
            println!("{}", serde_json::to_string_pretty(&scored)?);
            Ok(())
        }
        None => bail!("transaction {transaction_id} has not been recorded"),
    }
}
