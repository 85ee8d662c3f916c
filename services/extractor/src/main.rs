use anyhow::{bail, Context, Result};
use clap::Parser;
use image_extractor::config::DatasetConfig;
use image_extractor::{
    BatchProcessor, BlobStore, Config, Dataset, MemoryBlobStore, MemoryTimeSeriesSink,
    PgTimeSeriesSink, S3BlobStore, TimeSeriesSink,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Extract camera frames from tabular recordings into S3 and PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "image-extractor", version, about)]
struct Cli {
    /// Extra configuration file layered over the default locations
    #[arg(long, short = 'c', env = "EXTRACTOR_CONFIG")]
    config: Option<String>,

    /// Decode and mirror locally, keep blobs and time series in memory
    #[arg(long)]
    dry_run: bool,

    /// Dataset to process as PATH=SUFFIX; replaces configured datasets
    #[arg(long = "dataset", short = 'd', value_parser = parse_dataset)]
    datasets: Vec<DatasetConfig>,
}

fn parse_dataset(arg: &str) -> Result<DatasetConfig, String> {
    DatasetConfig::parse_arg(arg).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if !cli.datasets.is_empty() {
        config.datasets = cli.datasets.clone();
    }

    // Initialize logging
    init_tracing(&config.service.log_level);

    config
        .validate(cli.dry_run)
        .context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        datasets = config.datasets.len(),
        dry_run = cli.dry_run,
        "Starting image extractor"
    );

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    if config.datasets.is_empty() {
        warn!("No datasets configured, nothing to do");
        return Ok(());
    }

    // Connections are opened once and shared by every dataset
    let blob_store: Arc<dyn BlobStore>;
    let timeseries: Arc<dyn TimeSeriesSink>;
    if cli.dry_run {
        blob_store = Arc::new(MemoryBlobStore::new());
        timeseries = Arc::new(MemoryTimeSeriesSink::new());
    } else {
        blob_store = Arc::new(S3BlobStore::new(&config.s3).await);
        timeseries = Arc::new(
            PgTimeSeriesSink::new(&config.database)
                .await
                .context("Failed to initialize time-series sink")?,
        );
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Finishing the current row before stopping");
        shutdown.cancel();
    });

    let processor = BatchProcessor::new(blob_store, timeseries, config.output.base_dir.clone())
        .with_progress_every(config.output.progress_every)
        .with_cancellation(cancel.clone());

    let mut failed_datasets = 0;

    for dataset_config in &config.datasets {
        if cancel.is_cancelled() {
            break;
        }

        let suffix = &dataset_config.suffix;
        info!(
            suffix = %suffix,
            path = %dataset_config.path.display(),
            "Loading dataset"
        );

        let dataset = match Dataset::from_csv_path(&dataset_config.path) {
            Ok(dataset) => dataset,
            Err(e) => {
                error!(suffix = %suffix, error = %e, "Failed to load dataset");
                failed_datasets += 1;
                continue;
            }
        };

        match processor.process(&dataset, suffix).await {
            Ok(report) => {
                info!(
                    suffix = %suffix,
                    processed = report.processed,
                    failed = report.failed,
                    total = report.total,
                    "Done: {}/{} frames extracted",
                    report.processed,
                    report.total
                );
            }
            Err(e) => {
                error!(suffix = %suffix, error = %e, "Batch aborted");
                failed_datasets += 1;
            }
        }
    }

    if failed_datasets > 0 {
        bail!("{} dataset(s) could not be processed", failed_datasets);
    }

    info!("Image extractor finished");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
