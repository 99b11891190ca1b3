//! Zonal forcing collector.
//!
//! Aggregates a remote gridded forcing catalog onto catchment polygons and
//! writes one forcing table per catchment:
//! - Resolves kerchunk-style reference descriptors into one virtual index
//! - Reads only the chunks the zones touch, partition by partition
//! - Records failed partitions instead of aborting the run
//! - Gap-fills catchments the grid does not cover

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pipeline::{parse_memory, ForcingError, Orchestrator, OutputLayout, PipelineConfig};
use storage::StoreRouter;
use zonal::CellAssignment;

#[derive(Parser, Debug)]
#[command(name = "forcing-collector")]
#[command(about = "Zonal forcing collection from remote chunked catalogs")]
struct Args {
    /// YAML run configuration; environment variables are used when absent
    #[arg(short, long, env = "COLLECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// First timestamp, inclusive
    #[arg(long)]
    start: Option<String>,

    /// Last timestamp, inclusive
    #[arg(long)]
    end: Option<String>,

    /// Zone polygons (GeoJSON FeatureCollection)
    #[arg(long)]
    zones: Option<PathBuf>,

    /// Feature property holding the zone id
    #[arg(long)]
    zone_id_property: Option<String>,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Catalog root URL (s3://, http(s)://, file://)
    #[arg(long)]
    catalog_root: Option<String>,

    /// Worker count
    #[arg(long)]
    workers: Option<usize>,

    /// Memory ceiling per worker, e.g. 3GB
    #[arg(long)]
    memory_per_worker: Option<String>,

    /// Time steps per partition
    #[arg(long)]
    partition_size: Option<usize>,

    /// centroid or all_touched
    #[arg(long)]
    cell_assignment: Option<CellAssignment>,

    /// per_zone or combined
    #[arg(long)]
    layout: Option<OutputLayout>,

    /// Projection used when the raster carries no usable CRS
    #[arg(long)]
    fallback_projection: Option<String>,

    /// S3-compatible endpoint
    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(v) = self.start {
            config.start = v;
        }
        if let Some(v) = self.end {
            config.end = v;
        }
        if let Some(v) = self.zones {
            config.zones_path = v;
        }
        if let Some(v) = self.zone_id_property {
            config.zone_id_property = v;
        }
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.catalog_root {
            config.catalog.root = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.memory_per_worker {
            config.memory_per_worker = parse_memory(&v).map_err(|e| anyhow!(e))?;
        }
        if let Some(v) = self.partition_size {
            config.partition_size = Some(v);
        }
        if let Some(v) = self.cell_assignment {
            config.cell_assignment = v;
        }
        if let Some(v) = self.layout {
            config.output_layout = v;
        }
        if let Some(v) = self.fallback_projection {
            config.harmonize.fallback_projection = Some(v);
        }
        if let Some(v) = self.s3_endpoint {
            config.s3.endpoint = Some(v);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_yaml(path)?,
        None => PipelineConfig::from_env(),
    };
    args.apply(&mut config)?;
    config.validate().map_err(|e| anyhow!("invalid configuration: {}", e))?;

    info!(
        start = %config.start,
        end = %config.end,
        catalog = %config.catalog.root,
        zones = %config.zones_path.display(),
        workers = config.workers,
        "Starting forcing collection"
    );

    let router = Arc::new(StoreRouter::new(config.s3.clone()));
    let orchestrator = Orchestrator::new(config, router);

    // Handle Ctrl+C: stop dispatching, let running partitions finish
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        cancel_on_signal.cancel();
    });

    let summary = match orchestrator.run(cancel).await {
        Ok(summary) => summary,
        Err(e @ ForcingError::EmptyRange { .. }) => {
            warn!(error = %e, "Nothing to collect");
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "Run aborted");
            return Err(e.into());
        }
    };

    for failure in &summary.failures {
        warn!(
            partition = failure.partition,
            start = %failure.start_time,
            end = %failure.end_time,
            cause = %failure.cause,
            "Partition failed"
        );
    }
    info!(
        partitions = summary.partitions,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled = summary.cancelled,
        synthetic_zones = summary.synthetic_zones.len(),
        output_dir = %summary.output_dir.display(),
        "Collection complete"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
