//! Run orchestration.
//!
//! Fatal stages (resolve, load zones, harmonize, rasterize) run first and
//! abort the run on error. Partitions then fan out over the worker pool;
//! their outcomes are collected into write-once slots and the successful
//! fragments assembled.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use forcing_common::{plan_partitions, CrsDefinition, TimePartition};
use grid_processor::{CatalogResolver, SliceReader, VirtualArrayIndex};
use storage::StoreRouter;
use zonal::{rasterize, Harmonizer, ZoneSet};

use crate::config::{OutputLayout, PipelineConfig};
use crate::error::{ForcingError, Result};
use crate::materializer::{assemble, run_partition, step_footprint, PartitionContext};
use crate::outcome::{OutcomeSlots, PartitionOutcome, PartitionStatus, RunSummary};
use crate::output::{check_zone_files, write_summary, OutputPaths};
use crate::pool::WorkerPool;

pub struct Orchestrator {
    config: PipelineConfig,
    router: Arc<StoreRouter>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, router: Arc<StoreRouter>) -> Self {
        Self { config, router }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn load_zones(&self) -> Result<ZoneSet> {
        let zones = ZoneSet::from_path(&self.config.zones_path, &self.config.zone_id_property)?;
        match &self.config.zones_crs {
            Some(crs) => {
                let crs = CrsDefinition::parse(crs).map_err(|e| ForcingError::config(format!("zones_crs: {}", e)))?;
                Ok(zones.with_crs(crs))
            }
            None => Ok(zones),
        }
    }

    /// Steps per partition: the configured size, capped by what fits one
    /// worker's memory.
    fn partition_size(&self, pool: &WorkerPool, bytes_per_step: u64) -> Result<usize> {
        let max_steps = pool.max_partition_steps(bytes_per_step)?;
        match self.config.partition_size {
            Some(size) if size > max_steps => {
                warn!(
                    requested = size,
                    max_steps, bytes_per_step, "Partition size exceeds worker memory, reducing"
                );
                Ok(max_steps)
            }
            Some(size) => Ok(size),
            None => Ok(max_steps),
        }
    }

    #[instrument(skip_all, fields(start = %self.config.start, end = %self.config.end))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let range = self.config.time_range()?;

        let resolver = CatalogResolver::new(self.router.clone(), self.config.catalog.clone());
        let index: Arc<VirtualArrayIndex> = Arc::new(resolver.resolve(&range).await?);
        info!(steps = index.len(), "Resolved catalog");

        let zones = self.load_zones()?;
        let harmonized = Harmonizer::new(self.config.harmonize.clone()).harmonize(index.raster(), &zones)?;
        let layer = Arc::new(rasterize(&harmonized.zones, &harmonized.grid, self.config.cell_assignment)?);
        if self.config.output_layout == OutputLayout::PerZone {
            check_zone_files(harmonized.zones.ids())?;
        }

        let variables = self.config.column_variables();
        let bytes_per_step = step_footprint(&index, &variables, &layer.window())?;
        let pool = WorkerPool::new(self.config.workers, self.config.memory_per_worker)?;
        let size = self.partition_size(&pool, bytes_per_step)?;
        let partitions = plan_partitions(&index.times(), size).map_err(|e| ForcingError::config(e.to_string()))?;
        let pool = pool.capped(partitions.len());
        info!(
            partitions = partitions.len(),
            partition_size = size,
            workers = pool.size(),
            bytes_per_step,
            "Planned partitions"
        );

        let paths = OutputPaths::new(&self.config.output_dir);
        paths.prepare()?;

        let reader = SliceReader::new(self.router.clone(), index.clone(), self.config.reader.clone());
        let ctx = PartitionContext::new(reader, layer.clone(), self.config.columns.clone(), paths.clone());

        let outcomes = dispatch(&pool, &ctx, &partitions, &cancel).await?;

        let succeeded = outcomes.iter().filter(|o| o.status.is_success()).count();
        let total_zones = harmonized.zones.len();
        let (observed_zones, synthetic_zones) = if succeeded == 0 {
            warn!("No partition succeeded, skipping assembly");
            (0, Vec::new())
        } else {
            let zones = harmonized.zones;
            let columns: Vec<String> = self.config.columns.iter().map(|c| c.name.clone()).collect();
            let layout = self.config.output_layout;
            let missing_fill = self.config.missing_fill;
            let assembly_paths = paths.clone();
            let assembly_outcomes = outcomes.clone();
            let assembly = tokio::task::spawn_blocking(move || {
                assemble(&assembly_outcomes, &zones, &columns, &assembly_paths, layout, missing_fill)
            })
            .await
            .map_err(|e| ForcingError::output(format!("assembly task: {}", e)))??;
            (assembly.observed_zones, assembly.synthetic_zones)
        };

        let mut summary = RunSummary::from_outcomes(
            range.start.to_rfc3339(),
            range.end.to_rfc3339(),
            harmonized.crs_source,
            paths.root().to_path_buf(),
            outcomes,
        );
        summary.zones = total_zones;
        summary.observed_zones = observed_zones;
        summary.synthetic_zones = synthetic_zones;
        write_summary(&paths.summary(), &summary)?;

        info!(
            partitions = summary.partitions,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            synthetic = summary.synthetic_zones.len(),
            "Run complete"
        );
        Ok(summary)
    }
}

/// Run every partition on the pool. Stops dispatching once `cancel` fires;
/// tasks already running finish.
async fn dispatch(
    pool: &WorkerPool,
    ctx: &PartitionContext,
    partitions: &[TimePartition],
    cancel: &CancellationToken,
) -> Result<Vec<PartitionOutcome>> {
    let slots = OutcomeSlots::new(partitions.to_vec());
    let mut tasks: JoinSet<PartitionOutcome> = JoinSet::new();
    let mut running: HashMap<Id, TimePartition> = HashMap::with_capacity(partitions.len());

    for &partition in partitions {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = pool.acquire() => Some(permit.map_err(|e| ForcingError::config(e.to_string()))?),
        };
        let Some(permit) = permit.filter(|_| !cancel.is_cancelled()) else {
            warn!(partition = partition.index, "Cancelled, no further partitions dispatched");
            break;
        };

        let ctx = ctx.clone();
        let handle = tasks.spawn(async move {
            let _permit = permit;
            AssertUnwindSafe(run_partition(&ctx, partition))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let cause = format!("task panicked: {}", panic_message(panic.as_ref()));
                    error!(partition = partition.index, %cause, "Partition panicked");
                    PartitionOutcome {
                        partition,
                        status: PartitionStatus::Failed { cause },
                    }
                })
        });
        running.insert(handle.id(), partition);
    }

    collect_outcomes(&mut tasks, &running, &slots).await?;
    Ok(slots.into_outcomes())
}

/// Drain `tasks` into `slots`. A task that ends without an outcome is
/// recorded as failed with the join error as its cause.
async fn collect_outcomes(
    tasks: &mut JoinSet<PartitionOutcome>,
    running: &HashMap<Id, TimePartition>,
    slots: &OutcomeSlots,
) -> Result<()> {
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, outcome)) => slots.record(outcome.partition.index, outcome.status)?,
            Err(e) => {
                let partition = running
                    .get(&e.id())
                    .ok_or_else(|| ForcingError::output(format!("join error from unknown task: {}", e)))?;
                let cause = format!("task did not complete: {}", e);
                error!(partition = partition.index, %cause, "Partition task failed");
                slots.record(partition.index, PartitionStatus::Failed { cause })?;
            }
        }
    }
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::path::PathBuf;

    fn partitions(n: usize) -> Vec<TimePartition> {
        let t0 = Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap();
        let times: Vec<_> = (0..n).map(|i| t0 + Duration::hours(i as i64)).collect();
        plan_partitions(&times, 1).unwrap()
    }

    #[tokio::test]
    async fn test_aborted_task_is_recorded_as_failed() {
        let partitions = partitions(3);
        let slots = OutcomeSlots::new(partitions.clone());
        let mut tasks: JoinSet<PartitionOutcome> = JoinSet::new();
        let mut running = HashMap::new();

        let done = partitions[0];
        let handle = tasks.spawn(async move {
            PartitionOutcome {
                partition: done,
                status: PartitionStatus::Succeeded {
                    zones: 1,
                    rows: 1,
                    fragment: PathBuf::from("part-00000.csv"),
                },
            }
        });
        running.insert(handle.id(), done);

        let stuck = partitions[1];
        let handle = tasks.spawn(async move {
            std::future::pending::<()>().await;
            PartitionOutcome {
                partition: stuck,
                status: PartitionStatus::Cancelled,
            }
        });
        running.insert(handle.id(), stuck);
        handle.abort();

        collect_outcomes(&mut tasks, &running, &slots).await.unwrap();

        let outcomes = slots.into_outcomes();
        assert!(outcomes[0].status.is_success());
        match &outcomes[1].status {
            PartitionStatus::Failed { cause } => assert!(cause.contains("did not complete"), "{}", cause),
            other => panic!("expected a failure, got {:?}", other),
        }
        // never spawned
        assert_eq!(outcomes[2].status, PartitionStatus::Cancelled);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(panic_message(boxed.as_ref()), "index out of bounds");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
