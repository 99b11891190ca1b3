//! Partition outcomes and the run summary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

use forcing_common::TimePartition;
use zonal::CrsSource;

use crate::error::{ForcingError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PartitionStatus {
    Succeeded {
        /// Zones with data in this partition.
        zones: usize,
        rows: usize,
        fragment: PathBuf,
    },
    Failed {
        cause: String,
    },
    /// Never dispatched because the run was cancelled.
    Cancelled,
}

impl PartitionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, PartitionStatus::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionOutcome {
    pub partition: TimePartition,
    pub status: PartitionStatus,
}

impl PartitionOutcome {
    pub fn fragment(&self) -> Option<&PathBuf> {
        match &self.status {
            PartitionStatus::Succeeded { fragment, .. } => Some(fragment),
            _ => None,
        }
    }

    /// The failure as a [`ForcingError::PartitionFailure`].
    pub fn error(&self) -> Option<ForcingError> {
        match &self.status {
            PartitionStatus::Failed { cause } => Some(ForcingError::PartitionFailure {
                partition: self.partition.index,
                cause: cause.clone(),
            }),
            _ => None,
        }
    }
}

/// One write-once slot per planned partition.
#[derive(Debug)]
pub struct OutcomeSlots {
    partitions: Vec<TimePartition>,
    slots: Vec<OnceLock<PartitionStatus>>,
}

impl OutcomeSlots {
    pub fn new(partitions: Vec<TimePartition>) -> Self {
        let slots = partitions.iter().map(|_| OnceLock::new()).collect();
        Self { partitions, slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    pub fn get(&self, index: usize) -> Option<&PartitionStatus> {
        self.slots.get(index).and_then(OnceLock::get)
    }

    /// Record the outcome of partition `index`. A slot accepts one write.
    pub fn record(&self, index: usize, status: PartitionStatus) -> Result<()> {
        let slot = self
            .slots
            .get(index)
            .ok_or_else(|| ForcingError::output(format!("no outcome slot for partition {}", index)))?;
        slot.set(status)
            .map_err(|_| ForcingError::output(format!("outcome of partition {} recorded twice", index)))
    }

    /// Outcomes in partition order. Unwritten slots become `Cancelled`.
    pub fn into_outcomes(self) -> Vec<PartitionOutcome> {
        self.partitions
            .into_iter()
            .zip(self.slots)
            .map(|(partition, slot)| PartitionOutcome {
                partition,
                status: slot.into_inner().unwrap_or(PartitionStatus::Cancelled),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionFailureReport {
    pub partition: usize,
    pub start_time: String,
    pub end_time: String,
    pub cause: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub start: String,
    pub end: String,
    pub steps: usize,
    pub partitions: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub zones: usize,
    pub observed_zones: usize,
    pub synthetic_zones: Vec<String>,
    pub crs_source: CrsSource,
    pub output_dir: PathBuf,
    pub failures: Vec<PartitionFailureReport>,
    pub outcomes: Vec<PartitionOutcome>,
}

impl RunSummary {
    /// Tally `outcomes`; the zone counts are filled in by the caller.
    pub fn from_outcomes(
        start: String,
        end: String,
        crs_source: CrsSource,
        output_dir: PathBuf,
        outcomes: Vec<PartitionOutcome>,
    ) -> Self {
        let mut summary = Self {
            start,
            end,
            steps: outcomes.iter().map(|o| o.partition.len()).sum(),
            partitions: outcomes.len(),
            succeeded: 0,
            failed: 0,
            cancelled: 0,
            zones: 0,
            observed_zones: 0,
            synthetic_zones: Vec::new(),
            crs_source,
            output_dir,
            failures: Vec::new(),
            outcomes: Vec::new(),
        };

        for outcome in &outcomes {
            match &outcome.status {
                PartitionStatus::Succeeded { .. } => summary.succeeded += 1,
                PartitionStatus::Cancelled => summary.cancelled += 1,
                PartitionStatus::Failed { cause } => {
                    summary.failed += 1;
                    summary.failures.push(PartitionFailureReport {
                        partition: outcome.partition.index,
                        start_time: outcome.partition.start_time.to_rfc3339(),
                        end_time: outcome.partition.end_time.to_rfc3339(),
                        cause: cause.clone(),
                    });
                }
            }
        }
        summary.outcomes = outcomes;
        summary
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use forcing_common::plan_partitions;

    fn partitions(n: usize) -> Vec<TimePartition> {
        let t0 = Utc.with_ymd_and_hms(2012, 3, 1, 0, 0, 0).unwrap();
        let times: Vec<_> = (0..n * 2).map(|i| t0 + Duration::hours(i as i64)).collect();
        plan_partitions(&times, 2).unwrap()
    }

    fn succeeded() -> PartitionStatus {
        PartitionStatus::Succeeded {
            zones: 1,
            rows: 2,
            fragment: PathBuf::from("part.csv"),
        }
    }

    #[test]
    fn test_slots_are_write_once() {
        let slots = OutcomeSlots::new(partitions(3));
        slots.record(1, succeeded()).unwrap();
        assert!(slots.record(1, PartitionStatus::Cancelled).is_err());
        assert!(slots.record(3, succeeded()).is_err());
        assert_eq!(slots.filled(), 1);
        assert_eq!(slots.get(1), Some(&succeeded()));
    }

    #[test]
    fn test_unwritten_slots_are_cancelled() {
        let slots = OutcomeSlots::new(partitions(3));
        slots.record(0, succeeded()).unwrap();
        slots.record(2, PartitionStatus::Failed { cause: "boom".to_string() }).unwrap();

        let outcomes = slots.into_outcomes();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[1].status, PartitionStatus::Cancelled);
        assert_eq!(outcomes[2].partition.index, 2);
        assert!(matches!(
            outcomes[2].error(),
            Some(ForcingError::PartitionFailure { partition: 2, .. })
        ));
    }

    #[test]
    fn test_summary_counts_and_serializes() {
        let slots = OutcomeSlots::new(partitions(3));
        slots.record(0, succeeded()).unwrap();
        slots.record(1, PartitionStatus::Failed { cause: "read failed".to_string() }).unwrap();

        let summary = RunSummary::from_outcomes(
            "2012-03-01".to_string(),
            "2012-03-01".to_string(),
            CrsSource::Attribute("crs_wkt".to_string()),
            PathBuf::from("out"),
            slots.into_outcomes(),
        );
        assert_eq!((summary.succeeded, summary.failed, summary.cancelled), (1, 1, 1));
        assert_eq!(summary.steps, 6);
        assert_eq!(summary.failures[0].partition, 1);
        assert!(!summary.is_complete());

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains(r#""state":"failed""#));
        let back: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
