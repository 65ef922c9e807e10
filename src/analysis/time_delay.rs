//! Time-Delay Anomaly Detector: flags results whose elapsed time
//! exceeds a baseline by at least `time_threshold` seconds, optionally
//! partitioned into timing-payload vs. other requests.

use serde::{Deserialize, Serialize};

use super::{is_timing_payload, payload_of};
use crate::job::JobResultRecord;

/// How to compute the baseline elapsed time a result is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    FirstRequest,
    Median,
    Mean,
}

/// Time-Delay Anomaly Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeDelayConfig {
    pub time_threshold_secs: f64,
    pub baseline_method: BaselineMethod,
    /// Partition results by whether their payload contains a known timing
    /// keyword (`SLEEP`, `WAITFOR`, ...) before computing a baseline.
    pub partition_by_payload_type: bool,
}

impl Default for TimeDelayConfig {
    fn default() -> Self {
        Self {
            time_threshold_secs: 5.0,
            baseline_method: BaselineMethod::Median,
            partition_by_payload_type: true,
        }
    }
}

/// One flagged result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeDelayFinding {
    pub ordinal: usize,
    pub elapsed_ms: u64,
    pub baseline_ms: f64,
    pub payload: Option<String>,
}

/// Per-partition baseline plus its flagged findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionReport {
    pub label: String,
    pub baseline_ms: f64,
    pub findings: Vec<TimeDelayFinding>,
}

/// Aggregate result of running the detector over a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeDelayReport {
    pub partitions: Vec<PartitionReport>,
}

impl TimeDelayReport {
    #[must_use]
    pub fn flagged_count(&self) -> usize {
        self.partitions.iter().map(|p| p.findings.len()).sum()
    }

    /// The `n` slowest flagged entries across all partitions.
    #[must_use]
    pub fn slowest(&self, n: usize) -> Vec<TimeDelayFinding> {
        let mut all: Vec<TimeDelayFinding> = self
            .partitions
            .iter()
            .flat_map(|p| p.findings.iter().cloned())
            .collect();
        all.sort_by(|a, b| b.elapsed_ms.cmp(&a.elapsed_ms));
        all.truncate(n);
        all
    }
}

fn baseline_of(successful: &[&JobResultRecord], method: BaselineMethod) -> f64 {
    if successful.is_empty() {
        return 0.0;
    }
    match method {
        BaselineMethod::FirstRequest => successful[0].outcome.elapsed_ms as f64,
        BaselineMethod::Mean => {
            let sum: u64 = successful.iter().map(|r| r.outcome.elapsed_ms).sum();
            sum as f64 / successful.len() as f64
        }
        BaselineMethod::Median => {
            let mut elapsed: Vec<u64> = successful.iter().map(|r| r.outcome.elapsed_ms).collect();
            elapsed.sort_unstable();
            let mid = elapsed.len() / 2;
            if elapsed.len() % 2 == 0 {
                (elapsed[mid - 1] + elapsed[mid]) as f64 / 2.0
            } else {
                elapsed[mid] as f64
            }
        }
    }
}

fn scan_partition(records: &[&JobResultRecord], config: &TimeDelayConfig, label: &str) -> PartitionReport {
    let successful: Vec<&JobResultRecord> = records
        .iter()
        .filter(|r| r.outcome.error.is_none())
        .copied()
        .collect();
    let baseline = baseline_of(&successful, config.baseline_method);
    let threshold_ms = config.time_threshold_secs * 1000.0;

    let findings = successful
        .iter()
        .filter(|r| (r.outcome.elapsed_ms as f64) - baseline >= threshold_ms)
        .map(|r| TimeDelayFinding {
            ordinal: r.ordinal,
            elapsed_ms: r.outcome.elapsed_ms,
            baseline_ms: baseline,
            payload: payload_of(&r.provenance),
        })
        .collect();

    PartitionReport {
        label: label.to_string(),
        baseline_ms: baseline,
        findings,
    }
}

/// Run the detector over `results`.
#[must_use]
pub fn scan(results: &[JobResultRecord], config: &TimeDelayConfig) -> TimeDelayReport {
    if !config.partition_by_payload_type {
        let all: Vec<&JobResultRecord> = results.iter().collect();
        return TimeDelayReport {
            partitions: vec![scan_partition(&all, config, "all")],
        };
    }

    let (timing, other): (Vec<&JobResultRecord>, Vec<&JobResultRecord>) = results.iter().partition(|r| {
        payload_of(&r.provenance).is_some_and(|p| is_timing_payload(&p))
    });

    TimeDelayReport {
        partitions: vec![
            scan_partition(&timing, config, "timing_payload"),
            scan_partition(&other, config, "other"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expansion::Provenance;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(ordinal: usize, elapsed_ms: u64, payload: &str) -> JobResultRecord {
        JobResultRecord {
            job_id: Uuid::new_v4(),
            ordinal,
            request: String::new(),
            provenance: Provenance::Sniper {
                payload: payload.to_string(),
                position: 1,
            },
            outcome: crate::executor::ExecutionOutcome {
                status_code: Some(200),
                headers: vec![],
                body: String::new(),
                elapsed_ms,
                error: None,
                final_url: String::new(),
                actual_request: String::new(),
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn flags_result_exceeding_median_baseline_by_threshold() {
        let results = vec![
            record(1, 100, "a"),
            record(2, 110, "b"),
            record(3, 6000, "' OR SLEEP(5)--"),
        ];
        let config = TimeDelayConfig {
            time_threshold_secs: 5.0,
            baseline_method: BaselineMethod::Median,
            partition_by_payload_type: true,
        };
        let report = scan(&results, &config);
        assert_eq!(report.flagged_count(), 1);
        let flagged = report.slowest(1);
        assert_eq!(flagged[0].ordinal, 3);
    }

    #[test]
    fn partitions_timing_payloads_separately() {
        let results = vec![record(1, 100, "a"), record(2, 6000, "SLEEP(5)")];
        let config = TimeDelayConfig::default();
        let report = scan(&results, &config);
        assert_eq!(report.partitions.len(), 2);
        let timing = report.partitions.iter().find(|p| p.label == "timing_payload").unwrap();
        assert_eq!(timing.findings.len(), 0, "single-element partition has no delta to flag against itself");
    }

    #[test]
    fn no_partition_treats_all_results_as_one_baseline() {
        let results = vec![record(1, 100, "a"), record(2, 100, "b"), record(3, 6000, "c")];
        let config = TimeDelayConfig {
            partition_by_payload_type: false,
            ..TimeDelayConfig::default()
        };
        let report = scan(&results, &config);
        assert_eq!(report.partitions.len(), 1);
        assert_eq!(report.flagged_count(), 1);
    }

    #[test]
    fn empty_partition_has_zero_baseline_and_no_findings() {
        let results: Vec<JobResultRecord> = vec![];
        let report = scan(&results, &TimeDelayConfig::default());
        assert_eq!(report.flagged_count(), 0);
    }
}
