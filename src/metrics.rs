use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{FailureTally, JobRecord};
use crate::tracker::{RunTiming, TrackerSnapshot};

pub(crate) fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Calculate P50, P95, P99 percentiles from a list of values
/// Returns (p50, p95, p99). If insufficient data, returns same value for all.
fn calculate_percentiles(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| cmp_f64(*a, *b));

    let len = sorted.len();

    if len == 1 {
        let val = sorted[0];
        return (val, val, val);
    }

    let p50_idx = (len / 2).min(len - 1);
    let p95_idx = (len * 95 / 100).min(len - 1);
    let p99_idx = (len * 99 / 100).min(len - 1);

    (sorted[p50_idx], sorted[p95_idx], sorted[p99_idx])
}

/// Distribution summary for one timing dimension, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
}

impl MetricStats {
    /// All-zero stats for an empty sample set, mirroring the percentile
    /// fallback.
    pub fn from_samples(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let (p50, p95, p99) = calculate_percentiles(values);

        Self {
            count,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            p50,
            p95,
            p99,
            std_dev: variance.sqrt(),
        }
    }

    /// Coefficient of variation, the analyzer's consistency signal.
    pub fn cv_percent(&self) -> f64 {
        if self.mean == 0.0 {
            return 0.0;
        }
        self.std_dev / self.mean * 100.0
    }
}

/// One sampling bucket of the concurrency timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyBucket {
    pub bucket_time: DateTime<Utc>,
    pub concurrent_jobs: usize,
    pub concurrent_runs: usize,
}

/// Concurrency sampled on a fixed grid across the observed job activity.
///
/// A job is active in a bucket when its execution interval overlaps it
/// (`started < bucket_end && completed > bucket_start`); a run is active
/// when at least one of its jobs is. Counting runs through their jobs keeps
/// `concurrent_jobs >= concurrent_runs` in every bucket, including runs
/// with idle gaps between jobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConcurrencyTimeline {
    pub buckets: Vec<ConcurrencyBucket>,
    pub peak_jobs: usize,
    pub peak_runs: usize,
    pub mean_jobs: f64,
    pub mean_runs: f64,
}

impl ConcurrencyTimeline {
    pub fn from_jobs(jobs: &[JobRecord], bucket_width: Duration) -> Self {
        let Some(span_start) = jobs.iter().map(|j| j.started_at).min() else {
            return Self::default();
        };
        let Some(span_end) = jobs.iter().map(|j| j.completed_at).max() else {
            return Self::default();
        };

        let mut buckets = Vec::new();
        let mut bucket_start = span_start;
        while bucket_start < span_end {
            let bucket_end = bucket_start + bucket_width;
            let mut active_jobs = 0;
            let mut active_runs: HashSet<u64> = HashSet::new();
            for job in jobs {
                if job.started_at < bucket_end && job.completed_at > bucket_start {
                    active_jobs += 1;
                    active_runs.insert(job.parent_run_id);
                }
            }
            buckets.push(ConcurrencyBucket {
                bucket_time: bucket_start,
                concurrent_jobs: active_jobs,
                concurrent_runs: active_runs.len(),
            });
            bucket_start = bucket_end;
        }

        let peak_jobs = buckets.iter().map(|b| b.concurrent_jobs).max().unwrap_or(0);
        let peak_runs = buckets.iter().map(|b| b.concurrent_runs).max().unwrap_or(0);
        let mean = |f: fn(&ConcurrencyBucket) -> usize| {
            if buckets.is_empty() {
                0.0
            } else {
                buckets.iter().map(f).sum::<usize>() as f64 / buckets.len() as f64
            }
        };

        Self {
            peak_jobs,
            peak_runs,
            mean_jobs: mean(|b| b.concurrent_jobs),
            mean_runs: mean(|b| b.concurrent_runs),
            buckets,
        }
    }
}

/// Direction of queue-time drift across a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTrend {
    Increasing,
    Decreasing,
    Flat,
}

/// Compare mean queue time of the dispatch-ordered first half against the
/// second. Differences within 10% of the first-half mean read as flat.
pub fn queue_trend(timings: &[RunTiming]) -> QueueTrend {
    if timings.len() < 2 {
        return QueueTrend::Flat;
    }

    let mid = timings.len() / 2;
    let mean = |slice: &[RunTiming]| {
        slice.iter().map(|t| t.queue_time_secs).sum::<f64>() / slice.len() as f64
    };
    let first = mean(&timings[..mid]);
    let second = mean(&timings[mid..]);

    let tolerance = (first.abs() * 0.10).max(f64::EPSILON);
    if second - first > tolerance {
        QueueTrend::Increasing
    } else if first - second > tolerance {
        QueueTrend::Decreasing
    } else {
        QueueTrend::Flat
    }
}

/// Everything the analyzer and reports consume about one finished test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMetrics {
    pub total_dispatched: usize,
    pub succeeded: usize,
    pub tally: FailureTally,
    /// Fraction of dispatched records that ended in `success`, 0-100
    pub success_rate: f64,
    /// Successful completions per minute of wall-clock test duration
    pub throughput_per_minute: f64,
    pub duration_secs: f64,
    pub queue: MetricStats,
    pub execution: MetricStats,
    pub total: MetricStats,
    pub concurrency: ConcurrencyTimeline,
    pub queue_trend: QueueTrend,
    pub runs_without_valid_jobs: usize,
    /// Dispatch-ordered per-run samples, kept for windowed analysis
    pub run_timings: Vec<RunTiming>,
}

impl TestMetrics {
    pub fn compute(
        snapshot: &TrackerSnapshot,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let queue_times: Vec<f64> = snapshot.run_timings.iter().map(|t| t.queue_time_secs).collect();
        let execution_times: Vec<f64> = snapshot
            .run_timings
            .iter()
            .map(|t| t.execution_time_secs)
            .collect();
        let total_times: Vec<f64> = snapshot.run_timings.iter().map(|t| t.total_time_secs).collect();

        let total_dispatched = snapshot.records.len();
        let duration_secs = ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0);
        let duration_minutes = duration_secs / 60.0;

        let success_rate = if total_dispatched == 0 {
            0.0
        } else {
            snapshot.succeeded as f64 / total_dispatched as f64 * 100.0
        };
        let throughput_per_minute = if duration_minutes > 0.0 {
            snapshot.succeeded as f64 / duration_minutes
        } else {
            0.0
        };

        Self {
            total_dispatched,
            succeeded: snapshot.succeeded,
            tally: snapshot.tally,
            success_rate,
            throughput_per_minute,
            duration_secs,
            queue: MetricStats::from_samples(&queue_times),
            execution: MetricStats::from_samples(&execution_times),
            total: MetricStats::from_samples(&total_times),
            concurrency: ConcurrencyTimeline::from_jobs(&snapshot.jobs, Duration::seconds(30)),
            queue_trend: queue_trend(&snapshot.run_timings),
            runs_without_valid_jobs: snapshot.runs_without_valid_jobs,
            run_timings: snapshot.run_timings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::JobConclusion;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn job(id: u64, run_id: u64, started: i64, completed: i64) -> JobRecord {
        JobRecord {
            job_id: id,
            parent_run_id: run_id,
            created_at: t(started - 5),
            started_at: t(started),
            completed_at: t(completed),
            conclusion: JobConclusion::Success,
        }
    }

    fn timing(queue: f64) -> RunTiming {
        RunTiming {
            run_id: 1,
            dispatch_time: t(0),
            queue_time_secs: queue,
            execution_time_secs: 10.0,
            total_time_secs: queue + 10.0,
        }
    }

    #[test]
    fn test_percentiles_index_based() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let (p50, p95, p99) = calculate_percentiles(&values);
        assert_eq!(p50, 51.0);
        assert_eq!(p95, 96.0);
        assert_eq!(p99, 100.0);
    }

    #[test]
    fn test_percentiles_single_value() {
        assert_eq!(calculate_percentiles(&[42.0]), (42.0, 42.0, 42.0));
        assert_eq!(calculate_percentiles(&[]), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_stats_from_samples() {
        let stats = MetricStats::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count, 8);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.std_dev, 2.0);
    }

    #[test]
    fn test_stats_empty_is_zeroed() {
        let stats = MetricStats::from_samples(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.cv_percent(), 0.0);
    }

    #[test]
    fn test_timeline_jobs_never_below_runs() {
        // Run 1 has two jobs with an idle gap between them; the run must not
        // be counted as active in the gap bucket where no job overlaps.
        let jobs = vec![
            job(1, 1, 0, 20),
            job(2, 1, 100, 130),
            job(3, 2, 10, 60),
        ];
        let timeline = ConcurrencyTimeline::from_jobs(&jobs, Duration::seconds(30));

        for bucket in &timeline.buckets {
            assert!(bucket.concurrent_jobs >= bucket.concurrent_runs);
        }
        // Bucket covering 60..90 has no activity at all.
        let idle = &timeline.buckets[2];
        assert_eq!(idle.concurrent_jobs, 0);
        assert_eq!(idle.concurrent_runs, 0);
    }

    #[test]
    fn test_timeline_peak_and_overlap_counting() {
        let jobs = vec![job(1, 1, 0, 45), job(2, 2, 0, 45), job(3, 3, 35, 70)];
        let timeline = ConcurrencyTimeline::from_jobs(&jobs, Duration::seconds(30));

        // First bucket 0..30: jobs 1 and 2. Second bucket 30..60: all three.
        assert_eq!(timeline.buckets[0].concurrent_jobs, 2);
        assert_eq!(timeline.buckets[1].concurrent_jobs, 3);
        assert_eq!(timeline.peak_jobs, 3);
        assert_eq!(timeline.peak_runs, 3);
    }

    #[test]
    fn test_timeline_empty_jobs() {
        let timeline = ConcurrencyTimeline::from_jobs(&[], Duration::seconds(30));
        assert!(timeline.buckets.is_empty());
        assert_eq!(timeline.peak_jobs, 0);
    }

    #[test]
    fn test_queue_trend_directions() {
        let increasing: Vec<RunTiming> =
            [10.0, 12.0, 11.0, 30.0, 35.0, 32.0].map(timing).to_vec();
        assert_eq!(queue_trend(&increasing), QueueTrend::Increasing);

        let decreasing: Vec<RunTiming> =
            [30.0, 35.0, 32.0, 10.0, 12.0, 11.0].map(timing).to_vec();
        assert_eq!(queue_trend(&decreasing), QueueTrend::Decreasing);

        // Second half within 10% of first half reads flat.
        let flat: Vec<RunTiming> = [100.0, 100.0, 105.0, 104.0].map(timing).to_vec();
        assert_eq!(queue_trend(&flat), QueueTrend::Flat);

        assert_eq!(queue_trend(&[timing(5.0)]), QueueTrend::Flat);
    }

    #[test]
    fn test_compute_rates_and_throughput() {
        let snapshot = TrackerSnapshot {
            records: vec![
                crate::record::DispatchRecord::new("d-0000", t(0)),
                crate::record::DispatchRecord::new("d-0001", t(0)),
                crate::record::DispatchRecord::new("d-0002", t(0)),
                crate::record::DispatchRecord::new("d-0003", t(0)),
            ],
            jobs: vec![job(1, 1, 10, 40)],
            run_timings: vec![timing(10.0)],
            tally: FailureTally {
                failure: 1,
                ..FailureTally::default()
            },
            succeeded: 3,
            runs_without_valid_jobs: 0,
        };

        let metrics = TestMetrics::compute(&snapshot, t(0), t(120));
        assert_eq!(metrics.success_rate, 75.0);
        assert_eq!(metrics.throughput_per_minute, 1.5);
        assert_eq!(metrics.duration_secs, 120.0);
        assert_eq!(metrics.queue.mean, 10.0);
    }
}
