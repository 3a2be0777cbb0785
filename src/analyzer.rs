use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CiLoadError;
use crate::metrics::TestMetrics;

/// Intent of a test profile. Drives which analysis lens is applied to the
/// collected metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Performance,
    Load,
    Stress,
    Capacity,
    Spike,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Load => "load",
            Self::Stress => "stress",
            Self::Capacity => "capacity",
            Self::Spike => "spike",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestType {
    type Err = CiLoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "performance" => Ok(Self::Performance),
            "load" => Ok(Self::Load),
            "stress" => Ok(Self::Stress),
            "capacity" => Ok(Self::Capacity),
            "spike" => Ok(Self::Spike),
            other => Err(CiLoadError::Config(format!(
                "unknown test type '{other}' (expected performance, load, stress, capacity or spike)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Poor => "POOR",
            Self::Fair => "FAIR",
            Self::Good => "GOOD",
            Self::Excellent => "EXCELLENT",
        };
        f.write_str(s)
    }
}

/// Environment facts the analysis needs beyond the metrics themselves.
#[derive(Debug, Clone)]
pub struct AnalyzerParams {
    pub runner_count: usize,
    /// Sustained queue time that indicates the system is past its limit
    pub queue_alert_secs: f64,
    /// Failure rate (percent) that indicates a breaking point
    pub failure_rate_alert: f64,
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        Self {
            runner_count: 4,
            queue_alert_secs: 300.0,
            failure_rate_alert: 10.0,
        }
    }
}

/// Test-type specific verdict over one run's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub test_type: TestType,
    pub rating: Rating,
    pub verdict: String,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
}

pub fn analyze(test_type: TestType, metrics: &TestMetrics, params: &AnalyzerParams) -> Analysis {
    match test_type {
        TestType::Performance => analyze_performance(metrics),
        TestType::Load => analyze_load(metrics, params),
        TestType::Stress => analyze_stress(metrics, params),
        TestType::Capacity => analyze_capacity(metrics, params),
        TestType::Spike => analyze_spike(metrics),
    }
}

fn failure_rate(metrics: &TestMetrics) -> f64 {
    if metrics.total_dispatched == 0 {
        return 0.0;
    }
    metrics.tally.total() as f64 / metrics.total_dispatched as f64 * 100.0
}

fn queue_samples(metrics: &TestMetrics) -> Vec<f64> {
    metrics.run_timings.iter().map(|t| t.queue_time_secs).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Queue health bands, in seconds: under 30s excellent, under 2min good,
/// under 5min fair, anything beyond poor.
fn queue_health(mean_queue_secs: f64) -> Rating {
    if mean_queue_secs < 30.0 {
        Rating::Excellent
    } else if mean_queue_secs < 120.0 {
        Rating::Good
    } else if mean_queue_secs < 300.0 {
        Rating::Fair
    } else {
        Rating::Poor
    }
}

/// Coefficient-of-variation bands: 10/25/40 percent.
fn predictability(cv_percent: f64) -> Rating {
    if cv_percent < 10.0 {
        Rating::Excellent
    } else if cv_percent < 25.0 {
        Rating::Good
    } else if cv_percent < 40.0 {
        Rating::Fair
    } else {
        Rating::Poor
    }
}

/// Throughput the runner pool could deliver if it were never idle, derived
/// from observed mean execution time rather than an assumed workload.
fn theoretical_throughput(runner_count: usize, mean_execution_secs: f64) -> f64 {
    if mean_execution_secs <= 0.0 {
        return 0.0;
    }
    runner_count as f64 * 60.0 / mean_execution_secs
}

fn analyze_performance(metrics: &TestMetrics) -> Analysis {
    let mut findings = Vec::new();
    let mut recommendations = Vec::new();

    if metrics.run_timings.is_empty() {
        return Analysis {
            test_type: TestType::Performance,
            rating: Rating::Poor,
            verdict: "No completed runs to analyze".into(),
            findings,
            recommendations,
        };
    }

    let queue = queue_health(metrics.queue.mean);
    let cv = metrics.execution.cv_percent();
    let pred = predictability(cv);

    findings.push(format!(
        "Mean queue time {:.1}s ({queue}), P95 {:.1}s",
        metrics.queue.mean, metrics.queue.p95
    ));
    findings.push(format!(
        "Execution-time variation {cv:.1}% ({pred}); recommended SLA P50 {:.1}s, P95 {:.1}s, P99 {:.1}s",
        metrics.total.p50, metrics.total.p95, metrics.total.p99
    ));

    if queue == Rating::Poor {
        recommendations
            .push("Reduce queue times by adding runners or lowering dispatch rate".into());
    } else if queue == Rating::Fair {
        recommendations.push("Consider adding 1-2 runners to improve queue performance".into());
    }
    if pred == Rating::Poor {
        recommendations
            .push("High variability detected, investigate sources of inconsistency".into());
    }

    let rating = if queue == Rating::Excellent && pred == Rating::Excellent {
        Rating::Excellent
    } else if queue == Rating::Poor || pred == Rating::Poor {
        Rating::Poor
    } else if queue >= Rating::Good && pred >= Rating::Good {
        Rating::Good
    } else {
        Rating::Fair
    };

    let verdict = match rating {
        Rating::Excellent => "Baseline is production ready".into(),
        Rating::Good => "Solid baseline, minor optimizations possible".into(),
        Rating::Fair => "Usable baseline with optimization recommended".into(),
        Rating::Poor => "Baseline issues must be addressed before relying on it".into(),
    };

    Analysis {
        test_type: TestType::Performance,
        rating,
        verdict,
        findings,
        recommendations,
    }
}

/// Degradation bands over dispatch-ordered thirds: 10/25/50 percent growth
/// from the early third to the late third.
fn degradation_percent(samples: &[f64]) -> Option<f64> {
    if samples.len() < 6 {
        return None;
    }
    let third = samples.len() / 3;
    let early = mean(&samples[..third]);
    let late = mean(&samples[2 * third..]);
    if early > 0.0 {
        Some((late - early) / early * 100.0)
    } else {
        None
    }
}

fn analyze_load(metrics: &TestMetrics, params: &AnalyzerParams) -> Analysis {
    let mut findings = Vec::new();
    let mut recommendations = Vec::new();

    let execution_times: Vec<f64> = metrics
        .run_timings
        .iter()
        .map(|t| t.execution_time_secs)
        .collect();
    let degradation = degradation_percent(&execution_times);
    let degradation_rating = match degradation {
        Some(pct) if pct < 10.0 => Rating::Excellent,
        Some(pct) if pct < 25.0 => Rating::Good,
        Some(pct) if pct < 50.0 => Rating::Fair,
        Some(_) => Rating::Poor,
        None => Rating::Good,
    };
    if let Some(pct) = degradation {
        findings.push(format!(
            "Execution time changed {pct:+.1}% from early to late phase (queue trend: {:?})",
            metrics.queue_trend
        ));
    }

    let err = failure_rate(metrics);
    let reliability = if err < 1.0 {
        Rating::Excellent
    } else if err < 5.0 {
        Rating::Good
    } else if err < 10.0 {
        Rating::Fair
    } else {
        Rating::Poor
    };
    findings.push(format!(
        "{} of {} dispatches did not succeed ({err:.1}%)",
        metrics.tally.total(),
        metrics.total_dispatched
    ));

    let expected = theoretical_throughput(params.runner_count, metrics.execution.mean);
    let ratio = if expected > 0.0 {
        metrics.throughput_per_minute / expected
    } else {
        0.0
    };
    let throughput_rating = if ratio > 0.9 {
        Rating::Excellent
    } else if ratio > 0.7 {
        Rating::Good
    } else if ratio > 0.5 {
        Rating::Fair
    } else {
        Rating::Poor
    };
    findings.push(format!(
        "Throughput {:.2}/min against a theoretical {expected:.2}/min for {} runners",
        metrics.throughput_per_minute, params.runner_count
    ));

    if degradation_rating <= Rating::Fair {
        recommendations.push("Noticeable degradation under sustained load, add resources or lower the rate".into());
    }
    if throughput_rating == Rating::Poor {
        recommendations.push("Throughput below expectations, review runner capacity".into());
    }
    if err > 5.0 {
        recommendations.push("High error rate under load, investigate failures".into());
    }

    let rating = if degradation_rating == Rating::Excellent
        && reliability == Rating::Excellent
        && throughput_rating >= Rating::Good
    {
        Rating::Excellent
    } else if degradation_rating == Rating::Poor || reliability == Rating::Poor {
        Rating::Poor
    } else if degradation_rating >= Rating::Good && reliability >= Rating::Good {
        Rating::Good
    } else {
        Rating::Fair
    };

    let verdict = match rating {
        Rating::Excellent => "System can sustain this load indefinitely".into(),
        Rating::Good => "System handles this load with acceptable degradation".into(),
        Rating::Fair => "System handles this load but with concerns".into(),
        Rating::Poor => "This load level is not sustainable".into(),
    };

    Analysis {
        test_type: TestType::Load,
        rating,
        verdict,
        findings,
        recommendations,
    }
}

/// Earliest dispatch-ordered index whose 5-sample queue window averages past
/// the alert threshold.
fn breaking_point_index(queue_times: &[f64], alert_secs: f64) -> Option<usize> {
    if queue_times.len() < 5 {
        return None;
    }
    (0..=queue_times.len() - 5).find(|&i| mean(&queue_times[i..i + 5]) > alert_secs)
}

fn analyze_stress(metrics: &TestMetrics, params: &AnalyzerParams) -> Analysis {
    let mut findings = Vec::new();
    let mut recommendations = Vec::new();

    let queue_times = queue_samples(metrics);
    let max_queue = queue_times.iter().copied().fold(0.0, f64::max);
    let err = failure_rate(metrics);

    let breaking_point_reached =
        max_queue > 2.0 * params.queue_alert_secs || err > params.failure_rate_alert;
    let queue_explosion = metrics.queue.p95 > 0.0 && max_queue > metrics.queue.p95 * 2.0;
    let broke_at = breaking_point_index(&queue_times, params.queue_alert_secs);

    findings.push(format!(
        "Max queue time {max_queue:.1}s, P95 {:.1}s, failure rate {err:.1}%",
        metrics.queue.p95
    ));
    if let Some(idx) = broke_at {
        let pct = idx as f64 / queue_times.len() as f64 * 100.0;
        findings.push(format!(
            "Sustained stress first appeared at dispatch {idx} ({pct:.0}% into the test)"
        ));
        if pct < 50.0 {
            recommendations.push("System broke early in the test, urgent capacity review needed".into());
        }
    }

    let resilience = if err < 5.0 && max_queue < 2.0 * params.queue_alert_secs {
        Rating::Excellent
    } else if err < 10.0 && max_queue < 3.0 * params.queue_alert_secs {
        Rating::Good
    } else if err < 20.0 {
        Rating::Fair
    } else {
        Rating::Poor
    };

    if queue_explosion {
        recommendations.push("Queue explosion detected, implement backpressure mechanisms".into());
    }
    if resilience == Rating::Poor {
        recommendations.push("Poor stress resilience, implement circuit breakers".into());
    } else if resilience == Rating::Fair {
        recommendations.push("Low resilience, add retry logic and timeouts".into());
    }

    let rating = if !breaking_point_reached && resilience == Rating::Excellent {
        Rating::Excellent
    } else if !breaking_point_reached {
        Rating::Good
    } else if resilience >= Rating::Good {
        Rating::Fair
    } else {
        Rating::Poor
    };

    let verdict = match rating {
        Rating::Excellent => "System handles extreme stress without breaking".into(),
        Rating::Good => "System maintains operation under stress".into(),
        Rating::Fair => "System shows stress but continues operating".into(),
        Rating::Poor => "System breaks under stress conditions".into(),
    };

    Analysis {
        test_type: TestType::Stress,
        rating,
        verdict,
        findings,
        recommendations,
    }
}

fn analyze_capacity(metrics: &TestMetrics, params: &AnalyzerParams) -> Analysis {
    let mut findings = Vec::new();
    let mut recommendations = Vec::new();

    let expected = theoretical_throughput(params.runner_count, metrics.execution.mean);
    let efficiency = if expected > 0.0 {
        metrics.throughput_per_minute / expected * 100.0
    } else {
        0.0
    };
    findings.push(format!(
        "Throughput {:.2}/min is {efficiency:.0}% of the theoretical {expected:.2}/min maximum",
        metrics.throughput_per_minute
    ));
    findings.push(format!(
        "Peak concurrency: {} jobs / {} runs across {} runners",
        metrics.concurrency.peak_jobs, metrics.concurrency.peak_runs, params.runner_count
    ));

    // Queue over two minutes sustained means the pool is undersized; scale
    // the suggestion by how far over it is.
    let avg_queue = metrics.queue.mean;
    let suggested_runners = if avg_queue > 120.0 {
        (params.runner_count as f64 * avg_queue / 120.0).round() as usize
    } else {
        params.runner_count
    };
    if suggested_runners > params.runner_count {
        recommendations.push(format!(
            "Add {} runners to eliminate the queue bottleneck",
            suggested_runners - params.runner_count
        ));
    } else if avg_queue < 30.0 && efficiency < 50.0 {
        recommendations.push("Pool has excess capacity, consider reducing runners".into());
    }

    let rating = if efficiency > 90.0 {
        Rating::Excellent
    } else if efficiency > 70.0 {
        Rating::Good
    } else if efficiency > 50.0 {
        Rating::Fair
    } else {
        Rating::Poor
    };
    if rating <= Rating::Fair {
        recommendations.push("Low efficiency, investigate dispatch patterns".into());
    }

    let verdict = match rating {
        Rating::Excellent => "System operating near its maximum capacity".into(),
        Rating::Good => "High utilization with headroom remaining".into(),
        Rating::Fair => "Moderate utilization, capacity to spare".into(),
        Rating::Poor => "Pool is significantly underutilized at this load".into(),
    };

    Analysis {
        test_type: TestType::Capacity,
        rating,
        verdict,
        findings,
        recommendations,
    }
}

/// Dispatch-ordered index where queue time first doubles over its
/// predecessor.
fn find_spike_point(queue_times: &[f64]) -> Option<usize> {
    (1..queue_times.len()).find(|&i| queue_times[i] > queue_times[i - 1] * 2.0)
}

fn analyze_spike(metrics: &TestMetrics) -> Analysis {
    let mut findings = Vec::new();
    let mut recommendations = Vec::new();

    let queue_times = queue_samples(metrics);
    let spike = if queue_times.len() > 10 {
        find_spike_point(&queue_times)
    } else {
        None
    };

    let Some(spike_idx) = spike else {
        return Analysis {
            test_type: TestType::Spike,
            rating: Rating::Good,
            verdict: "No queue spike visible in the collected samples".into(),
            findings,
            recommendations,
        };
    };

    let pre_spike = &queue_times[..spike_idx];
    let spike_end = (spike_idx + 10).min(queue_times.len());
    let spike_period = &queue_times[spike_idx..spike_end];
    let post_spike = &queue_times[spike_end..];

    let pre_avg = mean(pre_spike);
    let spike_peak = spike_period.iter().copied().fold(0.0, f64::max);
    let multiplier = if pre_avg > 0.0 { spike_peak / pre_avg } else { 0.0 };
    findings.push(format!(
        "Queue peaked at {spike_peak:.1}s during the spike, {multiplier:.1}x the {pre_avg:.1}s baseline"
    ));

    // Recovered when post-spike settles within 1.2x of the pre-spike
    // baseline.
    let post_avg = mean(post_spike);
    let recovered = !post_spike.is_empty() && pre_avg > 0.0 && post_avg < pre_avg * 1.2;
    let recovery = if post_spike.is_empty() || pre_avg <= 0.0 {
        None
    } else if post_avg <= pre_avg * 1.1 {
        Some(Rating::Excellent)
    } else if post_avg <= pre_avg * 1.3 {
        Some(Rating::Good)
    } else if post_avg <= pre_avg * 1.5 {
        Some(Rating::Fair)
    } else {
        Some(Rating::Poor)
    };
    if let Some(recovery) = recovery {
        findings.push(format!(
            "Post-spike queue averaged {post_avg:.1}s ({recovery} recovery)"
        ));
    }

    let elasticity = if multiplier < 3.0 && recovered {
        Rating::Excellent
    } else if multiplier < 5.0 && recovered {
        Rating::Good
    } else if recovered {
        Rating::Fair
    } else {
        Rating::Poor
    };

    if elasticity == Rating::Poor {
        recommendations.push("System is rigid, implement auto-scaling or queue management".into());
    }
    if recovery == Some(Rating::Poor) {
        recommendations.push("Poor recovery from the spike, add burst capacity".into());
    } else if recovery == Some(Rating::Fair) {
        recommendations.push("Slow recovery, optimize queue processing".into());
    }
    if multiplier > 10.0 {
        recommendations.push("Extreme queue growth during the spike, critical issue".into());
    } else if multiplier > 5.0 {
        recommendations.push("High spike impact, consider dedicated spike handling".into());
    }

    let rating = match (elasticity, recovery) {
        (Rating::Excellent, Some(Rating::Excellent)) => Rating::Excellent,
        (Rating::Excellent | Rating::Good, Some(Rating::Excellent | Rating::Good)) => Rating::Good,
        (Rating::Poor, _) | (_, Some(Rating::Poor)) => Rating::Poor,
        _ => Rating::Fair,
    };

    let verdict = match rating {
        Rating::Excellent => "Handles spikes seamlessly".into(),
        Rating::Good => "Manages spikes effectively".into(),
        Rating::Fair => "Some spike handling capability".into(),
        Rating::Poor => "Cannot handle sudden load changes".into(),
    };

    Analysis {
        test_type: TestType::Spike,
        rating,
        verdict,
        findings,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{ConcurrencyTimeline, MetricStats, QueueTrend};
    use crate::record::FailureTally;
    use crate::tracker::RunTiming;
    use chrono::{TimeZone, Utc};

    fn timings(queues: &[f64]) -> Vec<RunTiming> {
        queues
            .iter()
            .enumerate()
            .map(|(i, &q)| RunTiming {
                run_id: i as u64 + 1,
                dispatch_time: Utc.timestamp_opt(1_700_000_000 + i as i64 * 30, 0).unwrap(),
                queue_time_secs: q,
                execution_time_secs: 60.0,
                total_time_secs: q + 60.0,
            })
            .collect()
    }

    fn metrics_for(queues: &[f64], tally: FailureTally, throughput: f64) -> TestMetrics {
        let run_timings = timings(queues);
        let queue_samples: Vec<f64> = queues.to_vec();
        let totals: Vec<f64> = queues.iter().map(|q| q + 60.0).collect();
        TestMetrics {
            total_dispatched: queues.len() + tally.total(),
            succeeded: queues.len(),
            tally,
            success_rate: 100.0,
            throughput_per_minute: throughput,
            duration_secs: 600.0,
            queue: MetricStats::from_samples(&queue_samples),
            execution: MetricStats::from_samples(&vec![60.0; queues.len()]),
            total: MetricStats::from_samples(&totals),
            concurrency: ConcurrencyTimeline::default(),
            queue_trend: QueueTrend::Flat,
            runs_without_valid_jobs: 0,
            run_timings,
        }
    }

    #[test]
    fn test_test_type_round_trip() {
        for name in ["performance", "load", "stress", "capacity", "spike"] {
            let tt: TestType = name.parse().unwrap();
            assert_eq!(tt.as_str(), name);
        }
        assert!("soak".parse::<TestType>().is_err());
    }

    #[test]
    fn test_performance_excellent_baseline() {
        let metrics = metrics_for(&[10.0, 11.0, 10.5, 10.2, 10.8], FailureTally::default(), 2.0);
        let analysis = analyze(TestType::Performance, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Excellent);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_performance_poor_queue_drags_rating_down() {
        let metrics = metrics_for(&[400.0, 410.0, 405.0, 395.0], FailureTally::default(), 2.0);
        let analysis = analyze(TestType::Performance, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Poor);
        assert!(!analysis.recommendations.is_empty());
    }

    #[test]
    fn test_performance_no_data() {
        let metrics = metrics_for(&[], FailureTally::default(), 0.0);
        let analysis = analyze(TestType::Performance, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Poor);
        assert!(analysis.verdict.contains("No completed runs"));
    }

    #[test]
    fn test_load_severe_degradation_is_poor() {
        // Execution time triples from the early third to the late third.
        let mut metrics = metrics_for(&[10.0; 9], FailureTally::default(), 3.5);
        for (i, t) in metrics.run_timings.iter_mut().enumerate() {
            t.execution_time_secs = 60.0 + (i / 3) as f64 * 60.0;
        }
        let analysis = analyze(TestType::Load, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Poor);
    }

    #[test]
    fn test_load_stable_and_reliable_is_excellent() {
        let metrics = metrics_for(
            &[10.0, 10.5, 10.0, 10.2, 10.1, 10.3, 10.0, 10.4, 10.1],
            FailureTally::default(),
            3.8,
        );
        let analysis = analyze(TestType::Load, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Excellent);
    }

    #[test]
    fn test_stress_breaking_point_window() {
        let queues = [10.0, 10.0, 10.0, 400.0, 400.0, 400.0, 400.0, 400.0];
        // The window starting at 2 averages 322s, already past the alert.
        assert_eq!(breaking_point_index(&queues, 300.0), Some(2));
        // A higher alert is only crossed by the fully stressed window.
        assert_eq!(breaking_point_index(&queues, 350.0), Some(3));
        assert_eq!(breaking_point_index(&[10.0; 8], 300.0), None);
        assert_eq!(breaking_point_index(&[10.0, 10.0], 300.0), None);
    }

    #[test]
    fn test_stress_high_failure_rate_breaks() {
        let tally = FailureTally {
            failure: 5,
            ..FailureTally::default()
        };
        let metrics = metrics_for(&[50.0, 60.0, 55.0, 65.0, 50.0], tally, 1.0);
        let analysis = analyze(TestType::Stress, &metrics, &AnalyzerParams::default());
        // 5 of 10 dispatches failed: breaking point reached.
        assert!(analysis.rating <= Rating::Fair);
    }

    #[test]
    fn test_stress_clean_run_is_excellent() {
        let metrics = metrics_for(&[20.0, 25.0, 22.0, 28.0, 24.0], FailureTally::default(), 2.0);
        let analysis = analyze(TestType::Stress, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Excellent);
    }

    #[test]
    fn test_capacity_efficiency_bands() {
        // 4 runners at 60s mean execution give a theoretical 4/min.
        let metrics = metrics_for(&[10.0, 10.0, 10.0], FailureTally::default(), 3.8);
        let analysis = analyze(TestType::Capacity, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Excellent);

        let metrics = metrics_for(&[10.0, 10.0, 10.0], FailureTally::default(), 1.0);
        let analysis = analyze(TestType::Capacity, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Poor);
    }

    #[test]
    fn test_capacity_queue_bottleneck_suggests_runners() {
        let metrics = metrics_for(&[240.0, 250.0, 245.0], FailureTally::default(), 2.0);
        let analysis = analyze(TestType::Capacity, &metrics, &AnalyzerParams::default());
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("runners")));
    }

    #[test]
    fn test_spike_point_detection() {
        let queues = [10.0, 11.0, 10.0, 25.0, 30.0];
        assert_eq!(find_spike_point(&queues), Some(3));
        assert_eq!(find_spike_point(&[10.0, 12.0, 14.0]), None);
    }

    #[test]
    fn test_spike_full_recovery_is_excellent() {
        let mut queues = vec![10.0, 10.0, 10.0, 10.0];
        queues.extend([25.0, 26.0, 25.0, 24.0, 25.0, 26.0, 25.0, 24.0, 25.0, 26.0]);
        queues.extend([10.0, 10.5, 10.0, 10.2]);
        let metrics = metrics_for(&queues, FailureTally::default(), 2.0);
        let analysis = analyze(TestType::Spike, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Excellent);
    }

    #[test]
    fn test_spike_no_recovery_is_poor() {
        let mut queues = vec![10.0, 10.0, 10.0, 10.0];
        queues.extend([80.0; 10]);
        queues.extend([70.0, 75.0, 72.0, 78.0]);
        let metrics = metrics_for(&queues, FailureTally::default(), 2.0);
        let analysis = analyze(TestType::Spike, &metrics, &AnalyzerParams::default());
        assert_eq!(analysis.rating, Rating::Poor);
    }
}
