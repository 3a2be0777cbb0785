use std::fs;
use std::path::PathBuf;

use log::info;
use serde::{Deserialize, Serialize};

use crate::analyzer::{Analysis, TestType};
use crate::error::Result;
use crate::metrics::TestMetrics;
use crate::record::TestRun;
use crate::tracker::TrackerSnapshot;

/// Raw tracking state persisted at the end of a test run, sufficient to
/// re-run any analysis later without touching the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingReport {
    pub test_run: TestRun,
    pub snapshot: TrackerSnapshot,
}

/// Derived metrics and the test-type verdict for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub test_run_id: String,
    pub test_type: TestType,
    pub environment: String,
    pub metrics: TestMetrics,
    pub analysis: Analysis,
}

/// Writes reports under `<root>/<environment>/{tracking,analysis}/`, one
/// file per test run plus a `latest.json` pointer per kind.
pub struct ReportWriter {
    root: PathBuf,
    environment: String,
}

impl ReportWriter {
    pub fn new(root: impl Into<PathBuf>, environment: &str) -> Self {
        Self {
            root: root.into(),
            environment: environment.to_string(),
        }
    }

    fn kind_dir(&self, kind: &str) -> PathBuf {
        self.root.join(&self.environment).join(kind)
    }

    fn write_json<T: Serialize>(&self, kind: &str, test_run_id: &str, value: &T) -> Result<PathBuf> {
        let dir = self.kind_dir(kind);
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{test_run_id}.json"));
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, &json)?;
        fs::write(dir.join("latest.json"), &json)?;

        info!("Wrote {kind} report to {}", path.display());
        Ok(path)
    }

    pub fn write_tracking(&self, report: &TrackingReport) -> Result<PathBuf> {
        self.write_json("tracking", &report.test_run.test_run_id, report)
    }

    pub fn write_analysis(&self, report: &AnalysisReport) -> Result<PathBuf> {
        self.write_json("analysis", &report.test_run_id, report)
    }

    /// Load a persisted tracking report by test run id, or the most recent
    /// one via the id `latest`.
    pub fn load_tracking(&self, test_run_id: &str) -> Result<TrackingReport> {
        let path = self.kind_dir("tracking").join(format!("{test_run_id}.json"));
        let report = serde_json::from_str(&fs::read_to_string(&path)?)?;
        Ok(report)
    }
}

/// Condensed console summary of an analysis report.
pub fn summary_lines(report: &AnalysisReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{} test {} on '{}': {}",
            report.test_type, report.test_run_id, report.environment, report.analysis.rating
        ),
        report.analysis.verdict.clone(),
        format!(
            "{}/{} succeeded ({:.1}%), {:.2} successful runs/min over {:.0}s",
            report.metrics.succeeded,
            report.metrics.total_dispatched,
            report.metrics.success_rate,
            report.metrics.throughput_per_minute,
            report.metrics.duration_secs
        ),
        format!(
            "Queue p50/p95 {:.1}s/{:.1}s, total p50/p95 {:.1}s/{:.1}s, peak concurrency {} jobs",
            report.metrics.queue.p50,
            report.metrics.queue.p95,
            report.metrics.total.p50,
            report.metrics.total.p95,
            report.metrics.concurrency.peak_jobs
        ),
    ];
    for finding in &report.analysis.findings {
        lines.push(format!("  - {finding}"));
    }
    for rec in &report.analysis.recommendations {
        lines.push(format!("  ! {rec}"));
    }
    lines
}
