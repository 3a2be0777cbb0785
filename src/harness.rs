use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::watch;

use crate::analyzer::{analyze, TestType};
use crate::config::{Config, TestProfile};
use crate::dispatch::DispatchClient;
use crate::error::{CiLoadError, Result};
use crate::generator::LoadGenerator;
use crate::github::GitHubClient;
use crate::metrics::TestMetrics;
use crate::record::{filter_skipped, JobRecord, RunConclusion, TestRun};
use crate::report::{AnalysisReport, ReportWriter, TrackingReport};
use crate::tracker::{run_timing, RunTracker, RunTiming, TrackerHandle, TrackerSnapshot};

fn github_client(config: &Config, token: Option<&str>) -> Result<GitHubClient> {
    let env = &config.environment;
    let token = token.or(env.token.as_deref());
    GitHubClient::new(&env.base_url, &env.owner, &env.repo, token)
}

/// Workflow inputs for one test run: the profile's static inputs plus the
/// test run id, which the workflow echoes into its run so results can be
/// attributed across overlapping test runs.
fn build_inputs(profile: &TestProfile, test_run_id: &str) -> serde_json::Value {
    let mut inputs = serde_json::Map::new();
    for (key, value) in &profile.inputs {
        inputs.insert(key.clone(), serde_json::Value::String(value.clone()));
    }
    inputs.insert(
        "test_run_id".to_string(),
        serde_json::Value::String(test_run_id.to_string()),
    );
    serde_json::Value::Object(inputs)
}

/// Execute one named profile end to end: generate load, track every record
/// to a terminal state, compute metrics, analyze, and persist both reports.
pub async fn run_profile(
    config: &Config,
    profile_name: &str,
    token: Option<&str>,
) -> Result<AnalysisReport> {
    let profile = config
        .profile(profile_name)
        .map_err(|e| CiLoadError::Config(e.to_string()))?;
    let env = &config.environment;

    let mut test_run = TestRun::new(profile.test_type.as_str(), &env.name);
    info!(
        "Starting {} test '{}' ({}) against {}/{}",
        profile.test_type, profile_name, test_run.test_run_id, env.owner, env.repo
    );

    let client = github_client(config, token)?;
    let handle = TrackerHandle::new();
    let started_at = Utc::now();

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping the test run");
            let _ = stop_tx.send(true);
        }
    });

    let dispatcher = Arc::new(DispatchClient::new(
        client.clone(),
        handle.clone(),
        &profile.workflow,
        &profile.git_ref,
        build_inputs(profile, &test_run.test_run_id),
        profile.dispatch_concurrency,
    ));

    let tracker = RunTracker::new(
        client,
        profile.tracker_config(),
        handle.clone(),
        started_at,
    );
    let tracker_task = {
        let stop_rx = stop_rx.clone();
        tokio::spawn(async move { tracker.run(stop_rx).await })
    };

    let generator = LoadGenerator::new(
        profile.pattern.clone(),
        profile.duration(),
        handle.clone(),
        "d",
    );
    let dispatch = {
        let dispatcher = Arc::clone(&dispatcher);
        move |tracking_id: String| {
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                dispatcher.dispatch(&tracking_id).await;
            }
        }
    };
    let emitted = generator.run(dispatch, stop_rx).await;
    handle.generation_complete();
    info!(
        "Generation finished: {} intents emitted, peak {} concurrent dispatches",
        emitted,
        dispatcher.peak_in_flight()
    );

    tracker_task
        .await
        .map_err(|e| CiLoadError::Api(format!("tracker task panicked: {e}")))??;

    let snapshot = handle.snapshot();
    for record in &snapshot.records {
        test_run.add_record(&record.tracking_id);
    }
    test_run.close(Utc::now());

    let metrics = TestMetrics::compute(&snapshot, started_at, Utc::now());
    let analysis = analyze(
        profile.test_type,
        &metrics,
        &profile.analyzer_params(env.runner_count),
    );

    let writer = ReportWriter::new(&config.results_dir, &env.name);
    let report = AnalysisReport {
        test_run_id: test_run.test_run_id.clone(),
        test_type: profile.test_type,
        environment: env.name.clone(),
        metrics,
        analysis,
    };
    writer.write_tracking(&TrackingReport {
        test_run,
        snapshot,
    })?;
    writer.write_analysis(&report)?;

    Ok(report)
}

/// Rebuild per-run timings from a snapshot's records and jobs, preserving
/// dispatch order.
fn rebuild_timings(snapshot: &TrackerSnapshot) -> Vec<RunTiming> {
    let mut by_run: HashMap<u64, Vec<&JobRecord>> = HashMap::new();
    for job in snapshot.jobs.iter().filter(|j| !j.is_skipped()) {
        by_run.entry(job.parent_run_id).or_default().push(job);
    }

    let mut timings = Vec::new();
    for record in &snapshot.records {
        let Some(run_id) = record.remote_run_id else {
            continue;
        };
        let Some(jobs) = by_run.get(&run_id) else {
            continue;
        };
        let owned: Vec<JobRecord> = jobs.iter().map(|j| (*j).clone()).collect();
        if let Some((queue, execution, total)) = run_timing(&owned) {
            timings.push(RunTiming {
                run_id,
                dispatch_time: record.dispatch_time,
                queue_time_secs: queue,
                execution_time_secs: execution,
                total_time_secs: total,
            });
        }
    }
    timings
}

/// Re-analyze a persisted tracking report.
///
/// Runs whose job lists were never fetched (the original run hit its wait
/// deadline, or job endpoints were failing) are fetched now, so a post-hoc
/// pass can recover timing data the live run missed.
pub async fn analyze_tracking(
    config: &Config,
    test_run_id: &str,
    token: Option<&str>,
) -> Result<AnalysisReport> {
    let writer = ReportWriter::new(&config.results_dir, &config.environment.name);
    let mut tracking = writer.load_tracking(test_run_id)?;

    let fetched: std::collections::HashSet<u64> = tracking
        .snapshot
        .jobs
        .iter()
        .map(|j| j.parent_run_id)
        .collect();
    let missing: Vec<u64> = tracking
        .snapshot
        .records
        .iter()
        .filter(|r| {
            matches!(
                r.conclusion,
                Some(RunConclusion::Success)
                    | Some(RunConclusion::Failure)
                    | Some(RunConclusion::Cancelled)
            )
        })
        .filter_map(|r| r.remote_run_id)
        .filter(|id| !fetched.contains(id))
        .collect();

    if !missing.is_empty() {
        info!("Fetching job data for {} runs missing it", missing.len());
        let client = github_client(config, token)?;
        for run_id in missing {
            match client.get_run_jobs(run_id).await {
                Ok(jobs) => {
                    let records =
                        filter_skipped(jobs.iter().filter_map(|j| j.to_record()).collect());
                    tracking.snapshot.jobs.extend(records);
                }
                Err(e) => warn!("Job fetch for run {run_id} failed: {e}"),
            }
        }
        tracking.snapshot.run_timings = rebuild_timings(&tracking.snapshot);
    }

    let test_type = TestType::from_str(&tracking.test_run.test_type)?;
    let end = tracking.test_run.end_time.unwrap_or_else(Utc::now);
    let metrics = TestMetrics::compute(&tracking.snapshot, tracking.test_run.start_time, end);
    let analysis = analyze(
        test_type,
        &metrics,
        &crate::analyzer::AnalyzerParams {
            runner_count: config.environment.runner_count,
            ..Default::default()
        },
    );

    let report = AnalysisReport {
        test_run_id: tracking.test_run.test_run_id.clone(),
        test_type,
        environment: config.environment.name.clone(),
        metrics,
        analysis,
    };
    writer.write_analysis(&report)?;
    Ok(report)
}
