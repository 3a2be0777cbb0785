use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};

use crate::error::Result;
use crate::github::{GitHubClient, RemoteRun};
use crate::record::{
    filter_skipped, DispatchRecord, FailureTally, JobRecord, RecordStatus, RunConclusion,
};

/// Polling and reconciliation policy for one test run.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Interval between bulk poll cycles
    pub poll_interval: Duration,
    /// Age after which an in-progress record's bulk-reported status is no
    /// longer trusted without individual re-verification
    pub staleness_threshold: chrono::Duration,
    /// Hard deadline for the whole wait; everything still outstanding is
    /// force-completed as timed out
    pub max_wait: chrono::Duration,
    /// Bulk pagination bound per cycle
    pub max_bulk_pages: u32,
    pub bulk_page_size: usize,
    /// Bound on concurrent individual verification fetches, kept smaller
    /// than the dispatch bound so reconciliation never competes with live
    /// dispatch traffic
    pub verify_concurrency: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            staleness_threshold: chrono::Duration::minutes(10),
            max_wait: chrono::Duration::minutes(30),
            max_bulk_pages: 10,
            bulk_page_size: 100,
            verify_concurrency: 2,
        }
    }
}

/// Timing derived for one run after skip filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTiming {
    pub run_id: u64,
    pub dispatch_time: DateTime<Utc>,
    pub queue_time_secs: f64,
    pub execution_time_secs: f64,
    pub total_time_secs: f64,
}

/// Compute per-run timing from an already skip-filtered job set.
///
/// queue = min(started) - min(created); execution = sum of per-job runtimes;
/// total = max(completed) - min(created). A run with no valid jobs yields no
/// sample.
pub fn run_timing(jobs: &[JobRecord]) -> Option<(f64, f64, f64)> {
    let min_created = jobs.iter().map(|j| j.created_at).min()?;
    let min_started = jobs.iter().map(|j| j.started_at).min()?;
    let max_completed = jobs.iter().map(|j| j.completed_at).max()?;

    let queue = (min_started - min_created).num_milliseconds() as f64 / 1000.0;
    let execution: f64 = jobs
        .iter()
        .map(|j| (j.completed_at - j.started_at).num_milliseconds() as f64 / 1000.0)
        .sum();
    let total = (max_completed - min_created).num_milliseconds() as f64 / 1000.0;

    Some((queue, execution, total))
}

/// Read-only view of a closed test run's state, handed to the metrics
/// engine. Records appear in dispatch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub records: Vec<DispatchRecord>,
    pub jobs: Vec<JobRecord>,
    pub run_timings: Vec<RunTiming>,
    pub tally: FailureTally,
    pub succeeded: usize,
    pub runs_without_valid_jobs: usize,
}

/// All mutable tracking state. The tracker is the sole writer; everything
/// else goes through `TrackerHandle` or consumes a snapshot.
#[derive(Debug, Default)]
struct TrackerState {
    records: HashMap<String, DispatchRecord>,
    dispatch_order: Vec<String>,
    by_run_id: HashMap<u64, String>,
    /// Skip-filtered job lists, keyed by remote run id
    jobs: HashMap<u64, Vec<JobRecord>>,
    runs_without_valid_jobs: Vec<u64>,
    tally: FailureTally,
    succeeded: usize,
    generation_done: bool,
}

impl TrackerState {
    fn register(&mut self, tracking_id: String, now: DateTime<Utc>) {
        self.records
            .insert(tracking_id.clone(), DispatchRecord::new(&tracking_id, now));
        self.dispatch_order.push(tracking_id);
    }

    fn complete_record(&mut self, tracking_id: &str, conclusion: RunConclusion) -> bool {
        let Some(record) = self.records.get_mut(tracking_id) else {
            return false;
        };
        if record.complete(conclusion).is_ok() {
            if conclusion == RunConclusion::Success {
                self.succeeded += 1;
            }
            self.tally.count(conclusion);
            true
        } else {
            false
        }
    }

    /// Fold one remote report into a record. Terminal states are sticky, so
    /// a stale bulk page can never resurrect a finished record.
    fn apply_remote(&mut self, tracking_id: &str, run: &RemoteRun) {
        let Some(record) = self.records.get(tracking_id) else {
            return;
        };
        if record.is_terminal() {
            return;
        }

        match RecordStatus::from_remote(&run.status) {
            RecordStatus::Completed => {
                let conclusion = run
                    .conclusion
                    .as_deref()
                    .map(RunConclusion::from_remote)
                    .unwrap_or(RunConclusion::Failure);
                self.complete_record(tracking_id, conclusion);
            }
            _ => {
                if let Some(record) = self.records.get_mut(tracking_id) {
                    let _ = record.mark_in_progress();
                }
            }
        }
    }

    /// Fold a bulk page set into local state. Runs already claimed update
    /// their record; unclaimed runs are matched to undiscovered records in
    /// dispatch order, oldest run first, never binding a run created before
    /// its record was dispatched.
    fn apply_bulk(&mut self, runs: &[RemoteRun]) {
        let mut unclaimed: Vec<&RemoteRun> = Vec::new();
        for run in runs {
            match self.by_run_id.get(&run.id).cloned() {
                Some(tracking_id) => self.apply_remote(&tracking_id, run),
                None => unclaimed.push(run),
            }
        }

        unclaimed.sort_by_key(|r| r.created_at);
        for run in unclaimed {
            let candidate = self.dispatch_order.iter().find(|tid| {
                self.records.get(*tid).is_some_and(|r| {
                    r.remote_run_id.is_none()
                        && !r.is_terminal()
                        && r.dispatch_time <= run.created_at
                })
            });
            if let Some(tracking_id) = candidate.cloned() {
                if let Some(record) = self.records.get_mut(&tracking_id) {
                    if record.assign_run_id(run.id).is_ok() {
                        self.by_run_id.insert(run.id, tracking_id.clone());
                        self.apply_remote(&tracking_id, run);
                    }
                }
            }
        }
    }

    /// Run ids needing an authoritative individual fetch this cycle: known
    /// ids absent from the bulk page set (pagination can drop in-flight
    /// records between page boundaries) plus records in progress past the
    /// staleness threshold (bulk reads can return cached state). The two
    /// sets are merged and de-duplicated, so at most one fetch per id per
    /// cycle.
    fn reconciliation_targets(
        &self,
        seen_in_bulk: &HashSet<u64>,
        now: DateTime<Utc>,
        staleness: chrono::Duration,
    ) -> BTreeSet<u64> {
        self.records
            .values()
            .filter(|r| !r.is_terminal())
            .filter_map(|r| r.remote_run_id.map(|id| (r, id)))
            .filter(|(r, id)| {
                let missing = !seen_in_bulk.contains(id);
                let stale =
                    r.status == RecordStatus::InProgress && r.age_at(now) >= staleness;
                missing || stale
            })
            .map(|(_, id)| id)
            .collect()
    }

    fn apply_individual(&mut self, run: &RemoteRun, now: DateTime<Utc>) {
        if let Some(tracking_id) = self.by_run_id.get(&run.id).cloned() {
            if let Some(record) = self.records.get_mut(&tracking_id) {
                record.last_verified_time = Some(now);
            }
            self.apply_remote(&tracking_id, run);
        }
    }

    /// Individual verification exhausted its retries: flag the record as
    /// unresolved, a distinct terminal bucket never merged into failure.
    fn mark_unresolved(&mut self, run_id: u64) {
        if let Some(tracking_id) = self.by_run_id.get(&run_id).cloned() {
            self.complete_record(&tracking_id, RunConclusion::Unresolved);
        }
    }

    /// Force-complete everything still outstanding as timed out. Idempotent:
    /// already-terminal records are untouched and the tally only counts
    /// records newly marked.
    fn mark_timeouts(&mut self) -> usize {
        let outstanding: Vec<String> = self
            .records
            .values()
            .filter(|r| !r.is_terminal())
            .map(|r| r.tracking_id.clone())
            .collect();
        outstanding
            .into_iter()
            .filter(|tid| self.complete_record(tid, RunConclusion::TimedOut))
            .count()
    }

    /// Cancellation counterpart of `mark_timeouts`.
    fn mark_cancelled(&mut self) -> usize {
        let outstanding: Vec<String> = self
            .records
            .values()
            .filter(|r| !r.is_terminal())
            .map(|r| r.tracking_id.clone())
            .collect();
        outstanding
            .into_iter()
            .filter(|tid| self.complete_record(tid, RunConclusion::Cancelled))
            .count()
    }

    /// Completed runs whose job list is still unfetched. Forced buckets
    /// (timed out, unresolved) are excluded: the remote never reported them
    /// complete, so their job data is not trustworthy.
    fn pending_job_fetches(&self) -> Vec<u64> {
        self.dispatch_order
            .iter()
            .filter_map(|tid| self.records.get(tid))
            .filter(|r| {
                r.is_terminal()
                    && !r.jobs_fetched
                    && !matches!(
                        r.conclusion,
                        Some(RunConclusion::TimedOut) | Some(RunConclusion::Unresolved) | None
                    )
            })
            .filter_map(|r| r.remote_run_id)
            .collect()
    }

    fn record_jobs(&mut self, run_id: u64, jobs: Vec<JobRecord>) {
        let valid = filter_skipped(jobs);
        if valid.is_empty() {
            self.runs_without_valid_jobs.push(run_id);
        } else {
            self.jobs.insert(run_id, valid);
        }
        if let Some(tracking_id) = self.by_run_id.get(&run_id).cloned() {
            if let Some(record) = self.records.get_mut(&tracking_id) {
                record.jobs_fetched = true;
            }
        }
    }

    fn all_terminal(&self) -> bool {
        self.records.values().all(DispatchRecord::is_terminal)
    }

    fn settled(&self) -> bool {
        self.generation_done && self.all_terminal() && self.pending_job_fetches().is_empty()
    }

    fn status_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for record in self.records.values() {
            match record.status {
                RecordStatus::Pending => counts.0 += 1,
                RecordStatus::InProgress => counts.1 += 1,
                RecordStatus::Completed => counts.2 += 1,
            }
        }
        counts
    }

    fn snapshot(&self) -> TrackerSnapshot {
        let records: Vec<DispatchRecord> = self
            .dispatch_order
            .iter()
            .filter_map(|tid| self.records.get(tid).cloned())
            .collect();

        let mut run_timings = Vec::new();
        let mut jobs = Vec::new();
        for record in &records {
            let Some(run_id) = record.remote_run_id else {
                continue;
            };
            if let Some(run_jobs) = self.jobs.get(&run_id) {
                if let Some((queue, execution, total)) = run_timing(run_jobs) {
                    run_timings.push(RunTiming {
                        run_id,
                        dispatch_time: record.dispatch_time,
                        queue_time_secs: queue,
                        execution_time_secs: execution,
                        total_time_secs: total,
                    });
                }
                jobs.extend(run_jobs.iter().cloned());
            }
        }

        TrackerSnapshot {
            records,
            jobs,
            run_timings,
            tally: self.tally,
            succeeded: self.succeeded,
            runs_without_valid_jobs: self.runs_without_valid_jobs.len(),
        }
    }
}

/// Cloneable entry point to the tracking state. The generator registers
/// intents, the dispatch client reports outcomes, the harness takes the
/// final snapshot; the poll loop does everything else.
#[derive(Clone, Default)]
pub struct TrackerHandle(Arc<Mutex<TrackerState>>);

impl TrackerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        let mut state = self.0.lock().unwrap();
        f(&mut state)
    }

    /// Create the pending accounting slot for an intent, before any network
    /// call is made on its behalf.
    pub fn register(&self, tracking_id: impl Into<String>, now: DateTime<Utc>) {
        self.with(|s| s.register(tracking_id.into(), now));
    }

    pub fn dispatch_accepted(&self, tracking_id: &str) {
        self.with(|s| {
            if let Some(record) = s.records.get_mut(tracking_id) {
                let _ = record.mark_in_progress();
            }
        });
    }

    pub fn dispatch_rejected(&self, tracking_id: &str) {
        self.with(|s| {
            s.complete_record(tracking_id, RunConclusion::Failure);
        });
    }

    pub fn generation_complete(&self) {
        self.with(|s| s.generation_done = true);
    }

    pub fn mark_timeouts(&self) -> usize {
        self.with(TrackerState::mark_timeouts)
    }

    pub fn mark_cancelled(&self) -> usize {
        self.with(TrackerState::mark_cancelled)
    }

    pub fn settled(&self) -> bool {
        self.with(|s| s.settled())
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.with(|s| s.snapshot())
    }
}

/// Reconciles local dispatch records against the remote status feed.
///
/// Runs its own polling loop, independent in timing from the load
/// generator: bulk poll, missing-from-bulk + staleness reconciliation via
/// individual fetches, job fetches for completed runs, and the timeout
/// marking at the `max_wait` deadline.
pub struct RunTracker {
    handle: TrackerHandle,
    client: GitHubClient,
    config: TrackerConfig,
    started_at: DateTime<Utc>,
}

impl RunTracker {
    pub fn new(
        client: GitHubClient,
        config: TrackerConfig,
        handle: TrackerHandle,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            handle,
            client,
            config,
            started_at,
        }
    }

    /// Poll until every record is terminal and job lists are in, the
    /// `max_wait` deadline passes, or the stop signal fires. Always leaves
    /// every record in exactly one terminal bucket.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<()> {
        let deadline = self.started_at + self.config.max_wait;

        loop {
            if let Err(e) = self.poll_cycle().await {
                warn!("Poll cycle failed, retrying next interval: {e}");
            }

            let (pending, in_progress, completed) = self.handle.with(|s| s.status_counts());
            info!("Status - Pending: {pending}, Running: {in_progress}, Completed: {completed}");

            if self.handle.settled() {
                break;
            }

            if Utc::now() >= deadline {
                let timed_out = self.handle.mark_timeouts();
                if timed_out > 0 {
                    warn!("max_wait reached, {timed_out} records marked timed_out");
                }
                break;
            }

            if *stop.borrow() {
                let cancelled = self.handle.mark_cancelled();
                info!("Stop requested, {cancelled} outstanding records cancelled");
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = stop.changed() => {}
            }
        }

        Ok(())
    }

    /// One reconciliation pass: bulk pages, individual verification for
    /// missing/stale records, then job fetches for newly completed runs.
    pub async fn poll_cycle(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut all_runs = Vec::new();
        for page in 1..=self.config.max_bulk_pages {
            let runs = self
                .client
                .list_runs(page, self.config.bulk_page_size, self.started_at)
                .await?;
            let count = runs.len();
            seen.extend(runs.iter().map(|r| r.id));
            all_runs.extend(runs);
            if count < self.config.bulk_page_size {
                break;
            }
        }

        let targets = self.handle.with(|s| {
            s.apply_bulk(&all_runs);
            s.reconciliation_targets(&seen, Utc::now(), self.config.staleness_threshold)
        });

        if !targets.is_empty() {
            info!("Individually verifying {} runs", targets.len());
            let semaphore = Arc::new(Semaphore::new(self.config.verify_concurrency));
            let results = futures::future::join_all(targets.iter().map(|&run_id| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.unwrap();
                    (run_id, self.client.get_run(run_id).await)
                }
            }))
            .await;

            for (run_id, result) in results {
                match result {
                    Ok(run) => self.handle.with(|s| s.apply_individual(&run, Utc::now())),
                    Err(e) => {
                        warn!("Verification of run {run_id} exhausted retries: {e}");
                        self.handle.with(|s| s.mark_unresolved(run_id));
                    }
                }
            }
        }

        for run_id in self.handle.with(|s| s.pending_job_fetches()) {
            match self.client.get_run_jobs(run_id).await {
                Ok(jobs) => {
                    let records = jobs.iter().filter_map(|j| j.to_record()).collect();
                    self.handle.with(|s| s.record_jobs(run_id, records));
                }
                Err(e) => warn!("Job fetch for run {run_id} failed, retrying next cycle: {e}"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::RetryPolicy;
    use crate::record::JobConclusion;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn remote_run(id: u64, created_secs: i64, status: &str, conclusion: Option<&str>) -> RemoteRun {
        RemoteRun {
            id,
            name: Some("loadgen".into()),
            event: "workflow_dispatch".into(),
            status: status.into(),
            conclusion: conclusion.map(String::from),
            created_at: t(created_secs),
            updated_at: t(created_secs + 1),
            run_started_at: None,
        }
    }

    fn job(id: u64, run_id: u64, created: i64, started: i64, completed: i64) -> JobRecord {
        JobRecord {
            job_id: id,
            parent_run_id: run_id,
            created_at: t(created),
            started_at: t(started),
            completed_at: t(completed),
            conclusion: JobConclusion::Success,
        }
    }

    fn state_with_records(n: usize) -> TrackerState {
        let mut state = TrackerState::default();
        for i in 0..n {
            state.register(format!("d-{i:04}"), t(i as i64 * 10));
            if let Some(r) = state.records.get_mut(&format!("d-{i:04}")) {
                let _ = r.mark_in_progress();
            }
        }
        state
    }

    #[test]
    fn test_bulk_matches_unclaimed_runs_in_dispatch_order() {
        let mut state = state_with_records(2);
        let runs = vec![
            remote_run(202, 25, "in_progress", None),
            remote_run(201, 15, "in_progress", None),
        ];
        state.apply_bulk(&runs);

        // Oldest run binds to the earliest undiscovered record.
        assert_eq!(state.records["d-0000"].remote_run_id, Some(201));
        assert_eq!(state.records["d-0001"].remote_run_id, Some(202));
    }

    #[test]
    fn test_bulk_never_binds_run_created_before_dispatch() {
        let mut state = TrackerState::default();
        state.register("d-0000".into(), t(100));

        state.apply_bulk(&[remote_run(201, 50, "in_progress", None)]);
        assert_eq!(state.records["d-0000"].remote_run_id, None);
    }

    #[test]
    fn test_bulk_completion_updates_record_and_tally() {
        let mut state = state_with_records(1);
        state.apply_bulk(&[remote_run(201, 15, "in_progress", None)]);
        state.apply_bulk(&[remote_run(201, 15, "completed", Some("success"))]);

        assert!(state.records["d-0000"].is_terminal());
        assert_eq!(
            state.records["d-0000"].conclusion,
            Some(RunConclusion::Success)
        );
        assert_eq!(state.succeeded, 1);
        assert_eq!(state.tally.total(), 0);
    }

    #[test]
    fn test_stale_bulk_page_cannot_resurrect_terminal_record() {
        let mut state = state_with_records(1);
        state.apply_bulk(&[remote_run(201, 15, "completed", Some("success"))]);
        state.apply_bulk(&[remote_run(201, 15, "in_progress", None)]);

        assert!(state.records["d-0000"].is_terminal());
        assert_eq!(state.succeeded, 1);
    }

    #[test]
    fn test_reconciliation_merges_missing_and_stale_without_duplicates() {
        let mut state = state_with_records(3);
        state.apply_bulk(&[
            remote_run(201, 15, "in_progress", None),
            remote_run(202, 25, "in_progress", None),
            remote_run(203, 35, "in_progress", None),
        ]);

        // 201 is both stale (old dispatch, long threshold exceeded) and
        // missing from this cycle's bulk pages; 202 only missing; 203 seen
        // and fresh.
        let seen: HashSet<u64> = [203].into_iter().collect();
        let targets =
            state.reconciliation_targets(&seen, t(605), chrono::Duration::minutes(10));

        assert_eq!(targets.iter().copied().collect::<Vec<_>>(), vec![201, 202]);
    }

    #[test]
    fn test_stale_record_queued_even_when_seen_in_bulk() {
        let mut state = state_with_records(1);
        state.apply_bulk(&[remote_run(201, 15, "in_progress", None)]);

        let seen: HashSet<u64> = [201].into_iter().collect();
        let targets =
            state.reconciliation_targets(&seen, t(601), chrono::Duration::minutes(10));
        assert_eq!(targets.len(), 1);

        // Below the threshold nothing qualifies.
        let targets =
            state.reconciliation_targets(&seen, t(300), chrono::Duration::minutes(10));
        assert!(targets.is_empty());
    }

    #[test]
    fn test_timeout_marking_is_idempotent() {
        let mut state = state_with_records(3);
        state.apply_bulk(&[remote_run(201, 15, "completed", Some("success"))]);

        let first = state.mark_timeouts();
        assert_eq!(first, 2);
        assert_eq!(state.tally.timed_out, 2);

        let second = state.mark_timeouts();
        assert_eq!(second, 0);
        assert_eq!(state.tally.timed_out, 2);
        assert_eq!(state.succeeded, 1);
    }

    #[test]
    fn test_all_records_reach_exactly_one_terminal_bucket() {
        let mut state = state_with_records(4);
        state.apply_bulk(&[
            remote_run(201, 15, "completed", Some("success")),
            remote_run(202, 25, "completed", Some("failure")),
        ]);
        state.mark_unresolved(0); // unknown id, no-op
        state.apply_bulk(&[remote_run(203, 35, "in_progress", None)]);
        state.mark_unresolved(203);
        state.mark_timeouts();

        assert!(state.all_terminal());
        assert_eq!(state.succeeded, 1);
        assert_eq!(state.tally.failure, 1);
        assert_eq!(state.tally.unresolved, 1);
        assert_eq!(state.tally.timed_out, 1);
        assert_eq!(state.succeeded + state.tally.total(), 4);
    }

    #[test]
    fn test_run_timing_arithmetic() {
        let jobs = vec![job(1, 201, 0, 30, 90)];
        let (queue, execution, total) = run_timing(&jobs).unwrap();
        assert_eq!(queue, 30.0);
        assert_eq!(execution, 60.0);
        assert_eq!(total, 90.0);
    }

    #[test]
    fn test_run_timing_sums_execution_across_jobs() {
        let jobs = vec![job(1, 201, 0, 30, 90), job(2, 201, 10, 40, 100)];
        let (queue, execution, total) = run_timing(&jobs).unwrap();
        assert_eq!(queue, 30.0);
        assert_eq!(execution, 120.0);
        assert_eq!(total, 100.0);
    }

    #[test]
    fn test_skipped_jobs_contribute_nothing_to_timing() {
        let mut state = state_with_records(1);
        state.apply_bulk(&[remote_run(201, 15, "completed", Some("success"))]);

        // Skipped job carries timestamps earlier than any real work.
        let skipped = JobRecord {
            conclusion: JobConclusion::Skipped,
            ..job(3, 201, 5, 5, 5)
        };
        state.record_jobs(
            201,
            vec![job(1, 201, 20, 50, 110), job(2, 201, 30, 60, 100), skipped],
        );

        let snapshot = state.snapshot();
        assert_eq!(snapshot.jobs.len(), 2);
        let timing = &snapshot.run_timings[0];
        assert_eq!(timing.queue_time_secs, 30.0);
        assert_eq!(timing.execution_time_secs, 100.0);
        assert_eq!(timing.total_time_secs, 90.0);
    }

    #[test]
    fn test_run_with_only_skipped_jobs_is_flagged_not_sampled() {
        let mut state = state_with_records(1);
        state.apply_bulk(&[remote_run(201, 15, "completed", Some("success"))]);

        let skipped = JobRecord {
            conclusion: JobConclusion::Skipped,
            ..job(1, 201, 5, 5, 5)
        };
        state.record_jobs(201, vec![skipped]);

        let snapshot = state.snapshot();
        assert!(snapshot.run_timings.is_empty());
        assert_eq!(snapshot.runs_without_valid_jobs, 1);
        assert!(state.records["d-0000"].jobs_fetched);
    }

    #[test]
    fn test_forced_buckets_are_not_job_fetched() {
        let mut state = state_with_records(2);
        state.apply_bulk(&[
            remote_run(201, 15, "completed", Some("success")),
            remote_run(202, 25, "in_progress", None),
        ]);
        state.mark_timeouts();

        assert_eq!(state.pending_job_fetches(), vec![201]);
    }

    fn fast_client(server: &mockito::ServerGuard) -> GitHubClient {
        GitHubClient::new(&server.url(), "o", "r", None)
            .unwrap()
            .with_retry(RetryPolicy {
                attempts: 0,
                base_delay: Duration::from_millis(1),
            })
    }

    fn runs_body(runs: &[serde_json::Value]) -> String {
        serde_json::json!({ "workflow_runs": runs }).to_string()
    }

    #[tokio::test]
    async fn test_poll_cycle_completes_run_and_fetches_jobs() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();
        let created = now - chrono::Duration::seconds(60);

        let run_json = serde_json::json!({
            "id": 201,
            "name": "loadgen",
            "event": "workflow_dispatch",
            "status": "completed",
            "conclusion": "success",
            "created_at": created.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
            "run_started_at": created.to_rfc3339()
        });
        server
            .mock("GET", "/repos/o/r/actions/runs")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(runs_body(&[run_json]))
            .create_async()
            .await;
        server
            .mock("GET", "/repos/o/r/actions/runs/201/jobs")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "jobs": [{
                        "id": 7,
                        "run_id": 201,
                        "name": "build",
                        "status": "completed",
                        "conclusion": "success",
                        "created_at": created.to_rfc3339(),
                        "started_at": (created + chrono::Duration::seconds(20)).to_rfc3339(),
                        "completed_at": (created + chrono::Duration::seconds(50)).to_rfc3339(),
                        "runner_name": "runner-1"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let handle = TrackerHandle::new();
        handle.register("d-0000", created - chrono::Duration::seconds(5));
        handle.dispatch_accepted("d-0000");

        let tracker = RunTracker::new(
            fast_client(&server),
            TrackerConfig::default(),
            handle.clone(),
            created - chrono::Duration::seconds(10),
        );
        tracker.poll_cycle().await.unwrap();

        handle.generation_complete();
        assert!(handle.settled());

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.run_timings[0].queue_time_secs, 20.0);
    }

    #[tokio::test]
    async fn test_poll_cycle_verifies_stale_record_individually() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();
        let dispatched = now - chrono::Duration::minutes(15);

        let stale_json = serde_json::json!({
            "id": 201,
            "name": "loadgen",
            "event": "workflow_dispatch",
            "status": "in_progress",
            "conclusion": null,
            "created_at": (dispatched + chrono::Duration::seconds(5)).to_rfc3339(),
            "updated_at": now.to_rfc3339(),
            "run_started_at": null
        });
        // Bulk still reports the run in progress; the authoritative fetch
        // says it finished.
        server
            .mock("GET", "/repos/o/r/actions/runs")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(runs_body(&[stale_json.clone()]))
            .create_async()
            .await;
        let mut fresh = stale_json;
        fresh["status"] = "completed".into();
        fresh["conclusion"] = "success".into();
        let verify = server
            .mock("GET", "/repos/o/r/actions/runs/201")
            .with_status(200)
            .with_body(fresh.to_string())
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/o/r/actions/runs/201/jobs")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(serde_json::json!({ "jobs": [] }).to_string())
            .create_async()
            .await;

        let handle = TrackerHandle::new();
        handle.register("d-0000", dispatched);
        handle.dispatch_accepted("d-0000");

        let tracker = RunTracker::new(
            fast_client(&server),
            TrackerConfig::default(),
            handle.clone(),
            dispatched,
        );
        tracker.poll_cycle().await.unwrap();

        verify.assert_async().await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.succeeded, 1);
        assert!(snapshot.records[0].last_verified_time.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_verification_marks_unresolved() {
        let mut server = mockito::Server::new_async().await;
        let now = Utc::now();
        let dispatched = now - chrono::Duration::minutes(15);

        server
            .mock("GET", "/repos/o/r/actions/runs")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(runs_body(&[serde_json::json!({
                "id": 201,
                "name": "loadgen",
                "event": "workflow_dispatch",
                "status": "in_progress",
                "conclusion": null,
                "created_at": (dispatched + chrono::Duration::seconds(5)).to_rfc3339(),
                "updated_at": now.to_rfc3339(),
                "run_started_at": null
            })]))
            .create_async()
            .await;
        server
            .mock("GET", "/repos/o/r/actions/runs/201")
            .with_status(500)
            .create_async()
            .await;

        let handle = TrackerHandle::new();
        handle.register("d-0000", dispatched);
        handle.dispatch_accepted("d-0000");

        let tracker = RunTracker::new(
            fast_client(&server),
            TrackerConfig::default(),
            handle.clone(),
            dispatched,
        );
        tracker.poll_cycle().await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.tally.unresolved, 1);
        assert_eq!(
            snapshot.records[0].conclusion,
            Some(RunConclusion::Unresolved)
        );
    }

    #[tokio::test]
    async fn test_max_wait_times_out_remaining_records() {
        // Two records still in progress past the deadline: both land in
        // timed_out and the sub-count increases by exactly 2.
        let handle = TrackerHandle::new();
        let started = Utc::now() - chrono::Duration::minutes(31);
        handle.register("d-0000", started);
        handle.register("d-0001", started);
        handle.dispatch_accepted("d-0000");
        handle.dispatch_accepted("d-0001");
        handle.generation_complete();

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/o/r/actions/runs")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(runs_body(&[]))
            .create_async()
            .await;

        let tracker = RunTracker::new(
            fast_client(&server),
            TrackerConfig {
                max_wait: chrono::Duration::minutes(30),
                ..TrackerConfig::default()
            },
            handle.clone(),
            started,
        );
        let (_tx, rx) = watch::channel(false);
        tracker.run(rx).await.unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.tally.timed_out, 2);
        assert!(snapshot.records.iter().all(|r| r.is_terminal()));
    }
}
