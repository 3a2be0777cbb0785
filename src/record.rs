use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CiLoadError, Result};

/// Local lifecycle of a dispatched unit of work.
///
/// Only moves forward: `Pending -> InProgress -> Completed`. Skipping
/// straight to `Completed` is allowed (dispatch rejection, timeout), going
/// backward is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    InProgress,
    Completed,
}

impl RecordStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
        }
    }

    /// Map a remote status string onto the local lifecycle. Anything the
    /// remote reports short of "completed" (queued, waiting, in_progress, ...)
    /// means the run exists and is still owned by the remote system.
    pub fn from_remote(status: &str) -> Self {
        match status {
            "completed" => Self::Completed,
            _ => Self::InProgress,
        }
    }
}

/// Terminal bucket for a completed dispatch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    /// Forced by the test run's `max_wait` deadline, never reported remotely.
    TimedOut,
    /// Individual verification exhausted its retries.
    Unresolved,
}

impl RunConclusion {
    pub fn from_remote(conclusion: &str) -> Self {
        match conclusion {
            "success" => Self::Success,
            "cancelled" => Self::Cancelled,
            "timed_out" => Self::TimedOut,
            // action_required, startup_failure, stale, neutral, ...
            _ => Self::Failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl JobConclusion {
    pub fn from_remote(conclusion: &str) -> Self {
        match conclusion {
            "success" => Self::Success,
            "cancelled" => Self::Cancelled,
            "skipped" => Self::Skipped,
            _ => Self::Failure,
        }
    }
}

/// Local accounting unit for one requested unit of work.
///
/// Created in `Pending` before the dispatch call is issued so that a crash or
/// cancellation never loses an accounting slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Unique id assigned locally at dispatch time
    pub tracking_id: String,
    /// Remote run id, set at most once when the run is discovered
    pub remote_run_id: Option<u64>,
    pub status: RecordStatus,
    /// Set only when `status` is `Completed`
    pub conclusion: Option<RunConclusion>,
    pub dispatch_time: DateTime<Utc>,
    /// Last time an authoritative individual fetch confirmed this record
    pub last_verified_time: Option<DateTime<Utc>>,
    /// Job list has been fetched for the completed run
    pub jobs_fetched: bool,
}

impl DispatchRecord {
    pub fn new(tracking_id: impl Into<String>, dispatch_time: DateTime<Utc>) -> Self {
        Self {
            tracking_id: tracking_id.into(),
            remote_run_id: None,
            status: RecordStatus::Pending,
            conclusion: None,
            dispatch_time,
            last_verified_time: None,
            jobs_fetched: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == RecordStatus::Completed
    }

    /// Validate and apply a status transition. Identity transitions are
    /// no-ops so repeated bulk polls stay cheap; backward transitions are
    /// rejected.
    fn transition(&mut self, to: RecordStatus) -> Result<()> {
        if to == self.status {
            return Ok(());
        }
        if to.rank() < self.status.rank() || self.status == RecordStatus::Completed {
            return Err(CiLoadError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_in_progress(&mut self) -> Result<()> {
        self.transition(RecordStatus::InProgress)
    }

    /// Move into the `Completed` bucket. Terminal states are sticky: a
    /// second completion attempt is an invalid transition and the caller
    /// decides whether that matters (the timeout routine checks
    /// `is_terminal` first, making it idempotent).
    pub fn complete(&mut self, conclusion: RunConclusion) -> Result<()> {
        if self.is_terminal() {
            return Err(CiLoadError::InvalidTransition {
                from: self.status,
                to: RecordStatus::Completed,
            });
        }
        self.transition(RecordStatus::Completed)?;
        self.conclusion = Some(conclusion);
        Ok(())
    }

    /// Attach the remote run id. Set at most once, never reassigned.
    pub fn assign_run_id(&mut self, run_id: u64) -> Result<()> {
        match self.remote_run_id {
            None => {
                self.remote_run_id = Some(run_id);
                Ok(())
            }
            Some(existing) if existing == run_id => Ok(()),
            Some(existing) => Err(CiLoadError::Api(format!(
                "record {} already bound to run {existing}, refusing rebind to {run_id}",
                self.tracking_id
            ))),
        }
    }

    /// Age since dispatch; drives the staleness reconciliation policy.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.dispatch_time
    }
}

/// Smallest remote-executed unit with its own start/end timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: u64,
    pub parent_run_id: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub conclusion: JobConclusion,
}

impl JobRecord {
    /// Skipped jobs never executed; their timestamps are degenerate
    /// (`created_at == started_at == completed_at`) and would corrupt any
    /// average they leak into.
    pub fn is_skipped(&self) -> bool {
        self.conclusion == JobConclusion::Skipped
    }
}

/// Drop skipped jobs before any statistic is computed. Idempotent.
pub fn filter_skipped(jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    jobs.into_iter().filter(|j| !j.is_skipped()).collect()
}

/// Failure tally for a test run, with the forced and unresolved buckets
/// queryable separately so they are never conflated with genuine execution
/// failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureTally {
    pub failure: usize,
    pub cancelled: usize,
    pub timed_out: usize,
    pub unresolved: usize,
}

impl FailureTally {
    pub fn count(&mut self, conclusion: RunConclusion) {
        match conclusion {
            RunConclusion::Failure => self.failure += 1,
            RunConclusion::Cancelled => self.cancelled += 1,
            RunConclusion::TimedOut => self.timed_out += 1,
            RunConclusion::Unresolved => self.unresolved += 1,
            RunConclusion::Success => {}
        }
    }

    pub fn total(&self) -> usize {
        self.failure + self.cancelled + self.timed_out + self.unresolved
    }
}

/// One test run: created when a profile begins, mutated only by appending
/// dispatch ids, closed when every record is terminal or the wait deadline
/// expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub test_run_id: String,
    pub test_type: String,
    pub environment_tag: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub dispatch_record_ids: Vec<String>,
}

impl TestRun {
    pub fn new(test_type: &str, environment_tag: &str) -> Self {
        let start_time = Utc::now();
        let short_uuid = uuid::Uuid::new_v4().simple().to_string();
        let test_run_id = format!(
            "{}_{}_{}",
            test_type,
            start_time.format("%Y%m%d_%H%M%S"),
            &short_uuid[..8]
        );
        Self {
            test_run_id,
            test_type: test_type.to_string(),
            environment_tag: environment_tag.to_string(),
            start_time,
            end_time: None,
            dispatch_record_ids: Vec::new(),
        }
    }

    pub fn add_record(&mut self, tracking_id: &str) {
        self.dispatch_record_ids.push(tracking_id.to_string());
    }

    pub fn close(&mut self, end_time: DateTime<Utc>) {
        if self.end_time.is_none() {
            self.end_time = Some(end_time);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}
