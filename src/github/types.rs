use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{JobConclusion, JobRecord};

/// Workflow run as reported by the bulk and individual run endpoints.
///
/// Status and conclusion stay strings at the wire; `record.rs` maps them
/// onto the local lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRun {
    /// Unique identifier for the workflow run
    pub id: u64,
    /// Name of the workflow
    pub name: Option<String>,
    /// Event that triggered the run
    pub event: String,
    /// Status of the run (queued, in_progress, completed, ...)
    pub status: String,
    /// Conclusion of the run, present once completed
    pub conclusion: Option<String>,
    /// When the run was created
    pub created_at: DateTime<Utc>,
    /// When the run was last updated
    pub updated_at: DateTime<Utc>,
    /// When the run actually started, if it has
    pub run_started_at: Option<DateTime<Utc>>,
}

/// Job within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJob {
    /// Unique identifier for the job
    pub id: u64,
    /// Run this job belongs to
    pub run_id: u64,
    /// Name of the job
    pub name: String,
    /// Status of the job
    pub status: String,
    /// Conclusion of the job
    pub conclusion: Option<String>,
    /// When the job was created (entered the queue)
    pub created_at: DateTime<Utc>,
    /// When the job started on a runner
    pub started_at: Option<DateTime<Utc>>,
    /// When the job completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Runner that executed the job, once assigned
    pub runner_name: Option<String>,
}

impl RemoteJob {
    /// Convert a finished remote job into a local `JobRecord`.
    ///
    /// Skipped jobs never ran, so all three timestamps collapse onto
    /// `created_at`. Jobs still missing start/end timestamps (in flight at
    /// fetch time) yield `None` and are picked up on a later fetch.
    pub fn to_record(&self) -> Option<JobRecord> {
        let conclusion = JobConclusion::from_remote(self.conclusion.as_deref()?);

        if conclusion == JobConclusion::Skipped {
            return Some(JobRecord {
                job_id: self.id,
                parent_run_id: self.run_id,
                created_at: self.created_at,
                started_at: self.created_at,
                completed_at: self.created_at,
                conclusion,
            });
        }

        Some(JobRecord {
            job_id: self.id,
            parent_run_id: self.run_id,
            created_at: self.created_at,
            started_at: self.started_at?,
            completed_at: self.completed_at?,
            conclusion,
        })
    }
}

/// Response from the bulk runs endpoint.
#[derive(Debug, Deserialize)]
pub struct RunsResponse {
    pub workflow_runs: Vec<RemoteRun>,
}

/// Response from the run jobs endpoint.
#[derive(Debug, Deserialize)]
pub struct JobsResponse {
    pub jobs: Vec<RemoteJob>,
}
