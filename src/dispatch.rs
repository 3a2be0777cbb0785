use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Semaphore;

use crate::github::GitHubClient;
use crate::tracker::TrackerHandle;

/// Result of one dispatch attempt, after retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    Rejected(String),
}

/// Issues create-run calls under a hard concurrency ceiling.
///
/// The semaphore is the single shared resource contended by in-flight
/// dispatch attempts: a permit is acquired before the outbound call and
/// released when it returns, so the outbound rate never exceeds the bound
/// regardless of the generator's intended rate. Retry/backoff for transient
/// remote failures lives in `GitHubClient`; exhaustion surfaces here as a
/// rejection and the record goes straight to its failure bucket.
pub struct DispatchClient {
    github: GitHubClient,
    tracker: TrackerHandle,
    workflow: String,
    git_ref: String,
    inputs: serde_json::Value,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl DispatchClient {
    pub fn new(
        github: GitHubClient,
        tracker: TrackerHandle,
        workflow: &str,
        git_ref: &str,
        inputs: serde_json::Value,
        concurrency: usize,
    ) -> Self {
        Self {
            github,
            tracker,
            workflow: workflow.to_string(),
            git_ref: git_ref.to_string(),
            inputs,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Dispatch one intent. The record is already `Pending` (registered by
    /// the generator before this is called); the tracker applies the
    /// resulting transition since it is the sole writer of record state.
    pub async fn dispatch(&self, tracking_id: &str) -> DispatchOutcome {
        let _permit = self.semaphore.acquire().await.unwrap();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = self
            .github
            .dispatch_workflow(&self.workflow, &self.git_ref, &self.inputs)
            .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Dispatched {} ({})", tracking_id, self.workflow);
                self.tracker.dispatch_accepted(tracking_id);
                DispatchOutcome::Accepted
            }
            Err(e) => {
                warn!("Dispatch {} rejected: {}", tracking_id, e);
                self.tracker.dispatch_rejected(tracking_id);
                DispatchOutcome::Rejected(e.to_string())
            }
        }
    }

    /// High-water mark of simultaneous outbound calls, for the run summary.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}
