use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use url::Url;

use crate::error::{CiLoadError, Result};

use super::types::{JobsResponse, RemoteJob, RemoteRun, RunsResponse};

/// Retry behavior for transient remote failures (server errors, rate
/// limiting, connection drops). Attempts are per logical call; delay doubles
/// per attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// GitHub Actions API client covering the four operations the harness
/// consumes: dispatch a workflow, page through bulk runs, fetch one run
/// authoritatively, and fetch a run's job list.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: Url,
    owner: String,
    repo: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API base URL (e.g., "https://api.github.com")
    /// * `owner` - Repository owner/organization
    /// * `repo` - Repository name
    /// * `token` - Optional personal access token
    pub fn new(base_url: &str, owner: &str, repo: &str, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("ciload/0.3"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| CiLoadError::Config(format!("Invalid token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| CiLoadError::Config(format!("Failed to build HTTP client: {e}")))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| CiLoadError::Config(format!("Invalid base URL: {e}")))?;

        Ok(Self {
            client,
            base_url,
            owner: owner.to_string(),
            repo: repo.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Override the retry policy (tests shrink the delays).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn repo_url(&self, path: &str) -> Result<Url> {
        let full = format!("repos/{}/{}/{}", self.owner, self.repo, path);
        self.base_url
            .join(&full)
            .map_err(|e| CiLoadError::Config(format!("Invalid endpoint {full}: {e}")))
    }

    /// Trigger a `workflow_dispatch` for the given workflow file.
    pub async fn dispatch_workflow(
        &self,
        workflow: &str,
        git_ref: &str,
        inputs: &serde_json::Value,
    ) -> Result<()> {
        let url = self.repo_url(&format!("actions/workflows/{workflow}/dispatches"))?;
        let body = serde_json::json!({ "ref": git_ref, "inputs": inputs });

        self.send_with_retry(|| self.client.post(url.clone()).json(&body))
            .await?;
        Ok(())
    }

    /// Fetch one page of `workflow_dispatch` runs created at or after the
    /// given instant. Page numbering starts at 1, mirroring the remote API.
    pub async fn list_runs(
        &self,
        page: u32,
        per_page: usize,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<RemoteRun>> {
        let url = self.repo_url("actions/runs")?;
        let created = format!(">={}", created_after.format("%Y-%m-%dT%H:%M:%SZ"));
        let page_str = page.to_string();
        let per_page_str = per_page.to_string();

        let response = self
            .send_with_retry(|| {
                self.client.get(url.clone()).query(&[
                    ("event", "workflow_dispatch"),
                    ("created", created.as_str()),
                    ("per_page", per_page_str.as_str()),
                    ("page", page_str.as_str()),
                ])
            })
            .await?;

        let body: RunsResponse = response.json().await?;
        Ok(body.workflow_runs)
    }

    /// Authoritative per-id fetch, the source of truth when bulk pages are
    /// stale or have dropped a record between page boundaries.
    pub async fn get_run(&self, run_id: u64) -> Result<RemoteRun> {
        let url = self.repo_url(&format!("actions/runs/{run_id}"))?;
        let response = self.send_with_retry(|| self.client.get(url.clone())).await?;
        Ok(response.json().await?)
    }

    /// Fetch the full job list for a run, following pagination.
    pub async fn get_run_jobs(&self, run_id: u64) -> Result<Vec<RemoteJob>> {
        let mut jobs = Vec::new();
        let mut page = 1u32;

        loop {
            let url = self.repo_url(&format!("actions/runs/{run_id}/jobs"))?;
            let page_str = page.to_string();
            let response = self
                .send_with_retry(|| {
                    self.client
                        .get(url.clone())
                        .query(&[("per_page", "100"), ("page", page_str.as_str())])
                })
                .await?;

            let body: JobsResponse = response.json().await?;
            let count = body.jobs.len();
            jobs.extend(body.jobs);

            if count < 100 {
                break;
            }
            page += 1;
        }

        Ok(jobs)
    }

    /// Send a request, retrying transient failures with exponential backoff
    /// up to the policy bound. Non-transient HTTP errors and exhausted
    /// retries surface as `CiLoadError::Api`.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let response = match build().send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                    if attempt >= self.retry.attempts {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({}), retrying in {:?} ({}/{})",
                        e,
                        self.retry.delay(attempt),
                        attempt + 1,
                        self.retry.attempts
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if is_transient(status) && attempt < self.retry.attempts {
                warn!(
                    "API returned {}, retrying in {:?} ({}/{})",
                    status,
                    self.retry.delay(attempt),
                    attempt + 1,
                    self.retry.attempts
                );
                tokio::time::sleep(self.retry.delay(attempt)).await;
                attempt += 1;
                continue;
            }

            return Err(CiLoadError::Api(format!(
                "{} returned {}",
                response.url().path(),
                status
            )));
        }
    }
}

/// GitHub reports rate limiting as 403/429; those and the server error class
/// are worth retrying.
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::FORBIDDEN
}
