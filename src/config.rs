use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analyzer::{AnalyzerParams, TestType};
use crate::generator::DispatchPattern;
use crate::tracker::TrackerConfig;

/// Configuration file structure for ciload.
///
/// One environment (the repository under test and its runner pool) plus any
/// number of named test profiles. Loaded from `ciload.toml` in the current
/// directory unless a path is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: EnvironmentConfig,

    /// Root directory for tracking and analysis reports
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    #[serde(default)]
    pub profiles: HashMap<String, TestProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Tag used in report paths and test run ids
    pub name: String,

    /// Repository owner (user or organization)
    pub owner: String,

    /// Repository name
    pub repo: String,

    /// GitHub API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API token; the CLI flag / GITHUB_TOKEN env take precedence
    pub token: Option<String>,

    /// Self-hosted runners available to the workflow under test
    #[serde(default = "default_runner_count")]
    pub runner_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProfile {
    pub test_type: TestType,

    /// Workflow file name or id to dispatch (e.g. `loadgen.yml`)
    pub workflow: String,

    #[serde(default = "default_git_ref")]
    pub git_ref: String,

    /// Static workflow inputs sent with every dispatch
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    pub duration_minutes: u64,

    pub pattern: DispatchPattern,

    #[serde(default = "default_max_wait_minutes")]
    pub max_wait_minutes: u64,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_staleness_minutes")]
    pub staleness_minutes: u64,

    /// Bound on concurrent dispatch calls
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,

    /// Bound on concurrent individual verification calls
    #[serde(default = "default_verify_concurrency")]
    pub verify_concurrency: usize,

    /// Sustained queue time (seconds) treated as a stress signal
    #[serde(default = "default_queue_alert_secs")]
    pub queue_alert_secs: f64,

    /// Failure rate (percent) treated as a breaking point
    #[serde(default = "default_failure_rate_alert")]
    pub failure_rate_alert: f64,
}

impl TestProfile {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_minutes * 60)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            staleness_threshold: chrono::Duration::minutes(self.staleness_minutes as i64),
            max_wait: chrono::Duration::minutes(self.max_wait_minutes as i64),
            verify_concurrency: self.verify_concurrency,
            ..TrackerConfig::default()
        }
    }

    pub fn analyzer_params(&self, runner_count: usize) -> AnalyzerParams {
        AnalyzerParams {
            runner_count,
            queue_alert_secs: self.queue_alert_secs,
            failure_rate_alert: self.failure_rate_alert,
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_runner_count() -> usize {
    4
}

fn default_git_ref() -> String {
    "main".to_string()
}

fn default_max_wait_minutes() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_staleness_minutes() -> u64 {
    10
}

fn default_dispatch_concurrency() -> usize {
    4
}

fn default_verify_concurrency() -> usize {
    2
}

fn default_queue_alert_secs() -> f64 {
    300.0
}

fn default_failure_rate_alert() -> f64 {
    10.0
}

impl Config {
    /// Load configuration from the given path, or from `./ciload.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Path::new("ciload.toml"),
        };
        Self::load_from_path(path)
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }

    pub fn profile(&self, name: &str) -> Result<&TestProfile> {
        self.profiles.get(name).with_context(|| {
            let mut known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            known.sort_unstable();
            format!(
                "unknown profile '{name}' (available: {})",
                known.join(", ")
            )
        })
    }
}
