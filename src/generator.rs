use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::tracker::TrackerHandle;

/// Shape of load generation over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum DispatchPattern {
    /// One intent every `60 / rate_per_minute` seconds.
    Steady { rate_per_minute: f64 },
    /// `size` simultaneous intents every `interval_secs`.
    Burst { size: usize, interval_secs: u64 },
    /// Baseline rate, elevated rate for a window, back to baseline. Phase
    /// transitions are instantaneous at the configured offsets.
    Spike {
        baseline_rate: f64,
        spike_rate: f64,
        spike_start_secs: u64,
        spike_duration_secs: u64,
    },
}

/// Emission offsets for a pattern over a test duration. Pure so the shape of
/// every pattern is testable without a clock.
pub fn schedule(pattern: &DispatchPattern, duration: Duration) -> Vec<Duration> {
    let total = duration.as_secs_f64();
    let mut offsets = Vec::new();

    match pattern {
        DispatchPattern::Steady { rate_per_minute } => {
            if *rate_per_minute <= 0.0 {
                return offsets;
            }
            let interval = 60.0 / rate_per_minute;
            let mut t = 0.0;
            while t < total {
                offsets.push(Duration::from_secs_f64(t));
                t += interval;
            }
        }
        DispatchPattern::Burst {
            size,
            interval_secs,
        } => {
            let interval = (*interval_secs).max(1) as f64;
            let mut t = 0.0;
            while t < total {
                for _ in 0..*size {
                    offsets.push(Duration::from_secs_f64(t));
                }
                t += interval;
            }
        }
        DispatchPattern::Spike {
            baseline_rate,
            spike_rate,
            spike_start_secs,
            spike_duration_secs,
        } => {
            if *baseline_rate <= 0.0 || *spike_rate <= 0.0 {
                return offsets;
            }
            let spike_start = *spike_start_secs as f64;
            let spike_end = spike_start + *spike_duration_secs as f64;
            let mut t = 0.0;
            while t < total {
                offsets.push(Duration::from_secs_f64(t));
                let in_spike = t >= spike_start && t < spike_end;
                let rate = if in_spike { *spike_rate } else { *baseline_rate };
                t += 60.0 / rate;
            }
        }
    }

    offsets
}

/// Produces the timed stream of dispatch intents for one test run.
///
/// Every emitted intent registers a `Pending` record with the tracker before
/// the dispatch call is issued, so a crash or cancellation never loses an
/// accounting slot. A stop signal halts future emission; already-spawned
/// dispatches drain to completion.
pub struct LoadGenerator {
    pattern: DispatchPattern,
    duration: Duration,
    tracker: TrackerHandle,
    id_prefix: String,
}

impl LoadGenerator {
    pub fn new(
        pattern: DispatchPattern,
        duration: Duration,
        tracker: TrackerHandle,
        id_prefix: &str,
    ) -> Self {
        Self {
            pattern,
            duration,
            tracker,
            id_prefix: id_prefix.to_string(),
        }
    }

    /// Run the emission schedule, invoking `dispatch` for each intent.
    /// Returns the number of intents emitted.
    pub async fn run<F, Fut>(&self, dispatch: F, mut stop: watch::Receiver<bool>) -> usize
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let offsets = schedule(&self.pattern, self.duration);
        info!(
            "Load generator: {} intents over {:?}",
            offsets.len(),
            self.duration
        );

        let start = Instant::now();
        let mut in_flight = JoinSet::new();
        let mut emitted = 0usize;

        for offset in offsets {
            if !wait_until_or_stop(start + offset, &mut stop).await {
                info!("Load generator stopped after {} intents", emitted);
                break;
            }

            let tracking_id = format!("{}-{:04}", self.id_prefix, emitted);
            self.tracker.register(tracking_id.clone(), Utc::now());
            in_flight.spawn(dispatch(tracking_id));
            emitted += 1;
        }

        // Let in-flight dispatches finish even after a stop.
        while in_flight.join_next().await.is_some() {}

        emitted
    }
}

/// Sleep until `when`, returning false immediately if the stop signal fires
/// first.
async fn wait_until_or_stop(when: Instant, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(when) => return true,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return false;
                }
            }
        }
    }
}
