//! Per-invocation timing of named steps.
//!
//! A [`FunctionStats`] is created for each handler invocation and passed down
//! explicitly; [`instrumented`] wraps one step, logs its start and end and
//! records how long it took.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct FunctionStats {
    durations: Mutex<BTreeMap<String, Vec<Duration>>>,
}

/// Aggregates over every recorded call of one step, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationSummary {
    pub len: usize,
    pub max: f64,
    pub min: f64,
    pub avg: f64,
    pub med: f64,
}

impl FunctionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, elapsed: Duration) {
        let mut guard = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(name.to_string()).or_default().push(elapsed);
    }

    pub fn summary(&self) -> BTreeMap<String, DurationSummary> {
        let guard = self.durations.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(name, samples)| (name.clone(), summarize(samples)))
            .collect()
    }
}

fn summarize(samples: &[Duration]) -> DurationSummary {
    let mut secs: Vec<f64> = samples.iter().map(Duration::as_secs_f64).collect();
    secs.sort_by(|a, b| a.total_cmp(b));
    let len = secs.len();
    let med = if len % 2 == 1 {
        secs[len / 2]
    } else {
        (secs[len / 2 - 1] + secs[len / 2]) / 2.0
    };
    DurationSummary {
        len,
        max: secs[len - 1],
        min: secs[0],
        avg: secs.iter().sum::<f64>() / len as f64,
        med,
    }
}

/// Run one named step, logging start/end and recording its duration.
pub async fn instrumented<F, T, E>(
    stats: &FunctionStats,
    name: &'static str,
    step: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let func_id = Uuid::new_v4();
    debug!(function = name, %func_id, "function start");
    let started = Instant::now();
    let result = step.await;
    let elapsed = started.elapsed();
    stats.record(name, elapsed);

    match &result {
        Ok(_) => debug!(
            function = name,
            %func_id,
            duration_sec = elapsed.as_secs_f64(),
            "function end (success)"
        ),
        Err(err) => warn!(
            function = name,
            %func_id,
            duration_sec = elapsed.as_secs_f64(),
            error = %err,
            "function end (failed)"
        ),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_matches_samples() {
        let stats = FunctionStats::new();
        for ms in [300, 100, 200, 400] {
            stats.record("fetch", Duration::from_millis(ms));
        }
        stats.record("parse", Duration::from_millis(50));

        let summary = stats.summary();
        let fetch = &summary["fetch"];
        assert_eq!(fetch.len, 4);
        assert!((fetch.max - 0.4).abs() < 1e-9);
        assert!((fetch.min - 0.1).abs() < 1e-9);
        assert!((fetch.avg - 0.25).abs() < 1e-9);
        assert!((fetch.med - 0.25).abs() < 1e-9);
        assert_eq!(summary["parse"].len, 1);
    }

    #[tokio::test]
    async fn instrumented_records_failures_too() {
        let stats = FunctionStats::new();
        let ok: Result<u8, String> = instrumented(&stats, "step", async { Ok(1) }).await;
        let err: Result<u8, String> =
            instrumented(&stats, "step", async { Err("boom".to_string()) }).await;
        assert_eq!(ok, Ok(1));
        assert_eq!(err, Err("boom".to_string()));
        assert_eq!(stats.summary()["step"].len, 2);
    }
}
