//! Throughput load driver.
//!
//! A load test is a set of weighted scenarios, each a suite contributing
//! a percentage of the generated traffic, optionally capped to a number
//! of concurrent threads. The scheduler picks scenarios proportional to
//! their percentage and launches one suite execution per pick at the
//! configured rate.

use hdrhistogram::Histogram;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::raw::{RawLoadTest, RawScenario};
use crate::scope::{new_scope, Variables};
use crate::status::Status;
use crate::suite;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("load test has no scenarios")]
    NoScenarios,

    #[error("scenario {name:?} has non-positive percentage {percentage}")]
    BadPercentage { name: String, percentage: i32 },
}

/// Parameters of a load run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LoadOptions {
    /// Suite executions started per second.
    pub rate: f64,

    /// Total wall-clock duration of the run.
    #[serde(with = "crate::utils::duration_serde")]
    pub duration: Duration,

    /// Hard cap on started suite executions; 0 means unlimited.
    pub max_count: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            rate: 10.0,
            duration: Duration::from_secs(10),
            max_count: 0,
        }
    }
}

/// Aggregate statistics of one scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScenarioStats {
    pub name: String,
    pub executions: u64,
    pub passed: u64,
    pub failed: u64,
    pub errored: u64,
    pub bogus: u64,
}

/// Aggregate result of a load run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadResult {
    pub started_executions: u64,
    pub completed_executions: u64,
    pub scenarios: Vec<ScenarioStats>,

    /// Suite latency percentiles in milliseconds.
    pub p50_ms: u64,
    pub p90_ms: u64,
    pub p99_ms: u64,
}

/// Picks scenarios proportional to their percentage.
///
/// Uses a cumulative weight table with binary search, so a pick is
/// O(log n).
pub struct ScenarioPicker {
    scenarios: Vec<RawScenario>,
    cumulative: Vec<i64>,
    total: i64,
}

impl ScenarioPicker {
    pub fn new(scenarios: Vec<RawScenario>) -> Result<Self, LoadError> {
        if scenarios.is_empty() {
            return Err(LoadError::NoScenarios);
        }
        let mut cumulative = Vec::with_capacity(scenarios.len());
        let mut total: i64 = 0;
        for scenario in &scenarios {
            if scenario.percentage <= 0 {
                return Err(LoadError::BadPercentage {
                    name: scenario.name.clone(),
                    percentage: scenario.percentage,
                });
            }
            total += scenario.percentage as i64;
            cumulative.push(total);
        }
        Ok(ScenarioPicker {
            scenarios,
            cumulative,
            total,
        })
    }

    /// Pick one scenario index, weighted by percentage.
    pub fn pick(&self) -> usize {
        let ticket = rand::thread_rng().gen_range(0..self.total);
        self.cumulative
            .binary_search_by(|&weight| {
                if weight <= ticket {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Greater
                }
            })
            .unwrap_or_else(|i| i)
    }

    pub fn scenarios(&self) -> &[RawScenario] {
        &self.scenarios
    }

    /// Selection probability per scenario.
    pub fn probabilities(&self) -> Vec<(String, f64)> {
        self.scenarios
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    s.percentage as f64 / self.total as f64,
                )
            })
            .collect()
    }
}

struct ScenarioCounters {
    executions: u64,
    passed: u64,
    failed: u64,
    errored: u64,
    bogus: u64,
}

/// Run a load test: start suite executions at `options.rate` until the
/// duration (or max count) is reached, then wait for stragglers.
pub async fn run(
    load: &RawLoadTest,
    global: &Variables,
    options: &LoadOptions,
) -> Result<LoadResult, LoadError> {
    let load_scope = new_scope(global, &load.variables, true);

    let picker = Arc::new(ScenarioPicker::new(load.scenarios.clone())?);
    for (name, probability) in picker.probabilities() {
        info!(scenario = %name, probability, "scenario weight");
    }

    // Per-scenario thread caps; 0 means unlimited which is modelled as a
    // generously sized semaphore.
    let limits: Vec<Arc<Semaphore>> = picker
        .scenarios()
        .iter()
        .map(|s| {
            let permits = if s.max_threads == 0 {
                Semaphore::MAX_PERMITS
            } else {
                s.max_threads
            };
            Arc::new(Semaphore::new(permits))
        })
        .collect();

    let counters: Arc<Mutex<Vec<ScenarioCounters>>> = Arc::new(Mutex::new(
        picker
            .scenarios()
            .iter()
            .map(|_| ScenarioCounters {
                executions: 0,
                passed: 0,
                failed: 0,
                errored: 0,
                bogus: 0,
            })
            .collect(),
    ));
    let histogram = Arc::new(Mutex::new(
        Histogram::<u64>::new_with_bounds(1, 3_600_000, 3)
            .unwrap_or_else(|_| Histogram::new(3).expect("histogram")),
    ));

    let interval = Duration::from_secs_f64(1.0 / options.rate.max(0.001));
    let deadline = Instant::now() + options.duration;
    let mut started: u64 = 0;
    let mut handles = Vec::new();
    let mut next_launch = Instant::now();

    while Instant::now() < deadline {
        if options.max_count != 0 && started >= options.max_count as u64 {
            break;
        }

        let index = picker.pick();
        let permit = match limits[index].clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // Scenario at its thread cap; skip this tick.
                debug!(scenario = index, "scenario at max threads, dropping tick");
                tokio::time::sleep_until(tokio::time::Instant::from_std(
                    next_launch + interval,
                ))
                .await;
                next_launch += interval;
                continue;
            }
        };

        started += 1;
        let picker = picker.clone();
        let counters = counters.clone();
        let histogram = histogram.clone();
        let scope = new_scope(
            &load_scope,
            &picker.scenarios()[index].variables,
            true,
        );

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let scenario = &picker.scenarios()[index];
            let begin = Instant::now();
            let result = suite::execute(&scenario.suite, &scope).await;
            let elapsed_ms = begin.elapsed().as_millis() as u64;

            {
                let mut h = histogram.lock().await;
                let _ = h.record(elapsed_ms.max(1));
            }
            let mut counts = counters.lock().await;
            let c = &mut counts[index];
            c.executions += 1;
            match result.status {
                Status::Fail => c.failed += 1,
                Status::Error => c.errored += 1,
                Status::Bogus => c.bogus += 1,
                _ => c.passed += 1,
            }
        }));

        next_launch += interval;
        tokio::time::sleep_until(tokio::time::Instant::from_std(next_launch)).await;
    }

    info!(started, "load generation finished, draining");
    let mut completed: u64 = 0;
    for handle in handles {
        match handle.await {
            Ok(()) => completed += 1,
            Err(e) => warn!(error = %e, "scenario task failed"),
        }
    }

    let counts = counters.lock().await;
    let scenarios = picker
        .scenarios()
        .iter()
        .zip(counts.iter())
        .map(|(s, c)| ScenarioStats {
            name: s.name.clone(),
            executions: c.executions,
            passed: c.passed,
            failed: c.failed,
            errored: c.errored,
            bogus: c.bogus,
        })
        .collect();

    let h = histogram.lock().await;
    Ok(LoadResult {
        started_executions: started,
        completed_executions: completed,
        scenarios,
        p50_ms: h.value_at_quantile(0.50),
        p90_ms: h.value_at_quantile(0.90),
        p99_ms: h.value_at_quantile(0.99),
    })
}

/// Render a short human-readable summary of a load result.
pub fn summarize(result: &LoadResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "executions: {} started, {} completed\n",
        result.started_executions, result.completed_executions
    ));
    out.push_str(&format!(
        "latency: p50 {}ms, p90 {}ms, p99 {}ms\n",
        result.p50_ms, result.p90_ms, result.p99_ms
    ));
    for s in &result.scenarios {
        out.push_str(&format!(
            "  {}: {} runs ({} pass, {} fail, {} error, {} bogus)\n",
            s.name, s.executions, s.passed, s.failed, s.errored, s.bogus
        ));
    }
    out
}
