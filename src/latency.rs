//! Latency distribution checks.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::checks::{CheckContext, CheckError};
use crate::request::{ParamsAs, Request, Response};
use crate::utils::parse_duration;

/// One percentile bound, e.g. "50% ≤ 6ms".
#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub percentile: f64,
    pub max: Duration,
}

/// Parses a limits string like "50% ≤ 6ms; 90% ≤ 20ms".
pub fn parse_limits(s: &str) -> Result<Vec<Limit>, CheckError> {
    let mut limits = Vec::new();
    for part in s.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (pct, dur) = part
            .split_once('≤')
            .or_else(|| part.split_once("<="))
            .ok_or_else(|| {
                CheckError::Malformed(format!("limit {:?} misses '≤'", part))
            })?;
        let pct = pct.trim().trim_end_matches('%').trim();
        let percentile: f64 = pct
            .parse()
            .map_err(|_| CheckError::Malformed(format!("bad percentile {:?}", pct)))?;
        if !(0.0..=100.0).contains(&percentile) {
            return Err(CheckError::Malformed(format!(
                "percentile {} out of range",
                percentile
            )));
        }
        let max = parse_duration(dur.trim()).map_err(CheckError::Malformed)?;
        limits.push(Limit { percentile, max });
    }
    if limits.is_empty() {
        return Err(CheckError::Malformed("no limits given".into()));
    }
    Ok(limits)
}

/// Re-issues the original request N times at a given concurrency and
/// checks the measured latency distribution against percentile limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LatencyCheck {
    /// Number of probe requests.
    pub n: usize,

    /// Concurrent workers.
    pub concurrent: usize,

    /// Percentile bounds, e.g. "50% ≤ 150ms; 90% ≤ 300ms".
    pub limits: String,

    /// Give every worker its own cookie session.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub individual_sessions: bool,
}

impl Default for LatencyCheck {
    fn default() -> Self {
        LatencyCheck {
            n: 50,
            concurrent: 2,
            limits: "75% ≤ 500ms".into(),
            individual_sessions: false,
        }
    }
}

impl LatencyCheck {
    pub fn prepare(&mut self) -> Result<(), CheckError> {
        if self.n == 0 {
            self.n = 50;
        }
        if self.concurrent == 0 {
            self.concurrent = 2;
        }
        parse_limits(&self.limits)?;
        Ok(())
    }

    pub async fn execute(
        &self,
        resp: &Response,
        ctx: &CheckContext<'_>,
    ) -> Result<(), CheckError> {
        let request = &resp.request;
        if !request.url.starts_with("http://") && !request.url.starts_with("https://") {
            return Err(CheckError::CantCheck(format!(
                "latency probing needs an http(s) URL, got {:?}",
                request.url
            )));
        }
        let limits = parse_limits(&self.limits)?;

        let histogram = Arc::new(Mutex::new(
            Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
                .map_err(|e| CheckError::CantCheck(e.to_string()))?,
        ));
        let failures = Arc::new(Mutex::new(0usize));

        let per_worker = self.n.div_ceil(self.concurrent);
        let mut handles = Vec::with_capacity(self.concurrent);
        for worker in 0..self.concurrent {
            let client = if self.individual_sessions {
                reqwest::Client::builder()
                    .cookie_store(true)
                    .build()
                    .map_err(|e| CheckError::CantCheck(e.to_string()))?
            } else {
                ctx.client.clone()
            };
            let request = request.clone();
            let histogram = histogram.clone();
            let failures = failures.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..per_worker {
                    let start = Instant::now();
                    let ok = probe_once(&client, &request).await;
                    let micros = start.elapsed().as_micros() as u64;
                    if ok {
                        let mut h = histogram.lock().await;
                        let _ = h.record(micros.max(1));
                    } else {
                        *failures.lock().await += 1;
                    }
                }
                debug!(worker, "latency worker done");
            }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| CheckError::CantCheck(e.to_string()))?;
        }

        let failures = *failures.lock().await;
        if failures > 0 {
            return Err(CheckError::Failed(format!(
                "{} of {} latency probes failed",
                failures, self.n
            )));
        }

        let histogram = histogram.lock().await;
        let mut violations = Vec::new();
        for limit in &limits {
            let measured_micros = histogram.value_at_quantile(limit.percentile / 100.0);
            let measured = Duration::from_micros(measured_micros);
            if measured > limit.max {
                violations.push(format!(
                    "{}% is {:?}, want ≤ {:?}",
                    limit.percentile, measured, limit.max
                ));
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CheckError::Failed(violations.join("; ")))
        }
    }
}

// Issue one probe; true on any successfully transported response.
async fn probe_once(client: &reqwest::Client, request: &Request) -> bool {
    let method = match request.method_or_get().parse::<reqwest::Method>() {
        Ok(m) => m,
        Err(_) => return false,
    };
    let mut builder = client.request(method, &request.url);
    for (name, values) in &request.header {
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    if request.params_as == ParamsAs::Url && !request.params.is_empty() {
        let pairs: Vec<(String, String)> = request
            .params
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.clone(), v.clone())))
            .collect();
        builder = builder.query(&pairs);
    }
    if !request.body.is_empty() {
        builder = builder.body(request.body.clone());
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    builder.send().await.is_ok()
}
