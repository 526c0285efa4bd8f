//! Ordered execution of Setup, Main and Teardown tests.
//!
//! Setup and Main elements run in declaration order; the first non-Pass
//! Setup outcome skips every remaining Setup and Main element. Teardown
//! elements always run. The overall suite status is computed from Setup
//! and Main only. After each passing test its extracted variables are
//! written into the suite's globals, visible to all subsequent elements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapter::ClientPool;
use crate::mock::{reconcile, Mock, MockServer};
use crate::raw::{element_scope, RawSuite};
use crate::scope::{new_replacer, Variables};
use crate::status::{Criticality, Status};
use crate::test::Test;
use crate::utils::opt_duration_serde;

/// Result of executing a suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Suite {
    pub name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub keep_cookies: bool,

    pub status: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,

    pub tests: Vec<Test>,

    /// The initial variable assignment.
    pub variables: Variables,

    /// The globals after the last element ran.
    pub final_variables: Variables,
}

/// Counts of test outcomes in a suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub not_run: usize,
    pub skipped: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub bogus: usize,
}

impl Suite {
    pub fn stats(&self) -> Stats {
        let mut stats = Stats::default();
        for test in &self.tests {
            match test.result.status {
                Status::NotRun => stats.not_run += 1,
                Status::Skipped => stats.skipped += 1,
                Status::Pass => stats.passed += 1,
                Status::Fail => stats.failed += 1,
                Status::Error => stats.errored += 1,
                Status::Bogus => stats.bogus += 1,
            }
        }
        stats
    }
}

/// Execute a raw suite under the given global variables.
pub async fn execute(rs: &RawSuite, global: &Variables) -> Suite {
    let started = Utc::now();
    let start = std::time::Instant::now();

    let mut globals = rs.suite_scope(global);

    let (name, description) = match new_replacer(&globals) {
        Ok(repl) => (repl.replace(&rs.name), repl.replace(&rs.description)),
        Err(_) => (rs.name.clone(), rs.description.clone()),
    };

    let mut suite = Suite {
        name,
        description,
        keep_cookies: rs.keep_cookies,
        status: Status::NotRun,
        started: Some(started),
        variables: globals.clone(),
        ..Suite::default()
    };

    let pool = match ClientPool::new(rs.keep_cookies) {
        Ok(pool) => pool,
        Err(e) => {
            suite.status = Status::Error;
            suite.error = Some(e.to_string());
            return suite;
        }
    };

    let setup = rs.setup_count;
    let main = rs.main_count;
    let mut abort = false;

    info!(suite = %suite.name, tests = rs.raw_tests().len(), "starting suite");

    for (i, raw) in rs.raw_tests().iter().enumerate() {
        let phase = if i < setup {
            "Setup"
        } else if i < setup + main {
            "Main"
        } else {
            "Teardown"
        };
        let is_setup_or_main = i < setup + main;

        let scope = element_scope(&globals, raw);
        let mut test = match raw.to_test(&scope) {
            Ok(t) => t,
            Err(e) => {
                let mut bogus = Test {
                    name: raw.file.name.clone(),
                    ..Test::default()
                };
                bogus.result.status = Status::Bogus;
                bogus.result.error = Some(e.to_string());
                bogus
            }
        };
        if rs.omit_checks {
            test.checks.clear();
        }

        if !raw.is_enabled() || (abort && is_setup_or_main) {
            debug!(test = %test.name, phase, "skipping");
            test.result.status = Status::Skipped;
            suite.tests.push(test);
            continue;
        }

        if test.result.status != Status::Bogus {
            run_with_mocks(&mut test, raw, &scope, &pool).await;
        }

        if test.result.status == Status::Pass {
            for (name, value) in &test.result.extracted {
                match globals.get(name) {
                    Some(old) if old == value => {
                        debug!(variable = %name, "keeping variable")
                    }
                    Some(_) => debug!(variable = %name, value = %value, "updating variable"),
                    None => debug!(variable = %name, value = %value, "setting variable"),
                }
                globals.insert(name.clone(), value.clone());
            }
        }

        if test.result.status > Status::Pass && i < setup {
            warn!(test = %test.name, status = %test.result.status, "setup failed");
            abort = true;
        }
        if test.result.status > Status::Pass
            && test.execution.criticality == Criticality::Fatal
        {
            warn!(test = %test.name, "fatal test failed, aborting suite");
            abort = true;
        }

        suite.tests.push(test);
    }

    // Overall status from Setup and Main only; teardown outcomes are
    // recorded but excluded. Criticality caps each contribution.
    let mut overall = Status::NotRun;
    let mut errors = Vec::new();
    for test in suite.tests.iter().take(setup + main) {
        let contribution = test.execution.criticality.cap(test.result.status);
        if contribution != test.result.status {
            warn!(
                test = %test.name,
                status = %test.result.status,
                capped = %contribution,
                "criticality caps suite contribution"
            );
        }
        if contribution > overall {
            overall = contribution;
        }
        if contribution > Status::Pass {
            if let Some(e) = &test.result.error {
                errors.push(format!("{}: {}", test.name, e));
            }
        }
    }

    suite.status = overall;
    if !errors.is_empty() {
        suite.error = Some(errors.join("; "));
    }
    suite.duration = Some(start.elapsed());
    suite.final_variables = globals;

    info!(suite = %suite.name, status = %suite.status, "suite finished");
    suite
}

// Start the element's mocks, run the test, stop the mocks and reconcile.
async fn run_with_mocks(
    test: &mut Test,
    raw: &crate::raw::RawTest,
    scope: &Variables,
    pool: &ClientPool,
) {
    let mut mocks: Vec<Mock> = Vec::with_capacity(raw.mocks.len());
    for (i, raw_mock) in raw.mocks.iter().enumerate() {
        match raw_mock.to_mock(scope, true) {
            Ok(mock) => mocks.push(mock),
            Err(e) => {
                test.result.status = Status::Bogus;
                test.result.error = Some(format!("mock {} is malformed: {}", i + 1, e));
                return;
            }
        }
    }

    if mocks.is_empty() {
        test.run(pool).await;
        return;
    }

    let server = match MockServer::start(mocks.clone()).await {
        Ok(server) => server,
        Err(e) => {
            test.result.status = Status::Error;
            test.result.error = Some(e.to_string());
            return;
        }
    };

    test.run(pool).await;

    let outcomes = server.stop().await;
    reconcile(test, outcomes, &mocks);
}
