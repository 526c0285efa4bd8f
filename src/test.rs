//! Single-test lifecycle: prepare, substitute, request, retry, check,
//! extract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::adapter::{self, AdapterError, ClientPool};
use crate::checks::{
    run_checks, substitute_check, substitute_value, Check, CheckContext, CheckResult,
};
use crate::extractor::{extract_variables, Extractor, ExtractorMap};
use crate::mock::MockOutcome;
use crate::request::{Request, Response};
use crate::scope::{
    add_special_variables, new_replacer, new_scope, special_variables, Replacer, Variables,
};
use crate::status::{Criticality, Status};
use crate::utils::opt_duration_serde;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("{0}")]
    Substitution(String),

    #[error(transparent)]
    Scope(#[from] crate::scope::ScopeError),
}

/// Execution parameters of a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
pub struct Execution {
    /// Number of attempts, minimum 1.
    pub tries: usize,

    /// Pause between attempts.
    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub wait: Option<Duration>,

    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub pre_sleep: Option<Duration>,

    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub inter_sleep: Option<Duration>,

    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub post_sleep: Option<Duration>,

    pub verbosity: i32,

    pub criticality: Criticality,
}

impl Default for Execution {
    fn default() -> Self {
        Execution {
            tries: 1,
            wait: None,
            pre_sleep: None,
            inter_sleep: None,
            post_sleep: None,
            verbosity: 0,
            criticality: Criticality::Default,
        }
    }
}

/// Captured outcome of one test run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TestResult {
    pub status: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    #[serde(with = "opt_duration_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,

    /// Number of attempts actually made.
    pub tries: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub check_results: Vec<CheckResult>,

    /// Variables produced by the extractors after a Pass.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extracted: Variables,

    /// Outcomes of the mocks declared around this test.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mock_outcomes: Vec<MockOutcome>,
}

/// One declarative test: a request plus assertions and extractions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
pub struct Test {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,

    pub request: Request,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<Check>,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data_extraction: ExtractorMap,

    /// Default values of the variables used by this test.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: Variables,

    pub execution: Execution,

    #[serde(skip)]
    pub result: TestResult,
}

impl Default for Test {
    fn default() -> Self {
        Test {
            name: String::new(),
            description: String::new(),
            request: Request::default(),
            checks: Vec::new(),
            data_extraction: ExtractorMap::new(),
            variables: Variables::new(),
            execution: Execution::default(),
            result: TestResult::default(),
        }
    }
}

impl Test {
    /// Prepare every check. A prepare failure marks the test Bogus.
    pub fn prepare_checks(&mut self) -> Result<(), String> {
        for check in &mut self.checks {
            if let Err(e) = check.prepare() {
                let msg = format!("check {}: {}", check.name(), e);
                self.result.status = Status::Bogus;
                self.result.error = Some(msg.clone());
                return Err(msg);
            }
        }
        Ok(())
    }

    /// Returns a copy with the replacer applied to all string fields of
    /// the test, its request, its checks and its extractors.
    pub fn substitute_variables(&self, repl: &Replacer) -> Result<Test, TestError> {
        let mut request = self.request.clone();
        request.method = repl.replace(&request.method);
        request.url = repl.replace(&request.url);
        request.body = repl.replace(&request.body);
        request.params = replace_value_map(&request.params, repl);
        request.header = replace_value_map(&request.header, repl);
        for cookie in &mut request.cookies {
            cookie.value = repl.replace(&cookie.value);
        }

        let mut checks = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            checks.push(
                substitute_check(check, repl).map_err(|e| TestError::Substitution(e.to_string()))?,
            );
        }

        let mut data_extraction = ExtractorMap::new();
        for (name, extractor) in &self.data_extraction {
            data_extraction.insert(name.clone(), substitute_extractor(extractor, repl)?);
        }

        Ok(Test {
            name: repl.replace(&self.name),
            description: repl.replace(&self.description),
            request,
            checks,
            data_extraction,
            variables: self.variables.clone(),
            execution: self.execution.clone(),
            result: TestResult::default(),
        })
    }

    // All special-variable occurrences in this test's string fields.
    fn find_special_variables(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        add_special_variables(&self.name, &mut set);
        add_special_variables(&self.description, &mut set);
        add_special_variables(&self.request.url, &mut set);
        add_special_variables(&self.request.body, &mut set);
        for values in self.request.params.values().chain(self.request.header.values()) {
            for v in values {
                add_special_variables(v, &mut set);
            }
        }
        for cookie in &self.request.cookies {
            add_special_variables(&cookie.value, &mut set);
        }
        // String fields of checks and extractors via their document form.
        if let Ok(value) = serde_json::to_value(&self.checks) {
            collect_special_from_value(&value, &mut set);
        }
        if let Ok(value) = serde_json::to_value(&self.data_extraction) {
            collect_special_from_value(&value, &mut set);
        }
        set
    }

    /// Run the test: prepare, expand variables, then the retry loop of
    /// request plus checks, and extraction on success.
    pub async fn run(&mut self, pool: &ClientPool) {
        if self.result.status == Status::Bogus || self.result.status == Status::Skipped {
            return;
        }

        self.result.started = Some(Utc::now());
        let overall_start = std::time::Instant::now();

        if self.prepare_checks().is_err() {
            return;
        }

        // Expand special variables and the test's own defaults.
        let special = match special_variables(Utc::now(), &self.find_special_variables()) {
            Ok(vars) => vars,
            Err(e) => {
                self.result.status = Status::Bogus;
                self.result.error = Some(e.to_string());
                return;
            }
        };
        let scope = new_scope(&special, &self.variables, false);
        let repl = match new_replacer(&scope) {
            Ok(r) => r,
            Err(e) => {
                self.result.status = Status::Bogus;
                self.result.error = Some(e.to_string());
                return;
            }
        };
        let mut prepared = match self.substitute_variables(&repl) {
            Ok(t) => t,
            Err(e) => {
                self.result.status = Status::Bogus;
                self.result.error = Some(e.to_string());
                return;
            }
        };
        if prepared.prepare_checks().is_err() {
            self.result.status = prepared.result.status;
            self.result.error = prepared.result.error;
            return;
        }

        let client = match pool.client(&prepared.request.client_pool) {
            Ok(c) => c,
            Err(e) => {
                self.result.status = Status::Error;
                self.result.error = Some(e.to_string());
                return;
            }
        };

        if let Some(pre) = self.execution.pre_sleep {
            tokio::time::sleep(pre).await;
        }

        let tries = self.execution.tries.max(1);
        for attempt in 1..=tries {
            self.result.tries = attempt;
            debug!(test = %self.name, attempt, "starting attempt");

            match adapter::execute(&prepared.request, &client).await {
                Ok(resp) => {
                    if let Some(inter) = self.execution.inter_sleep {
                        tokio::time::sleep(inter).await;
                    }
                    let ctx = CheckContext { client: &client };
                    let results = run_checks(&prepared.checks, &resp, &ctx).await;
                    let worst = results
                        .iter()
                        .map(|r| r.status)
                        .max()
                        .unwrap_or(Status::Pass);
                    let first_error = results
                        .iter()
                        .find(|r| r.status > Status::Pass)
                        .and_then(|r| r.error.clone());

                    self.result.response = Some(resp);
                    self.result.check_results = results;
                    self.result.status = worst;
                    self.result.error = first_error;
                }
                Err(AdapterError::Bogus(msg)) => {
                    error!(test = %self.name, error = %msg, "bogus request");
                    self.result.status = Status::Bogus;
                    self.result.error = Some(msg);
                    break;
                }
                Err(AdapterError::Transport(msg)) => {
                    warn!(test = %self.name, attempt, error = %msg, "request failed");
                    self.result.status = Status::Error;
                    self.result.error = Some(msg);
                    self.result.response = None;
                    self.result.check_results = Vec::new();
                }
            }

            if self.result.status == Status::Pass {
                break;
            }
            if attempt < tries {
                if let Some(wait) = self.execution.wait {
                    tokio::time::sleep(wait).await;
                }
            }
        }

        // Extractors run at most once, on the final passing response.
        if self.result.status == Status::Pass {
            if let Some(resp) = &self.result.response {
                let (vars, failures) =
                    extract_variables(&prepared.data_extraction, resp, &self.name);
                self.result.extracted = vars;
                if let Some((name, err)) = failures.into_iter().next() {
                    self.result.status = Status::Error;
                    self.result.error =
                        Some(format!("extraction of {:?} failed: {}", name, err));
                }
            }
        }

        if let Some(post) = self.execution.post_sleep {
            tokio::time::sleep(post).await;
        }

        self.result.duration = Some(overall_start.elapsed());
        info!(
            test = %self.name,
            status = %self.result.status,
            tries = self.result.tries,
            "test finished"
        );
    }
}

fn replace_value_map(
    map: &crate::request::ValueMap,
    repl: &Replacer,
) -> crate::request::ValueMap {
    map.iter()
        .map(|(k, vs)| {
            (
                k.clone(),
                vs.iter().map(|v| repl.replace(v)).collect::<Vec<_>>(),
            )
        })
        .collect()
}

fn substitute_extractor(
    extractor: &Extractor,
    repl: &Replacer,
) -> Result<Extractor, TestError> {
    let mut value = serde_json::to_value(extractor)
        .map_err(|e| TestError::Substitution(e.to_string()))?;
    substitute_value(&mut value, repl);
    serde_json::from_value(value).map_err(|e| TestError::Substitution(e.to_string()))
}

fn collect_special_from_value(value: &serde_json::Value, set: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::String(s) => add_special_variables(s, set),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_special_from_value(item, set);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_special_from_value(item, set);
            }
        }
        _ => {}
    }
}

/// Returns `count` copies of the test with variables replaced; the value
/// of variable `v` in repetition `n` is `vars[v][n % len]`.
pub fn repeat(
    test: &Test,
    count: usize,
    vars: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<Test>, TestError> {
    let mut repetitions = Vec::with_capacity(count);
    for r in 0..count {
        let mut current = Variables::new();
        for (name, values) in vars {
            if values.is_empty() {
                continue;
            }
            current.insert(name.clone(), values[r % values.len()].clone());
        }
        let repl = new_replacer(&current)?;
        let mut rep = test.substitute_variables(&repl)?;
        for (name, value) in &current {
            rep.description
                .push_str(&format!("\nVar {}={:?}", name, value));
        }
        repetitions.push(rep);
    }
    Ok(repetitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{BodyContains, StatusCode};
    use crate::condition::Condition;

    #[test]
    fn test_document_parses() {
        let doc = r#"{
            "Name": "Homepage",
            "Request": { "URL": "https://example.org/" },
            "Checks": [
                {"Check": "StatusCode", "Expect": 200},
                {"Check": "BodyContains", "Text": "Welcome"}
            ],
            "DataExtraction": {
                "TOKEN": {"Extractor": "HeaderExtractor", "Name": "X-Token"}
            },
            "Variables": {"HOST": "example.org"},
            "Execution": {"Tries": 3, "Wait": "100ms"}
        }"#;
        let test: Test = serde_json::from_str(doc).unwrap();
        assert_eq!(test.name, "Homepage");
        assert_eq!(test.checks.len(), 2);
        assert_eq!(test.execution.tries, 3);
        assert_eq!(test.execution.wait, Some(Duration::from_millis(100)));
        assert!(test.data_extraction.contains_key("TOKEN"));
    }

    #[test]
    fn test_substitute_variables_reaches_checks() {
        let mut vars = Variables::new();
        vars.insert("HOST".into(), "example.org".into());
        vars.insert("GREETING".into(), "hello".into());
        let repl = new_replacer(&vars).unwrap();

        let test = Test {
            name: "greet {{HOST}}".into(),
            request: Request {
                url: "https://{{HOST}}/x".into(),
                ..Request::default()
            },
            checks: vec![Check::BodyContains(BodyContains {
                text: "{{GREETING}}".into(),
                count: 0,
            })],
            ..Test::default()
        };

        let substituted = test.substitute_variables(&repl).unwrap();
        assert_eq!(substituted.name, "greet example.org");
        assert_eq!(substituted.request.url, "https://example.org/x");
        match &substituted.checks[0] {
            Check::BodyContains(c) => assert_eq!(c.text, "hello"),
            other => panic!("wrong check {:?}", other),
        }
    }

    #[test]
    fn test_integer_substitution_in_checks() {
        let mut vars = Variables::new();
        vars.insert("#200".into(), "201".into());
        let repl = new_replacer(&vars).unwrap();

        let test = Test {
            checks: vec![Check::StatusCode(StatusCode { expect: 200 })],
            ..Test::default()
        };
        let substituted = test.substitute_variables(&repl).unwrap();
        match &substituted.checks[0] {
            Check::StatusCode(c) => assert_eq!(c.expect, 201),
            other => panic!("wrong check {:?}", other),
        }
    }

    #[test]
    fn test_find_special_variables_includes_checks() {
        let test = Test {
            request: Request {
                url: "https://example.org/?t={{NOW + 1m}}".into(),
                ..Request::default()
            },
            checks: vec![Check::Body(crate::checks::Body {
                condition: Condition {
                    contains: "{{RANDOM}}".into(),
                    ..Condition::default()
                },
            })],
            ..Test::default()
        };
        let set = test.find_special_variables();
        assert!(set.contains("{{NOW + 1m}}"));
        assert!(set.contains("{{RANDOM}}"));
    }

    #[tokio::test]
    async fn test_run_bogus_url() {
        let mut test = Test {
            name: "broken".into(),
            request: Request {
                url: "not a url at all".into(),
                ..Request::default()
            },
            ..Test::default()
        };
        let pool = ClientPool::new(false).unwrap();
        test.run(&pool).await;
        assert_eq!(test.result.status, Status::Bogus);
        assert!(test.result.error.is_some());
    }

    #[tokio::test]
    async fn test_run_connection_error_is_error_status() {
        let mut test = Test {
            name: "unreachable".into(),
            request: Request {
                // Reserved TEST-NET-1 address, nothing listens there.
                url: "http://192.0.2.1:9/".into(),
                timeout: Some(Duration::from_millis(200)),
                ..Request::default()
            },
            execution: Execution {
                tries: 2,
                ..Execution::default()
            },
            ..Test::default()
        };
        let pool = ClientPool::new(false).unwrap();
        test.run(&pool).await;
        assert_eq!(test.result.status, Status::Error);
        assert_eq!(test.result.tries, 2);
    }

    #[tokio::test]
    async fn test_run_file_scheme_with_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "payload ready").unwrap();

        let mut test = Test {
            name: "read file".into(),
            request: Request {
                url: format!("file://{}", path.display()),
                ..Request::default()
            },
            checks: vec![
                Check::StatusCode(StatusCode { expect: 200 }),
                Check::BodyContains(BodyContains {
                    text: "ready".into(),
                    count: 0,
                }),
            ],
            ..Test::default()
        };
        let pool = ClientPool::new(false).unwrap();
        test.run(&pool).await;
        assert_eq!(test.result.status, Status::Pass);
        assert_eq!(test.result.check_results.len(), 2);
    }

    #[tokio::test]
    async fn test_run_extraction_failure_downgrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"id": 7}"#).unwrap();

        let mut extraction = ExtractorMap::new();
        extraction.insert(
            "MISSING".into(),
            Extractor::JsonExtractor(crate::extractor::JsonExtractor {
                element: "nope".into(),
                ..crate::extractor::JsonExtractor::default()
            }),
        );

        let mut test = Test {
            name: "extract".into(),
            request: Request {
                url: format!("file://{}", path.display()),
                ..Request::default()
            },
            data_extraction: extraction,
            ..Test::default()
        };
        let pool = ClientPool::new(false).unwrap();
        test.run(&pool).await;
        assert_eq!(test.result.status, Status::Error);
    }

    #[test]
    fn test_repeat_cycles_variables() {
        let base = Test {
            name: "probe {{WHO}}".into(),
            request: Request {
                url: "https://example.org/{{WHO}}".into(),
                ..Request::default()
            },
            ..Test::default()
        };
        let mut vars = BTreeMap::new();
        vars.insert("WHO".to_string(), vec!["a".to_string(), "b".to_string()]);

        let reps = repeat(&base, 3, &vars).unwrap();
        assert_eq!(reps.len(), 3);
        assert_eq!(reps[0].name, "probe a");
        assert_eq!(reps[1].name, "probe b");
        assert_eq!(reps[2].name, "probe a");
        assert!(reps[0].description.contains("Var WHO=\"a\""));
    }
}
