//! Raw declarative documents as read from disk.
//!
//! Documents are JSON objects with PascalCase keys. A test document can
//! reference mixin files which are merged into it; a suite document
//! references test files (or carries inline tests) in its Setup, Main
//! and Teardown phases; mock and load documents follow the same scheme.
//! An in-memory file bundle format allows whole suites in one string.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::mock::Mock;
use crate::scope::{new_replacer, Variables};
use crate::test::Test;

#[derive(Error, Debug)]
pub enum RawError {
    #[error("file {0} not found")]
    FileNotFound(String),

    #[error("cannot read {name}: {reason}")]
    Io { name: String, reason: String },

    #[error("file {name}: {reason}")]
    Parse { name: String, reason: String },

    #[error("malformed part {0} in file bundle")]
    MalformedBundle(usize),

    #[error("duplicate name {0:?} in file bundle")]
    DuplicateBundleName(String),

    #[error("cannot load mixin {name}: {reason}")]
    Mixin { name: String, reason: String },

    #[error("cannot load test {name} ({position}): {reason}")]
    Element {
        name: String,
        position: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

/// A textual file, either from disk or from an in-memory bundle.
#[derive(Debug, Clone, Default)]
pub struct File {
    pub name: String,
    pub data: String,
}

impl File {
    pub fn dirname(&self) -> String {
        match self.name.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => ".".to_string(),
        }
    }

    pub fn basename(&self) -> String {
        match self.name.rsplit_once('/') {
            Some((_, base)) => base.to_string(),
            None => self.name.clone(),
        }
    }
}

/// An in-memory file system. An empty file system reads from disk.
#[derive(Debug, Clone, Default)]
pub struct FileSystem {
    files: BTreeMap<String, File>,
}

impl FileSystem {
    /// A file system backed by the real OS file system.
    pub fn real() -> Self {
        FileSystem::default()
    }

    /// Parse a bundle of the form
    ///
    /// ```text
    /// # <filename1>
    /// <content1>
    /// # <filename2>
    /// <content2>
    /// ```
    ///
    /// Duplicate names are rejected.
    pub fn from_bundle(txt: &str) -> Result<Self, RawError> {
        let txt = format!("\n{}", txt);
        let mut files = BTreeMap::new();
        for (i, part) in txt.split("\n#").enumerate() {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, data) = part
                .split_once('\n')
                .ok_or(RawError::MalformedBundle(i + 1))?;
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(RawError::MalformedBundle(i + 1));
            }
            if files.contains_key(&name) {
                return Err(RawError::DuplicateBundleName(name));
            }
            files.insert(
                name.clone(),
                File {
                    name,
                    data: data.to_string(),
                },
            );
        }
        Ok(FileSystem { files })
    }

    /// Load a file by name.
    pub fn load(&self, name: &str) -> Result<File, RawError> {
        if self.files.is_empty() {
            let data = std::fs::read_to_string(name).map_err(|e| RawError::Io {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(File {
                name: name.to_string(),
                data,
            });
        }
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| RawError::FileNotFound(name.to_string()))
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if name.starts_with('/') || dir.is_empty() || dir == "." {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

// ---------------------------------------------------------------------------
// RawTest

// Lax pre-parse of a test document for the loader-level keys.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct TestHead {
    mixin: Vec<String>,
    variables: Variables,
}

/// A test as read from disk, with its mixins and default variables.
#[derive(Debug, Clone)]
pub struct RawTest {
    pub file: File,
    pub mixins: Vec<File>,
    pub variables: Variables,
    /// Variables from the suite element referencing this test.
    pub context_vars: Variables,
    pub mocks: Vec<RawMock>,
    disabled: bool,
}

impl RawTest {
    pub fn load(name: &str, fs: &FileSystem) -> Result<RawTest, RawError> {
        let file = fs.load(name)?;
        RawTest::from_file(file, fs)
    }

    fn from_file(file: File, fs: &FileSystem) -> Result<RawTest, RawError> {
        let head: TestHead =
            serde_json::from_str(&file.data).map_err(|e| RawError::Parse {
                name: file.name.clone(),
                reason: e.to_string(),
            })?;

        let dir = file.dirname();
        let mut mixins = Vec::with_capacity(head.mixin.len());
        for mixin_name in &head.mixin {
            let path = join_path(&dir, mixin_name);
            let mixin = fs.load(&path).map_err(|e| RawError::Mixin {
                name: mixin_name.clone(),
                reason: e.to_string(),
            })?;
            mixins.push(mixin);
        }

        Ok(RawTest {
            file,
            mixins,
            variables: head.variables,
            context_vars: Variables::new(),
            mocks: Vec::new(),
            disabled: false,
        })
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }

    pub fn enable(&mut self) {
        self.disabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Substitute the scope into the raw text, parse it and merge the
    /// mixins, producing an executable [`Test`].
    pub fn to_test(&self, scope: &Variables) -> Result<Test, RawError> {
        let repl = new_replacer(scope).map_err(|e| RawError::Parse {
            name: self.file.name.clone(),
            reason: e.to_string(),
        })?;

        let primary = parse_test_doc(&repl.replace(&self.file.data), &self.file.name)?;

        let mut mixins = Vec::with_capacity(self.mixins.len());
        for mixin_file in &self.mixins {
            mixins.push(parse_test_doc(
                &repl.replace(&mixin_file.data),
                &mixin_file.name,
            )?);
        }

        let mut merged = merge_tests(primary, mixins);
        merged.variables = self.variables.clone();
        Ok(merged)
    }
}

// Strict parse of a test document. The loader-level Mixin key is
// dropped first; everything else must map to a Test field.
fn parse_test_doc(data: &str, name: &str) -> Result<Test, RawError> {
    let mut value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| RawError::Parse {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    if let Some(object) = value.as_object_mut() {
        object.remove("Mixin");
    }
    serde_json::from_value(value).map_err(|e| RawError::Parse {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Merge mixins into a primary test. Headers and parameters are
/// union-appended, checks and extractions appended; the body is only
/// overridden by a mixin that sets one; name, description and the
/// redirect policy stay with the primary.
pub fn merge_tests(primary: Test, mixins: Vec<Test>) -> Test {
    let mut merged = primary;
    for mixin in mixins {
        for (name, values) in mixin.request.header {
            merged
                .request
                .header
                .entry(name)
                .or_default()
                .extend(values);
        }
        for (name, values) in mixin.request.params {
            merged
                .request
                .params
                .entry(name)
                .or_default()
                .extend(values);
        }
        merged.request.cookies.extend(mixin.request.cookies);
        if merged.request.body.is_empty() && !mixin.request.body.is_empty() {
            merged.request.body = mixin.request.body;
        }
        merged.checks.extend(mixin.checks);
        for (name, extractor) in mixin.data_extraction {
            merged.data_extraction.entry(name).or_insert(extractor);
        }
        for (name, value) in mixin.variables {
            merged.variables.entry(name).or_insert(value);
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// RawSuite

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
struct ElementDoc {
    file: String,
    variables: Variables,
    mocks: Vec<String>,
    test: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
struct SuiteDoc {
    name: String,
    description: String,
    setup: Vec<ElementDoc>,
    main: Vec<ElementDoc>,
    teardown: Vec<ElementDoc>,
    keep_cookies: bool,
    omit_checks: bool,
    variables: Variables,
    verbosity: i32,
}

/// A suite document with its referenced tests loaded.
#[derive(Debug, Clone)]
pub struct RawSuite {
    pub file: File,
    pub name: String,
    pub description: String,
    pub keep_cookies: bool,
    pub omit_checks: bool,
    pub variables: Variables,
    pub verbosity: i32,
    pub setup_count: usize,
    pub main_count: usize,
    pub teardown_count: usize,
    tests: Vec<RawTest>,
}

impl RawSuite {
    /// Load a suite and all tests and mocks it references.
    pub fn load(name: &str, fs: &FileSystem) -> Result<RawSuite, RawError> {
        let file = fs.load(name)?;
        let doc: SuiteDoc = serde_json::from_str(&file.data).map_err(|e| RawError::Parse {
            name: file.name.clone(),
            reason: e.to_string(),
        })?;
        let dir = file.dirname();

        let mut tests = Vec::new();
        let mut load_phase = |elements: &[ElementDoc], which: &str| -> Result<(), RawError> {
            for (i, element) in elements.iter().enumerate() {
                let position = format!("{}. {}", i + 1, which);
                let mut raw = if !element.file.is_empty() {
                    let path = join_path(&dir, &element.file);
                    RawTest::load(&path, fs).map_err(|e| RawError::Element {
                        name: path.clone(),
                        position: position.clone(),
                        reason: e.to_string(),
                    })?
                } else if let Some(inline) = &element.test {
                    let name = format!("{}_inline-{}.{}", file.name, i + 1, which);
                    let data = serde_json::to_string(inline).map_err(|e| {
                        RawError::Element {
                            name: name.clone(),
                            position: position.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    RawTest::from_file(File { name, data }, fs).map_err(|e| {
                        RawError::Element {
                            name: file.name.clone(),
                            position: position.clone(),
                            reason: e.to_string(),
                        }
                    })?
                } else {
                    return Err(RawError::Element {
                        name: file.name.clone(),
                        position,
                        reason: "File and Test must not both be empty".into(),
                    });
                };
                raw.context_vars = element.variables.clone();
                for mock_name in &element.mocks {
                    let path = join_path(&dir, mock_name);
                    let mock = RawMock::load(&path, fs).map_err(|e| RawError::Element {
                        name: path.clone(),
                        position: position.clone(),
                        reason: e.to_string(),
                    })?;
                    raw.mocks.push(mock);
                }
                tests.push(raw);
            }
            Ok(())
        };

        load_phase(&doc.setup, "Setup")?;
        load_phase(&doc.main, "Main")?;
        load_phase(&doc.teardown, "Teardown")?;

        Ok(RawSuite {
            file,
            name: doc.name,
            description: doc.description,
            keep_cookies: doc.keep_cookies,
            omit_checks: doc.omit_checks,
            variables: doc.variables,
            verbosity: doc.verbosity,
            setup_count: doc.setup.len(),
            main_count: doc.main.len(),
            teardown_count: doc.teardown.len(),
            tests,
        })
    }

    pub fn raw_tests(&self) -> &[RawTest] {
        &self.tests
    }

    pub fn raw_tests_mut(&mut self) -> &mut [RawTest] {
        &mut self.tests
    }

    /// Validate that every referenced test produces a well-formed
    /// [`Test`] under the given global scope.
    pub fn validate(&self, global: &Variables) -> Result<(), RawError> {
        let suite_scope = self.suite_scope(global);
        let mut problems = Vec::new();
        for raw in &self.tests {
            let scope = element_scope(&suite_scope, raw);
            if let Err(e) = raw.to_test(&scope) {
                problems.push(format!(
                    "invalid test {} (included by {}): {}",
                    raw.file.name, self.file.name, e
                ));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(RawError::Other(problems.join("; ")))
        }
    }

    /// The scope visible to the suite itself.
    pub fn suite_scope(&self, global: &Variables) -> Variables {
        let mut scope = crate::scope::new_scope(global, &self.variables, true);
        scope.insert("SUITE_DIR".into(), self.file.dirname());
        scope.insert("SUITE_NAME".into(), self.file.basename());
        scope
    }
}

/// The scope visible to one suite element's test.
pub fn element_scope(suite_scope: &Variables, raw: &RawTest) -> Variables {
    let call_scope = crate::scope::new_scope(suite_scope, &raw.context_vars, true);
    let mut scope = crate::scope::new_scope(&call_scope, &raw.variables, false);
    scope.insert("TEST_DIR".into(), raw.file.dirname());
    scope.insert("TEST_NAME".into(), raw.file.basename());
    scope
}

// ---------------------------------------------------------------------------
// RawMock

// Lax pre-parse of a mock document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct MockHead {
    variables: Variables,
}

/// A mock as read from disk.
#[derive(Debug, Clone)]
pub struct RawMock {
    pub file: File,
    pub variables: Variables,
}

impl RawMock {
    pub fn load(name: &str, fs: &FileSystem) -> Result<RawMock, RawError> {
        let file = fs.load(name)?;
        let head: MockHead = serde_json::from_str(&file.data).map_err(|e| RawError::Parse {
            name: file.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(RawMock {
            file,
            variables: head.variables,
        })
    }

    /// Substitute the scope and produce an executable [`Mock`]. With
    /// `auto` set the COUNTER and RANDOM variables are generated.
    pub fn to_mock(&self, scope: &Variables, auto: bool) -> Result<Mock, RawError> {
        let mut vars = crate::scope::new_scope(scope, &self.variables, auto);
        vars.insert("MOCK_DIR".into(), self.file.dirname());
        vars.insert("MOCK_NAME".into(), self.file.basename());

        let repl = new_replacer(&vars).map_err(|e| RawError::Parse {
            name: self.file.name.clone(),
            reason: e.to_string(),
        })?;
        let substituted = repl.replace(&self.file.data);
        let mut mock: Mock =
            serde_json::from_str(&substituted).map_err(|e| RawError::Parse {
                name: self.file.name.clone(),
                reason: e.to_string(),
            })?;
        mock.scope = vars;
        Ok(mock)
    }
}

// ---------------------------------------------------------------------------
// RawLoadTest

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
struct ScenarioDoc {
    name: String,
    file: String,
    percentage: i32,
    max_threads: usize,
    variables: Variables,
    omit_checks: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase", deny_unknown_fields)]
struct LoadDoc {
    name: String,
    description: String,
    scenarios: Vec<ScenarioDoc>,
    variables: Variables,
}

/// One weighted scenario of a load test.
#[derive(Debug, Clone)]
pub struct RawScenario {
    pub name: String,
    pub percentage: i32,
    pub max_threads: usize,
    pub variables: Variables,
    pub omit_checks: bool,
    pub suite: RawSuite,
}

/// A load test document with its scenario suites loaded.
#[derive(Debug, Clone)]
pub struct RawLoadTest {
    pub file: File,
    pub name: String,
    pub description: String,
    pub scenarios: Vec<RawScenario>,
    pub variables: Variables,
}

impl RawLoadTest {
    pub fn load(name: &str, fs: &FileSystem) -> Result<RawLoadTest, RawError> {
        let file = fs.load(name)?;
        let doc: LoadDoc = serde_json::from_str(&file.data).map_err(|e| RawError::Parse {
            name: file.name.clone(),
            reason: e.to_string(),
        })?;
        let dir = file.dirname();

        let mut scenarios = Vec::with_capacity(doc.scenarios.len());
        for (i, s) in doc.scenarios.iter().enumerate() {
            if s.file.is_empty() {
                return Err(RawError::Element {
                    name: file.name.clone(),
                    position: format!("{}. scenario", i + 1),
                    reason: "File must not be empty".into(),
                });
            }
            let path = join_path(&dir, &s.file);
            let suite = RawSuite::load(&path, fs).map_err(|e| RawError::Element {
                name: path.clone(),
                position: format!("{}. scenario", i + 1),
                reason: e.to_string(),
            })?;
            let mut scenario_suite = suite;
            if s.omit_checks {
                scenario_suite.omit_checks = true;
            }
            scenarios.push(RawScenario {
                name: if s.name.is_empty() {
                    scenario_suite.name.clone()
                } else {
                    s.name.clone()
                },
                percentage: s.percentage,
                max_threads: s.max_threads,
                variables: s.variables.clone(),
                omit_checks: s.omit_checks,
                suite: scenario_suite,
            });
        }

        Ok(RawLoadTest {
            file,
            name: doc.name,
            description: doc.description,
            scenarios,
            variables: doc.variables,
        })
    }
}
