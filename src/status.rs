//! Test outcome statuses and criticality levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a test, check or suite.
///
/// The variants form a total order from "best" to "worst"; aggregation of
/// several outcomes is simply the maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Not executed yet.
    #[default]
    NotRun,
    /// Deliberately not executed (e.g. after a setup failure).
    Skipped,
    /// Everything okay.
    Pass,
    /// An assertion did not hold.
    Fail,
    /// An infrastructure problem (network, subprocess, ...) prevented
    /// a proper verdict.
    Error,
    /// The test definition itself is broken.
    Bogus,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::NotRun => "NOTRUN",
            Status::Skipped => "SKIPPED",
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Error => "ERROR",
            Status::Bogus => "BOGUS",
        }
    }

    /// True for every state a test can end up in after execution.
    pub fn is_terminal(&self) -> bool {
        *self != Status::NotRun
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How much a test's outcome matters for the surrounding suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    /// The test's status counts as-is.
    #[default]
    Default,
    /// A non-Pass outcome is reported but does not degrade the suite.
    Warn,
    /// A non-Pass outcome counts as at most Error.
    Error,
    /// A non-Pass outcome aborts the remaining suite.
    Fatal,
}

impl Criticality {
    /// The status this test contributes to the suite summary.
    pub fn cap(&self, status: Status) -> Status {
        match self {
            Criticality::Warn if status > Status::Pass && status != Status::Bogus => Status::Pass,
            Criticality::Error => status.min(Status::Error),
            _ => status,
        }
    }
}
